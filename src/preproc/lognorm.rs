//! Flat-field correction: open-beam and dark-current normalization with dose
//! compensation, optionally followed by the negative logarithm that turns
//! transmission into attenuation.
//!
//! Reference images are read with `FrameReader` unless the module is built
//! with another reader (`LogNorm::with_reader`), so that references stored in
//! another format can be registered alongside a matching projection reader.

use std::str::FromStr;

use log::{debug, info};
use ndarray::{parallel::prelude::*, Axis, Zip};

use crate::config::{ImageType, ReconConfig, ReferenceImages};
use crate::catalog::file_name;
use crate::image::crop;
use crate::module::{Module, ModuleResult, Preprocessor};
use crate::parameters::{get_bool_parameter, get_enum_parameter, or_default, Parameters};
use crate::reader::{BlockParameters, FrameReader, FrameTransform, ProjectionReader};
use crate::types::{Projection, ProjectionStack};
use geometry::Roi;

/// Smallest transmission passed to the logarithm.
const MIN_TRANSMISSION: f32 = 1e-6;

/// How a series of reference frames is combined into one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReferenceAverage {
    #[default]
    Mean,
    Median,
}

impl FromStr for ReferenceAverage {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mean"   => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            other    => Err(format!("unknown reference average '{other}'")),
        }
    }
}

/// Reference frame over the whole detector, and over the current ROI.
#[derive(Clone, Debug, Default)]
struct Reference {
    full: Projection,
    roi : Projection,
    dose: f32,
}

pub struct LogNorm {
    reader   : Box<dyn ProjectionReader>,
    open_beam: Option<Reference>,
    dark     : Option<Reference>,
    use_dose : bool,
    take_log : bool,
    /// Row copied into every row of the block for repeated sinograms
    repeat_row: Option<usize>,
    configured: bool,
}

impl Default for LogNorm {
    fn default() -> Self { Self::with_reader(Box::new(FrameReader)) }
}

impl LogNorm {

    /// A module reading its reference images with `reader`.
    pub fn with_reader(reader: Box<dyn ProjectionReader>) -> Self {
        Self {
            reader,
            open_beam : None,
            dark      : None,
            use_dose  : false,
            take_log  : false,
            repeat_row: None,
            configured: false,
        }
    }

    fn load(reader: &dyn ProjectionReader, refs: &ReferenceImages, transform: &FrameTransform,
            dose_roi: Option<&Roi>, average: ReferenceAverage) -> ModuleResult<Reference> {
        if refs.count == 0 { return Err(format!("no reference images in {}", refs.file_mask.display()).into()) }
        let frames = (refs.first_index..refs.first_index + refs.count)
            .map(|i| {
                let path = file_name(&refs.file_mask, i)
                    .ok_or_else(|| format!("reference mask {} has no '#' placeholder", refs.file_mask.display()))?;
                Ok(reader.read(&path, transform, None)?)
            })
            .collect::<ModuleResult<Vec<_>>>()?;

        let views = frames.iter().map(|f| f.view()).collect::<Vec<_>>();
        let stacked = ndarray::stack(Axis(0), &views)?;
        let full = match average {
            ReferenceAverage::Mean   => stacked.mean_axis(Axis(0)).ok_or("empty reference stack")?,
            ReferenceAverage::Median => stacked.map_axis(Axis(0), |lane| {
                let mut v = lane.to_vec();
                v.sort_by(f32::total_cmp);
                v[v.len() / 2]
            }),
        };
        let dose = match dose_roi {
            Some(r) => crop(full.view(), r).mean().unwrap_or(1.0),
            None    => 1.0,
        };
        debug!("{} reference images from {} combined, dose {dose}", refs.count, refs.file_mask.display());
        Ok(Reference { roi: full.clone(), full, dose })
    }

    fn crop_reference(&self, reference: &mut Reference, roi: &Roi) -> ModuleResult<()> {
        let rows = match self.repeat_row {
            Some(row) => roi.with_rows(row, row + 1),
            None      => *roi,
        };
        let (height, width) = reference.full.dim();
        if !Roi::full(width, height).contains(&rows) {
            return Err(format!("ROI {roi} outside {width}x{height} reference image").into());
        }
        let cropped = crop(reference.full.view(), &rows);
        reference.roi = cropped.broadcast((roi.height(), roi.width()))
            .ok_or("reference row does not broadcast over ROI")?
            .to_owned();
        Ok(())
    }
}

impl Module for LogNorm {

    fn name(&self) -> &str { "LogNorm" }

    fn configure(&mut self, config: &ReconConfig, parameters: &Parameters) -> ModuleResult<()> {
        let p = &config.projections;
        let average = or_default(get_enum_parameter(parameters, "average"), ReferenceAverage::Mean)?;
        self.take_log = or_default(get_bool_parameter(parameters, "log"), true)?;
        self.use_dose = or_default(get_bool_parameter(parameters, "use_dose"), p.dose_roi.is_some())?;
        self.repeat_row = (p.image_type == ImageType::RepeatSinogram).then_some(p.roi.y0);

        let reader = self.reader.as_ref();
        let transform = FrameTransform::from(p);
        let dose_roi = p.dose_roi.as_ref();
        self.open_beam = p.open_beam   .as_ref().map(|r| Self::load(reader, r, &transform, dose_roi, average)).transpose()?;
        self.dark      = p.dark_current.as_ref().map(|r| Self::load(reader, r, &transform, dose_roi, average)).transpose()?;
        info!("LogNorm: open beam {}, dark current {}, dose correction {}, log {}",
              self.open_beam.is_some(), self.dark.is_some(), self.use_dose, self.take_log);
        self.configured = true;
        Ok(())
    }

    fn set_roi(&mut self, roi: &Roi) -> ModuleResult<()> {
        if let Some(mut r) = self.open_beam.take() { self.crop_reference(&mut r, roi)?; self.open_beam = Some(r) }
        if let Some(mut r) = self.dark     .take() { self.crop_reference(&mut r, roi)?; self.dark      = Some(r) }
        Ok(())
    }

    fn valid(&self) -> bool { self.configured }
}

impl Preprocessor for LogNorm {

    fn process(&mut self, stack: &mut ProjectionStack, params: &mut BlockParameters) -> ModuleResult<()> {
        let (n, rows, cols) = stack.dim();
        if let Some(ob) = &self.open_beam {
            if ob.roi.dim() != (rows, cols) {
                return Err(format!("block of {rows}x{cols} does not match reference of {:?}", ob.roi.dim()).into());
            }
        }
        let dark_dose = self.dark.as_ref().map_or(0.0, |d| d.dose);
        let open_dose = self.open_beam.as_ref().map_or(1.0, |o| o.dose);
        let doses = if params.doses.len() == n { params.doses.clone() } else { vec![1.0; n] };
        let (open, dark) = (self.open_beam.as_ref(), self.dark.as_ref());
        let (use_dose, take_log) = (self.use_dose, self.take_log);

        stack.axis_iter_mut(Axis(0)).into_par_iter().zip(doses.par_iter()).for_each(|(mut projection, &dose)| {
            let scale = if use_dose {
                let d = dose - dark_dose;
                if d > 0.0 { (open_dose - dark_dose) / d } else { 1.0 }
            } else {
                1.0
            };
            let normalize = |value: f32, open: f32, dark: f32| {
                let t = (value - dark) / (open - dark) * scale;
                if take_log { -(t.max(MIN_TRANSMISSION)).ln() } else { t }
            };
            match (open, dark) {
                (Some(o), Some(d)) => Zip::from(&mut projection).and(&o.roi).and(&d.roi)
                    .for_each(|v, &o, &d| *v = normalize(*v, o, d)),
                (Some(o), None)    => Zip::from(&mut projection).and(&o.roi)
                    .for_each(|v, &o| *v = normalize(*v, o, 0.0)),
                (None, Some(d))    => Zip::from(&mut projection).and(&d.roi)
                    .for_each(|v, &d| *v = normalize(*v, 1.0 + d, d)),
                (None, None)       => projection.mapv_inplace(|v| normalize(v, 1.0, 0.0)),
            }
        });
        params.doses = vec![1.0; n];
        Ok(())
    }
}
