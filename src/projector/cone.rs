use log::debug;
use ndarray::{parallel::prelude::*, Axis, Zip};

use crate::config::ReconConfig;
use crate::module::{BackProjector, Module, ModuleResult};
use crate::parameters::Parameters;
use crate::publication::Publication;
use crate::reader::BlockParameters;
use crate::types::{ProjectionStack, Volume};
use geometry::{BeamGeometry, ConeGeometry, Roi};
use units::{mm_, ratio_};

use super::{allocate, check_stack, interpolate2, stack_roi, trigonometry, FilterCache, FilterSettings};

/// Feldkamp-Davis-Kress weighted filtered back-projection of cone-beam
/// projections acquired on a circular orbit.
///
/// The slices of a block (the "CBroi") are those set with `set_roi`. The
/// projections handed to `process` cover a larger band of detector rows,
/// which `BlockParameters::stack_roi` locates on the detector.
#[derive(Debug, Default)]
pub struct ConeFdk {
    filter  : FilterCache,
    geometry: ConeGeometry,
    rotation: f32,
    cb_roi  : Roi,
    volume  : Volume,
    configured: bool,
}

impl Module for ConeFdk {

    fn name(&self) -> &str { "ConeFdk" }

    fn configure(&mut self, config: &ReconConfig, parameters: &Parameters) -> ModuleResult<()> {
        let p = &config.projections;
        if p.geometry != BeamGeometry::Cone {
            return Err(format!("cannot reconstruct {} beam data", p.geometry).into());
        }
        self.filter   = FilterCache::new(FilterSettings::from_parameters(parameters)?);
        self.geometry = config.cone_geometry(p.projection_roi.unwrap_or(p.roi));
        self.rotation = config.matrix.rotation;
        let g = &self.geometry;
        if mm_(g.sod) <= 0.0 || mm_(g.sdd) <= 0.0 || mm_(g.voxel_size) <= 0.0 {
            return Err("cone geometry needs positive distances and voxel size".into());
        }
        debug!("ConeFdk: sod {} mm, sdd {} mm, piercing point {:?}, voxel {} mm",
               mm_(g.sod), mm_(g.sdd), g.piercing_point, mm_(g.voxel_size));
        self.configured = true;
        Ok(())
    }

    fn set_roi(&mut self, roi: &Roi) -> ModuleResult<()> {
        self.volume = allocate(roi)?;
        self.cb_roi = *roi;
        Ok(())
    }

    fn valid(&self) -> bool { self.configured }

    fn publications(&self) -> Vec<Publication> {
        vec![Publication::new(&["L.A. Feldkamp", "L.C. Davis", "J.W. Kress"],
                              "Practical cone-beam algorithm",
                              "Journal of the Optical Society of America A",
                              1984, 1, 6, "612-619", "10.1364/JOSAA.1.000612")]
    }
}

impl BackProjector for ConeFdk {

    fn process(&mut self, stack: &ProjectionStack, params: &BlockParameters) -> ModuleResult<()> {
        check_stack(stack, params)?;
        let source = stack_roi(stack, params);
        let trig = trigonometry(params, self.rotation)?;

        let g = self.geometry;
        let (sod, sdd) = (mm_(g.sod), mm_(g.sdd));
        let (resolution, voxel) = (mm_(g.resolution), mm_(g.voxel_size));
        let [pu, pv] = g.piercing_point;
        let radius = self.volume.len_of(Axis(1)) as f32 * voxel / 2.0;
        if sod <= radius {
            return Err(format!("source at {sod} mm is inside the reconstructed region of radius {radius} mm").into());
        }

        // Cosine weighting by the obliquity of each ray
        let mut weighted = stack.to_owned();
        for mut projection in weighted.axis_iter_mut(Axis(0)) {
            Zip::indexed(&mut projection).for_each(|(r, c), value| {
                let u = ((source.x0 + c) as f32 + 0.5 - pu) * resolution;
                let v = ((source.y0 + r) as f32 + 0.5 - pv) * resolution;
                *value *= sdd / (sdd * sdd + u * u + v * v).sqrt();
            });
        }
        self.filter.filter_rows(&mut weighted);

        let size = self.volume.len_of(Axis(1));
        let half = (size as f32 - 1.0) / 2.0;
        // Detector pixel projected onto the axis
        let pixel_at_axis = mm_(g.pixel_at_axis());
        let scale = voxel / pixel_at_axis;
        let (col0, row0) = (pu - 0.5 - source.x0 as f32, pv - 0.5 - source.y0 as f32);
        let first_slice = self.cb_roi.y0;

        self.volume.axis_iter_mut(Axis(0)).into_par_iter().enumerate().for_each(|(s, mut slice)| {
            let z = ((first_slice + s) as f32 + 0.5 - pv) * voxel;
            for ((iy, ix), out) in slice.indexed_iter_mut() {
                let x = (ix as f32 - half) * voxel;
                let y = (half - iy as f32) * voxel;
                *out += trig.iter().zip(weighted.outer_iter())
                    .map(|(&(cos, sin, weight), projection)| {
                        let t =  x * cos + y * sin;
                        let d = -x * sin + y * cos;
                        let m = ratio_(g.magnification_at(units::mm(-d)));
                        let u = col0 + t * m / resolution;
                        let v = row0 + z * m / resolution;
                        let distance_weight = (sod / (sod - d)).powi(2);
                        weight * distance_weight * interpolate2(projection, v, u)
                    })
                    .sum::<f32>() * scale;
            }
        });
        Ok(())
    }

    fn n_slices(&self) -> usize { self.volume.len_of(Axis(0)) }

    fn volume(&self) -> ndarray::ArrayView3<'_, f32> { self.volume.view() }
}
