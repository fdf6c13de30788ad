//! Removal of isolated outliers ("spots") left by gamma hits and dead pixels.

use std::str::FromStr;

use log::debug;
use ndarray::{parallel::prelude::*, ArrayView2, Axis};

use crate::config::ReconConfig;
use crate::module::{Module, ModuleResult, Preprocessor};
use crate::parameters::{get_enum_parameter, get_float_parameter, or_default, Parameters};
use crate::reader::BlockParameters;
use crate::types::ProjectionStack;
use geometry::Roi;

/// Which neighbours of a pixel contribute to its replacement value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Connectivity {
    Four,
    #[default]
    Eight,
}

impl FromStr for Connectivity {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "4" => Ok(Self::Four),
            "8" => Ok(Self::Eight),
            other => Err(format!("connectivity must be 4 or 8, not {other}")),
        }
    }
}

impl Connectivity {
    fn offsets(self) -> &'static [(isize, isize)] {
        const FOUR : [(isize, isize); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];
        const EIGHT: [(isize, isize); 8] = [(-1, -1), (-1, 0), (-1, 1), (0, -1), (0, 1), (1, -1), (1, 0), (1, 1)];
        match self {
            Self::Four  => &FOUR,
            Self::Eight => &EIGHT,
        }
    }
}

/// A pixel is replaced by the median of its neighbours when it is not finite,
/// lies outside `[min_level, max_level]`, or differs from that median by more
/// than `threshold`.
#[derive(Debug)]
pub struct SpotClean {
    threshold   : f32,
    min_level   : f32,
    max_level   : f32,
    connectivity: Connectivity,
    configured  : bool,
}

impl Default for SpotClean {
    fn default() -> Self {
        Self { threshold: 0.95, min_level: -0.1, max_level: 7.0, connectivity: Connectivity::Eight, configured: false }
    }
}

impl SpotClean {

    fn is_spot(&self, value: f32, median: f32) -> bool {
        !value.is_finite()
            || value < self.min_level
            || value > self.max_level
            || (value - median).abs() > self.threshold
    }

    fn neighbour_median(&self, image: ArrayView2<f32>, r: usize, c: usize) -> Option<f32> {
        let (rows, cols) = image.dim();
        let mut values = self.connectivity.offsets().iter()
            .filter_map(|&(dr, dc)| {
                let (nr, nc) = (r.checked_add_signed(dr)?, c.checked_add_signed(dc)?);
                (nr < rows && nc < cols).then(|| image[[nr, nc]])
            })
            .filter(|v| v.is_finite())
            .collect::<Vec<_>>();
        if values.is_empty() { return None }
        values.sort_by(f32::total_cmp);
        let mid = values.len() / 2;
        Some(if values.len() % 2 == 0 { (values[mid - 1] + values[mid]) / 2.0 } else { values[mid] })
    }

    /// Clean one image, returning the number of replaced pixels.
    fn clean(&self, mut image: ndarray::ArrayViewMut2<f32>) -> usize {
        let source = image.to_owned();
        let mut replaced = 0;
        for ((r, c), v) in image.indexed_iter_mut() {
            let median = self.neighbour_median(source.view(), r, c);
            if self.is_spot(*v, median.unwrap_or(*v)) {
                *v = match median {
                    Some(m)                => m,
                    None if v.is_finite()  => v.clamp(self.min_level, self.max_level),
                    None                   => 0.0,
                };
                replaced += 1;
            }
        }
        replaced
    }
}

impl Module for SpotClean {

    fn name(&self) -> &str { "SpotClean" }

    fn configure(&mut self, _config: &ReconConfig, parameters: &Parameters) -> ModuleResult<()> {
        self.threshold    = or_default(get_float_parameter(parameters, "threshold"), self.threshold)?;
        self.min_level    = or_default(get_float_parameter(parameters, "min_level"), self.min_level)?;
        self.max_level    = or_default(get_float_parameter(parameters, "max_level"), self.max_level)?;
        self.connectivity = or_default(get_enum_parameter (parameters, "connectivity"), self.connectivity)?;
        if self.min_level >= self.max_level {
            return Err(format!("min_level {} must be below max_level {}", self.min_level, self.max_level).into());
        }
        if self.threshold <= 0.0 {
            return Err(format!("threshold {} must be positive", self.threshold).into());
        }
        self.configured = true;
        Ok(())
    }

    fn set_roi(&mut self, _roi: &Roi) -> ModuleResult<()> { Ok(()) }

    fn valid(&self) -> bool { self.configured }
}

impl Preprocessor for SpotClean {

    fn process(&mut self, stack: &mut ProjectionStack, _params: &mut BlockParameters) -> ModuleResult<()> {
        let this = &*self;
        let replaced: usize = stack.axis_iter_mut(Axis(0)).into_par_iter()
            .map(|projection| this.clean(projection))
            .sum();
        debug!("SpotClean replaced {replaced} of {} pixels", stack.len());
        Ok(())
    }
}
