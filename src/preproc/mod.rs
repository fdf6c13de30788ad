//! Preprocessing stages shipped with the crate.
//!
//! + `LogNorm`: flat-field correction and conversion to attenuation
//! + `SpotClean`: replacement of outliers by their neighbourhood median

mod lognorm;
mod spotclean;

pub use lognorm::{LogNorm, ReferenceAverage};
pub use spotclean::{Connectivity, SpotClean};
