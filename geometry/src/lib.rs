//! Frame and volume regions, beam geometry descriptions and the calculation
//! of the detector rows needed to reconstruct a block of slices.

mod roi;
mod beam;
mod extent;

pub use roi::{Roi, Voi};
pub use beam::{BeamGeometry, ConeGeometry};
pub use extent::{extended_roi, GeometryError, Margins};
