use std::fmt;

use serde::Deserialize;
use units::{mm, Length, Ratio};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeamGeometry {
    #[default]
    Parallel,
    Cone,
    Helix,
}

impl fmt::Display for BeamGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BeamGeometry::Parallel => "parallel",
            BeamGeometry::Cone     => "cone",
            BeamGeometry::Helix    => "helix",
        };
        write!(f, "{name}")
    }
}

/// Source, object and detector arrangement of a cone-beam scan.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConeGeometry {
    /// Source to rotation axis distance
    pub sod: Length,
    /// Source to detector distance
    pub sdd: Length,
    /// Detector coordinates `[u, v]` (pixels) where the central ray hits
    pub piercing_point: [f32; 2],
    pub voxel_size: Length,
    /// Detector pixel size
    pub resolution: Length,
}

impl ConeGeometry {

    /// Magnification of a point `t` further from the source than the rotation
    /// axis (negative `t` is closer to the source).
    pub fn magnification_at(&self, t: Length) -> Ratio { self.sdd / (self.sod + t) }

    /// Detector pixel size projected back onto the rotation axis.
    pub fn pixel_at_axis(&self) -> Length { self.resolution * self.sod / self.sdd }
}

impl Default for ConeGeometry {
    fn default() -> Self {
        Self {
            sod: mm(1.0),
            sdd: mm(1.0),
            piercing_point: [0.0, 0.0],
            voxel_size: mm(1.0),
            resolution: mm(1.0),
        }
    }
}
