//! Detector rows needed to reconstruct a block of slices.
//!
//! In parallel beam every slice maps onto a single detector row, so the block
//! only needs a safety margin for filters with vertical support. In cone beam
//! a slice is seen on different detector rows depending on the distance of
//! each voxel from the source, so the rows read must cover the images of the
//! block's top and bottom edges at both the nearest and the furthest
//! magnification.

use log::debug;
use serde::Deserialize;
use thiserror::Error;
use units::{mm_, ratio_, Length};

use crate::{BeamGeometry, ConeGeometry, Roi};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("{0} beam geometry is not supported")]
    UnsupportedGeometry(BeamGeometry),

    #[error("source to object distance ({sod} mm) does not clear the reconstruction radius ({radius} mm)")]
    SourceInsideObject { sod: f32, radius: f32 },
}

/// Extra detector rows read around a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Margins {
    /// Rows added on each side of a parallel-beam block
    pub parallel: usize,
    /// Rows added on each side of the computed cone-beam extent
    pub cone: usize,
}

impl Default for Margins {
    fn default() -> Self { Self { parallel: 0, cone: 8 } }
}

/// Rows of the projections that have to be read to reconstruct the slices
/// in `block`. The result never leaves the rows of `projection_roi`.
///
/// `cone` is only consulted for `BeamGeometry::Cone`.
pub fn extended_roi(
    beam          : BeamGeometry,
    block         : Roi,
    cone          : &ConeGeometry,
    projection_roi: Roi,
    margins       : Margins,
) -> Result<Roi, GeometryError> {
    let extended = match beam {
        BeamGeometry::Parallel => parallel_extent(block, projection_roi, margins.parallel),
        BeamGeometry::Cone     => cone_extent    (block, cone, projection_roi, margins.cone)?,
        BeamGeometry::Helix    => return Err(GeometryError::UnsupportedGeometry(beam)),
    };
    debug!("{beam} block {block} extended to {extended}");
    Ok(extended)
}

fn parallel_extent(block: Roi, bounds: Roi, margin: usize) -> Roi {
    let y0 = block.y0.saturating_sub(margin).max(bounds.y0).min(block.y0);
    let y1 = (block.y1 + margin)            .min(bounds.y1).max(block.y1);
    block.with_rows(y0, y1)
}

fn cone_extent(block: Roi, cone: &ConeGeometry, bounds: Roi, pad: usize) -> Result<Roi, GeometryError> {
    let radius: Length = cone.voxel_size * (block.width() as f32) / 2.0;
    if cone.sod <= radius {
        return Err(GeometryError::SourceInsideObject { sod: mm_(cone.sod), radius: mm_(radius) });
    }

    // Detector pixels per voxel for a voxel at `distance` from the source
    let scale = |distance: Length| ratio_(cone.voxel_size * cone.sdd / (distance * cone.resolution));
    let k_near = scale(cone.sod - radius);
    let k_far  = scale(cone.sod + radius);

    let p = cone.piercing_point[1];
    let (b0, b1) = (block.y0 as f32, block.y1 as f32);
    let images = [
        p + (b0 - p) * k_near,
        p + (b0 - p) * k_far,
        p + (b1 - p) * k_near,
        p + (b1 - p) * k_far,
    ];
    let lower = images.iter().copied().fold(f32::INFINITY    , f32::min);
    let upper = images.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    let (min, max) = (bounds.y0, bounds.y1);
    let clamp = |y: f32| y.clamp(min as f32, max as f32) as usize;
    let lower = clamp(lower.floor());
    let upper = clamp(upper.ceil());

    let upper = (upper + pad).min(max);
    let lower = lower.saturating_sub(pad).max(min).min(upper);
    Ok(block.with_rows(lower, upper))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use proptest::prelude::*;
    use units::mm;

    fn cone(piercing_v: f32) -> ConeGeometry {
        ConeGeometry {
            sod: mm(200.0),
            sdd: mm(400.0),
            piercing_point: [50.0, piercing_v],
            voxel_size: mm(0.1),
            resolution: mm(0.2),
        }
    }

    const DETECTOR: Roi = Roi { x0: 0, y0: 0, x1: 100, y1: 1000 };
    const NO_PAD: Margins = Margins { parallel: 0, cone: 0 };

    // Block is 100 columns wide, so the reconstruction radius is 5 mm and the
    // magnifications are 40/39 (near) and 40/41 (far).
    #[rstest(/**/ y0,  y1, expected_lower, expected_upper,
             case(100, 200,  89, 208), // entirely above the piercing point
             case(800, 900, 792, 911), // entirely below
             case(450, 550, 448, 552), // straddling
             case(500, 600, 500, 603), // piercing point on top edge
             case(400, 500, 397, 500), // piercing point on bottom edge
             case(  0,  50,   0,  61), // clamped at the top of the detector
             case(950, 999, 939, 1000),// clamped at the bottom
    )]
    fn cone_extent_relative_to_piercing_point(y0: usize, y1: usize, expected_lower: usize, expected_upper: usize) {
        let block = Roi::new(0, y0, 100, y1);
        let got = extended_roi(BeamGeometry::Cone, block, &cone(500.0), DETECTOR, NO_PAD).unwrap();
        assert_eq!((got.y0, got.y1), (expected_lower, expected_upper));
        assert_eq!(got.columns(), block.columns());
    }

    #[test]
    fn cone_padding_is_applied_after_clamping() {
        let block = Roi::new(0, 0, 100, 50);
        let margins = Margins { parallel: 0, cone: 8 };
        let got = extended_roi(BeamGeometry::Cone, block, &cone(500.0), DETECTOR, margins).unwrap();
        assert_eq!((got.y0, got.y1), (0, 69));

        let block = Roi::new(0, 450, 100, 550);
        let got = extended_roi(BeamGeometry::Cone, block, &cone(500.0), DETECTOR, margins).unwrap();
        assert_eq!((got.y0, got.y1), (440, 560));
    }

    #[test]
    fn source_inside_object() {
        let mut geometry = cone(500.0);
        geometry.sod = mm(4.0);
        let block = Roi::new(0, 0, 100, 10);
        let got = extended_roi(BeamGeometry::Cone, block, &geometry, DETECTOR, NO_PAD);
        assert!(matches!(got, Err(GeometryError::SourceInsideObject { .. })));
    }

    #[test]
    fn helix_is_unsupported() {
        let block = Roi::new(0, 0, 100, 10);
        let got = extended_roi(BeamGeometry::Helix, block, &cone(500.0), DETECTOR, Margins::default());
        assert_eq!(got, Err(GeometryError::UnsupportedGeometry(BeamGeometry::Helix)));
    }

    #[rstest(/**/ y0,  y1, margin, expected_lower, expected_upper,
             case(100, 200,  0, 100, 200),
             case(100, 200, 10,  90, 210),
             case(  5, 200, 10,   0, 210),
             case(100, 995, 10,  90, 1000),
    )]
    fn parallel_margin(y0: usize, y1: usize, margin: usize, expected_lower: usize, expected_upper: usize) {
        let block = Roi::new(10, y0, 90, y1);
        let margins = Margins { parallel: margin, cone: 8 };
        let got = extended_roi(BeamGeometry::Parallel, block, &ConeGeometry::default(), DETECTOR, margins).unwrap();
        assert_eq!(got, Roi::new(10, expected_lower, 90, expected_upper));
    }

    #[test]
    fn parallel_respects_projection_roi() {
        let bounds = Roi::new(0, 100, 100, 300);
        let block = Roi::new(0, 105, 100, 295);
        let margins = Margins { parallel: 20, cone: 0 };
        let got = extended_roi(BeamGeometry::Parallel, block, &ConeGeometry::default(), bounds, margins).unwrap();
        assert_eq!(got.rows(), 100..300);
    }

    proptest! {
        #[test]
        fn cone_extent_stays_on_detector(
            piercing_v in -500.0_f32..1500.0,
            y0         in 0_usize..1000,
            len        in 1_usize..200,
            width      in 1_usize..400,
            sod        in 50.0_f32..500.0,
            extra      in 0.0_f32..500.0,
            pad        in 0_usize..20,
        ) {
            let geometry = ConeGeometry { sod: mm(sod), sdd: mm(sod + extra), ..cone(piercing_v) };
            let block = Roi::new(0, y0, width, (y0 + len).min(1000));
            let margins = Margins { parallel: 0, cone: pad };
            let got = extended_roi(BeamGeometry::Cone, block, &geometry, DETECTOR, margins).unwrap();
            prop_assert!(got.y0 <= got.y1);
            prop_assert!(got.y1 <= DETECTOR.y1);
            // Pure: same inputs, same answer
            let again = extended_roi(BeamGeometry::Cone, block, &geometry, DETECTOR, margins).unwrap();
            prop_assert_eq!(got, again);
        }

        #[test]
        fn parallel_extent_contains_block(
            y0     in 0_usize..1000,
            len    in 0_usize..200,
            margin in 0_usize..50,
        ) {
            let block = Roi::new(0, y0, 100, (y0 + len).min(1000));
            let margins = Margins { parallel: margin, cone: 0 };
            let got = extended_roi(BeamGeometry::Parallel, block, &ConeGeometry::default(), DETECTOR, margins).unwrap();
            prop_assert!(DETECTOR.contains(&got));
            prop_assert!(got.contains(&block));
        }
    }
}
