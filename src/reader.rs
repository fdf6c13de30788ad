//! Getting projections off the disk and into blocks.

use std::path::Path;

use log::trace;
use ndarray::{s, Array3, ArrayView2, Axis, Zip};

use crate::catalog::ProjectionCatalog;
use crate::config::{Flip, ImageType, ProjectionConfig, ReconConfig, Rotate};
use crate::error::{ReadError, ReadResult};
use crate::image::crop;
use crate::io::frame::{read_frame, read_frame_header};
use crate::parameters::Parameters;
use crate::types::{Degreesf32, Projection, ProjectionStack, Weightf32};
use geometry::Roi;

/// Geometric corrections applied to every frame as it is read: binning, then
/// flipping, then rotation. ROIs refer to the corrected frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTransform {
    pub flip   : Flip,
    pub rotate : Rotate,
    pub binning: usize,
}

impl Default for FrameTransform {
    fn default() -> Self { Self { flip: Flip::None, rotate: Rotate::None, binning: 1 } }
}

impl From<&ProjectionConfig> for FrameTransform {
    fn from(p: &ProjectionConfig) -> Self {
        Self { flip: p.flip, rotate: p.rotate, binning: p.binning.max(1) }
    }
}

impl FrameTransform {

    pub fn apply(&self, frame: ArrayView2<f32>) -> Projection {
        let binned = bin(frame, self.binning);
        let b = binned.view();
        let flipped = match self.flip {
            Flip::None       => b,
            Flip::Horizontal => b.slice_move(s![..    , ..;-1]),
            Flip::Vertical   => b.slice_move(s![..;-1, ..    ]),
            Flip::Both       => b.slice_move(s![..;-1, ..;-1]),
        };
        let rotated = match self.rotate {
            Rotate::None          => flipped,
            Rotate::Quarter       => flipped.reversed_axes().slice_move(s![..    , ..;-1]),
            Rotate::Half          => flipped.slice_move(s![..;-1, ..;-1]),
            Rotate::ThreeQuarters => flipped.reversed_axes().slice_move(s![..;-1, ..    ]),
        };
        rotated.as_standard_layout().into_owned()
    }

    /// `[height, width]` of a binned frame after rotation.
    pub fn rotated_dims(&self, [height, width]: [usize; 2]) -> [usize; 2] {
        match self.rotate {
            Rotate::Quarter | Rotate::ThreeQuarters => [width, height],
            Rotate::None    | Rotate::Half          => [height, width],
        }
    }
}

/// Average over `n` x `n` pixel squares; incomplete squares at the edges are
/// dropped.
fn bin(frame: ArrayView2<f32>, n: usize) -> Projection {
    if n <= 1 { return frame.to_owned() }
    let (h, w) = frame.dim();
    let cropped = frame.slice(s![..h / n * n, ..w / n * n]);
    let norm = (n * n) as f32;
    let mut out = Projection::zeros((h / n, w / n));
    Zip::indexed(&mut out).for_each(|(r, c), v| {
        *v = cropped.slice(s![r * n..(r + 1) * n, c * n..(c + 1) * n]).sum() / norm;
    });
    out
}

/// Per-projection information travelling with a block of projections.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockParameters {
    pub angles : Vec<Degreesf32>,
    pub weights: Vec<Weightf32>,
    pub doses  : Vec<f32>,
    /// Frame region covered by the stack
    pub stack_roi: Roi,
    pub extra: Parameters,
}

pub trait ProjectionReader {

    /// Read one frame, corrected by `transform` and cropped to `roi`.
    fn read(&self, path: &Path, transform: &FrameTransform, roi: Option<&Roi>) -> ReadResult<Projection>;

    /// `[height, width]` of the frame in `path` after binning.
    fn image_size(&self, path: &Path, binning: usize) -> ReadResult<[usize; 2]>;

    /// Mean value in `dose_roi`; 1 when there is no dose ROI.
    fn projection_dose(&self, path: &Path, transform: &FrameTransform, dose_roi: Option<&Roi>) -> ReadResult<f32> {
        match dose_roi {
            None => Ok(1.0),
            Some(roi) => Ok(self.read(path, transform, Some(roi))?.mean().unwrap_or(1.0)),
        }
    }

    /// Read the `roi` part of every catalogued projection, in angle order.
    ///
    /// For repeated sinograms the single configured row is read and copied
    /// into every row of `roi`.
    fn read_stack(&self, config: &ReconConfig, catalog: &ProjectionCatalog, roi: &Roi)
                  -> ReadResult<(ProjectionStack, BlockParameters)> {
        let p = &config.projections;
        let transform = FrameTransform::from(p);
        let read_roi = match p.image_type {
            ImageType::Projections    => *roi,
            ImageType::RepeatSinogram => roi.with_rows(p.roi.y0, p.roi.y0 + 1),
        };

        let mut stack = Array3::zeros((catalog.len(), roi.height(), roi.width()));
        let mut params = BlockParameters { stack_roi: *roi, ..BlockParameters::default() };
        for (descriptor, mut slot) in catalog.iter().zip(stack.axis_iter_mut(Axis(0))) {
            trace!("reading {} rows {:?}", descriptor.path.display(), read_roi.rows());
            let frame = self.read(&descriptor.path, &transform, Some(&read_roi))?;
            slot.assign(&frame);  // broadcasts a single sinogram row
            params.angles .push(descriptor.angle);
            params.weights.push(descriptor.weight);
            params.doses  .push(self.projection_dose(&descriptor.path, &transform, p.dose_roi.as_ref())?);
        }
        Ok((stack, params))
    }
}

/// Reads the frame files written by `io::frame`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameReader;

impl ProjectionReader for FrameReader {

    fn read(&self, path: &Path, transform: &FrameTransform, roi: Option<&Roi>) -> ReadResult<Projection> {
        if !path.exists() { return Err(ReadError::Missing(path.into())) }
        let raw = read_frame(path)
            .map_err(|e| ReadError::Decode { path: path.into(), message: e.to_string() })?;
        let frame = transform.apply(raw.view());
        match roi {
            None => Ok(frame),
            Some(roi) => {
                let (height, width) = frame.dim();
                if !Roi::full(width, height).contains(roi) {
                    return Err(ReadError::RoiOutOfBounds { path: path.into(), roi: *roi, width, height });
                }
                Ok(crop(frame.view(), roi))
            }
        }
    }

    fn image_size(&self, path: &Path, binning: usize) -> ReadResult<[usize; 2]> {
        if !path.exists() { return Err(ReadError::Missing(path.into())) }
        let header = read_frame_header(path)
            .map_err(|e| ReadError::Decode { path: path.into(), message: e.to_string() })?;
        let [height, width] = header.dims();
        let b = binning.max(1);
        Ok([height / b, width / b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::io::{frame::write_frame, GrayInterval, SampleType};
    use ndarray::{array, Array2};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn frame() -> Array2<f32> { array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]] }

    #[rstest(/**/ flip, rotate, expected,
             case(Flip::None,       Rotate::None,          array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]),
             case(Flip::Horizontal, Rotate::None,          array![[3.0, 2.0, 1.0], [6.0, 5.0, 4.0]]),
             case(Flip::Vertical,   Rotate::None,          array![[4.0, 5.0, 6.0], [1.0, 2.0, 3.0]]),
             case(Flip::Both,       Rotate::None,          array![[6.0, 5.0, 4.0], [3.0, 2.0, 1.0]]),
             case(Flip::None,       Rotate::Quarter,       array![[4.0, 1.0], [5.0, 2.0], [6.0, 3.0]]),
             case(Flip::None,       Rotate::Half,          array![[6.0, 5.0, 4.0], [3.0, 2.0, 1.0]]),
             case(Flip::None,       Rotate::ThreeQuarters, array![[3.0, 6.0], [2.0, 5.0], [1.0, 4.0]]),
             case(Flip::Horizontal, Rotate::Quarter,       array![[6.0, 3.0], [5.0, 2.0], [4.0, 1.0]]),
    )]
    fn flips_and_rotations(flip: Flip, rotate: Rotate, expected: Array2<f32>) {
        let t = FrameTransform { flip, rotate, binning: 1 };
        assert_eq!(t.apply(frame().view()), expected);
        let [h, w] = t.rotated_dims([2, 3]);
        assert_eq!(expected.dim(), (h, w));
    }

    #[test]
    fn binning_averages_and_drops_ragged_edges() {
        let f = Array2::from_shape_fn((5, 4), |(r, c)| (r * 4 + c) as f32);
        let t = FrameTransform { binning: 2, ..FrameTransform::default() };
        assert_eq!(t.apply(f.view()), array![[2.5, 4.5], [10.5, 12.5]]);
    }

    fn write_projections(dir: &Path, n: usize) {
        for i in 0..n {
            let f = Array2::from_shape_fn((8, 6), |(r, c)| (100 * i + 10 * r + c) as f32);
            write_frame(&dir.join(format!("p_{i:02}.trf")), f.view(), SampleType::Float32, GrayInterval::default()).unwrap();
        }
    }

    fn config(dir: &Path, extra: &str) -> ReconConfig {
        parse_config(&format!(r#"
            [projections]
            file_mask   = "{}/p_##.trf"
            first_index = 0
            last_index  = 3
            scan_arc    = [0.0, 180.0]
            resolution  = "1 mm"
            roi         = [1, 2, 5, 6]
            {extra}
            [matrix]
            destination = "."
            [[preprocessing]]
            name = "LogNorm"
            [backprojector]
            name = "ParallelFbp"
        "#, dir.display())).unwrap()
    }

    #[test]
    fn missing_file_is_not_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let got = FrameReader.read(&dir.path().join("nothing.trf"), &FrameTransform::default(), None);
        assert!(matches!(got, Err(ReadError::Missing(_))));

        let junk = dir.path().join("junk.trf");
        std::fs::write(&junk, b"not a frame").unwrap();
        let got = FrameReader.read(&junk, &FrameTransform::default(), None);
        assert!(matches!(got, Err(ReadError::Decode { .. })));
    }

    #[test]
    fn roi_outside_frame() {
        let dir = tempfile::tempdir().unwrap();
        write_projections(dir.path(), 1);
        let path = dir.path().join("p_00.trf");
        let got = FrameReader.read(&path, &FrameTransform::default(), Some(&Roi::new(0, 0, 7, 2)));
        assert!(matches!(got, Err(ReadError::RoiOutOfBounds { width: 6, height: 8, .. })));
        assert_eq!(FrameReader.image_size(&path, 2).unwrap(), [4, 3]);
    }

    #[test]
    fn stack_follows_catalog_order() {
        let dir = tempfile::tempdir().unwrap();
        write_projections(dir.path(), 4);
        let config = config(dir.path(), "");
        let catalog = ProjectionCatalog::build(&config.projections).unwrap();
        let roi = Roi::new(1, 3, 5, 5);
        let (stack, params) = FrameReader.read_stack(&config, &catalog, &roi).unwrap();
        assert_eq!(stack.dim(), (4, 2, 4));
        assert_eq!(stack[[2, 0, 0]], 231.0);
        assert_eq!(params.angles, vec![0.0, 45.0, 90.0, 135.0]);
        assert_eq!(params.doses, vec![1.0; 4]);
        assert_eq!(params.stack_roi, roi);
    }

    #[test]
    fn dose_is_mean_over_dose_roi() {
        let dir = tempfile::tempdir().unwrap();
        write_projections(dir.path(), 4);
        let config = config(dir.path(), "dose_roi = [0, 0, 2, 1]");
        let catalog = ProjectionCatalog::build(&config.projections).unwrap();
        let (_, params) = FrameReader.read_stack(&config, &catalog, &Roi::new(1, 3, 5, 5)).unwrap();
        assert_eq!(params.doses, vec![0.5, 100.5, 200.5, 300.5]);
    }

    #[test]
    fn repeated_sinogram_row() {
        let dir = tempfile::tempdir().unwrap();
        write_projections(dir.path(), 4);
        let config = config(dir.path(), "image_type = \"repeat_sinogram\"");
        let catalog = ProjectionCatalog::build(&config.projections).unwrap();
        let (stack, _) = FrameReader.read_stack(&config, &catalog, &Roi::new(1, 0, 5, 3)).unwrap();
        assert_eq!(stack.dim(), (4, 3, 4));
        // Row 2 of projection 1, in every row
        for r in 0..3 {
            assert_eq!(stack.slice(s![1, r, ..]).to_vec(), vec![121.0, 122.0, 123.0, 124.0]);
        }
    }
}
