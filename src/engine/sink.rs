//! Where reconstructed slices go: an in-memory volume, or straight to disk.

use std::ops::Range;
use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::{s, ArrayView3, Axis};

use crate::config::{FileType, MatrixConfig};
use crate::error::{ReconError, ReconResult};
use crate::io::{container, stack, GrayInterval, SampleType};
use crate::types::Volume;
use geometry::Roi;

/// The part of a `[width, width, total]` volume that is written out, from
/// the matrix ROI or VOI.
#[derive(Clone, Debug, PartialEq, Eq)]
struct OutputWindow {
    roi   : Option<Roi>,
    slices: Range<usize>,
}

impl OutputWindow {

    fn new(matrix: &MatrixConfig, [nx, ny, nz]: [usize; 3]) -> ReconResult<Self> {
        let (roi, slices) = match (matrix.voi, matrix.roi) {
            (Some(v), _)    => (Some(Roi::new(v.x0, v.y0, v.x1, v.y1)), v.z0..v.z1),
            (None, roi)     => (roi, 0..nz),
        };
        if let Some(roi) = roi {
            if !Roi::full(nx, ny).contains(&roi) || roi.is_empty() {
                return Err(ReconError::configuration(format!("matrix ROI {roi} does not fit a {nx}x{ny} slice")));
            }
        }
        if slices.is_empty() || slices.end > nz {
            return Err(ReconError::configuration(format!("VOI slices {slices:?} do not fit {nz} slices")));
        }
        Ok(Self { roi, slices })
    }

    fn dims(&self, [nx, ny, _]: [usize; 3]) -> [usize; 3] {
        let [x, y] = self.roi.map_or([nx, ny], |r| [r.width(), r.height()]);
        [x, y, self.slices.len()]
    }
}

enum Target {
    /// One file per slice; the mask's `#` run is replaced by the slice number
    Stack(PathBuf),
    Container(PathBuf),
}

/// Writes blocks of slices to disk, in the layout selected by a
/// `MatrixConfig`.
pub struct SliceWriter {
    target: Target,
    sample: SampleType,
    gray  : GrayInterval,
    window: OutputWindow,
    /// Number given to the file holding the first slice of the volume
    first_number: usize,
}

impl SliceWriter {

    /// Prepare to write a volume of `dims` = `[width, width, total]` voxels.
    /// Creates the destination directory and, for containers, the pre-sized
    /// container file.
    pub fn new(matrix: &MatrixConfig, dims: [usize; 3], first_number: usize, voxel_size: f32) -> ReconResult<Self> {
        let window = OutputWindow::new(matrix, dims)?;
        let destination = &matrix.destination;
        std::fs::create_dir_all(destination).map_err(|e| ReconError::serialization(destination, e))?;

        let sample = match matrix.file_type {
            FileType::Float32 | FileType::Float32Container => SampleType::Float32,
            FileType::Uint16  | FileType::Uint16Container  => SampleType::Uint16,
        };
        let gray = GrayInterval::new(matrix.gray_interval);
        let path = destination.join(&matrix.file_mask);
        let target = if matrix.file_type.is_container() {
            container::prepare_container(&path, window.dims(dims), sample, gray, voxel_size)
                .map_err(|e| ReconError::serialization(&path, e))?;
            info!("Prepared {:?} voxel container {}", window.dims(dims), path.display());
            Target::Container(path)
        } else {
            Target::Stack(path)
        };
        Ok(Self { target, sample, gray, window, first_number })
    }

    /// Write `slices`, the first of which is slice `start` of the volume.
    /// Slices outside the output window are skipped.
    pub fn write(&self, start: usize, slices: ArrayView3<f32>) -> ReconResult<()> {
        let end = start + slices.len_of(Axis(0));
        let (lo, hi) = (start.max(self.window.slices.start), end.min(self.window.slices.end));
        if lo >= hi { return Ok(()) }
        let selected = slices.slice_move(s![lo - start..hi - start, .., ..]);
        let roi = self.window.roi.as_ref();
        match &self.target {
            Target::Stack(mask) => {
                let written = stack::write_slice_stack(selected, mask, self.first_number + lo, self.sample, self.gray, roi)
                    .map_err(|e| ReconError::serialization(mask, e))?;
                debug!("Wrote {} slices from {}", written.len(), mask.display());
            }
            Target::Container(path) => {
                container::write_container_slices(path, lo - self.window.slices.start, selected, roi)
                    .map_err(|e| ReconError::serialization(path, e))?;
                debug!("Wrote slices {lo}..{hi} into {}", path.display());
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        match &self.target {
            Target::Stack(p) | Target::Container(p) => p,
        }
    }
}

/// Destination of the slices of each block.
pub enum ResultSink {
    /// Whole volume, `[slice, y, x]`, filled block by block
    Memory(Volume),
    Disk(SliceWriter),
}

impl ResultSink {

    pub fn memory([nx, ny, nz]: [usize; 3]) -> Self {
        ResultSink::Memory(Volume::zeros((nz, ny, nx)))
    }

    /// Store `slices` as slices `start..` of the volume.
    pub fn store(&mut self, start: usize, slices: ArrayView3<f32>) -> ReconResult<()> {
        match self {
            ResultSink::Memory(volume) => {
                let end = start + slices.len_of(Axis(0));
                if end > volume.len_of(Axis(0)) || slices.dim().1 != volume.dim().1 || slices.dim().2 != volume.dim().2 {
                    return Err(ReconError::configuration(format!(
                        "block of {:?} at slice {start} does not fit volume of {:?}", slices.dim(), volume.dim())));
                }
                volume.slice_mut(s![start..end, .., ..]).assign(&slices);
                Ok(())
            }
            ResultSink::Disk(writer) => writer.write(start, slices),
        }
    }

    pub fn volume(&self) -> Option<&Volume> {
        match self {
            ResultSink::Memory(volume) => Some(volume),
            ResultSink::Disk(_)        => None,
        }
    }

    pub fn is_memory(&self) -> bool { matches!(self, ResultSink::Memory(_)) }
}
