//! Numbered series of frames, one file per slice.

use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayView3, Axis, stack};

use super::{frame, IORes, GrayInterval, SampleType};
use crate::catalog::file_name;
use crate::image::crop;
use crate::types::Intensityf32;
use geometry::Roi;

fn slice_path(mask: &Path, index: usize) -> IORes<PathBuf> {
    file_name(mask, index).ok_or_else(|| std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("slice file mask {} has no '#' placeholder", mask.display())))
}

/// Write each slice of `slices` to its own file. The first is numbered
/// `start`, the rest follow consecutively. When `roi` is given only that
/// part of each slice is written.
pub fn write_slice_stack(
    slices: ArrayView3<Intensityf32>,
    mask  : &Path,
    start : usize,
    sample: SampleType,
    gray  : GrayInterval,
    roi   : Option<&Roi>,
) -> IORes<Vec<PathBuf>> {
    slices.axis_iter(Axis(0)).enumerate().map(|(i, slice)| {
        let path = slice_path(mask, start + i)?;
        match roi {
            Some(roi) => frame::write_frame(&path, crop(slice, roi).view(), sample, gray)?,
            None      => frame::write_frame(&path, slice, sample, gray)?,
        }
        Ok(path)
    }).collect()
}

/// Read `count` consecutive slices starting with number `start`.
pub fn read_slice_stack(mask: &Path, start: usize, count: usize) -> IORes<Array3<Intensityf32>> {
    let slices = (start..start + count)
        .map(|i| frame::read_frame(&slice_path(mask, i)?))
        .collect::<IORes<Vec<_>>>()?;
    let views = slices.iter().map(|s| s.view()).collect::<Vec<_>>();
    stack(Axis(0), &views).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
