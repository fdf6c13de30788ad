/// A whole volume in one file: a `TRVOL` header followed by `nz` slices of
/// `ny` x `nx` samples. The file is created at its final size before any
/// slice is known, and blocks of slices are written into place as they
/// become available.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;

use binrw::{binrw, BinRead, BinWrite};
use ndarray::{Array3, ArrayView3};

use super::{from_binrw, raw, GrayInterval, IORes, SampleType};
use crate::types::Intensityf32;
use geometry::Roi;

#[binrw]
#[brw(little, magic = b"TRVOL")]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContainerHeader {
    pub sample: SampleType,
    pub nx: u32,
    pub ny: u32,
    pub nz: u32,
    /// Millimetres
    pub voxel_size: f32,
    pub gray_lo: f32,
    pub gray_hi: f32,
}

impl ContainerHeader {
    pub fn gray(&self) -> GrayInterval { GrayInterval { lo: self.gray_lo, hi: self.gray_hi } }

    fn slice_len(&self) -> usize { self.nx as usize * self.ny as usize }

    fn data_len(&self) -> u64 {
        (self.slice_len() * self.nz as usize * self.sample.bytes()) as u64
    }
}

/// Create `path` holding a zero-filled volume of `[nx, ny, nz]` voxels.
pub fn prepare_container(
    path: &Path,
    [nx, ny, nz]: [usize; 3],
    sample: SampleType,
    gray: GrayInterval,
    voxel_size: f32,
) -> IORes<ContainerHeader> {
    let header = ContainerHeader {
        sample,
        nx: nx as u32, ny: ny as u32, nz: nz as u32,
        voxel_size,
        gray_lo: gray.lo,
        gray_hi: gray.hi,
    };
    let mut file = File::create(path)?;
    header.write(&mut file).map_err(from_binrw)?;
    let data_start = file.stream_position()?;
    file.set_len(data_start + header.data_len())?;
    Ok(header)
}

fn open_header(file: &mut File) -> IORes<(ContainerHeader, u64)> {
    file.seek(SeekFrom::Start(0))?;
    let header = ContainerHeader::read(file).map_err(from_binrw)?;
    let data_start = file.stream_position()?;
    Ok((header, data_start))
}

/// Write `slices` into the container, the first of them at slice `start`.
/// When `roi` is given only that part of each slice is written; it must match
/// the container's slice dimensions.
pub fn write_container_slices(
    path  : &Path,
    start : usize,
    slices: ArrayView3<Intensityf32>,
    roi   : Option<&Roi>,
) -> IORes<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let (header, data_start) = open_header(&mut file)?;

    let (count, ny, nx) = slices.dim();
    let (ny, nx) = roi.map_or((ny, nx), |r| (r.height(), r.width()));
    if (nx, ny) != (header.nx as usize, header.ny as usize) || start + count > header.nz as usize {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, format!(
            "{count} slices of {nx}x{ny} at {start} do not fit a {}x{}x{} container",
            header.nx, header.ny, header.nz)));
    }

    let offset = data_start + (start * header.slice_len() * header.sample.bytes()) as u64;
    file.seek(SeekFrom::Start(offset))?;
    let data: Box<dyn Iterator<Item = f32> + '_> = match roi {
        Some(r) => Box::new(slices.slice_move(ndarray::s![.., r.y0..r.y1, r.x0..r.x1]).into_iter().copied()),
        None    => Box::new(slices.into_iter().copied()),
    };
    raw::write(data, header.sample, header.gray(), &mut file)
}

pub fn read_container(path: &Path) -> IORes<(ContainerHeader, Array3<Intensityf32>)> {
    let mut file = File::open(path)?;
    let (header, _) = open_header(&mut file)?;
    let (nx, ny, nz) = (header.nx as usize, header.ny as usize, header.nz as usize);
    let data = raw::read(nx * ny * nz, header.sample, header.gray(), BufReader::new(file))?;
    let volume = Array3::from_shape_vec((nz, ny, nx), data)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok((header, volume))
}
