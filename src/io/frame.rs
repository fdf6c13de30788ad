/// Single 2D frames: a `TRFR` header followed by the samples in row-major
/// order.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use binrw::{binrw, BinRead, BinWrite};
use ndarray::{Array2, ArrayView2};

use super::{from_binrw, IORes, raw, GrayInterval, SampleType};
use crate::types::Intensityf32;

#[binrw]
#[brw(little, magic = b"TRFR")]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameHeader {
    pub sample : SampleType,
    pub width  : u32,
    pub height : u32,
    pub gray_lo: f32,
    pub gray_hi: f32,
}

impl FrameHeader {
    pub fn gray(&self) -> GrayInterval { GrayInterval { lo: self.gray_lo, hi: self.gray_hi } }

    /// `[height, width]`
    pub fn dims(&self) -> [usize; 2] { [self.height as usize, self.width as usize] }
}

pub fn write_frame(
    path  : &Path,
    frame : ArrayView2<Intensityf32>,
    sample: SampleType,
    gray  : GrayInterval,
) -> IORes<()> {
    let (height, width) = frame.dim();
    let header = FrameHeader {
        sample,
        width : width  as u32,
        height: height as u32,
        gray_lo: gray.lo,
        gray_hi: gray.hi,
    };
    let mut out = BufWriter::new(File::create(path)?);
    header.write(&mut out).map_err(from_binrw)?;
    raw::write(frame.iter().copied(), sample, gray, &mut out)?;
    out.flush()
}

pub fn read_frame_header(path: &Path) -> IORes<FrameHeader> {
    let mut input = BufReader::new(File::open(path)?);
    FrameHeader::read(&mut input).map_err(from_binrw)
}

pub fn read_frame(path: &Path) -> IORes<Array2<Intensityf32>> {
    let mut input = BufReader::new(File::open(path)?);
    let header = FrameHeader::read(&mut input).map_err(from_binrw)?;
    let [height, width] = header.dims();
    let data = raw::read(height * width, header.sample, header.gray(), &mut input)?;
    Array2::from_shape_vec((height, width), data)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
