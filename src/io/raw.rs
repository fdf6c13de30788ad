/// Sample encodings shared by the frame and container formats: little-endian
/// `f32`, or `u16` quantized over a gray interval.

use std::io::{BufReader, BufWriter, Read, Write};

use binrw::binrw;

use super::IORes;

#[binrw]
#[brw(repr = u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleType {
    Float32 = 0,
    Uint16  = 1,
}

impl SampleType {
    pub fn bytes(&self) -> usize {
        match self {
            SampleType::Float32 => 4,
            SampleType::Uint16  => 2,
        }
    }
}

/// Values mapped onto `0..=u16::MAX` when quantizing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GrayInterval {
    pub lo: f32,
    pub hi: f32,
}

impl GrayInterval {
    pub fn new([lo, hi]: [f32; 2]) -> Self { Self { lo, hi } }

    pub fn quantize(&self, x: f32) -> u16 {
        let scaled = (x - self.lo) / (self.hi - self.lo) * u16::MAX as f32;
        scaled.round().clamp(0.0, u16::MAX as f32) as u16
    }

    pub fn dequantize(&self, q: u16) -> f32 {
        self.lo + q as f32 / u16::MAX as f32 * (self.hi - self.lo)
    }

    /// Largest error introduced by a quantize/dequantize round trip of a
    /// value inside the interval.
    pub fn resolution(&self) -> f32 { (self.hi - self.lo) / u16::MAX as f32 / 2.0 }
}

impl Default for GrayInterval {
    fn default() -> Self { Self { lo: 0.0, hi: 1.0 } }
}

pub fn write<W: Write>(
    data  : impl Iterator<Item = f32>,
    sample: SampleType,
    gray  : GrayInterval,
    out   : W,
) -> IORes<()> {
    let mut buf = BufWriter::new(out);
    for datum in data {
        match sample {
            SampleType::Float32 => buf.write_all(&datum.to_le_bytes())?,
            SampleType::Uint16  => buf.write_all(&gray.quantize(datum).to_le_bytes())?,
        }
    }
    buf.flush()
}

/// Read exactly `n` samples.
pub fn read<R: Read>(n: usize, sample: SampleType, gray: GrayInterval, input: R) -> IORes<Vec<f32>> {
    let mut buf = BufReader::new(input);
    let mut bytes = vec![0; n * sample.bytes()];
    buf.read_exact(&mut bytes)?;
    Ok(match sample {
        SampleType::Float32 => bytes.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        SampleType::Uint16 => bytes.chunks_exact(2)
            .map(|b| gray.dequantize(u16::from_le_bytes([b[0], b[1]])))
            .collect(),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use float_eq::assert_float_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn raw_io_roundtrip() -> std::io::Result<()> {
        use tempfile::tempdir;

        // Harmless temporary location for output file
        let dir = tempdir()?;
        let file_path = dir.path().join("test.bin");

        let original_data = vec![1.23, 4.56, 7.89, f32::NAN];
        write(original_data.iter().copied(), SampleType::Float32, GrayInterval::default(),
              std::fs::File::create(&file_path)?)?;
        let reloaded = read(4, SampleType::Float32, GrayInterval::default(),
                            std::fs::File::open(&file_path)?)?;

        assert_eq!(&original_data[..3], &reloaded[..3]);
        assert!(reloaded[3].is_nan());
        Ok(())
    }

    #[test]
    fn short_input_is_an_error() {
        let bytes = [0_u8; 6];
        assert!(read(2, SampleType::Float32, GrayInterval::default(), &bytes[..]).is_err());
    }

    #[test]
    fn quantization_saturates_outside_interval() {
        let gray = GrayInterval::new([-1.0, 1.0]);
        assert_eq!(gray.quantize(-5.0), 0);
        assert_eq!(gray.quantize( 5.0), u16::MAX);
        assert_eq!(gray.quantize(-1.0), 0);
        assert_eq!(gray.quantize( 1.0), u16::MAX);
    }

    proptest! {
        #[test]
        fn quantization_error_is_bounded(
            lo in -100.0_f32..100.0,
            width in 0.01_f32..1000.0,
            t in 0.0_f32..=1.0,
        ) {
            let gray = GrayInterval { lo, hi: lo + width };
            let x = lo + t * width;
            let back = gray.dequantize(gray.quantize(x));
            // Half a quantization step, plus float rounding in the mapping
            assert_float_eq!(back, x, abs <= gray.resolution() * 1.01 + 1e-5 * (lo.abs() + width));
        }
    }
}
