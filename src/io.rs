//! On-disk formats for projections and reconstructed slices.
//!
//! + `frame`: a single 2D image with a small header; used for projection
//!   files and for per-slice output.
//! + `stack`: numbered series of frames, one per slice.
//! + `container`: one pre-sized file holding a whole volume, filled in
//!   block by block.

pub mod raw;
pub mod frame;
pub mod stack;
pub mod container;

pub use raw::{GrayInterval, SampleType};

type IORes<T> = std::io::Result<T>;

/// Turn a binrw failure into an IO error, keeping the IO error if that is what
/// it was.
fn from_binrw(e: binrw::Error) -> std::io::Error {
    match e {
        binrw::Error::Io(e) => e,
        other => std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
    }
}
