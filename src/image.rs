//! Inspection of reconstructed volumes: planar cuts, gray level histograms
//! and checks for values that went astray.

use ndarray::{s, Array2, ArrayBase, ArrayView2, Axis, Data, Dimension};
use ndhistogram::{axis::{BinInterval, Uniform}, ndhistogram, Histogram as _};

use crate::types::{Intensityf32, Volume};
use geometry::Roi;

/// Orientation of a cut through a volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Plane {
    /// Constant slice index: the reconstructed slices themselves
    XY,
    /// Constant y
    XZ,
    /// Constant x
    YZ,
}

/// Copy of the `index`-th cut through `volume` in `plane`, or `None` if the
/// index is outside the volume.
pub fn slice(volume: &Volume, index: usize, plane: Plane) -> Option<Array2<Intensityf32>> {
    let axis = match plane {
        Plane::XY => Axis(0),
        Plane::XZ => Axis(1),
        Plane::YZ => Axis(2),
    };
    (index < volume.len_of(axis)).then(|| volume.index_axis(axis, index).to_owned())
}

/// The part of `frame` covered by `roi`.
pub fn crop(frame: ArrayView2<Intensityf32>, roi: &Roi) -> Array2<Intensityf32> {
    frame.slice(s![roi.y0..roi.y1, roi.x0..roi.x1]).to_owned()
}

/// Gray level distribution: bin centres and their counts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Histogram {
    pub centres: Vec<f32>,
    pub counts : Vec<usize>,
}

/// Histogram of the finite values of `data` in `bins` equal bins spanning
/// their range.
pub fn histogram<S, D>(data: &ArrayBase<S, D>, bins: usize) -> Histogram
where
    S: Data<Elem = Intensityf32>,
    D: Dimension,
{
    let finite = || data.iter().copied().filter(|x| x.is_finite());
    let lo = finite().fold(f32::INFINITY,     f32::min);
    let hi = finite().fold(f32::NEG_INFINITY, f32::max);
    if bins == 0 || lo > hi { return Histogram::default() }
    let hi = if hi > lo { hi } else { lo + 1.0 };

    let mut h = ndhistogram!(Uniform::new(bins, lo, hi); usize);
    for x in finite() { h.fill(&x) }
    // The maximum falls in the overflow bin of the half-open axis
    let top = finite().filter(|&x| x >= hi).count();

    let mut result = Histogram::default();
    for item in h.iter() {
        if let BinInterval::Bin { start, end } = item.bin {
            result.centres.push((start + end) / 2.0);
            result.counts.push(*item.value);
        }
    }
    if let Some(last) = result.counts.last_mut() { *last += top }
    result
}

/// Number of values which are not numbers or are infinite.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NonFinite {
    pub nan: usize,
    pub inf: usize,
}

impl NonFinite {
    pub fn any(&self) -> bool { self.nan + self.inf > 0 }
}

pub fn count_non_finite<S, D>(data: &ArrayBase<S, D>) -> NonFinite
where
    S: Data<Elem = Intensityf32>,
    D: Dimension,
{
    data.iter().fold(NonFinite::default(), |mut n, x| {
        if x.is_nan()      { n.nan += 1 }
        if x.is_infinite() { n.inf += 1 }
        n
    })
}
