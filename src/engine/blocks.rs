//! Partition of the reconstructed slices into blocks.

use std::ops::Range;

use geometry::Roi;

/// A contiguous range of output slices, processed in one go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
    /// Position in the plan
    pub index: usize,
    /// Detector row of the first slice
    pub first: usize,
    pub len  : usize,
}

impl Block {
    pub fn rows(&self) -> Range<usize> { self.first..self.first + self.len }

    /// The block's rows within the columns of `roi`.
    pub fn roi(&self, roi: &Roi) -> Roi { roi.with_rows(self.first, self.first + self.len) }
}

/// `total` slices starting at detector row `first`, in blocks of `size`:
/// as many full blocks as fit, followed by one shorter block for the rest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockPlan {
    first: usize,
    total: usize,
    size : usize,
}

impl BlockPlan {

    pub fn new(first: usize, total: usize, size: usize) -> Self {
        Self { first, total, size: size.max(1) }
    }

    pub fn full_blocks(&self) -> usize { self.total / self.size }
    pub fn remainder  (&self) -> usize { self.total % self.size }
    pub fn total      (&self) -> usize { self.total }

    /// Number of blocks, including the remainder block.
    pub fn len(&self) -> usize { self.full_blocks() + usize::from(self.remainder() > 0) }

    pub fn is_empty(&self) -> bool { self.total == 0 }

    /// Whether `block` is the shorter block after the full ones.
    pub fn is_remainder(&self, block: &Block) -> bool { block.index >= self.full_blocks() }

    pub fn iter(&self) -> impl Iterator<Item = Block> + '_ {
        let full = (0..self.full_blocks()).map(|index| Block {
            index,
            first: self.first + index * self.size,
            len  : self.size,
        });
        let rest = (self.remainder() > 0).then(|| Block {
            index: self.full_blocks(),
            first: self.first + self.full_blocks() * self.size,
            len  : self.remainder(),
        });
        full.chain(rest)
    }
}
