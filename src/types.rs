use ndarray::{Array2, Array3};

pub use units::todo::{Degreesf32, Intensityf32, Lengthf32, Radiansf32, Ratiof32, Weightf32};

/// One detector frame, indexed `[row, column]`
pub type Projection = Array2<Intensityf32>;

/// Projections of a block, indexed `[projection, row, column]`
pub type ProjectionStack = Array3<Intensityf32>;

/// Reconstructed slices, indexed `[slice, y, x]`
pub type Volume = Array3<Intensityf32>;

/// A single reconstructed slice, indexed `[y, x]`
pub type Slice = Array2<Intensityf32>;
