/// Quantities which are simply type aliases for `f32` rather than having an
/// implementation as a `uom` `Quantity`.
///
/// These are the values that flow through `ndarray` buffers and per-pixel
/// arithmetic, where a `Quantity` wrapper would get in the way, but we still
/// want some clues in the source as to what they represent.

pub type Lengthf32    = f32;
pub type Ratiof32     = f32;
pub type Weightf32    = f32;
pub type Degreesf32   = f32;
pub type Radiansf32   = f32;
pub type Intensityf32 = f32;
