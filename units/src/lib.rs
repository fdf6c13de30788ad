//! Physical quantities used by the reconstruction crates.
//!
//! Lengths are stored in millimetres: the base unit of the `mmps` system
//! below. Detector pixel sizes, voxel sizes and source distances all live
//! comfortably in that range.

pub use uom;

pub mod todo;

pub mod mmps {

  pub mod f32 {
    use uom::{ISQ, system};
    ISQ!(uom::si, f32, (millimeter, kilogram, second, ampere, kelvin, mole, candela));

    /// The full circle constant (τ) Equal to 2π.
    pub const TWOPI: Angle = Angle {
        dimension: std::marker::PhantomData,
        units: std::marker::PhantomData,
        value: std::f32::consts::TAU,
    };
  }

}

pub use uom::si::Quantity;
pub use mmps::f32::{Angle, TWOPI, Length, Area, Ratio};

mod units {
  pub use uom::si::{length  ::{micrometer, millimeter, centimeter},
                    ratio   ::ratio,
                    angle   ::{radian, degree, revolution},
  };
}

// Making values from float literals is very long-winded, so provide some
// pithily-named convenience constructors.

/// Generate a function called NAME which returns QUANTITY by interpreting its
/// argument as UNIT
///
/// wrap!(NAME QUANTITY UNIT);
macro_rules! wrap {
  ($name:ident $quantity:ident $unit:ident ) => {
    pub fn $name(x: f32) -> $quantity { $quantity::new::<units::$unit>(x) }
  };
}

wrap!(cm     Length   centimeter);
wrap!(mm     Length   millimeter);
wrap!(um     Length   micrometer);
wrap!(ratio  Ratio         ratio);
wrap!(radian Angle        radian);
wrap!(degree Angle        degree);
wrap!(turn   Angle    revolution);

// Reverse direction of the above
pub fn mm_(x: Length) -> f32 { x.get::<units::millimeter>() }
pub fn um_(x: Length) -> f32 { x.get::<units::micrometer>() }

pub fn ratio_ (x: Ratio) -> f32 { x.get::<units::ratio>() }
pub fn radian_(x: Angle) -> f32 { x.get::<units::radian>() }
pub fn degree_(x: Angle) -> f32 { x.get::<units::degree>() }
pub fn turn_  (x: Angle) -> f32 { x.get::<units::revolution>() }

#[macro_export]
macro_rules! in_base_unit {
  ($value:expr) => {
    $crate::Quantity {
      dimension: std::marker::PhantomData,
      units: std::marker::PhantomData,
      value: $value,
    }
  };
}

#[macro_export]
macro_rules! assert_uom_eq {
  ($unit:ident, $lhs:expr, $rhs:expr, $algo:ident <= $tol:expr) => {
    float_eq::assert_float_eq!($lhs.get::<$unit>(), $rhs.get::<$unit>(), $algo <= $tol)
  };
}
