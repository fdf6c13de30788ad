//! Filtered back-projection.
//!
//! Both back-projectors shipped with the crate follow the same pattern:
//!
//! + `set_roi` allocates the slices of the block, `[slice, y, x]`, zeroed
//!
//! + `process` ramp-filters a copy of the projections and adds the
//!   contribution of every projection to every voxel, in parallel over
//!   slices
//!
//! They differ in how a voxel maps onto the detector:
//!
//! + `ParallelFbp`: parallel rays, so slice `j` only sees detector row `j`
//!
//! + `ConeFdk`: rays diverging from a point source (Feldkamp, Davis and
//!   Kress), so the detector row depends on the voxel's distance from the
//!   source
//!
//! Reconstructed values are attenuation per voxel edge length.

mod filter;
mod parallel;
mod cone;

pub use filter::{RampFilter, Window};
pub use parallel::ParallelFbp;
pub use cone::ConeFdk;

use std::f32::consts::PI;

use ndarray::{parallel::prelude::*, ArrayView1, ArrayView2, Axis};

use crate::module::ModuleResult;
use crate::parameters::{get_enum_parameter, get_float_parameter, or_default, Parameters};
use crate::reader::BlockParameters;
use crate::types::{ProjectionStack, Radiansf32, Volume};
use geometry::Roi;

/// Filter settings read from a back-projector's parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
struct FilterSettings {
    window: Window,
    /// Fraction of the Nyquist frequency
    cutoff: f32,
}

impl Default for FilterSettings {
    fn default() -> Self { Self { window: Window::RamLak, cutoff: 1.0 } }
}

impl FilterSettings {
    fn from_parameters(params: &Parameters) -> ModuleResult<Self> {
        let window = or_default(get_enum_parameter (params, "window"), Window::RamLak)?;
        let cutoff = or_default(get_float_parameter(params, "cutoff"), 1.0)?;
        if !(cutoff > 0.0 && cutoff <= 1.0) {
            return Err(format!("filter cutoff {cutoff} outside (0, 1]").into());
        }
        Ok(Self { window, cutoff })
    }
}

/// Ramp filter cached across blocks of equal width.
#[derive(Debug, Default)]
struct FilterCache {
    settings: FilterSettings,
    filter  : Option<RampFilter>,
}

impl FilterCache {

    fn new(settings: FilterSettings) -> Self { Self { settings, filter: None } }

    fn for_width(&mut self, width: usize) -> &RampFilter {
        if self.filter.as_ref().map_or(false, |f| f.width() != width) {
            self.filter = None;
        }
        let FilterSettings { window, cutoff } = self.settings;
        self.filter.get_or_insert_with(|| RampFilter::new(width, window, cutoff))
    }

    /// Filter every detector row of every projection in `stack`.
    fn filter_rows(&mut self, stack: &mut ProjectionStack) {
        let filter = self.for_width(stack.len_of(Axis(2)));
        stack.axis_iter_mut(Axis(0)).into_par_iter()
            .for_each_init(Vec::new, |buffer, mut projection| {
                for row in projection.rows_mut() { filter.apply(row, buffer) }
            });
    }
}

/// Per-projection `(cos, sin, weight)`, with `rotation` degrees added to every
/// angle. Missing weights are shared equally over half a turn.
fn trigonometry(params: &BlockParameters, rotation: f32) -> ModuleResult<Vec<(f32, f32, f32)>> {
    let n = params.angles.len();
    if !params.weights.is_empty() && params.weights.len() != n {
        return Err(format!("{} weights for {n} angles", params.weights.len()).into());
    }
    Ok(params.angles.iter().enumerate().map(|(i, angle)| {
        let theta: Radiansf32 = (angle + rotation).to_radians();
        let weight = params.weights.get(i).copied().unwrap_or(PI / n as f32);
        (theta.cos(), theta.sin(), weight)
    }).collect())
}

fn check_stack(stack: &ProjectionStack, params: &BlockParameters) -> ModuleResult<()> {
    let (n, rows, cols) = stack.dim();
    if params.angles.len() != n {
        return Err(format!("{} angles for {n} projections", params.angles.len()).into());
    }
    if !params.stack_roi.is_empty() && (params.stack_roi.height(), params.stack_roi.width()) != (rows, cols) {
        return Err(format!("stack of {rows}x{cols} does not match its ROI {}", params.stack_roi).into());
    }
    Ok(())
}

/// The detector region a stack covers; the stack's own extent at the origin
/// if the parameters don't say.
fn stack_roi(stack: &ProjectionStack, params: &BlockParameters) -> Roi {
    if params.stack_roi.is_empty() {
        Roi::full(stack.len_of(Axis(2)), stack.len_of(Axis(1)))
    } else {
        params.stack_roi
    }
}

/// Zeroed slices for `roi`: one per row, each `width x width`.
fn allocate(roi: &Roi) -> ModuleResult<Volume> {
    if roi.is_empty() { return Err(format!("empty ROI {roi}").into()) }
    Ok(Volume::zeros((roi.height(), roi.width(), roi.width())))
}

/// Linear interpolation in `row` at fractional index `u`; zero outside.
fn interpolate(row: ArrayView1<f32>, u: f32) -> f32 {
    if !(u >= 0.0) { return 0.0 }
    let i = u.floor() as usize;
    let f = u - i as f32;
    match (row.get(i), row.get(i + 1)) {
        (Some(&a), Some(&b)) => a + (b - a) * f,
        (Some(&a), None) if f == 0.0 => a,
        _ => 0.0,
    }
}

/// Bilinear interpolation in `image` at fractional `[row, column]`; zero
/// outside.
fn interpolate2(image: ArrayView2<f32>, r: f32, c: f32) -> f32 {
    if !(r >= 0.0) { return 0.0 }
    let i = r.floor() as usize;
    let f = r - i as f32;
    let (rows, _) = image.dim();
    let at = |k: usize| if k < rows { interpolate(image.row(k), c) } else { 0.0 };
    match f {
        f if f == 0.0 => at(i),
        f             => at(i) * (1.0 - f) + at(i + 1) * f,
    }
}
