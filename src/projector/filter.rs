//! Ramp filtering of detector rows in the frequency domain.

use std::f32::consts::PI;
use std::str::FromStr;
use std::sync::Arc;

use ndarray::ArrayViewMut1;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Apodization applied on top of the ramp.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Window {
    #[default]
    RamLak,
    SheppLogan,
    Hann,
}

impl FromStr for Window {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "ramlak"     => Ok(Self::RamLak),
            "shepplogan" => Ok(Self::SheppLogan),
            "hann"       => Ok(Self::Hann),
            other        => Err(format!("unknown filter window '{other}'")),
        }
    }
}

impl Window {
    /// Weight at `x`, the frequency as a fraction of the cutoff.
    fn weight(self, x: f32) -> f32 {
        if x > 1.0 { return 0.0 }
        match self {
            Self::RamLak     => 1.0,
            Self::SheppLogan => if x == 0.0 { 1.0 } else { let a = PI * x / 2.0; a.sin() / a },
            Self::Hann       => 0.5 * (1.0 + (PI * x).cos()),
        }
    }
}

/// Convolution of rows of fixed width with the band-limited ramp kernel.
///
/// Rows are zero-padded to a power of two at least twice their width, so the
/// convolution does not wrap around.
pub struct RampFilter {
    width   : usize,
    response: Vec<f32>,
    forward : Arc<dyn Fft<f32>>,
    inverse : Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for RampFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RampFilter").field("width", &self.width).field("padded", &self.response.len()).finish()
    }
}

impl RampFilter {

    /// `cutoff` is the fraction of the Nyquist frequency passed by the window.
    pub fn new(width: usize, window: Window, cutoff: f32) -> Self {
        let n = (2 * width.max(1)).next_power_of_two();
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(n);
        let inverse = planner.plan_fft_inverse(n);

        // Spatial kernel: 1/4 at the origin, -1/(πk)² at odd offsets
        let mut kernel = (0..n).map(|i| {
            let k = if i <= n / 2 { i } else { n - i };
            let h = match k {
                0                => 0.25,
                k if k % 2 == 1  => -1.0 / (PI * k as f32).powi(2),
                _                => 0.0,
            };
            Complex::new(h, 0.0)
        }).collect::<Vec<_>>();
        forward.process(&mut kernel);

        let cutoff = cutoff.clamp(f32::EPSILON, 1.0);
        let response = kernel.iter().enumerate().map(|(i, h)| {
            let k = if i <= n / 2 { i } else { n - i };
            let x = k as f32 / (n as f32 / 2.0) / cutoff;
            h.re * window.weight(x) / n as f32
        }).collect();
        Self { width, response, forward, inverse }
    }

    pub fn width(&self) -> usize { self.width }

    /// Filter `row` in place. `buffer` is scratch space, reused between calls.
    pub fn apply(&self, mut row: ArrayViewMut1<f32>, buffer: &mut Vec<Complex<f32>>) {
        let n = self.response.len();
        buffer.clear();
        buffer.extend(row.iter().map(|&v| Complex::new(v, 0.0)));
        buffer.resize(n, Complex::new(0.0, 0.0));
        self.forward.process(buffer);
        for (b, &r) in buffer.iter_mut().zip(&self.response) { *b *= r }
        self.inverse.process(buffer);
        for (v, b) in row.iter_mut().zip(buffer.iter()) { *v = b.re }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;
    use ndarray::Array1;
    use rstest::rstest;

    /// Direct convolution with the same kernel, for comparison.
    fn convolve(row: &[f32]) -> Vec<f32> {
        let kernel = |k: isize| match k.unsigned_abs() {
            0                => 0.25,
            k if k % 2 == 1  => -1.0 / (PI * k as f32).powi(2),
            _                => 0.0,
        };
        (0..row.len() as isize).map(|i| {
            (0..row.len() as isize).map(|j| row[j as usize] * kernel(i - j)).sum()
        }).collect()
    }

    #[test]
    fn ramlak_matches_direct_convolution() {
        let row = (0..37).map(|i| ((i as f32) * 0.3).sin() + 1.0).collect::<Vec<_>>();
        let filter = RampFilter::new(row.len(), Window::RamLak, 1.0);
        let mut data = Array1::from(row.clone());
        filter.apply(data.view_mut(), &mut Vec::new());
        for (got, want) in data.iter().zip(convolve(&row)) {
            assert_float_eq!(*got, want, abs <= 1e-4);
        }
    }

    #[test]
    fn filtered_constant_row_sums_to_almost_nothing() {
        // The ramp removes the DC component of an infinitely long row; a finite
        // row keeps only its edges
        let filter = RampFilter::new(64, Window::RamLak, 1.0);
        let mut data = Array1::from_elem(64, 1.0);
        filter.apply(data.view_mut(), &mut Vec::new());
        assert!(data[32].abs() < 0.01, "{}", data[32]);
    }

    #[rstest(/**/ window, x, expected,
             case(Window::RamLak,     0.5, 1.0),
             case(Window::SheppLogan, 0.0, 1.0),
             case(Window::SheppLogan, 1.0, 2.0 / PI),
             case(Window::Hann,       0.5, 0.5),
             case(Window::Hann,       1.0, 0.0),
             case(Window::Hann,       1.5, 0.0),
    )]
    fn window_weights(window: Window, x: f32, expected: f32) {
        assert_float_eq!(window.weight(x), expected, abs <= 1e-6);
    }

    #[rstest(/**/ text, expected,
             case("ramlak",      Ok(Window::RamLak)),
             case("Shepp-Logan", Ok(Window::SheppLogan)),
             case("hann",        Ok(Window::Hann)),
    )]
    fn window_names(text: &str, expected: Result<Window, String>) {
        assert_eq!(text.parse::<Window>(), expected);
    }

    #[test]
    fn smoothing_windows_damp_noise() {
        let noise = (0..32).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect::<Vec<f32>>();
        let energy = |w| {
            let mut d = Array1::from(noise.clone());
            RampFilter::new(32, w, 1.0).apply(d.view_mut(), &mut Vec::new());
            d.iter().map(|v| v * v).sum::<f32>()
        };
        assert!(energy(Window::Hann) < energy(Window::SheppLogan));
        assert!(energy(Window::SheppLogan) < energy(Window::RamLak));
    }
}
