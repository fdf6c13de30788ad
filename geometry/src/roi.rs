use std::fmt;
use std::ops::Range;

use log::warn;
use serde::Deserialize;

/// Rectangular region of a 2D frame: columns `x0..x1`, rows `y0..y1`.
///
/// Written in configuration files as `[x0, y0, x1, y1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "[usize; 4]")]
pub struct Roi {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl Roi {

    /// Build a ROI, swapping any inverted pair of bounds.
    pub fn new(x0: usize, y0: usize, x1: usize, y1: usize) -> Self {
        Self { x0, y0, x1, y1 }.normalized()
    }

    /// The whole of a `width` x `height` frame.
    pub fn full(width: usize, height: usize) -> Self {
        Self { x0: 0, y0: 0, x1: width, y1: height }
    }

    pub fn normalized(self) -> Self {
        let Self { mut x0, mut y0, mut x1, mut y1 } = self;
        if x1 < x0 {
            warn!("ROI {self} has inverted columns, swapping");
            std::mem::swap(&mut x0, &mut x1);
        }
        if y1 < y0 {
            warn!("ROI {self} has inverted rows, swapping");
            std::mem::swap(&mut y0, &mut y1);
        }
        Self { x0, y0, x1, y1 }
    }

    pub fn width (&self) -> usize { self.x1 - self.x0 }
    pub fn height(&self) -> usize { self.y1 - self.y0 }

    pub fn columns(&self) -> Range<usize> { self.x0..self.x1 }
    pub fn rows   (&self) -> Range<usize> { self.y0..self.y1 }

    pub fn is_empty(&self) -> bool { self.width() == 0 || self.height() == 0 }

    /// Same columns, different rows.
    pub fn with_rows(self, y0: usize, y1: usize) -> Self {
        Self { y0, y1, ..self }
    }

    /// Whether `other` lies entirely within `self`.
    pub fn contains(&self, other: &Roi) -> bool {
        self.x0 <= other.x0 && other.x1 <= self.x1 &&
        self.y0 <= other.y0 && other.y1 <= self.y1
    }

    /// Express `other` in coordinates relative to the top-left corner of `self`.
    pub fn relative(&self, other: &Roi) -> Roi {
        Roi {
            x0: other.x0.saturating_sub(self.x0),
            y0: other.y0.saturating_sub(self.y0),
            x1: other.x1.saturating_sub(self.x0),
            y1: other.y1.saturating_sub(self.y0),
        }
    }
}

impl From<[usize; 4]> for Roi {
    fn from([x0, y0, x1, y1]: [usize; 4]) -> Self { Self::new(x0, y0, x1, y1) }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x0, self.y0, self.x1, self.y1)
    }
}

// ----- Volume of interest --------------------------------------------------------------

/// Box within a reconstructed volume, written as `[x0, x1, y0, y1, z0, z1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "[usize; 6]")]
pub struct Voi {
    pub x0: usize, pub x1: usize,
    pub y0: usize, pub y1: usize,
    pub z0: usize, pub z1: usize,
}

impl Voi {
    /// `[nx, ny, nz]`
    pub fn dims(&self) -> [usize; 3] {
        [self.x1 - self.x0, self.y1 - self.y0, self.z1 - self.z0]
    }
}

impl From<[usize; 6]> for Voi {
    fn from(v: [usize; 6]) -> Self {
        let [mut x0, mut x1, mut y0, mut y1, mut z0, mut z1] = v;
        for (lo, hi, axis) in [(&mut x0, &mut x1, 'x'), (&mut y0, &mut y1, 'y'), (&mut z0, &mut z1, 'z')] {
            if *hi < *lo {
                warn!("VOI {v:?} has inverted {axis} bounds, swapping");
                std::mem::swap(lo, hi);
            }
        }
        Self { x0, x1, y0, y1, z0, z1 }
    }
}

impl fmt::Display for Voi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}, {}, {}]", self.x0, self.x1, self.y0, self.y1, self.z0, self.z1)
    }
}
