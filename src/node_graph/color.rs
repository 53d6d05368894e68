//! Color primitives and the plain 2-D grids the ColorMatrix caches into.
//!
//! All channels are floats in [0, 1]. Hue is a fraction of a full turn,
//! not degrees.

use serde::{Deserialize, Serialize};

use crate::models::schema::Size;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct Hsv {
    pub h: f64,
    pub s: f64,
    pub v: f64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Hsv {
    pub const fn new(h: f64, s: f64, v: f64) -> Self {
        Self { h, s, v }
    }
}

impl Rgb {
    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    pub const fn gray(v: f64) -> Self {
        Self { r: v, g: v, b: v }
    }

    pub fn max(&self) -> f64 {
        self.r.max(self.g).max(self.b)
    }

    /// Channel-wise maximum.
    pub fn mix_htp(&mut self, other: &Rgb) {
        self.r = self.r.max(other.r);
        self.g = self.g.max(other.g);
        self.b = self.b.max(other.b);
    }
}

impl From<Rgb> for Hsv {
    fn from(rgb: Rgb) -> Self {
        let Rgb { r, g, b } = rgb;
        let maxc = r.max(g).max(b);
        let minc = r.min(g).min(b);
        if minc == maxc {
            return Hsv::new(0.0, 0.0, maxc);
        }
        let delta = maxc - minc;
        let s = delta / maxc;
        let h = if r == maxc {
            (g - b) / delta
        } else if g == maxc {
            2.0 + (b - r) / delta
        } else {
            4.0 + (r - g) / delta
        };
        let mut h = (h / 6.0) % 1.0;
        if h < 0.0 {
            h += 1.0;
        }
        Hsv::new(h, s, maxc)
    }
}

impl From<Hsv> for Rgb {
    fn from(hsv: Hsv) -> Self {
        let Hsv { h, s, v } = hsv;
        if s == 0.0 {
            return Rgb::gray(v);
        }
        let sector = (h * 6.0).floor();
        let f = h * 6.0 - sector;
        let p = v * (1.0 - s);
        let q = v * (1.0 - s * f);
        let t = v * (1.0 - s * (1.0 - f));
        match (sector as i64).rem_euclid(6) {
            0 => Rgb::new(v, t, p),
            1 => Rgb::new(q, v, p),
            2 => Rgb::new(p, v, t),
            3 => Rgb::new(p, q, v),
            4 => Rgb::new(t, p, v),
            _ => Rgb::new(v, p, q),
        }
    }
}

/// Width x height grid stored column by column (`x * height + y`).
#[derive(Clone, Debug, PartialEq)]
pub struct Grid<T> {
    data: Vec<T>,
    width: usize,
    height: usize,
}

pub type HsvMatrix = Grid<Hsv>;
pub type RgbMatrix = Grid<Rgb>;

impl<T: Copy + Default> Grid<T> {
    pub fn new(width: usize, height: usize) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            data: vec![T::default(); width * height],
            width,
            height,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Cell at (x, y); coordinates wrap around the grid size.
    pub fn at(&self, x: usize, y: usize) -> T {
        self.data[self.offset(x, y)]
    }

    pub fn at_mut(&mut self, x: usize, y: usize) -> &mut T {
        let offset = self.offset(x, y);
        &mut self.data[offset]
    }

    pub fn fill(&mut self, value: T) {
        self.data.iter_mut().for_each(|cell| *cell = value);
    }

    /// Resizes to at least 1x1, keeping cells that stay in bounds and
    /// defaulting the new ones.
    pub fn rescale(&mut self, width: usize, height: usize) {
        let width = width.max(1);
        let height = height.max(1);
        if width == self.width && height == self.height {
            return;
        }
        let mut data = vec![T::default(); width * height];
        for x in 0..width.min(self.width) {
            for y in 0..height.min(self.height) {
                data[x * height + y] = self.data[x * self.height + y];
            }
        }
        self.data = data;
        self.width = width;
        self.height = height;
    }

    fn offset(&self, x: usize, y: usize) -> usize {
        (x % self.width) * self.height + (y % self.height)
    }
}

impl<T: Copy + Default> Default for Grid<T> {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl RgbMatrix {
    /// Channel-wise HTP merge over the overlapping region.
    pub fn add_htp(&mut self, other: &RgbMatrix) {
        for x in 0..self.width.min(other.width) {
            for y in 0..self.height.min(other.height) {
                self.at_mut(x, y).mix_htp(&other.at(x, y));
            }
        }
    }
}

impl HsvMatrix {
    /// Linear crossfade towards `other`; `pos` 0 keeps this grid, 1 takes `other`.
    pub fn fade_to(&mut self, other: &HsvMatrix, pos: f64) {
        for x in 0..self.width {
            for y in 0..self.height {
                let target = other.at(x, y);
                let col = self.at_mut(x, y);
                col.h = col.h * (1.0 - pos) + target.h * pos;
                col.s = col.s * (1.0 - pos) + target.s * pos;
                col.v = col.v * (1.0 - pos) + target.v * pos;
            }
        }
    }
}
