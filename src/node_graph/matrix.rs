use std::cell::{Cell, Ref, RefCell};

use super::color::{Hsv, HsvMatrix, Rgb, RgbMatrix};
use crate::models::schema::Size;

/// The data carried by a Node: a grid of colors that can be read and
/// written as HSV or RGB, plus a cached scalar "value" mirroring the
/// brightness of cell (0, 0).
///
/// At most one of the two color representations is authoritative; the
/// other one is derived on first read and cached. If neither is valid the
/// matrix is a pure scalar and both derive from the value as gray.
#[derive(Clone, Debug)]
pub struct ColorMatrix {
    width: usize,
    height: usize,
    hsv_data: RefCell<HsvMatrix>,
    hsv_valid: Cell<bool>,
    rgb_data: RefCell<RgbMatrix>,
    rgb_valid: Cell<bool>,
    value: Cell<f64>,
    value_valid: Cell<bool>,
    absolute_maximum: f64,
    absolute_maximum_provided: bool,
}

impl Default for ColorMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorMatrix {
    /// A 1x1 matrix with value 0.
    pub fn new() -> Self {
        Self {
            width: 1,
            height: 1,
            hsv_data: RefCell::new(HsvMatrix::new(1, 1)),
            hsv_valid: Cell::new(false),
            rgb_data: RefCell::new(RgbMatrix::new(1, 1)),
            rgb_valid: Cell::new(false),
            value: Cell::new(0.0),
            value_valid: Cell::new(true),
            absolute_maximum: 1.0,
            absolute_maximum_provided: false,
        }
    }

    /// A zero matrix of the given size.
    pub fn with_size(size: Size) -> Self {
        let mut matrix = Self::new();
        matrix.rescale_to(size.width, size.height);
        matrix
    }

    // -------------------- Size ---------------------

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn has_same_size_as(&self, other: &ColorMatrix) -> bool {
        self.width == other.width && self.height == other.height
    }

    pub fn is_smaller_than(&self, other: &ColorMatrix) -> bool {
        self.width < other.width || self.height < other.height
    }

    /// True if only the scalar value is set, i.e. no per-cell data exists.
    pub fn is_scalar(&self) -> bool {
        !self.hsv_valid.get() && !self.rgb_valid.get()
    }

    pub fn rescale_to(&mut self, width: usize, height: usize) {
        if width == self.width && height == self.height {
            return;
        }
        if width < 1 || height < 1 {
            log::warn!(
                "[NodeGraph] Requested ColorMatrix size {}x{} is invalid",
                width,
                height
            );
            return;
        }
        self.hsv_data.get_mut().rescale(width, height);
        self.rgb_data.get_mut().rescale(width, height);
        self.width = width;
        self.height = height;
    }

    /// Grows to at least the given size, never shrinks.
    pub fn expand_to(&mut self, width: usize, height: usize) {
        self.rescale_to(self.width.max(width), self.height.max(height));
    }

    // -------------------- HSV ---------------------

    pub fn set_hsv(&mut self, h: f64, s: f64, v: f64) {
        self.hsv_data.get_mut().fill(Hsv::new(h, s, v));
        self.mark_hsv_written();
    }

    pub fn set_hsv_at(&mut self, x: usize, y: usize, h: f64, s: f64, v: f64) {
        // Cells that were never written still hold stale data.
        self.ensure_hsv();
        *self.hsv_data.get_mut().at_mut(x, y) = Hsv::new(h, s, v);
        self.mark_hsv_written();
    }

    /// Replaces the HSV grid; the matrix takes the size of `data`.
    pub fn set_hsv_matrix(&mut self, data: HsvMatrix) {
        let size = data.size();
        *self.hsv_data.get_mut() = data;
        self.rgb_data.get_mut().rescale(size.width, size.height);
        self.width = size.width;
        self.height = size.height;
        self.mark_hsv_written();
    }

    pub fn hsv(&self) -> Ref<'_, HsvMatrix> {
        self.ensure_hsv();
        self.hsv_data.borrow()
    }

    pub fn hsv_at(&self, x: usize, y: usize) -> Hsv {
        self.ensure_hsv();
        self.hsv_data.borrow().at(x, y)
    }

    // -------------------- RGB ---------------------

    pub fn set_rgb(&mut self, r: f64, g: f64, b: f64) {
        self.rgb_data.get_mut().fill(Rgb::new(r, g, b));
        self.mark_rgb_written();
    }

    pub fn set_rgb_at(&mut self, x: usize, y: usize, r: f64, g: f64, b: f64) {
        self.ensure_rgb();
        *self.rgb_data.get_mut().at_mut(x, y) = Rgb::new(r, g, b);
        self.mark_rgb_written();
    }

    /// Replaces the RGB grid; the matrix takes the size of `data`.
    pub fn set_rgb_matrix(&mut self, data: RgbMatrix) {
        let size = data.size();
        *self.rgb_data.get_mut() = data;
        self.hsv_data.get_mut().rescale(size.width, size.height);
        self.width = size.width;
        self.height = size.height;
        self.mark_rgb_written();
    }

    pub fn rgb(&self) -> Ref<'_, RgbMatrix> {
        self.ensure_rgb();
        self.rgb_data.borrow()
    }

    pub fn rgb_at(&self, x: usize, y: usize) -> Rgb {
        self.ensure_rgb();
        self.rgb_data.borrow().at(x, y)
    }

    // -------------------- Value ---------------------

    /// Sets the scalar value, clamped to [0, 1]. Per-cell data is only
    /// derived from it on demand.
    pub fn set_value(&mut self, v: f64) {
        let v = if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        self.value.set(v);
        self.value_valid.set(true);
        self.hsv_valid.set(false);
        self.rgb_valid.set(false);
    }

    pub fn value(&self) -> f64 {
        if !self.value_valid.get() {
            let v = if self.hsv_valid.get() {
                self.hsv_data.borrow().at(0, 0).v
            } else {
                self.rgb_data.borrow().at(0, 0).max()
            };
            self.value.set(v);
            self.value_valid.set(true);
        }
        self.value.get()
    }

    // -------------------- Absolute value ---------------------

    pub fn set_absolute_maximum(&mut self, maximum: f64) {
        self.absolute_maximum = maximum;
        self.absolute_maximum_provided = true;
    }

    pub fn absolute_maximum(&self) -> f64 {
        self.absolute_maximum
    }

    pub fn absolute_maximum_is_provided(&self) -> bool {
        self.absolute_maximum_provided
    }

    pub fn reset_absolute_maximum(&mut self) {
        self.absolute_maximum_provided = false;
    }

    /// Stores an unbounded value as scalar 1.0 with `v` as the maximum.
    pub fn set_absolute_value(&mut self, v: f64) {
        self.set_value(1.0);
        self.set_absolute_maximum(v);
    }

    /// Normalized value times the stored maximum, or times `default_max`
    /// if no maximum was ever provided.
    pub fn absolute_value(&self, default_max: f64) -> f64 {
        let maximum = if self.absolute_maximum_provided {
            self.absolute_maximum
        } else {
            default_max
        };
        self.value() * maximum
    }

    // -------------------- Merging ---------------------

    /// Highest-takes-precedence merge of `other` into this matrix.
    ///
    /// Two pure scalars merge without touching per-cell data. Otherwise both
    /// sides are read as RGB and merged channel-wise; the result grows to the
    /// larger of the two sizes.
    pub fn mix_htp(&mut self, other: &ColorMatrix) {
        self.merge_absolute_maximum(other);

        if self.is_scalar() && other.is_scalar() {
            let v = self.value().max(other.value());
            self.value.set(v);
            self.value_valid.set(true);
            return;
        }

        self.ensure_rgb();
        let target = self.size().max(other.size());
        self.rescale_to(target.width, target.height);
        {
            let other_rgb = other.rgb();
            self.rgb_data.get_mut().add_htp(&other_rgb);
        }
        self.mark_rgb_written();
    }

    /// Linear HSV crossfade towards `other`.
    pub fn fade_to(&mut self, other: &ColorMatrix, pos: f64) {
        self.ensure_hsv();
        {
            let other_hsv = other.hsv();
            self.hsv_data.get_mut().fade_to(&other_hsv, pos.clamp(0.0, 1.0));
        }
        self.mark_hsv_written();
    }

    fn merge_absolute_maximum(&mut self, other: &ColorMatrix) {
        if !other.absolute_maximum_provided {
            return;
        }
        if self.absolute_maximum_provided {
            self.absolute_maximum = self.absolute_maximum.max(other.absolute_maximum);
        } else {
            self.absolute_maximum = other.absolute_maximum;
            self.absolute_maximum_provided = true;
        }
    }

    // -------------------- Cache maintenance ---------------------

    fn mark_hsv_written(&mut self) {
        self.hsv_valid.set(true);
        self.rgb_valid.set(false);
        self.value_valid.set(false);
    }

    fn mark_rgb_written(&mut self) {
        self.rgb_valid.set(true);
        self.hsv_valid.set(false);
        self.value_valid.set(false);
    }

    fn ensure_hsv(&self) {
        if self.hsv_valid.get() {
            return;
        }
        let gray = self.value();
        {
            let mut hsv = self.hsv_data.borrow_mut();
            if self.rgb_valid.get() {
                let rgb = self.rgb_data.borrow();
                for x in 0..self.width {
                    for y in 0..self.height {
                        *hsv.at_mut(x, y) = Hsv::from(rgb.at(x, y));
                    }
                }
            } else {
                hsv.fill(Hsv::new(0.0, 0.0, gray));
            }
        }
        self.hsv_valid.set(true);
    }

    fn ensure_rgb(&self) {
        if self.rgb_valid.get() {
            return;
        }
        let gray = self.value();
        {
            let mut rgb = self.rgb_data.borrow_mut();
            if self.hsv_valid.get() {
                let hsv = self.hsv_data.borrow();
                for x in 0..self.width {
                    for y in 0..self.height {
                        *rgb.at_mut(x, y) = Rgb::from(hsv.at(x, y));
                    }
                }
            } else {
                rgb.fill(Rgb::gray(gray));
            }
        }
        self.rgb_valid.set(true);
    }
}

impl PartialEq for ColorMatrix {
    /// Equal if sizes and RGB cells match and both agree on the absolute
    /// maximum. Two pure scalars compare by value.
    fn eq(&self, other: &Self) -> bool {
        if self.absolute_maximum_provided != other.absolute_maximum_provided
            || (self.absolute_maximum_provided && self.absolute_maximum != other.absolute_maximum)
        {
            return false;
        }
        if self.is_scalar() && other.is_scalar() {
            return self.value() == other.value();
        }
        self.size() == other.size() && *self.rgb() == *other.rgb()
    }
}
