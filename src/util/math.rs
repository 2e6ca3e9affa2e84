//! Bounding-box math shared by the builder, cost model and quantizer.

pub use glam::Vec3;

use std::fmt;

/// Axis-aligned bounding box with single precision.
#[derive(Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Empty bounding box (inverted, will expand on first point).
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create a new bounding box from min and max points.
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create a bounding box from a single point.
    #[inline]
    pub fn from_point(p: Vec3) -> Self {
        Self { min: p, max: p }
    }

    /// Build from interleaved `[xmin, xmax, ymin, ymax, zmin, zmax]` bounds.
    #[inline]
    pub fn from_bounds(b: [f32; 6]) -> Self {
        Self {
            min: Vec3::new(b[0], b[2], b[4]),
            max: Vec3::new(b[1], b[3], b[5]),
        }
    }

    /// Interleaved `[xmin, xmax, ymin, ymax, zmin, zmax]` bounds.
    #[inline]
    pub fn to_bounds(&self) -> [f32; 6] {
        [
            self.min.x, self.max.x, self.min.y, self.max.y, self.min.z, self.max.z,
        ]
    }

    /// Check if this box is empty (has no volume).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// True if every coordinate is finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    /// Expand this box to include a point.
    #[inline]
    pub fn expand_by_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Expand this box to include another box.
    #[inline]
    pub fn expand_by_box(&mut self, other: &Self) {
        if !other.is_empty() {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
    }

    /// True if `other` lies entirely inside this box.
    #[inline]
    pub fn contains(&self, other: &Self) -> bool {
        self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
    }

    /// Get the size (extents) of the box.
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Largest extent over the three axes.
    #[inline]
    pub fn max_extent(&self) -> f32 {
        self.size().max_element()
    }

    /// Half the surface area, the SAH hit-probability proxy.
    #[inline]
    pub fn half_area(&self) -> f32 {
        let d = self.size();
        d.x * d.y + d.y * d.z + d.z * d.x
    }

    /// Full surface area.
    #[inline]
    pub fn area(&self) -> f32 {
        2.0 * self.half_area()
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for Aabb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aabb({:?} - {:?})", self.min, self.max)
    }
}

/// Floor to `i32`, saturating at the type limits. NaN must be filtered earlier.
#[inline]
pub fn floor_to_i32(x: f32) -> i32 {
    debug_assert!(!x.is_nan());
    x.floor() as i32
}

/// Ceil to `i32`, saturating at the type limits. NaN must be filtered earlier.
#[inline]
pub fn ceil_to_i32(x: f32) -> i32 {
    debug_assert!(!x.is_nan());
    x.ceil() as i32
}
