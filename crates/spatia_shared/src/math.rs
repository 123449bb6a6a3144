//! Geometry value types handed across the partition boundary.
//!
//! Everything is `f32` world units. Boxes are closed on both ends: two boxes
//! that merely touch are considered intersecting.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// 3D Vector - position, extent, direction
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
}

impl Vec3 {
    /// Creates a new Vec3
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Creates a vector with the same value on every axis
    #[must_use]
    pub const fn splat(v: f32) -> Self {
        Self::new(v, v, v)
    }

    /// Zero vector
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Converts to array
    #[must_use]
    pub const fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// Creates from array
    #[must_use]
    pub const fn from_array(arr: [f32; 3]) -> Self {
        Self::new(arr[0], arr[1], arr[2])
    }

    /// Component-wise minimum
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    /// Component-wise maximum
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }

    /// Component-wise absolute value
    #[must_use]
    pub fn abs(self) -> Self {
        Self::new(self.x.abs(), self.y.abs(), self.z.abs())
    }

    /// Largest component
    #[must_use]
    pub fn max_element(self) -> f32 {
        self.x.max(self.y).max(self.z)
    }

    /// Dot product
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Length squared (avoids sqrt)
    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    /// True when every component is finite.
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl std::ops::Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Mul<f32> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl std::ops::Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl std::ops::Index<usize> for Vec3 {
    type Output = f32;
    fn index(&self, axis: usize) -> &f32 {
        match axis {
            0 => &self.x,
            1 => &self.y,
            2 => &self.z,
            _ => panic!("axis {axis} out of range"),
        }
    }
}

/// Axis-aligned bounding box.
///
/// `min` and `max` are both inclusive. [`Aabb::EMPTY`] is inverted so that
/// it intersects nothing and contains nothing.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Aabb {
    /// Sentinel for "no bounds yet".
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(-f32::MAX),
    };

    /// Creates a box from its corners.
    #[must_use]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Creates a box from a center and half extents.
    #[must_use]
    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    /// True if `min > max` on any axis.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Edge lengths.
    #[must_use]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Grows the box by `amount` on every side.
    #[must_use]
    pub fn bloated(&self, amount: f32) -> Self {
        let pad = Vec3::splat(amount);
        Self::new(self.min - pad, self.max + pad)
    }

    /// Clamps both corners into `bounds`.
    ///
    /// A box entirely outside `bounds` collapses onto its nearest face.
    #[must_use]
    pub fn clamped(&self, bounds: &Self) -> Self {
        Self::new(
            self.min.max(bounds.min).min(bounds.max),
            self.max.min(bounds.max).max(bounds.min),
        )
    }

    /// Closed-interval overlap test.
    #[inline]
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Closed-interval point containment.
    #[inline]
    #[must_use]
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    /// True if every corner coordinate differs from `other` by at most `tolerance`.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, tolerance: f32) -> bool {
        let dmin = (self.min - other.min).abs();
        let dmax = (self.max - other.max).abs();
        dmin.max(dmax).max_element() <= tolerance
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Sphere query volume.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sphere {
    /// Center point
    pub center: Vec3,
    /// Radius, non-negative
    pub radius: f32,
}

impl Sphere {
    /// Creates a new sphere.
    #[must_use]
    pub const fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// The tightest box around the sphere.
    #[must_use]
    pub fn bounds(&self) -> Aabb {
        Aabb::from_center(self.center, Vec3::splat(self.radius))
    }

    /// Closest-point test against a box.
    #[inline]
    #[must_use]
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        let closest = self.center.max(aabb.min).min(aabb.max);
        (closest - self.center).length_squared() <= self.radius * self.radius
    }
}

/// A segment from `start` to `start + delta`, optionally swept by a box.
///
/// With zero `extents` this is an infinitely thin ray. With non-zero
/// `extents` it models a box of half size `extents` moving along the
/// segment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    /// Segment start (center of the swept box).
    pub start: Vec3,
    /// Segment vector; the segment covers `t` in `[0, 1]`.
    pub delta: Vec3,
    /// Half extents of the swept box, zero for a plain ray.
    pub extents: Vec3,
}

impl Ray {
    /// A plain ray between two points.
    #[must_use]
    pub fn segment(start: Vec3, end: Vec3) -> Self {
        Self {
            start,
            delta: end - start,
            extents: Vec3::ZERO,
        }
    }

    /// A box of half size `extents` swept from `start` to `end`.
    #[must_use]
    pub fn swept(start: Vec3, end: Vec3, extents: Vec3) -> Self {
        Self {
            start,
            delta: end - start,
            extents: extents.abs(),
        }
    }

    /// True for a plain (zero-extent) ray.
    #[must_use]
    pub fn is_ray(&self) -> bool {
        self.extents == Vec3::ZERO
    }

    /// Point on the segment at parameter `t`.
    #[must_use]
    pub fn point_at(&self, t: f32) -> Vec3 {
        self.start + self.delta * t
    }

    /// Slab test of the swept volume against `aabb`, limited to `[t_min, t_max]`.
    ///
    /// Returns the parametric interval during which the swept box overlaps
    /// `aabb`, or `None`.
    #[must_use]
    pub fn clip(&self, aabb: &Aabb, t_min: f32, t_max: f32) -> Option<(f32, f32)> {
        let lo = aabb.min - self.extents;
        let hi = aabb.max + self.extents;
        let mut enter = t_min;
        let mut exit = t_max;
        for axis in 0..3 {
            let start = self.start[axis];
            let delta = self.delta[axis];
            if delta == 0.0 {
                if start < lo[axis] || start > hi[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / delta;
            let t0 = (lo[axis] - start) * inv;
            let t1 = (hi[axis] - start) * inv;
            enter = enter.max(t0.min(t1));
            exit = exit.min(t0.max(t1));
            if enter > exit {
                return None;
            }
        }
        Some((enter, exit))
    }
}
