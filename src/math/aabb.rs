//! Axis-aligned bounding box

use crate::core::types::{Quat, Vec3};

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create AABB from min and max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest AABB containing every point, or `None` for an empty set
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Option<Aabb> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        let mut aabb = Aabb::new(first, first);
        for p in iter {
            aabb.expand(*p);
        }
        Some(aabb)
    }

    /// Conservative bounds for an entity rotating about its origin.
    ///
    /// The forward axis gets twice `size`, right and up get `size`; each
    /// world axis takes the sum of absolute projections so the box holds
    /// the whole oriented extent.
    pub fn from_oriented_extents(rotation: Quat, size: f32) -> Aabb {
        let forward = rotation * Vec3::X * (size * 2.0);
        let right = rotation * -Vec3::Y * size;
        let up = rotation * Vec3::Z * size;
        let extent = forward.abs() + right.abs() + up.abs();
        Aabb::new(-extent, extent)
    }

    /// Get center point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size (max - min)
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Check if point is inside AABB (inclusive)
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x && p.x <= self.max.x &&
        p.y >= self.min.y && p.y <= self.max.y &&
        p.z >= self.min.z && p.z <= self.max.z
    }

    /// Expand AABB to include point
    pub fn expand(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Return a copy grown by `margin` on every side
    pub fn inflated(&self, margin: f32) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }
}
