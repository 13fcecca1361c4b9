// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Axis-aligned bounding boxes.

use glam::{Mat3A, Mat4, Vec3A};

/// Axis-aligned bounding box in 3D.
///
/// The invalid box (`min = +inf`, `max = -inf`) is the neutral element of
/// [`Aabb::merge`]: expanding it by any point or box yields that point or box.
/// [`Aabb::default`] returns the invalid box so accumulation loops can start
/// from `Aabb::default()` without a special first iteration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3A,
    /// Maximum corner.
    pub max: Vec3A,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::INVALID
    }
}

impl Aabb {
    /// The invalid/empty box, neutral under [`Aabb::merge`].
    pub const INVALID: Self = Self {
        min: Vec3A::INFINITY,
        max: Vec3A::NEG_INFINITY,
    };

    /// Create a box from min/max corners.
    #[inline]
    pub const fn new(min: Vec3A, max: Vec3A) -> Self {
        Self { min, max }
    }

    /// Create a box from a center point and half-extents.
    #[inline]
    pub fn from_center_half_extents(center: Vec3A, half_extents: Vec3A) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Create a degenerate box containing a single point.
    #[inline]
    pub const fn from_point(point: Vec3A) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    /// Create the tightest box containing all points of the iterator.
    ///
    /// Returns [`Aabb::INVALID`] for an empty iterator.
    pub fn from_points(points: impl IntoIterator<Item = Vec3A>) -> Self {
        let mut out = Self::INVALID;
        for p in points {
            out.expand_point(p);
        }
        out
    }

    /// Center point of the box.
    #[inline]
    pub fn center(&self) -> Vec3A {
        (self.min + self.max) * 0.5
    }

    /// Half the size in each dimension.
    #[inline]
    pub fn half_extents(&self) -> Vec3A {
        (self.max - self.min) * 0.5
    }

    /// Full size in each dimension.
    #[inline]
    pub fn size(&self) -> Vec3A {
        self.max - self.min
    }

    /// Volume of the box.
    #[inline]
    pub fn volume(&self) -> f32 {
        let d = self.size();
        d.x * d.y * d.z
    }

    /// Surface area. This is the SAH cost weight used by the BVH builder.
    #[inline]
    pub fn surface_area(&self) -> f32 {
        let d = self.size();
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Half the surface area. Same ordering as [`Self::surface_area`] at half
    /// the arithmetic, which is all SAH comparisons need.
    #[inline]
    pub fn half_surface_area(&self) -> f32 {
        let d = self.size();
        d.x * d.y + d.y * d.z + d.z * d.x
    }

    /// Whether `min <= max` on every axis. Assumes no NaN.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    /// Index of the longest axis (0 = X, 1 = Y, 2 = Z).
    #[inline]
    pub fn longest_axis(&self) -> usize {
        let d = self.size();
        if d.x >= d.y && d.x >= d.z {
            0
        } else if d.y >= d.z {
            1
        } else {
            2
        }
    }

    /// The 8 corner vertices.
    pub fn corners(&self) -> [Vec3A; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            Vec3A::new(lo.x, lo.y, lo.z),
            Vec3A::new(hi.x, lo.y, lo.z),
            Vec3A::new(lo.x, hi.y, lo.z),
            Vec3A::new(hi.x, hi.y, lo.z),
            Vec3A::new(lo.x, lo.y, hi.z),
            Vec3A::new(hi.x, lo.y, hi.z),
            Vec3A::new(lo.x, hi.y, hi.z),
            Vec3A::new(hi.x, hi.y, hi.z),
        ]
    }

    /// Grow the box to include `point`.
    #[inline]
    pub fn expand_point(&mut self, point: Vec3A) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Grow the box to include `other`.
    #[inline]
    pub fn expand_aabb(&mut self, other: &Self) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Grow the box by a uniform margin on every side.
    #[inline]
    pub fn inflate(&mut self, amount: f32) {
        self.min -= Vec3A::splat(amount);
        self.max += Vec3A::splat(amount);
    }

    /// Translate the box.
    #[inline]
    pub fn translate(&mut self, offset: Vec3A) {
        self.min += offset;
        self.max += offset;
    }

    /// Scale the box about its center.
    #[inline]
    pub fn scale(&mut self, factor: f32) {
        let center = self.center();
        let half = self.half_extents() * factor;
        self.min = center - half;
        self.max = center + half;
    }

    /// The smallest box containing both inputs.
    #[inline]
    pub fn merge(a: &Self, b: &Self) -> Self {
        Self {
            min: a.min.min(b.min),
            max: a.max.max(b.max),
        }
    }

    /// The intersection of both inputs. Invalid when they are disjoint.
    #[inline]
    pub fn intersection(a: &Self, b: &Self) -> Self {
        Self {
            min: a.min.max(b.min),
            max: a.max.min(b.max),
        }
    }

    /// Whether the point lies inside the box (boundary inclusive).
    #[inline]
    pub fn contains_point(&self, point: Vec3A) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Whether `other` is fully contained (boundary inclusive).
    #[inline]
    pub fn contains_aabb(&self, other: &Self) -> bool {
        other.min.cmpge(self.min).all() && other.max.cmple(self.max).all()
    }

    /// Whether the boxes overlap (boundary inclusive).
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Whether a sphere overlaps the box.
    ///
    /// Tests the squared distance from the sphere center to its clamped
    /// closest point on the box against `radius^2`.
    #[inline]
    pub fn intersects_sphere(&self, center: Vec3A, radius: f32) -> bool {
        let closest = self.closest_point(center);
        (closest - center).length_squared() <= radius * radius
    }

    /// Slab test against a ray given the precomputed inverse direction.
    ///
    /// Returns the `(t_min, t_max)` entry/exit parameters when the ray meets
    /// the box with `t_max >= 0`. A ray starting inside reports `t_min <= 0`.
    #[inline]
    pub fn ray_slab(&self, origin: Vec3A, inv_dir: Vec3A) -> Option<(f32, f32)> {
        let t0 = (self.min - origin) * inv_dir;
        let t1 = (self.max - origin) * inv_dir;

        let t_small = t0.min(t1);
        let t_big = t0.max(t1);

        let t_min = t_small.max_element();
        let t_max = t_big.min_element();

        (t_max >= t_min && t_max >= 0.0).then_some((t_min, t_max))
    }

    /// Ray intersection distance, or `None` when the ray misses or the hit is
    /// beyond `max_distance`. A ray starting inside reports the exit distance.
    pub fn ray_intersect(&self, origin: Vec3A, direction: Vec3A, max_distance: f32) -> Option<f32> {
        let inv_dir = direction.recip();
        let (t_min, t_max) = self.ray_slab(origin, inv_dir)?;
        let t = if t_min >= 0.0 { t_min } else { t_max };
        (t >= 0.0 && t <= max_distance).then_some(t)
    }

    /// Transform the box by a 4x4 matrix.
    ///
    /// Accumulates per-axis min/max contributions instead of transforming all
    /// 8 corners (the Arvo/Graphics Gems method).
    pub fn transform(&self, matrix: &Mat4) -> Self {
        let m = matrix.to_cols_array_2d();
        let mut new_min = [m[3][0], m[3][1], m[3][2]];
        let mut new_max = new_min;

        for i in 0..3 {
            for j in 0..3 {
                let a = m[j][i] * self.min[j];
                let b = m[j][i] * self.max[j];
                if a < b {
                    new_min[i] += a;
                    new_max[i] += b;
                } else {
                    new_min[i] += b;
                    new_max[i] += a;
                }
            }
        }

        Self {
            min: Vec3A::from_array(new_min),
            max: Vec3A::from_array(new_max),
        }
    }

    /// Transform the box by rotation and translation only.
    pub fn transform_affine(&self, rotation: &Mat3A, translation: Vec3A) -> Self {
        let m = rotation.to_cols_array_2d();
        let mut new_min = translation.to_array();
        let mut new_max = new_min;

        for i in 0..3 {
            for j in 0..3 {
                let a = m[j][i] * self.min[j];
                let b = m[j][i] * self.max[j];
                if a < b {
                    new_min[i] += a;
                    new_max[i] += b;
                } else {
                    new_min[i] += b;
                    new_max[i] += a;
                }
            }
        }

        Self {
            min: Vec3A::from_array(new_min),
            max: Vec3A::from_array(new_max),
        }
    }

    /// Closest point on or inside the box to `point`.
    #[inline]
    pub fn closest_point(&self, point: Vec3A) -> Vec3A {
        point.clamp(self.min, self.max)
    }

    /// Squared distance from `point` to the box; zero when inside.
    #[inline]
    pub fn distance_squared(&self, point: Vec3A) -> f32 {
        (point - self.closest_point(point)).length_squared()
    }

    /// Distance from `point` to the box; zero when inside.
    #[inline]
    pub fn distance(&self, point: Vec3A) -> f32 {
        (point - self.closest_point(point)).length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_is_merge_identity() {
        let b = Aabb::from_center_half_extents(Vec3A::new(1.0, 2.0, 3.0), Vec3A::splat(0.5));
        assert_eq!(Aabb::merge(&Aabb::INVALID, &b), b);
        assert!(!Aabb::INVALID.is_valid());

        let mut acc = Aabb::default();
        acc.expand_point(Vec3A::new(-1.0, 0.0, 0.0));
        acc.expand_point(Vec3A::new(1.0, 2.0, 3.0));
        assert_eq!(acc.min, Vec3A::new(-1.0, 0.0, 0.0));
        assert_eq!(acc.max, Vec3A::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn derived_properties() {
        let b = Aabb::new(Vec3A::new(0.0, 0.0, 0.0), Vec3A::new(2.0, 4.0, 6.0));
        assert_eq!(b.center(), Vec3A::new(1.0, 2.0, 3.0));
        assert_eq!(b.half_extents(), Vec3A::new(1.0, 2.0, 3.0));
        assert_eq!(b.volume(), 48.0);
        // 2 * (2*4 + 4*6 + 6*2) = 88
        assert_eq!(b.surface_area(), 88.0);
        assert_eq!(b.half_surface_area(), 44.0);
        assert_eq!(b.longest_axis(), 2);
        assert_eq!(b.corners().len(), 8);
    }

    #[test]
    fn intersection_and_containment() {
        let a = Aabb::new(Vec3A::ZERO, Vec3A::splat(10.0));
        let b = Aabb::new(Vec3A::splat(5.0), Vec3A::splat(15.0));
        let c = Aabb::new(Vec3A::splat(20.0), Vec3A::splat(25.0));

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(Aabb::intersection(&a, &b).is_valid());
        assert!(!Aabb::intersection(&a, &c).is_valid());
        assert!(a.contains_point(Vec3A::splat(10.0)));
        assert!(!a.contains_point(Vec3A::splat(10.1)));
        assert!(a.contains_aabb(&Aabb::new(Vec3A::ONE, Vec3A::splat(2.0))));
    }

    #[test]
    fn sphere_test_uses_closest_point() {
        let b = Aabb::new(Vec3A::ZERO, Vec3A::ONE);
        assert!(b.intersects_sphere(Vec3A::new(2.0, 0.5, 0.5), 1.0));
        assert!(!b.intersects_sphere(Vec3A::new(2.0, 0.5, 0.5), 0.9));
        // Center inside.
        assert!(b.intersects_sphere(Vec3A::splat(0.5), 0.01));
    }

    #[test]
    fn ray_slab_hits_and_misses() {
        let b = Aabb::new(Vec3A::new(4.0, -1.0, -1.0), Vec3A::new(6.0, 1.0, 1.0));
        let origin = Vec3A::ZERO;
        let dir = Vec3A::X;
        let (t_min, t_max) = b.ray_slab(origin, dir.recip()).expect("ray must hit");
        assert_eq!(t_min, 4.0);
        assert_eq!(t_max, 6.0);

        assert_eq!(b.ray_intersect(origin, dir, 100.0), Some(4.0));
        assert_eq!(b.ray_intersect(origin, dir, 3.0), None);
        assert_eq!(b.ray_intersect(origin, -dir, 100.0), None);

        // Origin inside reports the exit distance.
        let inside = Vec3A::new(5.0, 0.0, 0.0);
        assert_eq!(b.ray_intersect(inside, dir, 100.0), Some(1.0));
    }

    #[test]
    fn ray_parallel_to_slab() {
        let b = Aabb::new(Vec3A::ZERO, Vec3A::ONE);
        // Parallel to X axis, passing through the box.
        assert!(b.ray_slab(Vec3A::new(-1.0, 0.5, 0.5), Vec3A::X.recip()).is_some());
        // Parallel but offset outside the Y slab.
        assert!(b.ray_slab(Vec3A::new(-1.0, 2.0, 0.5), Vec3A::X.recip()).is_none());
    }

    #[test]
    fn transform_matches_corner_expansion() {
        let b = Aabb::new(Vec3A::new(-1.0, -2.0, -3.0), Vec3A::new(1.0, 2.0, 3.0));
        let m = Mat4::from_rotation_z(0.7) * Mat4::from_translation(glam::Vec3::new(5.0, -1.0, 2.0));

        let fast = b.transform(&m);
        let slow = Aabb::from_points(b.corners().iter().map(|&c| m.transform_point3a(c)));

        assert!((fast.min - slow.min).length() < 1e-4);
        assert!((fast.max - slow.max).length() < 1e-4);
    }

    #[test]
    fn distance_queries() {
        let b = Aabb::new(Vec3A::ZERO, Vec3A::ONE);
        assert_eq!(b.distance_squared(Vec3A::splat(0.5)), 0.0);
        assert_eq!(b.distance_squared(Vec3A::new(2.0, 0.5, 0.5)), 1.0);
        assert_eq!(b.distance(Vec3A::new(2.0, 0.5, 0.5)), 1.0);
        // Corner gap: (1,1,1) away from (2,2,2).
        assert_eq!(b.distance_squared(Vec3A::splat(2.0)), 3.0);
    }
}
