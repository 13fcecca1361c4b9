// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Rays, ray hits, and spheres.

use core::cmp::Ordering;

use glam::Vec3A;

use crate::aabb::Aabb;

#[inline]
pub(crate) fn sqrt(x: f32) -> f32 {
    #[cfg(feature = "std")]
    {
        x.sqrt()
    }
    #[cfg(all(not(feature = "std"), feature = "libm"))]
    {
        libm::sqrtf(x)
    }
}

/// A ray with unit direction and precomputed inverse direction.
///
/// The inverse direction feeds the slab test ([`Aabb::ray_slab`]) so per-node
/// traversal costs three multiplies per axis instead of divisions. Axes with
/// zero direction produce infinite inverse components, which the slab min/max
/// arithmetic handles without special cases.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Ray {
    /// Ray origin.
    pub origin: Vec3A,
    /// Unit direction.
    pub direction: Vec3A,
    /// Componentwise reciprocal of `direction`.
    pub inv_dir: Vec3A,
}

impl Ray {
    /// Create a ray, normalizing the direction.
    #[inline]
    pub fn new(origin: Vec3A, direction: Vec3A) -> Self {
        let direction = direction.normalize();
        Self {
            origin,
            direction,
            inv_dir: direction.recip(),
        }
    }

    /// Point along the ray at parameter `t`.
    #[inline]
    pub fn point_at(&self, t: f32) -> Vec3A {
        self.origin + self.direction * t
    }
}

/// A single hit from a ray query, ordered by distance.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RayHit {
    /// Id of the hit object.
    pub id: u64,
    /// Distance from the ray origin to the hit.
    pub distance: f32,
    /// World-space hit point.
    pub point: Vec3A,
    /// Surface normal at the hit, when the intersector provides one.
    pub normal: Vec3A,
}

impl RayHit {
    /// Construct a hit with the default up normal.
    #[inline]
    pub fn new(id: u64, distance: f32, point: Vec3A) -> Self {
        Self {
            id,
            distance,
            point,
            normal: Vec3A::Y,
        }
    }
}

impl PartialOrd for RayHit {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.distance.partial_cmp(&other.distance)
    }
}

/// A sphere for spatial queries.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Sphere {
    /// Center point.
    pub center: Vec3A,
    /// Radius.
    pub radius: f32,
}

impl Sphere {
    /// Create a sphere.
    #[inline]
    pub const fn new(center: Vec3A, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Tightest AABB containing the sphere.
    #[inline]
    pub fn bounds(&self) -> Aabb {
        let r = Vec3A::splat(self.radius);
        Aabb::new(self.center - r, self.center + r)
    }

    /// Whether the point is inside the sphere (boundary inclusive).
    #[inline]
    pub fn contains(&self, point: Vec3A) -> bool {
        (point - self.center).length_squared() <= self.radius * self.radius
    }

    /// Whether two spheres overlap.
    #[inline]
    pub fn intersects_sphere(&self, other: &Self) -> bool {
        let sum = self.radius + other.radius;
        (other.center - self.center).length_squared() <= sum * sum
    }

    /// Whether the sphere overlaps a box.
    #[inline]
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        aabb.intersects_sphere(self.center, self.radius)
    }

    /// Ray intersection distance, or `None` when the ray misses.
    ///
    /// A ray starting inside returns the exit distance.
    pub fn ray_intersect(&self, ray: &Ray) -> Option<f32> {
        let oc = ray.origin - self.center;

        let half_b = oc.dot(ray.direction);
        let c = oc.length_squared() - self.radius * self.radius;

        let discriminant = half_b * half_b - c;
        if discriminant < 0.0 {
            return None;
        }

        let sqrt_d = sqrt(discriminant);
        let t = -half_b - sqrt_d;
        if t >= 0.0 {
            return Some(t);
        }
        let t = -half_b + sqrt_d;
        (t >= 0.0).then_some(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ray_normalizes_and_precomputes() {
        let r = Ray::new(Vec3A::ZERO, Vec3A::new(0.0, 0.0, 10.0));
        assert!((r.direction.length() - 1.0).abs() < 1e-6);
        assert_eq!(r.inv_dir.z, 1.0);
        assert_eq!(r.point_at(3.0), Vec3A::new(0.0, 0.0, 3.0));
    }

    #[test]
    fn hits_order_by_distance() {
        let near = RayHit::new(1, 1.0, Vec3A::ZERO);
        let far = RayHit::new(2, 5.0, Vec3A::ZERO);
        assert!(near < far);
    }

    #[test]
    fn sphere_ray_front_hit() {
        let s = Sphere::new(Vec3A::new(0.0, 0.0, 10.0), 2.0);
        let r = Ray::new(Vec3A::ZERO, Vec3A::Z);
        let t = s.ray_intersect(&r).expect("ray must hit");
        assert!((t - 8.0).abs() < 1e-5);
    }

    #[test]
    fn sphere_ray_from_inside_returns_exit() {
        let s = Sphere::new(Vec3A::ZERO, 2.0);
        let r = Ray::new(Vec3A::ZERO, Vec3A::X);
        let t = s.ray_intersect(&r).expect("ray must exit");
        assert!((t - 2.0).abs() < 1e-5);
    }

    #[test]
    fn sphere_ray_miss_and_behind() {
        let s = Sphere::new(Vec3A::new(0.0, 5.0, 0.0), 1.0);
        assert!(s.ray_intersect(&Ray::new(Vec3A::ZERO, Vec3A::X)).is_none());
        // Sphere entirely behind the origin.
        let behind = Sphere::new(Vec3A::new(-5.0, 0.0, 0.0), 1.0);
        assert!(behind.ray_intersect(&Ray::new(Vec3A::ZERO, Vec3A::X)).is_none());
    }

    #[test]
    fn sphere_bounds_and_containment() {
        let s = Sphere::new(Vec3A::ONE, 2.0);
        let b = s.bounds();
        assert_eq!(b.min, Vec3A::splat(-1.0));
        assert_eq!(b.max, Vec3A::splat(3.0));
        assert!(s.contains(Vec3A::ONE));
        assert!(!s.contains(Vec3A::splat(3.0)));
        assert!(s.intersects_sphere(&Sphere::new(Vec3A::splat(4.0), 3.0)));
    }
}
