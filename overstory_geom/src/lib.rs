// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=overstory_geom --heading-base-level=0

//! Overstory Geom: geometric primitives for 3D spatial queries.
//!
//! This crate holds the value types the spatial indices are built from:
//!
//! - [`Aabb`]: axis-aligned box with merge/intersect/ray/sphere/transform ops.
//! - [`Obb`]: oriented box with separating-axis tests and penetration queries.
//! - [`Plane`], [`Frustum`]: culling planes, Gribb/Hartmann extraction, and
//!   coherency-tracked visibility tests.
//! - [`Ray`], [`RayHit`], [`Sphere`]: raycasting inputs and outputs.
//! - [`wide`]: 4-lane batch predicates (one ray vs four boxes, frustum vs
//!   four boxes/spheres) built on [`glam`]'s vector types.
//!
//! Positions and extents use [`glam::Vec3A`], which keeps the hot types
//! 16-byte aligned. The crate is `no_std`; enable either the `std` feature
//! (default) or `libm` for scalar math in no_std builds.
//!
//! # Example
//!
//! ```rust
//! use glam::Vec3A;
//! use overstory_geom::{Aabb, Ray};
//!
//! let b = Aabb::from_center_half_extents(Vec3A::new(5.0, 0.0, 0.0), Vec3A::ONE);
//! let ray = Ray::new(Vec3A::ZERO, Vec3A::X);
//! assert_eq!(b.ray_intersect(ray.origin, ray.direction, 100.0), Some(4.0));
//! ```

#![no_std]

#[cfg(feature = "std")]
extern crate std;

#[cfg(not(any(feature = "std", feature = "libm")))]
compile_error!("overstory_geom requires either the `std` or `libm` feature");

pub mod aabb;
pub mod frustum;
pub mod obb;
pub mod plane;
pub mod ray;
pub mod wide;

pub use aabb::Aabb;
pub use frustum::{ALL_PLANES, CoherencyData, Frustum, FrustumPlane, FrustumResult};
pub use obb::Obb;
pub use plane::Plane;
pub use ray::{Ray, RayHit, Sphere};
pub use wide::{Aabb4, FrustumCuller};

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3A;

    // Cross-primitive check: a sphere query, an OBB promoted from the same
    // bounds, and the AABB itself agree on a simple containment case.
    #[test]
    fn primitives_agree_on_overlap() {
        let aabb = Aabb::from_center_half_extents(Vec3A::new(3.0, 0.0, 0.0), Vec3A::ONE);
        let obb = Obb::from_aabb(&aabb);
        let sphere = Sphere::new(Vec3A::ZERO, 2.5);

        assert!(aabb.intersects_sphere(sphere.center, sphere.radius));
        assert!(obb.intersects_sphere(sphere.center, sphere.radius));
        assert!(sphere.intersects_aabb(&aabb));
    }

    #[test]
    fn ray_through_nested_primitives() {
        let ray = Ray::new(Vec3A::new(-10.0, 0.0, 0.0), Vec3A::X);
        let aabb = Aabb::from_center_half_extents(Vec3A::ZERO, Vec3A::ONE);
        let obb = Obb::from_aabb(&aabb);
        let sphere = Sphere::new(Vec3A::ZERO, 1.0);

        let t_aabb = aabb.ray_intersect(ray.origin, ray.direction, 100.0).unwrap();
        let t_obb = obb.ray_intersect(&ray).unwrap();
        let t_sphere = sphere.ray_intersect(&ray).unwrap();

        assert!((t_aabb - 9.0).abs() < 1e-5);
        assert!((t_obb - 9.0).abs() < 1e-4);
        assert!((t_sphere - 9.0).abs() < 1e-4);
    }
}
