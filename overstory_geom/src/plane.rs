// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Planes in constant-normal form.

use glam::Vec3A;

/// Plane equation `normal . p + distance = 0`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Plane {
    /// Plane normal. Unit length after [`Plane::normalize`].
    pub normal: Vec3A,
    /// Signed distance term of the plane equation.
    pub distance: f32,
}

impl Default for Plane {
    fn default() -> Self {
        Self {
            normal: Vec3A::Y,
            distance: 0.0,
        }
    }
}

impl Plane {
    /// Create a plane from raw equation coefficients.
    #[inline]
    pub const fn new(normal: Vec3A, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Create a plane through `point` with the given normal.
    #[inline]
    pub fn from_point_normal(point: Vec3A, normal: Vec3A) -> Self {
        let n = normal.normalize();
        Self {
            normal: n,
            distance: -n.dot(point),
        }
    }

    /// Create a plane through three points, with normal `(b - a) x (c - a)`.
    #[inline]
    pub fn from_points(a: Vec3A, b: Vec3A, c: Vec3A) -> Self {
        Self::from_point_normal(a, (b - a).cross(c - a))
    }

    /// Signed distance from `point` to the plane.
    ///
    /// Positive in front of the plane (normal side), negative behind.
    #[inline]
    pub fn signed_distance(&self, point: Vec3A) -> f32 {
        self.normal.dot(point) + self.distance
    }

    /// Closest point on the plane to `point`.
    #[inline]
    pub fn closest_point(&self, point: Vec3A) -> Vec3A {
        point - self.normal * self.signed_distance(point)
    }

    /// Normalize the plane equation in place.
    ///
    /// A zero-length normal is left untouched; such a plane reports signed
    /// distance `self.distance` everywhere and so never culls.
    pub fn normalize(&mut self) {
        let len = self.normal.length();
        if len > 0.0 {
            self.normal /= len;
            self.distance /= len;
        }
    }
}
