// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Oriented bounding boxes with separating-axis intersection tests.

use glam::{EulerRot, Mat3A, Mat4, Quat, Vec3A};

use crate::aabb::Aabb;
use crate::ray::Ray;

/// Epsilon added to the absolute rotation matrix in SAT tests so nearly
/// parallel edge pairs do not produce a spurious separating axis.
const SAT_EPSILON: f32 = 1e-6;

/// Oriented bounding box: center, half-extents, and a unit orientation
/// quaternion.
///
/// The three world-space local axes are derived from the orientation and
/// recomputed whenever the orientation changes, so reads never mutate and a
/// shared `&Obb` always observes consistent axes.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Obb {
    /// Center point.
    pub center: Vec3A,
    /// Half-extent along each local axis.
    pub half_extents: Vec3A,
    orientation: Quat,
    axes: [Vec3A; 3],
}

impl Default for Obb {
    fn default() -> Self {
        Self::new(Vec3A::ZERO, Vec3A::splat(0.5), Quat::IDENTITY)
    }
}

impl Obb {
    /// Create an OBB from center, half-extents, and orientation.
    pub fn new(center: Vec3A, half_extents: Vec3A, orientation: Quat) -> Self {
        Self {
            center,
            half_extents,
            orientation,
            axes: axes_from(orientation),
        }
    }

    /// Create an axis-aligned OBB from an AABB.
    pub fn from_aabb(aabb: &Aabb) -> Self {
        Self::new(aabb.center(), aabb.half_extents(), Quat::IDENTITY)
    }

    /// Current orientation.
    #[inline]
    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    /// Set the orientation, recomputing the cached axes.
    pub fn set_orientation(&mut self, orientation: Quat) {
        self.orientation = orientation;
        self.axes = axes_from(orientation);
    }

    /// Set the orientation from XYZ Euler angles in degrees.
    pub fn set_euler_angles(&mut self, euler_degrees: Vec3A) {
        self.set_orientation(Quat::from_euler(
            EulerRot::XYZ,
            euler_degrees.x.to_radians(),
            euler_degrees.y.to_radians(),
            euler_degrees.z.to_radians(),
        ));
    }

    /// Set the orientation from a rotation matrix.
    pub fn set_rotation(&mut self, rotation: Mat3A) {
        self.set_orientation(Quat::from_mat3a(&rotation));
    }

    /// The three local axes in world space.
    #[inline]
    pub fn axes(&self) -> &[Vec3A; 3] {
        &self.axes
    }

    /// Rotation matrix form of the orientation.
    #[inline]
    pub fn rotation_matrix(&self) -> Mat3A {
        Mat3A::from_quat(self.orientation)
    }

    /// The 8 corner vertices.
    pub fn corners(&self) -> [Vec3A; 8] {
        let x = self.axes[0] * self.half_extents.x;
        let y = self.axes[1] * self.half_extents.y;
        let z = self.axes[2] * self.half_extents.z;
        let c = self.center;
        [
            c - x - y - z,
            c + x - y - z,
            c - x + y - z,
            c + x + y - z,
            c - x - y + z,
            c + x - y + z,
            c - x + y + z,
            c + x + y + z,
        ]
    }

    /// Tightest AABB containing this OBB.
    ///
    /// Projects each local extent onto the world axes; no corner expansion.
    pub fn bounding_aabb(&self) -> Aabb {
        let mut world_extent = Vec3A::ZERO;
        for i in 0..3 {
            world_extent += self.axes[i].abs() * self.half_extents[i];
        }
        Aabb::new(self.center - world_extent, self.center + world_extent)
    }

    /// Volume of the box.
    #[inline]
    pub fn volume(&self) -> f32 {
        8.0 * self.half_extents.x * self.half_extents.y * self.half_extents.z
    }

    /// Surface area of the box.
    #[inline]
    pub fn surface_area(&self) -> f32 {
        let h = self.half_extents;
        8.0 * (h.x * h.y + h.y * h.z + h.z * h.x)
    }

    /// Transform a world-space point into the box's local frame.
    #[inline]
    pub fn world_to_local(&self, world_point: Vec3A) -> Vec3A {
        let d = world_point - self.center;
        Vec3A::new(d.dot(self.axes[0]), d.dot(self.axes[1]), d.dot(self.axes[2]))
    }

    /// Transform a local-frame point into world space.
    #[inline]
    pub fn local_to_world(&self, local_point: Vec3A) -> Vec3A {
        self.center
            + self.axes[0] * local_point.x
            + self.axes[1] * local_point.y
            + self.axes[2] * local_point.z
    }

    /// Whether the point is inside the box (boundary inclusive).
    pub fn contains(&self, point: Vec3A) -> bool {
        let local = self.world_to_local(point);
        local.abs().cmple(self.half_extents).all()
    }

    /// Closest point on or inside the box to `point`.
    ///
    /// Projects the offset onto each local axis and clamps to the half-extent.
    pub fn closest_point(&self, point: Vec3A) -> Vec3A {
        let d = point - self.center;
        let mut result = self.center;
        for i in 0..3 {
            let dist = d.dot(self.axes[i]).clamp(-self.half_extents[i], self.half_extents[i]);
            result += self.axes[i] * dist;
        }
        result
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

    /// OBB/OBB intersection by the 15-axis separating-axis test.
    ///
    /// Tests the 3 face axes of each box plus the 9 edge cross products,
    /// expressed in this box's frame (Ericson's formulation). The absolute
    /// rotation matrix carries [`SAT_EPSILON`] to stabilize parallel axes.
    pub fn intersects(&self, other: &Self) -> bool {
        let mut r = [[0.0_f32; 3]; 3];
        let mut abs_r = [[0.0_f32; 3]; 3];

        for i in 0..3 {
            for j in 0..3 {
                r[i][j] = self.axes[i].dot(other.axes[j]);
                abs_r[i][j] = r[i][j].abs() + SAT_EPSILON;
            }
        }

        // Translation in this box's frame.
        let t_world = other.center - self.center;
        let t = [
            t_world.dot(self.axes[0]),
            t_world.dot(self.axes[1]),
            t_world.dot(self.axes[2]),
        ];

        let a = self.half_extents;
        let b = other.half_extents;

        // Face axes of self: L = A0, A1, A2.
        for i in 0..3 {
            let ra = a[i];
            let rb = b[0] * abs_r[i][0] + b[1] * abs_r[i][1] + b[2] * abs_r[i][2];
            if t[i].abs() > ra + rb {
                return false;
            }
        }

        // Face axes of other: L = B0, B1, B2.
        for i in 0..3 {
            let ra = a[0] * abs_r[0][i] + a[1] * abs_r[1][i] + a[2] * abs_r[2][i];
            let rb = b[i];
            let sep = (t[0] * r[0][i] + t[1] * r[1][i] + t[2] * r[2][i]).abs();
            if sep > ra + rb {
                return false;
            }
        }

        // Edge cross products: L = Ai x Bj.
        for i in 0..3 {
            // Indices of the two axes of self orthogonal to axis i.
            let (i1, i2) = ((i + 1) % 3, (i + 2) % 3);
            for j in 0..3 {
                let (j1, j2) = ((j + 1) % 3, (j + 2) % 3);
                let ra = a[i1] * abs_r[i2][j] + a[i2] * abs_r[i1][j];
                let rb = b[j1] * abs_r[i][j2] + b[j2] * abs_r[i][j1];
                let sep = (t[i2] * r[i1][j] - t[i1] * r[i2][j]).abs();
                if sep > ra + rb {
                    return false;
                }
            }
        }

        true
    }

    /// OBB/AABB intersection by promoting the AABB to an axis-aligned OBB.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.intersects(&Self::from_aabb(aabb))
    }

    /// Whether a sphere overlaps the box.
    #[inline]
    pub fn intersects_sphere(&self, center: Vec3A, radius: f32) -> bool {
        self.distance_squared(center) <= radius * radius
    }

    /// Ray intersection distance, or `None` when the ray misses.
    pub fn ray_intersect(&self, ray: &Ray) -> Option<f32> {
        self.ray_intersect_with_normal(ray).map(|(t, _)| t)
    }

    /// Ray intersection returning the distance and the world-space surface
    /// normal of the face that was hit.
    ///
    /// Works in the box's local frame, so the core is the axis-aligned slab
    /// test. A ray starting inside reports the exit distance.
    pub fn ray_intersect_with_normal(&self, ray: &Ray) -> Option<(f32, Vec3A)> {
        let local_origin = self.world_to_local(ray.origin);
        let local_dir = Vec3A::new(
            ray.direction.dot(self.axes[0]),
            ray.direction.dot(self.axes[1]),
            ray.direction.dot(self.axes[2]),
        );

        let mut t_min = f32::MIN;
        let mut t_max = f32::MAX;
        let mut normal_axis = None;
        let mut normal_sign = 1.0_f32;

        for i in 0..3 {
            if local_dir[i].abs() < 1e-6 {
                // Parallel to this slab; must already be inside it.
                if local_origin[i] < -self.half_extents[i] || local_origin[i] > self.half_extents[i]
                {
                    return None;
                }
            } else {
                let inv_d = 1.0 / local_dir[i];
                let t1 = (-self.half_extents[i] - local_origin[i]) * inv_d;
                let t2 = (self.half_extents[i] - local_origin[i]) * inv_d;

                let (t_near, t_far, sign) = if t1 > t2 { (t2, t1, 1.0) } else { (t1, t2, -1.0) };

                if t_near > t_min {
                    t_min = t_near;
                    normal_axis = Some(i);
                    normal_sign = sign;
                }
                t_max = t_max.min(t_far);
                if t_min > t_max {
                    return None;
                }
            }
        }

        if t_max < 0.0 {
            return None;
        }

        let t = if t_min >= 0.0 { t_min } else { t_max };
        let normal = match normal_axis {
            Some(i) => self.axes[i] * normal_sign,
            None => Vec3A::Y,
        };
        Some((t, normal))
    }

    /// Penetration depth and direction for an overlapping pair.
    ///
    /// Returns the axis of minimum overlap, oriented from `self` toward
    /// `other`, or `None` when a separating axis exists.
    pub fn penetration(&self, other: &Self) -> Option<(f32, Vec3A)> {
        let mut min_overlap = f32::MAX;
        let mut min_axis = Vec3A::ZERO;

        let mut test = |axis: Vec3A| -> bool {
            let (min_a, max_a) = project(self, axis);
            let (min_b, max_b) = project(other, axis);
            let overlap = max_a.min(max_b) - min_a.max(min_b);
            if overlap < 0.0 {
                return false;
            }
            if overlap < min_overlap {
                min_overlap = overlap;
                min_axis = axis;
            }
            true
        };

        for i in 0..3 {
            if !test(self.axes[i]) || !test(other.axes[i]) {
                return None;
            }
        }
        for i in 0..3 {
            for j in 0..3 {
                let cross = self.axes[i].cross(other.axes[j]);
                let len = cross.length();
                if len > SAT_EPSILON && !test(cross / len) {
                    return None;
                }
            }
        }

        // Orient the axis from self toward other.
        if (other.center - self.center).dot(min_axis) < 0.0 {
            min_axis = -min_axis;
        }
        Some((min_overlap, min_axis))
    }

    /// Support point: the corner furthest along `direction`.
    pub fn support(&self, direction: Vec3A) -> Vec3A {
        let mut result = self.center;
        for i in 0..3 {
            let sign = if direction.dot(self.axes[i]) >= 0.0 { 1.0 } else { -1.0 };
            result += self.axes[i] * (self.half_extents[i] * sign);
        }
        result
    }

    /// Transform the box by a rigid motion.
    pub fn transformed(&self, translation: Vec3A, rotation: Quat) -> Self {
        Self::new(
            rotation * self.center + translation,
            self.half_extents,
            rotation * self.orientation,
        )
    }

    /// Transform the box by a 4x4 matrix, folding the matrix scale into the
    /// half-extents.
    pub fn transformed_by_matrix(&self, matrix: &Mat4) -> Self {
        let new_center = matrix.transform_point3a(self.center);
        let rotation = Mat3A::from_mat4(*matrix);
        let scale = Vec3A::new(
            rotation.x_axis.length(),
            rotation.y_axis.length(),
            rotation.z_axis.length(),
        );
        let new_orientation = Quat::from_mat3a(&rotation) * self.orientation;
        Self::new(new_center, self.half_extents * scale, new_orientation)
    }
}

#[inline]
fn axes_from(orientation: Quat) -> [Vec3A; 3] {
    let rot = Mat3A::from_quat(orientation);
    [rot.x_axis, rot.y_axis, rot.z_axis]
}

/// Project an OBB onto an axis, returning the covered interval.
#[inline]
fn project(obb: &Obb, axis: Vec3A) -> (f32, f32) {
    let projection = obb.center.dot(axis);
    let mut radius = 0.0;
    for i in 0..3 {
        radius += (obb.axes()[i] * obb.half_extents[i]).dot(axis).abs();
    }
    (projection - radius, projection + radius)
}
