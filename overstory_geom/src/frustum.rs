// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! View frustum extraction and culling tests.

use glam::{Mat4, Vec3A, Vec4};

use crate::aabb::Aabb;
use crate::obb::Obb;
use crate::plane::Plane;

/// Frustum plane indices.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrustumPlane {
    /// Left clip plane.
    Left = 0,
    /// Right clip plane.
    Right = 1,
    /// Bottom clip plane.
    Bottom = 2,
    /// Top clip plane.
    Top = 3,
    /// Near clip plane.
    Near = 4,
    /// Far clip plane.
    Far = 5,
}

/// Three-way classification against a frustum.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrustumResult {
    /// Completely outside at least one plane.
    Outside,
    /// Completely inside all six planes.
    Inside,
    /// Straddles at least one plane boundary.
    Intersect,
}

/// Mask with all six planes in play, the starting point for coherent
/// hierarchical culling.
pub const ALL_PLANES: u8 = 0x3F;

/// Temporal coherency record for one object.
///
/// Remembers the plane that culled the object last frame so the next test
/// starts there; a still-outside object is rejected after one plane test.
#[derive(Copy, Clone, Debug)]
pub struct CoherencyData {
    /// Index of the last failing plane.
    pub last_plane: u8,
    /// Whether the object passed the test last frame.
    pub was_visible: bool,
}

impl Default for CoherencyData {
    fn default() -> Self {
        Self {
            last_plane: 0,
            was_visible: true,
        }
    }
}

/// Plane data packed structure-of-arrays for the 4-wide tests.
///
/// Padded to 8 entries; the two pad planes have zero normals and distances,
/// so they classify everything as "on the plane" and never cull.
#[derive(Clone, Debug, Default)]
pub(crate) struct PackedPlanes {
    pub(crate) normal_x: [f32; 8],
    pub(crate) normal_y: [f32; 8],
    pub(crate) normal_z: [f32; 8],
    pub(crate) distance: [f32; 8],
}

/// View frustum as six normalized planes with inward-facing normals.
///
/// Planes are extracted from a view-projection matrix by the Gribb/Hartmann
/// row combinations (GL clip-space convention, depth in `[-1, 1]`). The
/// inverse matrix is retained for corner reconstruction and the plane data is
/// additionally packed SoA for the batch tests in [`crate::wide`].
#[derive(Clone, Debug)]
pub struct Frustum {
    planes: [Plane; 6],
    view_projection: Mat4,
    inverse_view_projection: Mat4,
    packed: PackedPlanes,
}

impl Default for Frustum {
    fn default() -> Self {
        Self::from_view_projection(&Mat4::IDENTITY)
    }
}

impl Frustum {
    /// Extract a frustum from a combined view-projection matrix.
    pub fn from_view_projection(view_projection: &Mat4) -> Self {
        let mut out = Self {
            planes: [Plane::default(); 6],
            view_projection: Mat4::IDENTITY,
            inverse_view_projection: Mat4::IDENTITY,
            packed: PackedPlanes::default(),
        };
        out.update(view_projection);
        out
    }

    /// Extract a frustum from separate view and projection matrices.
    pub fn from_matrices(view: &Mat4, projection: &Mat4) -> Self {
        Self::from_view_projection(&(*projection * *view))
    }

    /// Re-extract the planes from a new view-projection matrix.
    pub fn update(&mut self, view_projection: &Mat4) {
        self.view_projection = *view_projection;
        self.inverse_view_projection = view_projection.inverse();

        // Gribb/Hartmann: each plane is row3 +/- another row of the matrix.
        // `m[c][r]` is column-major like the matrix itself.
        let m = view_projection.to_cols_array_2d();
        let row = |r: usize| Vec4::new(m[0][r], m[1][r], m[2][r], m[3][r]);
        let w = row(3);

        let combos = [
            w + row(0), // left
            w - row(0), // right
            w + row(1), // bottom
            w - row(1), // top
            w + row(2), // near
            w - row(2), // far
        ];

        for (plane, combo) in self.planes.iter_mut().zip(combos) {
            plane.normal = Vec3A::new(combo.x, combo.y, combo.z);
            plane.distance = combo.w;
            plane.normalize();
        }

        for (i, plane) in self.planes.iter().enumerate() {
            self.packed.normal_x[i] = plane.normal.x;
            self.packed.normal_y[i] = plane.normal.y;
            self.packed.normal_z[i] = plane.normal.z;
            self.packed.distance[i] = plane.distance;
        }
        for i in 6..8 {
            self.packed.normal_x[i] = 0.0;
            self.packed.normal_y[i] = 0.0;
            self.packed.normal_z[i] = 0.0;
            self.packed.distance[i] = 0.0;
        }
    }

    /// One plane by index.
    #[inline]
    pub fn plane(&self, plane: FrustumPlane) -> &Plane {
        &self.planes[plane as usize]
    }

    /// All six planes, in [`FrustumPlane`] order.
    #[inline]
    pub fn planes(&self) -> &[Plane; 6] {
        &self.planes
    }

    #[inline]
    pub(crate) fn packed(&self) -> &PackedPlanes {
        &self.packed
    }

    /// The 8 world-space frustum corners, reconstructed from NDC through the
    /// inverse view-projection matrix. Near face first, bottom-left first.
    pub fn corners(&self) -> [Vec3A; 8] {
        const NDC: [Vec4; 8] = [
            Vec4::new(-1.0, -1.0, -1.0, 1.0),
            Vec4::new(1.0, -1.0, -1.0, 1.0),
            Vec4::new(1.0, 1.0, -1.0, 1.0),
            Vec4::new(-1.0, 1.0, -1.0, 1.0),
            Vec4::new(-1.0, -1.0, 1.0, 1.0),
            Vec4::new(1.0, -1.0, 1.0, 1.0),
            Vec4::new(1.0, 1.0, 1.0, 1.0),
            Vec4::new(-1.0, 1.0, 1.0, 1.0),
        ];

        let mut corners = [Vec3A::ZERO; 8];
        for (corner, ndc) in corners.iter_mut().zip(NDC) {
            let world = self.inverse_view_projection * ndc;
            *corner = Vec3A::new(world.x, world.y, world.z) / world.w;
        }
        corners
    }

    /// Whether a point lies inside all six planes.
    pub fn contains_point(&self, point: Vec3A) -> bool {
        self.planes.iter().all(|p| p.signed_distance(point) >= 0.0)
    }

    /// Three-way sphere classification.
    pub fn test_sphere(&self, center: Vec3A, radius: f32) -> FrustumResult {
        let mut all_inside = true;
        for plane in &self.planes {
            let distance = plane.signed_distance(center);
            if distance < -radius {
                return FrustumResult::Outside;
            }
            if distance < radius {
                all_inside = false;
            }
        }
        if all_inside { FrustumResult::Inside } else { FrustumResult::Intersect }
    }

    /// Fast check: is the sphere entirely outside some plane?
    pub fn is_sphere_outside(&self, center: Vec3A, radius: f32) -> bool {
        self.planes.iter().any(|p| p.signed_distance(center) < -radius)
    }

    /// Whether the sphere intersects or is inside the frustum.
    #[inline]
    pub fn is_sphere_visible(&self, center: Vec3A, radius: f32) -> bool {
        !self.is_sphere_outside(center, radius)
    }

    /// Three-way AABB classification using n/p-vertices.
    ///
    /// Per plane: the n-vertex (corner furthest against the normal) behind
    /// the plane means the whole box is outside; otherwise the p-vertex also
    /// behind means the box straddles that plane.
    pub fn test_aabb(&self, aabb: &Aabb) -> FrustumResult {
        let mut all_inside = true;
        for plane in &self.planes {
            if plane.signed_distance(n_vertex(aabb, plane.normal)) < 0.0 {
                return FrustumResult::Outside;
            }
            if plane.signed_distance(p_vertex(aabb, plane.normal)) < 0.0 {
                all_inside = false;
            }
        }
        if all_inside { FrustumResult::Inside } else { FrustumResult::Intersect }
    }

    /// Fast check: is the AABB entirely outside some plane?
    pub fn is_aabb_outside(&self, aabb: &Aabb) -> bool {
        self.planes
            .iter()
            .any(|p| p.signed_distance(n_vertex(aabb, p.normal)) < 0.0)
    }

    /// Whether the AABB intersects or is inside the frustum.
    #[inline]
    pub fn is_aabb_visible(&self, aabb: &Aabb) -> bool {
        !self.is_aabb_outside(aabb)
    }

    /// Coherent hierarchical AABB test with plane masking.
    ///
    /// Only planes set in `plane_mask` are tested. On return the mask holds
    /// the planes this box still straddles: a subtree whose enclosing box is
    /// fully inside a plane never tests that plane again. Returns `false`
    /// when the box is outside some unmasked plane (mask contents are then
    /// unspecified).
    pub fn test_aabb_masked(&self, aabb: &Aabb, plane_mask: &mut u8) -> bool {
        let mut new_mask = 0_u8;

        for (i, plane) in self.planes.iter().enumerate() {
            if *plane_mask & (1 << i) == 0 {
                continue;
            }
            if plane.signed_distance(n_vertex(aabb, plane.normal)) < 0.0 {
                return false;
            }
            if plane.signed_distance(p_vertex(aabb, plane.normal)) < 0.0 {
                // Still straddling; children keep testing this plane.
                new_mask |= 1 << i;
            }
        }

        *plane_mask = new_mask;
        true
    }

    /// AABB visibility with temporal coherency.
    ///
    /// Tests the plane that failed last frame first and records the failing
    /// plane for the next call.
    pub fn test_aabb_coherent(&self, aabb: &Aabb, coherency: &mut CoherencyData) -> bool {
        let last = coherency.last_plane as usize;
        if last < 6 {
            let plane = &self.planes[last];
            if plane.signed_distance(n_vertex(aabb, plane.normal)) < 0.0 {
                coherency.was_visible = false;
                return false;
            }
        }

        for (i, plane) in self.planes.iter().enumerate() {
            if i == last {
                continue;
            }
            if plane.signed_distance(n_vertex(aabb, plane.normal)) < 0.0 {
                coherency.last_plane = i as u8;
                coherency.was_visible = false;
                return false;
            }
        }

        coherency.was_visible = true;
        true
    }

    /// Three-way OBB classification.
    ///
    /// Projects the box's extents onto each plane normal and compares the
    /// center distance against the projected radius.
    pub fn test_obb(&self, obb: &Obb) -> FrustumResult {
        let mut all_inside = true;
        for plane in &self.planes {
            let radius = projected_radius(obb, plane.normal);
            let distance = plane.signed_distance(obb.center);
            if distance < -radius {
                return FrustumResult::Outside;
            }
            if distance < radius {
                all_inside = false;
            }
        }
        if all_inside { FrustumResult::Inside } else { FrustumResult::Intersect }
    }

    /// Fast check: is the OBB entirely outside some plane?
    pub fn is_obb_outside(&self, obb: &Obb) -> bool {
        self.planes
            .iter()
            .any(|p| p.signed_distance(obb.center) < -projected_radius(obb, p.normal))
    }
}

/// The corner furthest against the plane normal.
#[inline]
fn n_vertex(aabb: &Aabb, normal: Vec3A) -> Vec3A {
    Vec3A::select(normal.cmpge(Vec3A::ZERO), aabb.min, aabb.max)
}

/// The corner furthest along the plane normal.
#[inline]
fn p_vertex(aabb: &Aabb, normal: Vec3A) -> Vec3A {
    Vec3A::select(normal.cmpge(Vec3A::ZERO), aabb.max, aabb.min)
}

#[inline]
fn projected_radius(obb: &Obb, normal: Vec3A) -> f32 {
    let axes = obb.axes();
    axes[0].dot(normal).abs() * obb.half_extents.x
        + axes[1].dot(normal).abs() * obb.half_extents.y
        + axes[2].dot(normal).abs() * obb.half_extents.z
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    // 90 degree vertical fov, square aspect, near 1, far 100, looking down -Z
    // from the origin (GL clip conventions).
    fn test_frustum() -> Frustum {
        let projection = Mat4::perspective_rh_gl(core::f32::consts::FRAC_PI_2, 1.0, 1.0, 100.0);
        Frustum::from_matrices(&Mat4::IDENTITY, &projection)
    }

    #[test]
    fn planes_are_normalized() {
        let f = test_frustum();
        for plane in f.planes() {
            assert!((plane.normal.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn point_classification() {
        let f = test_frustum();
        assert!(f.contains_point(Vec3A::new(0.0, 0.0, -50.0)));
        assert!(!f.contains_point(Vec3A::new(0.0, 0.0, 50.0)));
        assert!(!f.contains_point(Vec3A::new(0.0, 0.0, -150.0)));
        // Wider than the 45 degree half-angle at that depth.
        assert!(!f.contains_point(Vec3A::new(20.0, 0.0, -10.0)));
    }

    #[test]
    fn aabb_three_way() {
        let f = test_frustum();
        let unit = Vec3A::ONE;

        let inside = Aabb::from_center_half_extents(Vec3A::new(0.0, 0.0, -50.0), unit);
        assert_eq!(f.test_aabb(&inside), FrustumResult::Inside);
        assert!(f.is_aabb_visible(&inside));

        let outside = Aabb::from_center_half_extents(Vec3A::new(0.0, 0.0, 50.0), unit);
        assert_eq!(f.test_aabb(&outside), FrustumResult::Outside);
        assert!(f.is_aabb_outside(&outside));

        // Straddles the near plane at z = -1.
        let straddle = Aabb::from_center_half_extents(Vec3A::new(0.0, 0.0, -0.5), unit);
        assert_eq!(f.test_aabb(&straddle), FrustumResult::Intersect);
    }

    #[test]
    fn sphere_three_way() {
        let f = test_frustum();
        assert_eq!(
            f.test_sphere(Vec3A::new(0.0, 0.0, -50.0), 1.0),
            FrustumResult::Inside
        );
        assert_eq!(
            f.test_sphere(Vec3A::new(0.0, 0.0, 50.0), 1.0),
            FrustumResult::Outside
        );
        assert_eq!(
            f.test_sphere(Vec3A::new(0.0, 0.0, -1.0), 0.5),
            FrustumResult::Intersect
        );
    }

    #[test]
    fn masked_test_prunes_contained_planes() {
        let f = test_frustum();
        let deep_inside = Aabb::from_center_half_extents(Vec3A::new(0.0, 0.0, -50.0), Vec3A::ONE);

        let mut mask = ALL_PLANES;
        assert!(f.test_aabb_masked(&deep_inside, &mut mask));
        // Fully inside every plane: nothing left for children to test.
        assert_eq!(mask, 0);

        let near_straddler = Aabb::from_center_half_extents(Vec3A::new(0.0, 0.0, -0.5), Vec3A::ONE);
        let mut mask = ALL_PLANES;
        assert!(f.test_aabb_masked(&near_straddler, &mut mask));
        assert_ne!(mask & (1 << FrustumPlane::Near as u8), 0);
    }

    #[test]
    fn coherent_test_remembers_failing_plane() {
        let f = test_frustum();
        let behind = Aabb::from_center_half_extents(Vec3A::new(0.0, 0.0, 50.0), Vec3A::ONE);

        let mut coherency = CoherencyData::default();
        assert!(!f.test_aabb_coherent(&behind, &mut coherency));
        assert!(!coherency.was_visible);
        let failing = coherency.last_plane;

        // Second call rejects on the remembered plane immediately.
        assert!(!f.test_aabb_coherent(&behind, &mut coherency));
        assert_eq!(coherency.last_plane, failing);

        let visible = Aabb::from_center_half_extents(Vec3A::new(0.0, 0.0, -50.0), Vec3A::ONE);
        assert!(f.test_aabb_coherent(&visible, &mut coherency));
        assert!(coherency.was_visible);
    }

    #[test]
    fn obb_rotation_does_not_change_outside_verdict() {
        let f = test_frustum();
        let rot = Quat::from_rotation_y(0.6);
        let inside = Obb::new(Vec3A::new(0.0, 0.0, -50.0), Vec3A::ONE, rot);
        assert_eq!(f.test_obb(&inside), FrustumResult::Inside);
        let outside = Obb::new(Vec3A::new(0.0, 0.0, 50.0), Vec3A::ONE, rot);
        assert!(f.is_obb_outside(&outside));
    }

    #[test]
    fn corners_span_near_and_far() {
        let f = test_frustum();
        let corners = f.corners();
        assert!((corners[0].z + 1.0).abs() < 1e-3, "near corners at z = -1");
        assert!((corners[4].z + 100.0).abs() < 0.1, "far corners at z = -100");
        // 90 degree fov: near face half-width equals the near distance.
        assert!((corners[0].x + 1.0).abs() < 1e-3);
    }
}
