// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! 4-lane batch intersection tests.
//!
//! These operate on four boxes (or spheres) at a time through [`glam::Vec4`]
//! lanes, which lower to SIMD on targets where glam has vector backends. Hit
//! results come back as a 4-bit mask with bit `i` set when lane `i` passes.
//! Partial groups are padded with lanes that can never hit.

use glam::{Vec3A, Vec4};

use crate::aabb::Aabb;
use crate::frustum::{CoherencyData, Frustum};

/// Four AABBs in structure-of-arrays form.
///
/// Absent lanes hold `+inf` mins and `-inf` maxs, an inverted box that fails
/// every slab and plane test, so padding never reports a hit.
#[derive(Copy, Clone, Debug)]
pub struct Aabb4 {
    /// Minimum X per lane.
    pub min_x: Vec4,
    /// Minimum Y per lane.
    pub min_y: Vec4,
    /// Minimum Z per lane.
    pub min_z: Vec4,
    /// Maximum X per lane.
    pub max_x: Vec4,
    /// Maximum Y per lane.
    pub max_y: Vec4,
    /// Maximum Z per lane.
    pub max_z: Vec4,
}

impl Default for Aabb4 {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb4 {
    /// All four lanes empty (never hit).
    pub const EMPTY: Self = Self {
        min_x: Vec4::INFINITY,
        min_y: Vec4::INFINITY,
        min_z: Vec4::INFINITY,
        max_x: Vec4::NEG_INFINITY,
        max_y: Vec4::NEG_INFINITY,
        max_z: Vec4::NEG_INFINITY,
    };

    /// Pack up to four boxes; missing lanes stay empty.
    pub fn from_boxes(boxes: &[Aabb]) -> Self {
        let mut out = Self::EMPTY;
        for (lane, b) in boxes.iter().take(4).enumerate() {
            out.set_lane(lane, b);
        }
        out
    }

    /// Write one lane.
    pub fn set_lane(&mut self, lane: usize, aabb: &Aabb) {
        self.min_x[lane] = aabb.min.x;
        self.min_y[lane] = aabb.min.y;
        self.min_z[lane] = aabb.min.z;
        self.max_x[lane] = aabb.max.x;
        self.max_y[lane] = aabb.max.y;
        self.max_z[lane] = aabb.max.z;
    }

    /// Slab-test one ray against all four lanes.
    ///
    /// A lane passes when the ray meets its box with exit `>= 0` and entry
    /// `<= max_dist`.
    pub fn intersects_ray(&self, origin: Vec3A, inv_dir: Vec3A, max_dist: f32) -> u32 {
        let ox = Vec4::splat(origin.x);
        let oy = Vec4::splat(origin.y);
        let oz = Vec4::splat(origin.z);
        let ix = Vec4::splat(inv_dir.x);
        let iy = Vec4::splat(inv_dir.y);
        let iz = Vec4::splat(inv_dir.z);

        let t1x = (self.min_x - ox) * ix;
        let t2x = (self.max_x - ox) * ix;
        let t1y = (self.min_y - oy) * iy;
        let t2y = (self.max_y - oy) * iy;
        let t1z = (self.min_z - oz) * iz;
        let t2z = (self.max_z - oz) * iz;

        let t_near = t1x.min(t2x).max(t1y.min(t2y)).max(t1z.min(t2z));
        let t_far = t1x.max(t2x).min(t1y.max(t2y)).min(t1z.max(t2z));

        let valid = t_far.cmpge(t_near)
            & t_far.cmpge(Vec4::ZERO)
            & t_near.cmple(Vec4::splat(max_dist));
        valid.bitmask()
    }

    /// Test all four lanes against a frustum's n-vertices.
    ///
    /// A lane survives when no plane has its n-vertex behind it; this is the
    /// conservative visible test, matching [`Frustum::is_aabb_visible`].
    pub fn in_frustum(&self, frustum: &Frustum) -> u32 {
        let packed = frustum.packed();
        let mut result = 0xF_u32;

        for p in 0..6 {
            let nx = packed.normal_x[p];
            let ny = packed.normal_y[p];
            let nz = packed.normal_z[p];

            // Per-component n-vertex: the whole Vec4 of mins or maxs,
            // depending on the scalar sign of that normal component.
            let nv_x = if nx >= 0.0 { self.min_x } else { self.max_x };
            let nv_y = if ny >= 0.0 { self.min_y } else { self.max_y };
            let nv_z = if nz >= 0.0 { self.min_z } else { self.max_z };

            let dist = nv_x * Vec4::splat(nx)
                + nv_y * Vec4::splat(ny)
                + nv_z * Vec4::splat(nz)
                + Vec4::splat(packed.distance[p]);

            result &= !dist.cmplt(Vec4::ZERO).bitmask();
            if result == 0 {
                break;
            }
        }

        result
    }
}

/// Test four spheres against a frustum. Bit `i` set when sphere `i` is
/// visible (not entirely outside any plane).
pub fn frustum_sphere4(frustum: &Frustum, centers: &[Vec3A; 4], radii: &[f32; 4]) -> u32 {
    let packed = frustum.packed();
    let cx = Vec4::new(centers[0].x, centers[1].x, centers[2].x, centers[3].x);
    let cy = Vec4::new(centers[0].y, centers[1].y, centers[2].y, centers[3].y);
    let cz = Vec4::new(centers[0].z, centers[1].z, centers[2].z, centers[3].z);
    let neg_r = -Vec4::from_array(*radii);

    let mut result = 0xF_u32;
    for p in 0..6 {
        let dist = cx * Vec4::splat(packed.normal_x[p])
            + cy * Vec4::splat(packed.normal_y[p])
            + cz * Vec4::splat(packed.normal_z[p])
            + Vec4::splat(packed.distance[p]);

        result &= !dist.cmplt(neg_r).bitmask();
        if result == 0 {
            break;
        }
    }
    result
}

/// Batch frustum culler over AABB slices.
///
/// Runs the 4-wide path on full groups and the scalar path on the remainder.
#[derive(Copy, Clone, Debug)]
pub struct FrustumCuller<'a> {
    frustum: &'a Frustum,
}

impl<'a> FrustumCuller<'a> {
    /// Create a culler for this frame's frustum.
    pub fn new(frustum: &'a Frustum) -> Self {
        Self { frustum }
    }

    /// Cull a batch of boxes, writing one visibility flag per box.
    ///
    /// # Panics
    ///
    /// Panics when `visible` is shorter than `boxes`.
    pub fn cull_aabbs(&self, boxes: &[Aabb], visible: &mut [bool]) {
        assert!(visible.len() >= boxes.len(), "output slice too short");

        let mut chunks = boxes.chunks_exact(4);
        let mut i = 0;
        for chunk in &mut chunks {
            let mask = Aabb4::from_boxes(chunk).in_frustum(self.frustum);
            for lane in 0..4 {
                visible[i + lane] = mask & (1 << lane) != 0;
            }
            i += 4;
        }
        for b in chunks.remainder() {
            visible[i] = self.frustum.is_aabb_visible(b);
            i += 1;
        }
    }

    /// Cull with per-object temporal coherency records.
    ///
    /// # Panics
    ///
    /// Panics when `coherency` or `visible` is shorter than `boxes`.
    pub fn cull_aabbs_coherent(
        &self,
        boxes: &[Aabb],
        coherency: &mut [CoherencyData],
        visible: &mut [bool],
    ) {
        assert!(coherency.len() >= boxes.len(), "coherency slice too short");
        assert!(visible.len() >= boxes.len(), "output slice too short");

        for (i, b) in boxes.iter().enumerate() {
            visible[i] = self.frustum.test_aabb_coherent(b, &mut coherency[i]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;

    fn test_frustum() -> Frustum {
        let projection = Mat4::perspective_rh_gl(core::f32::consts::FRAC_PI_2, 1.0, 1.0, 100.0);
        Frustum::from_matrices(&Mat4::IDENTITY, &projection)
    }

    fn unit_box(center: Vec3A) -> Aabb {
        Aabb::from_center_half_extents(center, Vec3A::ONE)
    }

    #[test]
    fn ray4_mask_matches_scalar() {
        let boxes = [
            unit_box(Vec3A::new(5.0, 0.0, 0.0)),
            unit_box(Vec3A::new(15.0, 0.0, 0.0)),
            unit_box(Vec3A::new(5.0, 10.0, 0.0)), // off axis, miss
            unit_box(Vec3A::new(200.0, 0.0, 0.0)), // beyond max_dist
        ];
        let packed = Aabb4::from_boxes(&boxes);
        let origin = Vec3A::ZERO;
        let dir = Vec3A::X;

        let mask = packed.intersects_ray(origin, dir.recip(), 100.0);
        for (lane, b) in boxes.iter().enumerate() {
            let scalar_hit = b.ray_intersect(origin, dir, 100.0).is_some();
            assert_eq!(mask & (1 << lane) != 0, scalar_hit, "lane {lane}");
        }
        assert_eq!(mask, 0b0011);
    }

    #[test]
    fn padded_lanes_never_hit() {
        let boxes = [unit_box(Vec3A::new(5.0, 0.0, 0.0))];
        let packed = Aabb4::from_boxes(&boxes);
        let mask = packed.intersects_ray(Vec3A::ZERO, Vec3A::X.recip(), 100.0);
        assert_eq!(mask, 0b0001);

        assert_eq!(Aabb4::EMPTY.in_frustum(&test_frustum()), 0);
    }

    #[test]
    fn frustum4_matches_scalar() {
        let f = test_frustum();
        let boxes = [
            unit_box(Vec3A::new(0.0, 0.0, -50.0)),
            unit_box(Vec3A::new(0.0, 0.0, 50.0)),
            unit_box(Vec3A::new(0.0, 0.0, -0.5)),
            unit_box(Vec3A::new(90.0, 0.0, -50.0)),
        ];
        let mask = Aabb4::from_boxes(&boxes).in_frustum(&f);
        for (lane, b) in boxes.iter().enumerate() {
            assert_eq!(mask & (1 << lane) != 0, f.is_aabb_visible(b), "lane {lane}");
        }
    }

    #[test]
    fn sphere4_matches_scalar() {
        let f = test_frustum();
        let centers = [
            Vec3A::new(0.0, 0.0, -50.0),
            Vec3A::new(0.0, 0.0, 50.0),
            Vec3A::new(0.0, 0.0, -1.0),
            Vec3A::new(0.0, 70.0, -50.0),
        ];
        let radii = [1.0, 1.0, 0.5, 1.0];
        let mask = frustum_sphere4(&f, &centers, &radii);
        for lane in 0..4 {
            assert_eq!(
                mask & (1 << lane) != 0,
                f.is_sphere_visible(centers[lane], radii[lane]),
                "lane {lane}"
            );
        }
    }

    #[test]
    fn culler_handles_remainder_and_coherency() {
        let f = test_frustum();
        let culler = FrustumCuller::new(&f);

        let boxes = [
            unit_box(Vec3A::new(0.0, 0.0, -10.0)),
            unit_box(Vec3A::new(0.0, 0.0, 10.0)),
            unit_box(Vec3A::new(0.0, 0.0, -20.0)),
            unit_box(Vec3A::new(0.0, 0.0, 20.0)),
            unit_box(Vec3A::new(0.0, 0.0, -30.0)),
            unit_box(Vec3A::new(0.0, 0.0, 30.0)),
        ];
        let mut visible = [false; 6];
        culler.cull_aabbs(&boxes, &mut visible);
        assert_eq!(visible, [true, false, true, false, true, false]);

        let mut coherency = [CoherencyData::default(); 6];
        let mut visible2 = [false; 6];
        culler.cull_aabbs_coherent(&boxes, &mut coherency, &mut visible2);
        assert_eq!(visible, visible2);
    }
}
