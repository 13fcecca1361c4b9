// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frustum culling demo: a grid of objects culled against a moving camera,
//! through the manager and through the 4-wide batch culler.
//!
//! Run with `RUST_LOG=debug` for index details.

use glam::{Mat4, Vec3, Vec3A};
use log::info;
use overstory_geom::{Aabb, Frustum, FrustumCuller};
use overstory_manager::{Layer, LayerMask, ManagerConfig, SpatialManager};

fn main() {
    env_logger::init();

    let manager = SpatialManager::new(ManagerConfig::default());

    // A 20x20 field of unit boxes on the ground plane.
    let mut boxes = Vec::new();
    for x in 0..20 {
        for z in 0..20 {
            let center = Vec3A::new(x as f32 * 10.0 - 95.0, 0.0, z as f32 * 10.0 - 95.0);
            let bounds = Aabb::from_center_half_extents(center, Vec3A::ONE);
            manager.register_object((x * 20 + z + 1) as u64, bounds, Layer::Decorations);
            boxes.push(bounds);
        }
    }

    let projection = Mat4::perspective_rh_gl(60_f32.to_radians(), 16.0 / 9.0, 0.5, 150.0);

    for step in 0..4 {
        manager.update(0.016);

        let angle = step as f32 * core::f32::consts::FRAC_PI_2;
        let eye = Vec3::new(angle.cos() * 40.0, 25.0, angle.sin() * 40.0);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let frustum = Frustum::from_matrices(&view, &projection);

        let visible = manager.query_frustum(&frustum, LayerMask::all());

        // Same cull through the wide batch path.
        let mut flags = vec![false; boxes.len()];
        FrustumCuller::new(&frustum).cull_aabbs(&boxes, &mut flags);
        let wide_visible = flags.iter().filter(|&&v| v).count();

        info!(
            "camera step {step}: {} visible via index, {wide_visible} via batch culler",
            visible.len()
        );
        assert_eq!(visible.len(), wide_visible);
        println!(
            "step {step}: {}/{} objects visible",
            visible.len(),
            boxes.len()
        );
    }
}
