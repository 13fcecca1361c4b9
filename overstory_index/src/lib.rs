// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=overstory_index --heading-base-level=0

//! Overstory Index: 3D spatial indices behind one query contract.
//!
//! Every backend answers the same capability set (box, sphere, frustum, ray,
//! nearest, and k-nearest queries over id-tagged AABBs, with layer-mask
//! filtering and allocation-free visitor variants):
//!
//! - [`HashGrid`]: open uniform grid with multi-resolution levels, DDA ray
//!   marching, O(1) updates.
//! - [`Octree`]: pooled-node octree; loose bounds tolerate motion.
//! - [`Bvh`]: SAH-built flat-array hierarchy with refit and lazy rebuild.
//!
//! [`SpatialIndex`] is the tagged wrapper that picks a backend at runtime
//! while keeping leaf iteration monomorphic.
//!
//! # Example
//!
//! ```rust
//! use glam::Vec3A;
//! use overstory_geom::Aabb;
//! use overstory_index::{IndexKind, QueryFilter, SpatialIndex};
//!
//! let world = Aabb::new(Vec3A::splat(-100.0), Vec3A::splat(100.0));
//! let mut index = SpatialIndex::with_kind(IndexKind::Bvh, world, 10.0);
//!
//! index.insert(1, Aabb::from_center_half_extents(Vec3A::ZERO, Vec3A::ONE), 0);
//! index.insert(2, Aabb::from_center_half_extents(Vec3A::splat(50.0), Vec3A::ONE), 0);
//!
//! let hits = index.query_sphere(Vec3A::ZERO, 5.0, &QueryFilter::ALL);
//! assert_eq!(hits, vec![1]);
//! ```

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod backend;
pub mod backends;
pub mod types;
pub mod validate;

pub use backend::{SpatialBackend, SpatialIndex};
pub use backends::bvh::{Bvh, BvhConfig, BvhNode};
pub use backends::hash_grid::{CellCoord, CellStats, HashGrid, HashGridConfig};
pub use backends::octree::{Octree, OctreeConfig};
pub use types::{IndexKind, QueryFilter, QueryStats};
pub use validate::{BvhReport, HashGridReport, OctreeReport};

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use glam::{Mat4, Vec3A};
    use overstory_geom::{Aabb, Frustum, Ray};

    use super::*;

    fn world() -> Aabb {
        Aabb::new(Vec3A::splat(-100.0), Vec3A::splat(100.0))
    }

    fn all_backends() -> [SpatialIndex; 4] {
        [
            SpatialIndex::with_kind(IndexKind::HashGrid, world(), 10.0),
            SpatialIndex::with_kind(IndexKind::Octree, world(), 10.0),
            SpatialIndex::with_kind(IndexKind::LooseOctree, world(), 10.0),
            SpatialIndex::with_kind(IndexKind::Bvh, world(), 10.0),
        ]
    }

    fn unit_box(center: Vec3A) -> Aabb {
        Aabb::from_center_half_extents(center, Vec3A::ONE)
    }

    // Deterministic xorshift so scene generation needs no rand dependency.
    struct Rng(u64);

    impl Rng {
        fn next_u64(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }

        fn next_f32(&mut self) -> f32 {
            (self.next_u64() >> 40) as f32 / (1_u64 << 24) as f32
        }

        fn range(&mut self, lo: f32, hi: f32) -> f32 {
            lo + self.next_f32() * (hi - lo)
        }
    }

    fn random_scene(count: usize) -> Vec<(u64, Aabb, u64)> {
        let mut rng = Rng(0xCAFE_F00D_DEAD_BEEF);
        (0..count)
            .map(|i| {
                let center = Vec3A::new(
                    rng.range(-90.0, 90.0),
                    rng.range(-90.0, 90.0),
                    rng.range(-90.0, 90.0),
                );
                let half = Vec3A::new(
                    rng.range(0.5, 4.0),
                    rng.range(0.5, 4.0),
                    rng.range(0.5, 4.0),
                );
                let layer = (i % 8) as u64;
                (i as u64 + 1, Aabb::from_center_half_extents(center, half), layer)
            })
            .collect()
    }

    fn sorted(mut ids: Vec<u64>) -> Vec<u64> {
        ids.sort_unstable();
        ids
    }

    #[test]
    fn scenario_unit_sphere_query() {
        for mut index in all_backends() {
            index.insert(1, unit_box(Vec3A::new(0.0, 0.0, 0.0)), 0);
            index.insert(2, unit_box(Vec3A::new(5.0, 0.0, 0.0)), 0);
            index.insert(3, unit_box(Vec3A::new(20.0, 0.0, 0.0)), 0);

            let hits = sorted(index.query_sphere(Vec3A::ZERO, 8.0, &QueryFilter::ALL));
            assert_eq!(hits, alloc::vec![1, 2], "{:?}", index.kind());
        }
    }

    #[test]
    fn scenario_ray_ordering() {
        for mut index in all_backends() {
            index.insert(10, unit_box(Vec3A::new(5.0, 0.0, 0.0)), 0);
            index.insert(11, unit_box(Vec3A::new(15.0, 0.0, 0.0)), 0);
            index.insert(12, unit_box(Vec3A::new(30.0, 0.0, 0.0)), 0);

            let ray = Ray::new(Vec3A::ZERO, Vec3A::X);
            let hits = index.query_ray(&ray, 100.0, &QueryFilter::ALL);
            let ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
            assert_eq!(ids, alloc::vec![10, 11, 12], "{:?}", index.kind());

            let expected = [4.0_f32, 14.0, 29.0];
            for (hit, want) in hits.iter().zip(expected) {
                assert!((hit.distance - want).abs() < 1e-4, "{:?}", index.kind());
            }
        }
    }

    #[test]
    fn scenario_layer_filter() {
        for mut index in all_backends() {
            index.insert(100, unit_box(Vec3A::ZERO), 1);
            index.insert(200, unit_box(Vec3A::ZERO), 2);

            let hits = index.query_aabb(&unit_box(Vec3A::ZERO), &QueryFilter::from_mask(1 << 2));
            assert_eq!(hits, alloc::vec![200], "{:?}", index.kind());
        }
    }

    #[test]
    fn queries_match_brute_force_scan() {
        let scene = random_scene(150);
        let filter = QueryFilter::from_mask(0b0101_0101).exclude(7);

        for mut index in all_backends() {
            for &(id, bounds, layer) in &scene {
                index.insert(id, bounds, layer);
            }

            let query = Aabb::from_center_half_extents(Vec3A::new(10.0, -20.0, 5.0), Vec3A::splat(35.0));
            let expected: Vec<u64> = scene
                .iter()
                .filter(|(id, b, layer)| filter.passes(*id, *layer) && b.intersects(&query))
                .map(|&(id, _, _)| id)
                .collect();
            assert_eq!(
                sorted(index.query_aabb(&query, &filter)),
                sorted(expected),
                "aabb {:?}",
                index.kind()
            );

            let center = Vec3A::new(-15.0, 12.0, 30.0);
            let radius = 28.0;
            let expected: Vec<u64> = scene
                .iter()
                .filter(|(id, b, layer)| {
                    filter.passes(*id, *layer) && b.intersects_sphere(center, radius)
                })
                .map(|&(id, _, _)| id)
                .collect();
            assert_eq!(
                sorted(index.query_sphere(center, radius, &filter)),
                sorted(expected),
                "sphere {:?}",
                index.kind()
            );
        }
    }

    #[test]
    fn frustum_equivalent_to_plane_filters() {
        let scene = random_scene(120);
        let projection = Mat4::perspective_rh_gl(core::f32::consts::FRAC_PI_2, 1.0, 1.0, 150.0);
        let frustum = Frustum::from_matrices(&Mat4::IDENTITY, &projection);

        for mut index in all_backends() {
            for &(id, bounds, layer) in &scene {
                index.insert(id, bounds, layer);
            }

            let expected: Vec<u64> = scene
                .iter()
                .filter(|(_, b, _)| frustum.is_aabb_visible(b))
                .map(|&(id, _, _)| id)
                .collect();
            assert_eq!(
                sorted(index.query_frustum(&frustum, &QueryFilter::ALL)),
                sorted(expected),
                "{:?}",
                index.kind()
            );
        }
    }

    #[test]
    fn ray_results_monotonic_for_random_scene() {
        let scene = random_scene(150);
        for mut index in all_backends() {
            for &(id, bounds, layer) in &scene {
                index.insert(id, bounds, layer);
            }
            // Guaranteed hits along the ray on top of the random clutter.
            for (i, x) in [-40.0_f32, 0.0, 45.0].iter().enumerate() {
                index.insert(9000 + i as u64, unit_box(Vec3A::new(*x, 0.0, 0.0)), 0);
            }
            let ray = Ray::new(Vec3A::new(-120.0, 0.0, 0.0), Vec3A::X);
            let hits = index.query_ray(&ray, 400.0, &QueryFilter::ALL);
            assert!(hits.len() >= 3, "{:?}", index.kind());
            assert!(
                hits.windows(2).all(|w| w[0].distance <= w[1].distance),
                "{:?}",
                index.kind()
            );
        }
    }

    #[test]
    fn k_nearest_complete_and_consistent_with_nearest() {
        let scene = random_scene(100);
        let point = Vec3A::new(5.0, 5.0, 5.0);
        let max_dist = 80.0;
        let k = 7;

        let mut expected: Vec<(f32, u64)> = scene
            .iter()
            .filter(|(_, b, _)| b.distance_squared(point) <= max_dist * max_dist)
            .map(|&(id, b, _)| (b.distance_squared(point), id))
            .collect();
        expected.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        let expected_dists: Vec<f32> = expected.iter().take(k).map(|&(d, _)| d).collect();

        for mut index in all_backends() {
            for &(id, bounds, layer) in &scene {
                index.insert(id, bounds, layer);
            }

            let ids = index.query_k_nearest(point, k, max_dist, &QueryFilter::ALL);
            assert_eq!(ids.len(), k, "{:?}", index.kind());

            // Distance multiset must match the brute-force k smallest (ties
            // make the id order itself ambiguous).
            let dists: Vec<f32> = ids
                .iter()
                .map(|id| index.object_bounds(*id).distance_squared(point))
                .collect();
            for (got, want) in dists.iter().zip(&expected_dists) {
                assert!((got - want).abs() < 1e-4, "{:?}", index.kind());
            }
            assert!(
                dists.windows(2).all(|w| w[0] <= w[1]),
                "k-nearest must be ordered {:?}",
                index.kind()
            );

            let nearest = index.query_nearest(point, max_dist, &QueryFilter::ALL);
            assert_eq!(Some(&nearest), ids.first(), "{:?}", index.kind());
        }
    }

    #[test]
    fn insert_remove_round_trip_is_invisible() {
        let scene = random_scene(60);
        let probe = Aabb::from_center_half_extents(Vec3A::ZERO, Vec3A::splat(60.0));

        for mut index in all_backends() {
            for &(id, bounds, layer) in &scene {
                index.insert(id, bounds, layer);
            }
            let before = sorted(index.query_aabb(&probe, &QueryFilter::ALL));

            index.insert(9999, unit_box(Vec3A::new(1.0, 2.0, 3.0)), 0);
            assert!(index.remove(9999));
            assert!(!index.remove(9999), "second remove must report missing");

            let after = sorted(index.query_aabb(&probe, &QueryFilter::ALL));
            assert_eq!(before, after, "{:?}", index.kind());
        }
    }

    #[test]
    fn update_equivalent_to_fresh_insert() {
        for (mut moved, mut fresh) in all_backends().into_iter().zip(all_backends()) {
            moved.insert(1, unit_box(Vec3A::ZERO), 0);
            assert!(moved.update(1, unit_box(Vec3A::new(40.0, 0.0, 0.0))));

            fresh.insert(1, unit_box(Vec3A::new(40.0, 0.0, 0.0)), 0);

            let probe_old = unit_box(Vec3A::ZERO);
            let probe_new = unit_box(Vec3A::new(40.0, 0.0, 0.0));
            assert_eq!(
                moved.query_aabb(&probe_old, &QueryFilter::ALL),
                fresh.query_aabb(&probe_old, &QueryFilter::ALL),
                "{:?}",
                moved.kind()
            );
            assert_eq!(
                moved.query_aabb(&probe_new, &QueryFilter::ALL),
                fresh.query_aabb(&probe_new, &QueryFilter::ALL),
                "{:?}",
                moved.kind()
            );
        }
    }

    #[test]
    fn update_unknown_id_fails_and_bounds_are_sentinel() {
        for mut index in all_backends() {
            assert!(!index.update(42, unit_box(Vec3A::ZERO)));
            assert!(!index.object_bounds(42).is_valid());
            assert_eq!(index.query_nearest(Vec3A::ZERO, 10.0, &QueryFilter::ALL), 0);
        }
    }

    #[test]
    fn visitor_early_stop_bounds_work() {
        for mut index in all_backends() {
            for i in 1..=20_u64 {
                index.insert(i, unit_box(Vec3A::new(i as f32 * 3.0, 0.0, 0.0)), 0);
            }
            let mut count = 0;
            index.visit_sphere(Vec3A::ZERO, 1000.0, &QueryFilter::ALL, |_, bounds| {
                assert!(bounds.is_valid());
                count += 1;
                count < 5
            });
            assert_eq!(count, 5, "{:?}", index.kind());
        }
    }
}
