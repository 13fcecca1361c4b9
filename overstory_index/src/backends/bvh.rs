// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bounding volume hierarchy built with the surface-area heuristic, stored
//! as a flat array of 32-byte nodes.

use alloc::vec::Vec;
use core::cmp::Ordering;

use glam::{Vec3, Vec3A, Vec4};
use hashbrown::HashMap;
use overstory_geom::{ALL_PLANES, Aabb, Frustum, Ray, RayHit};

use crate::backend::SpatialBackend;
use crate::types::{IndexKind, QueryFilter, QueryStats};
use crate::validate::BvhReport;

/// One flat-array BVH node.
///
/// 32 bytes: six bounds floats, the left-child-or-first-primitive index, and
/// the primitive count (0 marks an internal node). Children of an internal
/// node sit at `left_first` and `left_first + 1`; traversal is pure index
/// arithmetic over the contiguous node array.
#[derive(Copy, Clone, Debug, Default)]
#[repr(align(32))]
pub struct BvhNode {
    min: Vec3,
    max: Vec3,
    left_first: u32,
    count: u32,
}

impl BvhNode {
    /// Node bounds.
    #[inline]
    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.min.into(), self.max.into())
    }

    #[inline]
    fn set_bounds(&mut self, bounds: &Aabb) {
        self.min = bounds.min.into();
        self.max = bounds.max.into();
    }

    /// Whether this node holds primitives directly.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }

    /// Left child index (internal) or first primitive slot (leaf).
    #[inline]
    pub fn left_first(&self) -> u32 {
        self.left_first
    }

    /// Right child index; meaningful for internal nodes only.
    #[inline]
    pub fn right_child(&self) -> u32 {
        self.left_first + 1
    }

    /// Primitive count; zero for internal nodes.
    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }
}

#[derive(Copy, Clone, Debug)]
struct Primitive {
    id: u64,
    bounds: Aabb,
    centroid: Vec3A,
    layer: u64,
}

/// Tuning for [`Bvh`] construction.
#[derive(Copy, Clone, Debug)]
pub struct BvhConfig {
    /// Leaves are emitted at or below this population.
    pub max_primitives_per_leaf: u32,
    /// Bin count for binned SAH sweeps (clamped to 64).
    pub sah_bins: u32,
    /// Use binned SAH; full per-candidate sweeps otherwise.
    pub use_binned_sah: bool,
    /// Below this slice size the builder runs the full sweep even in binned
    /// mode. Zero keeps binned everywhere.
    pub full_sah_threshold: u32,
    /// SAH cost charged per internal node visited.
    pub traversal_cost: f32,
    /// SAH cost charged per primitive intersection test.
    pub intersection_cost: f32,
}

impl Default for BvhConfig {
    fn default() -> Self {
        Self {
            max_primitives_per_leaf: 4,
            sah_bins: 16,
            use_binned_sah: true,
            full_sah_threshold: 0,
            traversal_cost: 1.0,
            intersection_cost: 1.0,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct SahSplit {
    axis: usize,
    position: f32,
    cost: f32,
}

const MAX_BINS: usize = 64;

/// SAH-built bounding volume hierarchy.
///
/// Mutations only record primitives and mark the structure stale; the tree is
/// reconstructed by [`SpatialBackend::rebuild`], which the
/// [`SpatialIndex`](crate::SpatialIndex) wrapper calls lazily before its
/// `&mut` queries. For incremental workloads, batch mutations and call
/// [`Bvh::refit`] when topology is still adequate.
#[derive(Debug)]
pub struct Bvh {
    config: BvhConfig,
    nodes: Vec<BvhNode>,
    primitives: Vec<Primitive>,
    primitive_indices: Vec<u32>,
    id_to_index: HashMap<u64, u32>,
    /// Structure no longer matches the primitives; queries need a rebuild
    /// (or a refit, for bounds-only changes) first.
    stale: bool,
    /// The primitive membership changed since the last build, so a refit
    /// cannot repair the tree.
    membership_changed: bool,
    /// SAH cost measured right after the last build; baseline for the
    /// quality-degradation heuristic.
    built_sah_cost: f32,
}

impl Bvh {
    /// Create an empty BVH.
    pub fn new(config: BvhConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            primitives: Vec::new(),
            primitive_indices: Vec::new(),
            id_to_index: HashMap::new(),
            stale: false,
            membership_changed: false,
            built_sah_cost: 0.0,
        }
    }

    /// Build configuration.
    pub fn config(&self) -> &BvhConfig {
        &self.config
    }

    /// The flat node array; root at index 0. Empty until built.
    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    /// Recompute all node bounds bottom-up without changing topology.
    ///
    /// O(n); bounds are written on the recursion unwind so children always
    /// precede their parent. Use after moving primitives a little; rebuild
    /// once the tree quality has degraded. When primitives were inserted or
    /// removed since the last build the leaf slices no longer match the
    /// primitive set and this falls back to a full rebuild.
    pub fn refit(&mut self) {
        if self.membership_changed {
            self.rebuild();
            return;
        }
        if !self.nodes.is_empty() {
            for prim in &mut self.primitives {
                prim.centroid = prim.bounds.center();
            }
            self.refit_at(0);
        }
        self.stale = false;
    }

    fn refit_at(&mut self, node_index: u32) {
        let node = self.nodes[node_index as usize];
        if node.is_leaf() {
            let mut bounds = Aabb::INVALID;
            for i in 0..node.count {
                let prim = self.primitive_indices[(node.left_first + i) as usize];
                bounds.expand_aabb(&self.primitives[prim as usize].bounds);
            }
            self.nodes[node_index as usize].set_bounds(&bounds);
        } else {
            let left = node.left_first;
            self.refit_at(left);
            self.refit_at(left + 1);
            let bounds = Aabb::merge(
                &self.nodes[left as usize].bounds(),
                &self.nodes[(left + 1) as usize].bounds(),
            );
            self.nodes[node_index as usize].set_bounds(&bounds);
        }
    }

    /// Tree depth in nodes; zero when empty.
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        self.depth_at(0)
    }

    fn depth_at(&self, node_index: u32) -> usize {
        let node = &self.nodes[node_index as usize];
        if node.is_leaf() {
            return 1;
        }
        1 + self
            .depth_at(node.left_first)
            .max(self.depth_at(node.left_first + 1))
    }

    /// Total SAH cost of the current tree: each node weighted by the ratio
    /// of its surface area to the root's, internal nodes charged the
    /// traversal cost and leaves their primitive count times the
    /// intersection cost. Finite and non-negative; the rebuild heuristic's
    /// quality signal.
    pub fn sah_cost(&self) -> f32 {
        let Some(root) = self.nodes.first() else {
            return 0.0;
        };
        let root_area = root.bounds().surface_area().max(1e-12);

        let mut cost = 0.0;
        for node in &self.nodes {
            let prob = node.bounds().surface_area() / root_area;
            cost += if node.is_leaf() {
                prob * node.count as f32 * self.config.intersection_cost
            } else {
                prob * self.config.traversal_cost
            };
        }
        cost
    }

    /// Node count of the current tree.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether refitted bounds have degraded the tree past `threshold`
    /// times the SAH cost measured at the last rebuild.
    ///
    /// A refit-heavy workload checks this each frame and schedules a rebuild
    /// when it trips; 1.5 to 2.0 are reasonable thresholds.
    pub fn quality_degraded(&self, threshold: f32) -> bool {
        self.built_sah_cost > 0.0 && self.sah_cost() > self.built_sah_cost * threshold
    }

    /// Structural invariant check: parent bounds contain child bounds and
    /// the leaves partition the primitive set exactly.
    pub fn validate(&self) -> BvhReport {
        let mut report = BvhReport {
            object_count: self.primitives.len(),
            node_count: self.nodes.len(),
            max_depth: self.depth(),
            sah_cost: self.sah_cost(),
            containment_violations: Vec::new(),
            partition_errors: Vec::new(),
        };
        if self.nodes.is_empty() {
            if !self.primitives.is_empty() && !self.stale {
                report.partition_errors.push(0);
            }
            return report;
        }

        let mut seen = alloc::vec![0_u32; self.primitives.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            if node.is_leaf() {
                for j in 0..node.count {
                    let prim = self.primitive_indices[(node.left_first + j) as usize];
                    seen[prim as usize] += 1;
                }
            } else {
                let left = self.nodes[node.left_first as usize].bounds();
                let right = self.nodes[(node.left_first + 1) as usize].bounds();
                if !node.bounds().contains_aabb(&left) || !node.bounds().contains_aabb(&right) {
                    report.containment_violations.push(i as u32);
                }
            }
        }
        for (prim, &n) in seen.iter().enumerate() {
            if n != 1 {
                report.partition_errors.push(prim as u32);
            }
        }
        report
    }

    fn build(&mut self) {
        self.nodes.clear();
        if self.primitives.is_empty() {
            return;
        }

        let n = self.primitives.len();
        self.primitive_indices.clear();
        self.primitive_indices.extend(0..n as u32);
        // A binary tree over n leaves never exceeds 2n - 1 nodes.
        self.nodes.reserve(2 * n);

        self.build_recursive(0, n as u32, 0);
    }

    fn build_recursive(&mut self, begin: u32, end: u32, depth: u32) -> u32 {
        let node_index = self.nodes.len() as u32;
        self.nodes.push(BvhNode::default());

        let count = end - begin;
        let mut bounds = Aabb::INVALID;
        let mut centroid_bounds = Aabb::INVALID;
        for i in begin..end {
            let prim = &self.primitives[self.primitive_indices[i as usize] as usize];
            bounds.expand_aabb(&prim.bounds);
            centroid_bounds.expand_point(prim.centroid);
        }
        self.nodes[node_index as usize].set_bounds(&bounds);

        let make_leaf = |nodes: &mut Vec<BvhNode>| {
            nodes[node_index as usize].left_first = begin;
            nodes[node_index as usize].count = count;
        };

        if count <= self.config.max_primitives_per_leaf || depth > 64 {
            make_leaf(&mut self.nodes);
            return node_index;
        }

        let leaf_cost = count as f32 * self.config.intersection_cost;
        let split = self.find_best_split(begin, end, &bounds, &centroid_bounds);
        let Some(split) = split else {
            // All centroids coincide; splitting cannot help.
            make_leaf(&mut self.nodes);
            return node_index;
        };
        if split.cost >= leaf_cost {
            make_leaf(&mut self.nodes);
            return node_index;
        }

        // Partition the slice in place around the split plane.
        let mut mid = begin;
        for i in begin..end {
            let prim = self.primitive_indices[i as usize];
            if self.primitives[prim as usize].centroid[split.axis] < split.position {
                self.primitive_indices.swap(i as usize, mid as usize);
                mid += 1;
            }
        }

        // Degenerate partition: fall back to a median split on the axis.
        if mid == begin || mid == end {
            mid = (begin + end) / 2;
            let primitives = &self.primitives;
            let slice = &mut self.primitive_indices[begin as usize..end as usize];
            slice.select_nth_unstable_by((mid - begin) as usize, |&a, &b| {
                let ca = primitives[a as usize].centroid[split.axis];
                let cb = primitives[b as usize].centroid[split.axis];
                ca.partial_cmp(&cb).unwrap_or(Ordering::Equal)
            });
        }

        // The left child is emitted immediately after this node, so an
        // internal node's left_first doubles as its left child index.
        self.nodes[node_index as usize].count = 0;
        self.nodes[node_index as usize].left_first = self.nodes.len() as u32;

        self.build_recursive(begin, mid, depth + 1);
        self.build_recursive(mid, end, depth + 1);

        node_index
    }

    fn find_best_split(
        &mut self,
        begin: u32,
        end: u32,
        node_bounds: &Aabb,
        centroid_bounds: &Aabb,
    ) -> Option<SahSplit> {
        let count = end - begin;
        let full_sweep =
            !self.config.use_binned_sah || count < self.config.full_sah_threshold;
        if full_sweep {
            self.find_best_split_full(begin, end, node_bounds)
        } else {
            self.find_best_split_binned(begin, end, node_bounds, centroid_bounds)
        }
    }

    /// Binned SAH: distribute centroids into equal-width bins per axis, then
    /// evaluate every bin boundary with prefix/suffix sweeps. O(n + bins)
    /// per axis.
    fn find_best_split_binned(
        &self,
        begin: u32,
        end: u32,
        node_bounds: &Aabb,
        centroid_bounds: &Aabb,
    ) -> Option<SahSplit> {
        let num_bins = (self.config.sah_bins as usize).clamp(2, MAX_BINS);
        let parent_area = node_bounds.surface_area().max(1e-12);
        let mut best: Option<SahSplit> = None;

        for axis in 0..3 {
            let axis_min = centroid_bounds.min[axis];
            let axis_max = centroid_bounds.max[axis];
            if axis_max - axis_min < 1e-6 {
                continue;
            }
            let scale = num_bins as f32 / (axis_max - axis_min);

            let mut bin_bounds = [Aabb::INVALID; MAX_BINS];
            let mut bin_counts = [0_u32; MAX_BINS];
            for i in begin..end {
                let prim = &self.primitives[self.primitive_indices[i as usize] as usize];
                #[allow(
                    clippy::cast_possible_truncation,
                    reason = "Bin index is clamped to the bin count below."
                )]
                let bin = (((prim.centroid[axis] - axis_min) * scale) as usize).min(num_bins - 1);
                bin_bounds[bin].expand_aabb(&prim.bounds);
                bin_counts[bin] += 1;
            }

            let mut left_area = [0.0_f32; MAX_BINS];
            let mut left_count = [0_u32; MAX_BINS];
            let mut acc = Aabb::INVALID;
            let mut running = 0;
            for i in 0..num_bins {
                acc.expand_aabb(&bin_bounds[i]);
                running += bin_counts[i];
                left_area[i] = if running > 0 { acc.surface_area() } else { 0.0 };
                left_count[i] = running;
            }

            let mut right_area = [0.0_f32; MAX_BINS];
            let mut right_count = [0_u32; MAX_BINS];
            let mut acc = Aabb::INVALID;
            let mut running = 0;
            for i in (0..num_bins).rev() {
                acc.expand_aabb(&bin_bounds[i]);
                running += bin_counts[i];
                right_area[i] = if running > 0 { acc.surface_area() } else { 0.0 };
                right_count[i] = running;
            }

            let bin_width = (axis_max - axis_min) / num_bins as f32;
            for i in 0..num_bins - 1 {
                if left_count[i] == 0 || right_count[i + 1] == 0 {
                    continue;
                }
                let cost = self.config.traversal_cost
                    + self.config.intersection_cost
                        * (left_area[i] * left_count[i] as f32
                            + right_area[i + 1] * right_count[i + 1] as f32)
                        / parent_area;
                if best.is_none_or(|b| cost < b.cost) {
                    best = Some(SahSplit {
                        axis,
                        position: axis_min + (i + 1) as f32 * bin_width,
                        cost,
                    });
                }
            }
        }

        best
    }

    /// Full SAH: sort per axis and evaluate every candidate split. Higher
    /// quality than binning but O(n log n) per node; reserved for small
    /// slices.
    fn find_best_split_full(&mut self, begin: u32, end: u32, node_bounds: &Aabb) -> Option<SahSplit> {
        let count = (end - begin) as usize;
        let parent_area = node_bounds.surface_area().max(1e-12);
        let mut best: Option<SahSplit> = None;

        let mut left_areas = alloc::vec![0.0_f32; count];
        let mut right_areas = alloc::vec![0.0_f32; count];

        for axis in 0..3 {
            {
                let primitives = &self.primitives;
                let slice = &mut self.primitive_indices[begin as usize..end as usize];
                slice.sort_unstable_by(|&a, &b| {
                    let ca = primitives[a as usize].centroid[axis];
                    let cb = primitives[b as usize].centroid[axis];
                    ca.partial_cmp(&cb).unwrap_or(Ordering::Equal)
                });
            }

            let mut acc = Aabb::INVALID;
            for i in 0..count {
                let prim = self.primitive_indices[begin as usize + i];
                acc.expand_aabb(&self.primitives[prim as usize].bounds);
                left_areas[i] = acc.surface_area();
            }
            let mut acc = Aabb::INVALID;
            for i in (0..count).rev() {
                let prim = self.primitive_indices[begin as usize + i];
                acc.expand_aabb(&self.primitives[prim as usize].bounds);
                right_areas[i] = acc.surface_area();
            }

            for i in 0..count - 1 {
                let cost = self.config.traversal_cost
                    + self.config.intersection_cost
                        * (left_areas[i] * (i + 1) as f32
                            + right_areas[i + 1] * (count - 1 - i) as f32)
                        / parent_area;
                if best.is_none_or(|b| cost < b.cost) {
                    let ca = self.primitives
                        [self.primitive_indices[begin as usize + i] as usize]
                        .centroid[axis];
                    let cb = self.primitives
                        [self.primitive_indices[begin as usize + i + 1] as usize]
                        .centroid[axis];
                    best = Some(SahSplit {
                        axis,
                        position: (ca + cb) * 0.5,
                        cost,
                    });
                }
            }
        }

        best
    }

    fn prim(&self, slot: u32) -> &Primitive {
        &self.primitives[self.primitive_indices[slot as usize] as usize]
    }

    fn query_aabb_at(
        &self,
        node_index: u32,
        query: &Aabb,
        filter: &QueryFilter,
        stats: &mut QueryStats,
        results: &mut Vec<u64>,
    ) {
        stats.nodes_visited += 1;
        let node = &self.nodes[node_index as usize];
        if !node.bounds().intersects(query) {
            return;
        }

        if node.is_leaf() {
            for i in 0..node.count {
                let prim = self.prim(node.left_first + i);
                stats.objects_tested += 1;
                if filter.passes(prim.id, prim.layer) && prim.bounds.intersects(query) {
                    results.push(prim.id);
                }
            }
        } else {
            self.query_aabb_at(node.left_first, query, filter, stats, results);
            self.query_aabb_at(node.left_first + 1, query, filter, stats, results);
        }
    }

    fn query_sphere_at(
        &self,
        node_index: u32,
        center: Vec3A,
        radius: f32,
        filter: &QueryFilter,
        stats: &mut QueryStats,
        results: &mut Vec<u64>,
    ) {
        stats.nodes_visited += 1;
        let node = &self.nodes[node_index as usize];
        if !node.bounds().intersects_sphere(center, radius) {
            return;
        }

        if node.is_leaf() {
            for i in 0..node.count {
                let prim = self.prim(node.left_first + i);
                stats.objects_tested += 1;
                if filter.passes(prim.id, prim.layer)
                    && prim.bounds.intersects_sphere(center, radius)
                {
                    results.push(prim.id);
                }
            }
        } else {
            self.query_sphere_at(node.left_first, center, radius, filter, stats, results);
            self.query_sphere_at(node.left_first + 1, center, radius, filter, stats, results);
        }
    }

    fn query_frustum_at(
        &self,
        node_index: u32,
        frustum: &Frustum,
        plane_mask: u8,
        filter: &QueryFilter,
        stats: &mut QueryStats,
        results: &mut Vec<u64>,
    ) {
        stats.nodes_visited += 1;
        let node = &self.nodes[node_index as usize];

        let mut child_mask = plane_mask;
        if !frustum.test_aabb_masked(&node.bounds(), &mut child_mask) {
            return;
        }

        if node.is_leaf() {
            for i in 0..node.count {
                let prim = self.prim(node.left_first + i);
                stats.objects_tested += 1;
                if filter.passes(prim.id, prim.layer) && frustum.is_aabb_visible(&prim.bounds) {
                    results.push(prim.id);
                }
            }
        } else {
            self.query_frustum_at(node.left_first, frustum, child_mask, filter, stats, results);
            self.query_frustum_at(
                node.left_first + 1,
                frustum,
                child_mask,
                filter,
                stats,
                results,
            );
        }
    }

    fn query_ray_at(
        &self,
        node_index: u32,
        ray: &Ray,
        max_dist: f32,
        filter: &QueryFilter,
        stats: &mut QueryStats,
        results: &mut Vec<RayHit>,
    ) {
        stats.nodes_visited += 1;
        let node = &self.nodes[node_index as usize];

        let Some((t_min, _)) = node.bounds().ray_slab(ray.origin, ray.inv_dir) else {
            return;
        };
        if t_min > max_dist {
            return;
        }

        if node.is_leaf() {
            for i in 0..node.count {
                let prim = self.prim(node.left_first + i);
                stats.objects_tested += 1;
                if !filter.passes(prim.id, prim.layer) {
                    continue;
                }
                if let Some(t) = prim.bounds.ray_intersect(ray.origin, ray.direction, max_dist) {
                    results.push(RayHit::new(prim.id, t, ray.point_at(t)));
                }
            }
        } else {
            // Descend the nearer child first for earlier slab rejections.
            let mut first = node.left_first;
            let mut second = node.left_first + 1;
            let mut hit_first = self.nodes[first as usize]
                .bounds()
                .ray_slab(ray.origin, ray.inv_dir);
            let mut hit_second = self.nodes[second as usize]
                .bounds()
                .ray_slab(ray.origin, ray.inv_dir);

            if let (Some((t1, _)), Some((t2, _))) = (hit_first, hit_second)
                && t2 < t1
            {
                core::mem::swap(&mut first, &mut second);
                core::mem::swap(&mut hit_first, &mut hit_second);
            }
            if hit_first.is_some() {
                self.query_ray_at(first, ray, max_dist, filter, stats, results);
            }
            if hit_second.is_some() {
                self.query_ray_at(second, ray, max_dist, filter, stats, results);
            }
        }
    }

    fn query_nearest_at(
        &self,
        node_index: u32,
        point: Vec3A,
        filter: &QueryFilter,
        stats: &mut QueryStats,
        best: &mut (u64, f32),
    ) {
        let node = &self.nodes[node_index as usize];
        if node.bounds().distance_squared(point) > best.1 {
            return;
        }
        stats.nodes_visited += 1;

        if node.is_leaf() {
            for i in 0..node.count {
                let prim = self.prim(node.left_first + i);
                if !filter.passes(prim.id, prim.layer) {
                    continue;
                }
                stats.objects_tested += 1;
                let dist2 = prim.bounds.distance_squared(point);
                if dist2 < best.1 {
                    *best = (prim.id, dist2);
                }
            }
        } else {
            let left = node.left_first;
            let d1 = self.nodes[left as usize].bounds().distance_squared(point);
            let d2 = self.nodes[(left + 1) as usize].bounds().distance_squared(point);
            if d1 < d2 {
                self.query_nearest_at(left, point, filter, stats, best);
                self.query_nearest_at(left + 1, point, filter, stats, best);
            } else {
                self.query_nearest_at(left + 1, point, filter, stats, best);
                self.query_nearest_at(left, point, filter, stats, best);
            }
        }
    }

    fn visit_aabb_at<F: FnMut(u64, &Aabb) -> bool>(
        &self,
        node_index: u32,
        query: &Aabb,
        filter: &QueryFilter,
        visitor: &mut F,
    ) -> bool {
        let node = &self.nodes[node_index as usize];
        if !node.bounds().intersects(query) {
            return true;
        }

        if node.is_leaf() {
            for i in 0..node.count {
                let prim = self.prim(node.left_first + i);
                if filter.passes(prim.id, prim.layer)
                    && prim.bounds.intersects(query)
                    && !visitor(prim.id, &prim.bounds)
                {
                    return false;
                }
            }
            true
        } else {
            self.visit_aabb_at(node.left_first, query, filter, visitor)
                && self.visit_aabb_at(node.left_first + 1, query, filter, visitor)
        }
    }

    fn visit_sphere_at<F: FnMut(u64, &Aabb) -> bool>(
        &self,
        node_index: u32,
        center: Vec3A,
        radius: f32,
        filter: &QueryFilter,
        visitor: &mut F,
    ) -> bool {
        let node = &self.nodes[node_index as usize];
        if !node.bounds().intersects_sphere(center, radius) {
            return true;
        }

        if node.is_leaf() {
            for i in 0..node.count {
                let prim = self.prim(node.left_first + i);
                if filter.passes(prim.id, prim.layer)
                    && prim.bounds.intersects_sphere(center, radius)
                    && !visitor(prim.id, &prim.bounds)
                {
                    return false;
                }
            }
            true
        } else {
            self.visit_sphere_at(node.left_first, center, radius, filter, visitor)
                && self.visit_sphere_at(node.left_first + 1, center, radius, filter, visitor)
        }
    }

    /// Trace a batch of rays, four per traversal.
    ///
    /// Full groups of four share one packet descent: every visited node box
    /// is slab-tested against all four rays at once through [`Vec4`] lanes,
    /// and a lane drops out of the packet when it misses. The remainder rays
    /// run the scalar path. The structure must be current (see
    /// [`SpatialBackend::needs_rebuild`]).
    pub fn query_ray_batch(
        &self,
        rays: &[Ray],
        max_dist: f32,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> Vec<Vec<RayHit>> {
        let mut results: Vec<Vec<RayHit>> = rays.iter().map(|_| Vec::new()).collect();
        if self.nodes.is_empty() {
            return results;
        }

        let mut chunks = rays.chunks_exact(4);
        let mut base = 0;
        for chunk in &mut chunks {
            let packet = RayPacket::new(chunk);
            self.query_ray_packet(&packet, chunk, max_dist, filter, stats, &mut results, base);
            base += 4;
        }
        for (offset, ray) in chunks.remainder().iter().enumerate() {
            results[base + offset] = self.query_ray(ray, max_dist, filter, stats);
        }

        for hits in &mut results {
            hits.sort_unstable_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(Ordering::Equal)
            });
        }
        results
    }

    fn query_ray_packet(
        &self,
        packet: &RayPacket,
        rays: &[Ray],
        max_dist: f32,
        filter: &QueryFilter,
        stats: &mut QueryStats,
        results: &mut [Vec<RayHit>],
        base: usize,
    ) {
        let mut stack: Vec<(u32, u32)> = alloc::vec![(0, 0xF)];
        while let Some((node_index, mask)) = stack.pop() {
            stats.nodes_visited += 1;
            let node = &self.nodes[node_index as usize];
            let mask = mask & packet.hits(&node.bounds(), max_dist);
            if mask == 0 {
                continue;
            }

            if node.is_leaf() {
                for i in 0..node.count {
                    let prim = self.prim(node.left_first + i);
                    stats.objects_tested += 1;
                    if !filter.passes(prim.id, prim.layer) {
                        continue;
                    }
                    for lane in 0..4 {
                        if mask & (1 << lane) == 0 {
                            continue;
                        }
                        let ray = &rays[lane];
                        if let Some(t) =
                            prim.bounds.ray_intersect(ray.origin, ray.direction, max_dist)
                        {
                            results[base + lane].push(RayHit::new(prim.id, t, ray.point_at(t)));
                        }
                    }
                }
            } else {
                stack.push((node.left_first + 1, mask));
                stack.push((node.left_first, mask));
            }
        }
    }
}

/// Four rays in lane form for packet traversal.
struct RayPacket {
    origin: [Vec4; 3],
    inv_dir: [Vec4; 3],
}

impl RayPacket {
    fn new(rays: &[Ray]) -> Self {
        let lane = |f: fn(&Ray) -> f32| {
            Vec4::new(f(&rays[0]), f(&rays[1]), f(&rays[2]), f(&rays[3]))
        };
        Self {
            origin: [
                lane(|r| r.origin.x),
                lane(|r| r.origin.y),
                lane(|r| r.origin.z),
            ],
            inv_dir: [
                lane(|r| r.inv_dir.x),
                lane(|r| r.inv_dir.y),
                lane(|r| r.inv_dir.z),
            ],
        }
    }

    /// 4-bit mask of lanes whose ray meets the box within `max_dist`.
    fn hits(&self, bounds: &Aabb, max_dist: f32) -> u32 {
        let mut t_near = Vec4::splat(f32::MIN);
        let mut t_far = Vec4::splat(f32::MAX);

        for axis in 0..3 {
            let t1 = (Vec4::splat(bounds.min[axis]) - self.origin[axis]) * self.inv_dir[axis];
            let t2 = (Vec4::splat(bounds.max[axis]) - self.origin[axis]) * self.inv_dir[axis];
            t_near = t_near.max(t1.min(t2));
            t_far = t_far.min(t1.max(t2));
        }

        (t_far.cmpge(t_near) & t_far.cmpge(Vec4::ZERO) & t_near.cmple(Vec4::splat(max_dist)))
            .bitmask()
    }
}

impl SpatialBackend for Bvh {
    fn insert(&mut self, id: u64, bounds: Aabb, layer: u64) {
        if let Some(&index) = self.id_to_index.get(&id) {
            let prim = &mut self.primitives[index as usize];
            prim.bounds = bounds;
            prim.centroid = bounds.center();
            prim.layer = layer;
        } else {
            self.id_to_index.insert(id, self.primitives.len() as u32);
            self.primitives.push(Primitive {
                id,
                bounds,
                centroid: bounds.center(),
                layer,
            });
            self.membership_changed = true;
        }
        self.stale = true;
    }

    fn remove(&mut self, id: u64) -> bool {
        let Some(index) = self.id_to_index.remove(&id) else {
            return false;
        };
        let last = self.primitives.len() - 1;
        // Swap-remove, keeping the id map consistent for the moved slot.
        if (index as usize) < last {
            self.primitives.swap(index as usize, last);
            let moved = self.primitives[index as usize].id;
            self.id_to_index.insert(moved, index);
        }
        self.primitives.pop();
        self.stale = true;
        self.membership_changed = true;
        true
    }

    fn update(&mut self, id: u64, bounds: Aabb) -> bool {
        let Some(&index) = self.id_to_index.get(&id) else {
            return false;
        };
        let prim = &mut self.primitives[index as usize];
        prim.bounds = bounds;
        prim.centroid = bounds.center();
        self.stale = true;
        true
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.primitives.clear();
        self.primitive_indices.clear();
        self.id_to_index.clear();
        self.stale = false;
        self.membership_changed = false;
    }

    fn needs_rebuild(&self) -> bool {
        self.stale
    }

    fn rebuild(&mut self) {
        self.build();
        self.stale = false;
        self.membership_changed = false;
        self.built_sah_cost = self.sah_cost();
    }

    fn query_aabb(&self, query: &Aabb, filter: &QueryFilter, stats: &mut QueryStats) -> Vec<u64> {
        debug_assert!(!self.stale, "query on a stale BVH; call rebuild first");
        let mut results = Vec::new();
        if !self.nodes.is_empty() {
            self.query_aabb_at(0, query, filter, stats, &mut results);
        }
        stats.objects_returned += results.len();
        results
    }

    fn query_sphere(
        &self,
        center: Vec3A,
        radius: f32,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> Vec<u64> {
        debug_assert!(!self.stale, "query on a stale BVH; call rebuild first");
        let mut results = Vec::new();
        if !self.nodes.is_empty() {
            self.query_sphere_at(0, center, radius, filter, stats, &mut results);
        }
        stats.objects_returned += results.len();
        results
    }

    fn query_frustum(
        &self,
        frustum: &Frustum,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> Vec<u64> {
        debug_assert!(!self.stale, "query on a stale BVH; call rebuild first");
        let mut results = Vec::new();
        if !self.nodes.is_empty() {
            self.query_frustum_at(0, frustum, ALL_PLANES, filter, stats, &mut results);
        }
        stats.objects_returned += results.len();
        results
    }

    fn query_ray(
        &self,
        ray: &Ray,
        max_dist: f32,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> Vec<RayHit> {
        debug_assert!(!self.stale, "query on a stale BVH; call rebuild first");
        let mut results = Vec::new();
        if !self.nodes.is_empty() {
            self.query_ray_at(0, ray, max_dist, filter, stats, &mut results);
            results.sort_unstable_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(Ordering::Equal)
            });
        }
        stats.objects_returned += results.len();
        results
    }

    fn query_nearest(
        &self,
        point: Vec3A,
        max_dist: f32,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> u64 {
        debug_assert!(!self.stale, "query on a stale BVH; call rebuild first");
        if self.nodes.is_empty() {
            return 0;
        }
        let mut best = (0_u64, max_dist * max_dist);
        self.query_nearest_at(0, point, filter, stats, &mut best);
        best.0
    }

    fn query_k_nearest(
        &self,
        point: Vec3A,
        k: usize,
        max_dist: f32,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> Vec<u64> {
        // Sphere gather then sort; the nearest-first heap descent lives in
        // the octree, which profits more from it.
        let mut ids = self.query_sphere(point, max_dist, filter, stats);
        ids.sort_unstable_by(|&a, &b| {
            let da = self.primitives[self.id_to_index[&a] as usize]
                .bounds
                .distance_squared(point);
            let db = self.primitives[self.id_to_index[&b] as usize]
                .bounds
                .distance_squared(point);
            da.partial_cmp(&db).unwrap_or(Ordering::Equal)
        });
        ids.truncate(k);
        ids
    }

    fn visit_aabb<F: FnMut(u64, &Aabb) -> bool>(
        &self,
        query: &Aabb,
        filter: &QueryFilter,
        mut visitor: F,
    ) {
        if !self.nodes.is_empty() {
            self.visit_aabb_at(0, query, filter, &mut visitor);
        }
    }

    fn visit_sphere<F: FnMut(u64, &Aabb) -> bool>(
        &self,
        center: Vec3A,
        radius: f32,
        filter: &QueryFilter,
        mut visitor: F,
    ) {
        if !self.nodes.is_empty() {
            self.visit_sphere_at(0, center, radius, filter, &mut visitor);
        }
    }

    fn len(&self) -> usize {
        self.primitives.len()
    }

    fn bounds(&self) -> Aabb {
        self.nodes.first().map_or(Aabb::INVALID, BvhNode::bounds)
    }

    fn object_bounds(&self, id: u64) -> Aabb {
        self.id_to_index
            .get(&id)
            .map_or(Aabb::INVALID, |&i| self.primitives[i as usize].bounds)
    }

    fn contains(&self, id: u64) -> bool {
        self.id_to_index.contains_key(&id)
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Bvh
    }

    fn memory_usage(&self) -> usize {
        self.nodes.capacity() * size_of::<BvhNode>()
            + self.primitives.capacity() * size_of::<Primitive>()
            + self.primitive_indices.capacity() * size_of::<u32>()
            + self.id_to_index.len() * (size_of::<u64>() + size_of::<u32>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(center: Vec3A) -> Aabb {
        Aabb::from_center_half_extents(center, Vec3A::ONE)
    }

    fn built(bounds: &[Aabb]) -> Bvh {
        let mut bvh = Bvh::new(BvhConfig::default());
        for (i, b) in bounds.iter().enumerate() {
            bvh.insert(i as u64 + 1, *b, 0);
        }
        bvh.rebuild();
        bvh
    }

    fn grid_scene(n: usize) -> Vec<Aabb> {
        let mut out = Vec::new();
        for x in 0..n {
            for y in 0..n {
                for z in 0..n {
                    out.push(unit_box(Vec3A::new(
                        x as f32 * 5.0,
                        y as f32 * 5.0,
                        z as f32 * 5.0,
                    )));
                }
            }
        }
        out
    }

    #[test]
    fn node_record_is_32_bytes() {
        assert_eq!(size_of::<BvhNode>(), 32);
        assert_eq!(align_of::<BvhNode>(), 32);
    }

    #[test]
    fn build_produces_valid_partition() {
        let bvh = built(&grid_scene(4));
        let report = bvh.validate();
        assert!(report.is_valid(), "{report:?}");
        assert!(report.node_count <= 2 * 64, "at most 2n - 1 nodes");
        assert!(bvh.sah_cost() > 0.0);
        assert!(bvh.sah_cost().is_finite());
    }

    #[test]
    fn query_matches_brute_force() {
        let scene = grid_scene(4);
        let bvh = built(&scene);
        let query = Aabb::from_center_half_extents(Vec3A::splat(7.0), Vec3A::splat(4.0));

        let mut stats = QueryStats::default();
        let mut hits = bvh.query_aabb(&query, &QueryFilter::ALL, &mut stats);
        hits.sort_unstable();

        let mut expected: Vec<u64> = scene
            .iter()
            .enumerate()
            .filter(|(_, b)| b.intersects(&query))
            .map(|(i, _)| i as u64 + 1)
            .collect();
        expected.sort_unstable();

        assert_eq!(hits, expected);
        assert!(stats.objects_tested < scene.len(), "tree must cull leaves");
    }

    #[test]
    fn ray_hits_sorted_nearest_first() {
        let bvh = built(&[
            unit_box(Vec3A::new(5.0, 0.0, 0.0)),
            unit_box(Vec3A::new(15.0, 0.0, 0.0)),
            unit_box(Vec3A::new(30.0, 0.0, 0.0)),
        ]);
        let ray = Ray::new(Vec3A::ZERO, Vec3A::X);
        let mut stats = QueryStats::default();
        let hits = bvh.query_ray(&ray, 100.0, &QueryFilter::ALL, &mut stats);
        let ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, alloc::vec![1, 2, 3]);
        assert!((hits[0].distance - 4.0).abs() < 1e-5);
    }

    #[test]
    fn refit_tightens_after_moves() {
        let mut bvh = built(&grid_scene(3));
        // Move one primitive without rebuilding topology.
        assert!(bvh.update(1, unit_box(Vec3A::new(-20.0, 0.0, 0.0))));
        bvh.refit();
        assert!(!bvh.needs_rebuild(), "refit repaired a bounds-only change");

        let report = bvh.validate();
        assert!(report.is_valid(), "{report:?}");
        let mut stats = QueryStats::default();
        let hits = bvh.query_sphere(Vec3A::new(-20.0, 0.0, 0.0), 2.0, &QueryFilter::ALL, &mut stats);
        assert_eq!(hits, alloc::vec![1]);
    }

    #[test]
    fn refit_after_removal_falls_back_to_rebuild() {
        let mut bvh = built(&grid_scene(3));
        assert!(bvh.remove(5));
        bvh.refit();
        assert!(!bvh.needs_rebuild());
        assert!(bvh.validate().is_valid());
        assert_eq!(bvh.len(), 26);
    }

    #[test]
    fn quality_degrades_when_primitives_scatter() {
        let mut bvh = built(&grid_scene(3));
        assert!(!bvh.quality_degraded(1.5), "fresh build is the baseline");

        // Stretch the scene far beyond the built layout and refit.
        for i in 0..27_u64 {
            let spread = if i % 2 == 0 { 400.0 } else { -400.0 };
            assert!(bvh.update(i + 1, unit_box(Vec3A::new(spread + i as f32, 0.0, 0.0))));
        }
        bvh.refit();
        assert!(bvh.quality_degraded(1.5), "scattered refit must trip the heuristic");
    }

    #[test]
    fn lazy_rebuild_through_wrapper_semantics() {
        let mut bvh = Bvh::new(BvhConfig::default());
        bvh.insert(1, unit_box(Vec3A::ZERO), 0);
        assert!(bvh.needs_rebuild());
        bvh.rebuild();
        assert!(!bvh.needs_rebuild());

        assert!(bvh.remove(1));
        assert!(bvh.needs_rebuild());
        bvh.rebuild();
        assert_eq!(bvh.node_count(), 0);
    }

    #[test]
    fn swap_remove_keeps_id_map_consistent() {
        let mut bvh = built(&grid_scene(2));
        assert!(bvh.remove(1));
        assert!(!bvh.remove(1));
        bvh.rebuild();
        assert!(bvh.validate().is_valid());
        assert!(!bvh.contains(1));
        assert!(bvh.contains(8));
        assert!(bvh.object_bounds(8).is_valid());
    }

    #[test]
    fn degenerate_centroids_become_leaf() {
        // All centroids identical: no split can improve, must not recurse
        // forever.
        let bounds: Vec<Aabb> = (0..16).map(|_| unit_box(Vec3A::ZERO)).collect();
        let bvh = built(&bounds);
        assert!(bvh.validate().is_valid());
        let mut stats = QueryStats::default();
        let hits = bvh.query_aabb(&unit_box(Vec3A::ZERO), &QueryFilter::ALL, &mut stats);
        assert_eq!(hits.len(), 16);
    }

    #[test]
    fn full_sweep_agrees_with_binned() {
        let scene = grid_scene(3);
        let binned = built(&scene);

        let mut full = Bvh::new(BvhConfig {
            use_binned_sah: false,
            ..BvhConfig::default()
        });
        for (i, b) in scene.iter().enumerate() {
            full.insert(i as u64 + 1, *b, 0);
        }
        full.rebuild();
        assert!(full.validate().is_valid());

        let query = Aabb::from_center_half_extents(Vec3A::splat(5.0), Vec3A::splat(3.0));
        let mut stats = QueryStats::default();
        let mut a = binned.query_aabb(&query, &QueryFilter::ALL, &mut stats);
        let mut b = full.query_aabb(&query, &QueryFilter::ALL, &mut stats);
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
    }

    #[test]
    fn ray_batch_matches_scalar() {
        let bvh = built(&grid_scene(3));
        let rays: Vec<Ray> = (0..6)
            .map(|i| {
                Ray::new(
                    Vec3A::new(-5.0, i as f32 * 5.0, 0.0),
                    Vec3A::new(1.0, 0.1 * i as f32, 0.05),
                )
            })
            .collect();

        let mut stats = QueryStats::default();
        let batch = bvh.query_ray_batch(&rays, 200.0, &QueryFilter::ALL, &mut stats);
        assert_eq!(batch.len(), rays.len());

        for (ray, hits) in rays.iter().zip(&batch) {
            let scalar = bvh.query_ray(ray, 200.0, &QueryFilter::ALL, &mut stats);
            let batch_ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
            let scalar_ids: Vec<u64> = scalar.iter().map(|h| h.id).collect();
            assert_eq!(batch_ids, scalar_ids);
        }
    }

    #[test]
    fn nearest_and_k_nearest_agree() {
        let bvh = built(&grid_scene(3));
        let point = Vec3A::new(1.0, 1.0, 1.0);
        let mut stats = QueryStats::default();

        let nearest = bvh.query_nearest(point, 100.0, &QueryFilter::ALL, &mut stats);
        let k = bvh.query_k_nearest(point, 3, 100.0, &QueryFilter::ALL, &mut stats);
        assert_eq!(k.first().copied(), Some(nearest));
        assert_eq!(k.len(), 3);
    }
}
