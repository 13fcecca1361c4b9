// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Octree and loose-octree backend with pool-allocated nodes.

use alloc::vec::Vec;
use core::cmp::Ordering;

use glam::Vec3A;
use hashbrown::HashMap;
use overstory_geom::{ALL_PLANES, Aabb, Frustum, Ray, RayHit};
use smallvec::SmallVec;

use crate::backend::SpatialBackend;
use crate::types::{IndexKind, QueryFilter, QueryStats};
use crate::validate::OctreeReport;

/// Sentinel for an absent node link.
const NIL: u32 = u32::MAX;

/// Nodes added to the pool per growth step. Keeps sibling groups in a
/// compact address range.
const POOL_BLOCK: usize = 64;

/// Tuning for [`Octree`].
#[derive(Copy, Clone, Debug)]
pub struct OctreeConfig {
    /// Maximum tree depth; leaves at this depth never split.
    pub max_depth: u8,
    /// A leaf splits when its population exceeds this.
    pub max_objects_per_node: usize,
    /// An internal node collapses when its subtree population drops to this.
    pub min_objects_to_merge: usize,
    /// Node bounds scale about their centers; 1.0 is a tight octree, 2.0 the
    /// typical loose octree.
    pub loose_factor: f32,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 8,
            max_objects_per_node: 16,
            min_objects_to_merge: 4,
            loose_factor: 1.0,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct ObjectEntry {
    id: u64,
    bounds: Aabb,
    layer: u64,
}

#[derive(Clone, Debug)]
struct Node {
    bounds: Aabb,
    loose_bounds: Aabb,
    children: [u32; 8],
    objects: SmallVec<[ObjectEntry; 4]>,
    parent: u32,
    depth: u8,
    is_leaf: bool,
}

impl Node {
    fn empty() -> Self {
        Self {
            bounds: Aabb::INVALID,
            loose_bounds: Aabb::INVALID,
            children: [NIL; 8],
            objects: SmallVec::new(),
            parent: NIL,
            depth: 0,
            is_leaf: true,
        }
    }

    fn reset(&mut self) {
        self.bounds = Aabb::INVALID;
        self.loose_bounds = Aabb::INVALID;
        self.children = [NIL; 8];
        self.objects.clear();
        self.parent = NIL;
        self.depth = 0;
        self.is_leaf = true;
    }
}

/// Block-growing node pool with an intrusive free list.
///
/// Allocation is amortized O(1) and freshly split sibling groups land in a
/// contiguous index range.
#[derive(Debug, Default)]
struct NodePool {
    nodes: Vec<Node>,
    free: Vec<u32>,
}

impl NodePool {
    fn alloc(&mut self) -> u32 {
        if self.free.is_empty() {
            let start = self.nodes.len();
            self.nodes.extend((0..POOL_BLOCK).map(|_| Node::empty()));
            // Reversed so blocks are handed out in ascending index order.
            self.free.extend((start..start + POOL_BLOCK).rev().map(|i| i as u32));
        }
        let idx = self.free.pop().expect("free list refilled above");
        self.nodes[idx as usize].reset();
        idx
    }

    fn dealloc(&mut self, idx: u32) {
        self.nodes[idx as usize].reset();
        self.free.push(idx);
    }

    fn allocated(&self) -> usize {
        self.nodes.len() - self.free.len()
    }
}

/// Hierarchical 8-ary spatial partition.
///
/// Construction is lazy: objects descend to the deepest child whose (loose)
/// bounds contain them, leaves split past `max_objects_per_node`, and sparse
/// subtrees collapse back into their parent. With `loose_factor > 1` each
/// node also keeps bounds scaled about its center, so an object that moves
/// less than `(loose_factor - 1) * half_extent` stays put.
///
/// Objects that do not fit inside the world bounds are held at the root.
#[derive(Debug)]
pub struct Octree {
    config: OctreeConfig,
    world_bounds: Aabb,
    pool: NodePool,
    root: u32,
    objects: HashMap<u64, (Aabb, u64)>,
}

impl Octree {
    /// Create an octree over the given world bounds.
    pub fn new(world_bounds: Aabb, config: OctreeConfig) -> Self {
        let mut pool = NodePool::default();
        let root = pool.alloc();
        let mut tree = Self {
            config,
            world_bounds,
            pool,
            root,
            objects: HashMap::new(),
        };
        tree.init_root();
        tree
    }

    fn init_root(&mut self) {
        let loose = self.loose_bounds_for(&self.world_bounds);
        let root = &mut self.pool.nodes[self.root as usize];
        root.bounds = self.world_bounds;
        root.loose_bounds = loose;
    }

    /// Loose-scaled copy of `bounds`; identity for a tight octree.
    fn loose_bounds_for(&self, bounds: &Aabb) -> Aabb {
        if self.config.loose_factor <= 1.0 {
            return *bounds;
        }
        Aabb::from_center_half_extents(
            bounds.center(),
            bounds.half_extents() * self.config.loose_factor,
        )
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.pool.allocated()
    }

    /// `(min, max)` leaf depth.
    pub fn depth_stats(&self) -> (u8, u8) {
        let mut min = u8::MAX;
        let mut max = 0;
        self.depth_stats_at(self.root, &mut min, &mut max);
        (min.min(max), max)
    }

    fn depth_stats_at(&self, node: u32, min: &mut u8, max: &mut u8) {
        let n = &self.pool.nodes[node as usize];
        if n.is_leaf {
            *min = (*min).min(n.depth);
            *max = (*max).max(n.depth);
        } else {
            for &child in &n.children {
                if child != NIL {
                    self.depth_stats_at(child, min, max);
                }
            }
        }
    }

    /// Structural invariant check: every stored object inside its node's
    /// loose bounds (the root is exempt as the overflow bucket), every leaf
    /// within capacity or at max depth.
    pub fn validate(&self) -> OctreeReport {
        let mut report = OctreeReport {
            object_count: self.objects.len(),
            node_count: self.node_count(),
            max_depth: self.depth_stats().1,
            loose_containment_violations: Vec::new(),
            overfull_leaves: Vec::new(),
        };
        self.validate_at(self.root, &mut report);
        report
    }

    fn validate_at(&self, node: u32, report: &mut OctreeReport) {
        let n = &self.pool.nodes[node as usize];
        if node != self.root {
            for entry in &n.objects {
                if !n.loose_bounds.contains_aabb(&entry.bounds) {
                    report.loose_containment_violations.push(entry.id);
                }
            }
        }
        if n.is_leaf {
            if n.objects.len() > self.config.max_objects_per_node && n.depth < self.config.max_depth
            {
                report.overfull_leaves.push(node as usize);
            }
        } else {
            for &child in &n.children {
                if child != NIL {
                    self.validate_at(child, report);
                }
            }
        }
    }

    /// Index of the child octant containing `point`.
    fn octant(center: Vec3A, point: Vec3A) -> usize {
        let mut index = 0;
        if point.x >= center.x {
            index |= 1;
        }
        if point.y >= center.y {
            index |= 2;
        }
        if point.z >= center.z {
            index |= 4;
        }
        index
    }

    fn insert_at(&mut self, node_idx: u32, entry: ObjectEntry) {
        let (is_leaf, center) = {
            let n = &self.pool.nodes[node_idx as usize];
            (n.is_leaf, n.bounds.center())
        };

        if is_leaf {
            let (len, depth) = {
                let n = &mut self.pool.nodes[node_idx as usize];
                n.objects.push(entry);
                (n.objects.len(), n.depth)
            };
            if len > self.config.max_objects_per_node && depth < self.config.max_depth {
                self.split(node_idx);
            }
            return;
        }

        // Descend only when the target octant's loose bounds contain the
        // object; spanning objects stay at this node.
        let child = self.pool.nodes[node_idx as usize].children[Self::octant(center, entry.bounds.center())];
        let fits = child != NIL
            && self.pool.nodes[child as usize]
                .loose_bounds
                .contains_aabb(&entry.bounds);
        if fits {
            self.insert_at(child, entry);
        } else {
            self.pool.nodes[node_idx as usize].objects.push(entry);
        }
    }

    fn split(&mut self, node_idx: u32) {
        let (center, half, depth) = {
            let n = &self.pool.nodes[node_idx as usize];
            (n.bounds.center(), n.bounds.half_extents() * 0.5, n.depth)
        };

        let mut children = [NIL; 8];
        for (i, slot) in children.iter_mut().enumerate() {
            let offset = Vec3A::new(
                if i & 1 != 0 { half.x } else { -half.x },
                if i & 2 != 0 { half.y } else { -half.y },
                if i & 4 != 0 { half.z } else { -half.z },
            );
            let bounds = Aabb::from_center_half_extents(center + offset, half);
            let loose = self.loose_bounds_for(&bounds);

            let child = self.pool.alloc();
            let c = &mut self.pool.nodes[child as usize];
            c.bounds = bounds;
            c.loose_bounds = loose;
            c.parent = node_idx;
            c.depth = depth + 1;
            *slot = child;
        }

        let entries = {
            let n = &mut self.pool.nodes[node_idx as usize];
            n.is_leaf = false;
            n.children = children;
            core::mem::take(&mut n.objects)
        };
        for entry in entries {
            self.insert_at(node_idx, entry);
        }
    }

    /// Remove `id` from the subtree; returns the node it was removed from.
    fn remove_at(&mut self, node_idx: u32, id: u64, bounds: &Aabb) -> Option<u32> {
        {
            let n = &mut self.pool.nodes[node_idx as usize];
            if let Some(pos) = n.objects.iter().position(|e| e.id == id) {
                n.objects.remove(pos);
                return Some(node_idx);
            }
        }

        let (is_leaf, center, children) = {
            let n = &self.pool.nodes[node_idx as usize];
            (n.is_leaf, n.bounds.center(), n.children)
        };
        if is_leaf {
            return None;
        }

        // Try the octant the object's center maps to, then fall back to any
        // child whose loose bounds meet it.
        let primary = children[Self::octant(center, bounds.center())];
        if primary != NIL
            && let Some(found) = self.remove_at(primary, id, bounds)
        {
            return Some(found);
        }
        for &child in &children {
            if child == NIL || child == primary {
                continue;
            }
            if self.pool.nodes[child as usize].loose_bounds.intersects(bounds)
                && let Some(found) = self.remove_at(child, id, bounds)
            {
                return Some(found);
            }
        }
        None
    }

    fn subtree_population(&self, node_idx: u32) -> usize {
        let n = &self.pool.nodes[node_idx as usize];
        let mut count = n.objects.len();
        for &child in &n.children {
            if child != NIL {
                count += self.subtree_population(child);
            }
        }
        count
    }

    fn collect_subtree(&self, node_idx: u32, out: &mut Vec<ObjectEntry>) {
        let n = &self.pool.nodes[node_idx as usize];
        out.extend(n.objects.iter().copied());
        for &child in &n.children {
            if child != NIL {
                self.collect_subtree(child, out);
            }
        }
    }

    fn free_subtree(&mut self, node_idx: u32) {
        let children = self.pool.nodes[node_idx as usize].children;
        for child in children {
            if child != NIL {
                self.free_subtree(child);
                self.pool.dealloc(child);
            }
        }
        self.pool.nodes[node_idx as usize].children = [NIL; 8];
    }

    /// Collapse the subtree into `node_idx` when its population has dropped
    /// to the merge threshold.
    fn try_merge(&mut self, node_idx: u32) {
        if node_idx == NIL || self.pool.nodes[node_idx as usize].is_leaf {
            return;
        }
        if self.subtree_population(node_idx) > self.config.min_objects_to_merge {
            return;
        }

        let mut collected = Vec::new();
        self.collect_subtree(node_idx, &mut collected);
        self.free_subtree(node_idx);

        let n = &mut self.pool.nodes[node_idx as usize];
        n.is_leaf = true;
        n.objects = collected.into_iter().collect();
    }

    fn query_aabb_at(
        &self,
        node_idx: u32,
        query: &Aabb,
        filter: &QueryFilter,
        stats: &mut QueryStats,
        results: &mut Vec<u64>,
    ) {
        stats.nodes_visited += 1;
        let n = &self.pool.nodes[node_idx as usize];
        if !n.loose_bounds.intersects(query) {
            return;
        }

        for entry in &n.objects {
            stats.objects_tested += 1;
            if filter.passes(entry.id, entry.layer) && entry.bounds.intersects(query) {
                results.push(entry.id);
            }
        }

        if !n.is_leaf {
            for &child in &n.children {
                if child != NIL {
                    self.query_aabb_at(child, query, filter, stats, results);
                }
            }
        }
    }

    fn query_sphere_at(
        &self,
        node_idx: u32,
        center: Vec3A,
        radius: f32,
        broad: &Aabb,
        filter: &QueryFilter,
        stats: &mut QueryStats,
        results: &mut Vec<u64>,
    ) {
        stats.nodes_visited += 1;
        let n = &self.pool.nodes[node_idx as usize];
        if !n.loose_bounds.intersects(broad) {
            return;
        }

        for entry in &n.objects {
            stats.objects_tested += 1;
            if filter.passes(entry.id, entry.layer)
                && entry.bounds.intersects_sphere(center, radius)
            {
                results.push(entry.id);
            }
        }

        if !n.is_leaf {
            for &child in &n.children {
                if child != NIL {
                    self.query_sphere_at(child, center, radius, broad, filter, stats, results);
                }
            }
        }
    }

    fn query_frustum_at(
        &self,
        node_idx: u32,
        frustum: &Frustum,
        plane_mask: u8,
        filter: &QueryFilter,
        stats: &mut QueryStats,
        results: &mut Vec<u64>,
    ) {
        stats.nodes_visited += 1;
        let n = &self.pool.nodes[node_idx as usize];

        let mut child_mask = plane_mask;
        if !frustum.test_aabb_masked(&n.loose_bounds, &mut child_mask) {
            return;
        }

        for entry in &n.objects {
            stats.objects_tested += 1;
            if filter.passes(entry.id, entry.layer) && frustum.is_aabb_visible(&entry.bounds) {
                results.push(entry.id);
            }
        }

        if !n.is_leaf {
            for &child in &n.children {
                if child != NIL {
                    self.query_frustum_at(child, frustum, child_mask, filter, stats, results);
                }
            }
        }
    }

    fn query_ray_at(
        &self,
        node_idx: u32,
        ray: &Ray,
        max_dist: f32,
        filter: &QueryFilter,
        stats: &mut QueryStats,
        results: &mut Vec<RayHit>,
    ) {
        stats.nodes_visited += 1;
        let n = &self.pool.nodes[node_idx as usize];

        let Some((t_min, _)) = n.loose_bounds.ray_slab(ray.origin, ray.inv_dir) else {
            return;
        };
        if t_min > max_dist {
            return;
        }

        for entry in &n.objects {
            stats.objects_tested += 1;
            if !filter.passes(entry.id, entry.layer) {
                continue;
            }
            if let Some(t) = entry.bounds.ray_intersect(ray.origin, ray.direction, max_dist) {
                results.push(RayHit::new(entry.id, t, ray.point_at(t)));
            }
        }

        if !n.is_leaf {
            // Descend nearer children first so deep hits prune later slabs.
            let mut order: SmallVec<[(f32, u32); 8]> = SmallVec::new();
            for &child in &n.children {
                if child == NIL {
                    continue;
                }
                if let Some((t, _)) = self.pool.nodes[child as usize]
                    .loose_bounds
                    .ray_slab(ray.origin, ray.inv_dir)
                    && t <= max_dist
                {
                    order.push((t, child));
                }
            }
            order.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
            for (_, child) in order {
                self.query_ray_at(child, ray, max_dist, filter, stats, results);
            }
        }
    }

    fn query_nearest_at(
        &self,
        node_idx: u32,
        point: Vec3A,
        filter: &QueryFilter,
        stats: &mut QueryStats,
        best: &mut (u64, f32),
    ) {
        let n = &self.pool.nodes[node_idx as usize];
        if n.loose_bounds.distance_squared(point) > best.1 {
            return;
        }
        stats.nodes_visited += 1;

        for entry in &n.objects {
            if !filter.passes(entry.id, entry.layer) {
                continue;
            }
            stats.objects_tested += 1;
            let dist2 = entry.bounds.distance_squared(point);
            if dist2 < best.1 {
                *best = (entry.id, dist2);
            }
        }

        if !n.is_leaf {
            // Closer children first tightens the pruning radius sooner.
            let mut order: SmallVec<[(f32, u32); 8]> = SmallVec::new();
            for &child in &n.children {
                if child != NIL {
                    let d2 = self.pool.nodes[child as usize]
                        .loose_bounds
                        .distance_squared(point);
                    order.push((d2, child));
                }
            }
            order.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
            for (_, child) in order {
                self.query_nearest_at(child, point, filter, stats, best);
            }
        }
    }

    fn query_k_nearest_at(
        &self,
        node_idx: u32,
        point: Vec3A,
        k: usize,
        filter: &QueryFilter,
        stats: &mut QueryStats,
        heap: &mut alloc::collections::BinaryHeap<HeapEntry>,
        search_radius2: &mut f32,
    ) {
        let n = &self.pool.nodes[node_idx as usize];
        if n.loose_bounds.distance_squared(point) > *search_radius2 {
            return;
        }
        stats.nodes_visited += 1;

        for entry in &n.objects {
            if !filter.passes(entry.id, entry.layer) {
                continue;
            }
            stats.objects_tested += 1;
            let dist2 = entry.bounds.distance_squared(point);
            if dist2 < *search_radius2 {
                heap.push(HeapEntry {
                    dist2,
                    id: entry.id,
                });
                if heap.len() > k {
                    heap.pop();
                    // Heap is full; shrink the radius to the current k-th.
                    *search_radius2 = heap.peek().expect("heap non-empty").dist2;
                }
            }
        }

        if !n.is_leaf {
            for &child in &n.children {
                if child != NIL {
                    self.query_k_nearest_at(child, point, k, filter, stats, heap, search_radius2);
                }
            }
        }
    }

    fn visit_aabb_at<F: FnMut(u64, &Aabb) -> bool>(
        &self,
        node_idx: u32,
        query: &Aabb,
        filter: &QueryFilter,
        visitor: &mut F,
    ) -> bool {
        let n = &self.pool.nodes[node_idx as usize];
        if !n.loose_bounds.intersects(query) {
            return true;
        }

        for entry in &n.objects {
            if filter.passes(entry.id, entry.layer)
                && entry.bounds.intersects(query)
                && !visitor(entry.id, &entry.bounds)
            {
                return false;
            }
        }

        if !n.is_leaf {
            for &child in &n.children {
                if child != NIL && !self.visit_aabb_at(child, query, filter, visitor) {
                    return false;
                }
            }
        }
        true
    }

    fn visit_sphere_at<F: FnMut(u64, &Aabb) -> bool>(
        &self,
        node_idx: u32,
        center: Vec3A,
        radius: f32,
        broad: &Aabb,
        filter: &QueryFilter,
        visitor: &mut F,
    ) -> bool {
        let n = &self.pool.nodes[node_idx as usize];
        if !n.loose_bounds.intersects(broad) {
            return true;
        }

        for entry in &n.objects {
            if filter.passes(entry.id, entry.layer)
                && entry.bounds.intersects_sphere(center, radius)
                && !visitor(entry.id, &entry.bounds)
            {
                return false;
            }
        }

        if !n.is_leaf {
            for &child in &n.children {
                if child != NIL
                    && !self.visit_sphere_at(child, center, radius, broad, filter, visitor)
                {
                    return false;
                }
            }
        }
        true
    }
}

struct HeapEntry {
    dist2: f32,
    id: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.dist2 == other.dist2 && self.id == other.id
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist2
            .partial_cmp(&other.dist2)
            .unwrap_or(Ordering::Equal)
    }
}

impl SpatialBackend for Octree {
    fn insert(&mut self, id: u64, bounds: Aabb, layer: u64) {
        if self.objects.contains_key(&id) {
            self.update(id, bounds);
            return;
        }
        self.insert_at(
            self.root,
            ObjectEntry {
                id,
                bounds,
                layer,
            },
        );
        self.objects.insert(id, (bounds, layer));
    }

    fn remove(&mut self, id: u64) -> bool {
        let Some((bounds, _)) = self.objects.remove(&id) else {
            return false;
        };
        if let Some(found) = self.remove_at(self.root, id, &bounds) {
            // Merging collapses children into their parent, so start there
            // for leaves; an internal holder merges in place.
            let target = if self.pool.nodes[found as usize].is_leaf {
                self.pool.nodes[found as usize].parent
            } else {
                found
            };
            if target != NIL {
                self.try_merge(target);
            }
        }
        true
    }

    fn update(&mut self, id: u64, bounds: Aabb) -> bool {
        let Some(&(old_bounds, layer)) = self.objects.get(&id) else {
            return false;
        };
        self.remove_at(self.root, id, &old_bounds);
        self.insert_at(
            self.root,
            ObjectEntry {
                id,
                bounds,
                layer,
            },
        );
        self.objects.insert(id, (bounds, layer));
        true
    }

    fn clear(&mut self) {
        self.free_subtree(self.root);
        let root = &mut self.pool.nodes[self.root as usize];
        root.objects.clear();
        root.is_leaf = true;
        self.objects.clear();
    }

    fn rebuild(&mut self) {
        let entries: Vec<(u64, Aabb, u64)> = self
            .objects
            .iter()
            .map(|(&id, &(bounds, layer))| (id, bounds, layer))
            .collect();
        self.free_subtree(self.root);
        {
            let root = &mut self.pool.nodes[self.root as usize];
            root.objects.clear();
            root.is_leaf = true;
        }
        for (id, bounds, layer) in entries {
            self.insert_at(
                self.root,
                ObjectEntry {
                    id,
                    bounds,
                    layer,
                },
            );
        }
    }

    fn query_aabb(&self, query: &Aabb, filter: &QueryFilter, stats: &mut QueryStats) -> Vec<u64> {
        let mut results = Vec::new();
        self.query_aabb_at(self.root, query, filter, stats, &mut results);
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
        let broad = Aabb::from_center_half_extents(center, Vec3A::splat(radius));
        let mut results = Vec::new();
        self.query_sphere_at(self.root, center, radius, &broad, filter, stats, &mut results);
        stats.objects_returned += results.len();
        results
    }

    fn query_frustum(
        &self,
        frustum: &Frustum,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> Vec<u64> {
        let mut results = Vec::new();
        self.query_frustum_at(self.root, frustum, ALL_PLANES, filter, stats, &mut results);
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
        let mut results = Vec::new();
        self.query_ray_at(self.root, ray, max_dist, filter, stats, &mut results);
        results.sort_unstable_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
        });
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
        let mut best = (0_u64, max_dist * max_dist);
        self.query_nearest_at(self.root, point, filter, stats, &mut best);
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
        if k == 0 {
            return Vec::new();
        }
        let mut heap = alloc::collections::BinaryHeap::new();
        let mut search_radius2 = max_dist * max_dist;
        self.query_k_nearest_at(self.root, point, k, filter, stats, &mut heap, &mut search_radius2);

        let sorted = heap.into_sorted_vec();
        stats.objects_returned += sorted.len();
        sorted.into_iter().map(|e| e.id).collect()
    }

    fn visit_aabb<F: FnMut(u64, &Aabb) -> bool>(
        &self,
        query: &Aabb,
        filter: &QueryFilter,
        mut visitor: F,
    ) {
        self.visit_aabb_at(self.root, query, filter, &mut visitor);
    }

    fn visit_sphere<F: FnMut(u64, &Aabb) -> bool>(
        &self,
        center: Vec3A,
        radius: f32,
        filter: &QueryFilter,
        mut visitor: F,
    ) {
        let broad = Aabb::from_center_half_extents(center, Vec3A::splat(radius));
        self.visit_sphere_at(self.root, center, radius, &broad, filter, &mut visitor);
    }

    fn len(&self) -> usize {
        self.objects.len()
    }

    fn bounds(&self) -> Aabb {
        self.world_bounds
    }

    fn object_bounds(&self, id: u64) -> Aabb {
        self.objects.get(&id).map_or(Aabb::INVALID, |&(b, _)| b)
    }

    fn contains(&self, id: u64) -> bool {
        self.objects.contains_key(&id)
    }

    fn kind(&self) -> IndexKind {
        if self.config.loose_factor > 1.0 {
            IndexKind::LooseOctree
        } else {
            IndexKind::Octree
        }
    }

    fn supports_moving_objects(&self) -> bool {
        self.config.loose_factor > 1.0
    }

    fn memory_usage(&self) -> usize {
        self.pool.nodes.capacity() * size_of::<Node>()
            + self.pool.free.capacity() * size_of::<u32>()
            + self.objects.len() * (size_of::<u64>() + size_of::<(Aabb, u64)>())
    }
}
