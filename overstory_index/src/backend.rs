// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The capability contract every spatial index satisfies, and the tagged
//! [`SpatialIndex`] that routes to a chosen backend without virtual dispatch.

use alloc::vec::Vec;

use glam::Vec3A;
use overstory_geom::{Aabb, Frustum, Ray, RayHit};

use crate::backends::bvh::{Bvh, BvhConfig};
use crate::backends::hash_grid::{HashGrid, HashGridConfig};
use crate::backends::octree::{Octree, OctreeConfig};
use crate::types::{IndexKind, QueryFilter, QueryStats};

/// Operations every spatial index backend provides.
///
/// Mutations take `&mut self`. Query methods take `&self` so many readers can
/// query one index concurrently behind a shared lock; they require the
/// structure to be current: check [`SpatialBackend::needs_rebuild`] and call
/// [`SpatialBackend::rebuild`] (under exclusive access) first. The
/// [`SpatialIndex`] wrapper does this automatically in its `&mut` query
/// methods.
///
/// Visitor methods are generic over the callback so leaf iteration inlines;
/// the callback returns `false` to stop the traversal early. The visitor form
/// allocates nothing and is the hot-path API.
pub trait SpatialBackend {
    /// Insert an object. A duplicate id is treated as an update.
    fn insert(&mut self, id: u64, bounds: Aabb, layer: u64);

    /// Remove an object. Returns `true` when the id existed.
    fn remove(&mut self, id: u64) -> bool;

    /// Replace an object's bounds. Returns `false` for an unknown id.
    fn update(&mut self, id: u64, bounds: Aabb) -> bool;

    /// Remove every object.
    fn clear(&mut self);

    /// Whether the structure is stale and needs [`SpatialBackend::rebuild`]
    /// before querying.
    fn needs_rebuild(&self) -> bool {
        false
    }

    /// Reconstruct the index structure from the current object set.
    fn rebuild(&mut self) {}

    /// Ids of objects whose bounds intersect the query box.
    fn query_aabb(&self, query: &Aabb, filter: &QueryFilter, stats: &mut QueryStats) -> Vec<u64>;

    /// Ids of objects whose bounds intersect the sphere.
    fn query_sphere(
        &self,
        center: Vec3A,
        radius: f32,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> Vec<u64>;

    /// Ids of objects not culled by the frustum.
    fn query_frustum(
        &self,
        frustum: &Frustum,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> Vec<u64>;

    /// Hits along the ray, sorted by distance.
    fn query_ray(
        &self,
        ray: &Ray,
        max_dist: f32,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> Vec<RayHit>;

    /// Id of the nearest object within `max_dist`, or 0 when none.
    fn query_nearest(
        &self,
        point: Vec3A,
        max_dist: f32,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> u64;

    /// Up to `k` ids within `max_dist`, nearest first.
    fn query_k_nearest(
        &self,
        point: Vec3A,
        k: usize,
        max_dist: f32,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> Vec<u64>;

    /// Visit objects intersecting the box; stop when the visitor returns
    /// `false`.
    fn visit_aabb<F: FnMut(u64, &Aabb) -> bool>(
        &self,
        query: &Aabb,
        filter: &QueryFilter,
        visitor: F,
    );

    /// Visit objects intersecting the sphere; stop when the visitor returns
    /// `false`.
    fn visit_sphere<F: FnMut(u64, &Aabb) -> bool>(
        &self,
        center: Vec3A,
        radius: f32,
        filter: &QueryFilter,
        visitor: F,
    );

    /// Number of objects in the index.
    fn len(&self) -> usize;

    /// Whether the index holds no objects.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overall bounds of the indexed objects (or the world, for bounded
    /// structures).
    fn bounds(&self) -> Aabb;

    /// Bounds of one object, or [`Aabb::INVALID`] for an unknown id.
    fn object_bounds(&self, id: u64) -> Aabb;

    /// Whether the id is present.
    fn contains(&self, id: u64) -> bool;

    /// Which structure this is.
    fn kind(&self) -> IndexKind;

    /// Whether the structure tolerates frequent movement without degrading.
    fn supports_moving_objects(&self) -> bool {
        false
    }

    /// Approximate heap usage in bytes.
    fn memory_usage(&self) -> usize;
}

#[derive(Debug)]
enum Backend {
    HashGrid(HashGrid),
    Octree(Octree),
    Bvh(Bvh),
}

macro_rules! dispatch {
    ($backend:expr, $b:ident => $body:expr) => {
        match $backend {
            Backend::HashGrid($b) => $body,
            Backend::Octree($b) => $body,
            Backend::Bvh($b) => $body,
        }
    };
}

/// A spatial index with a runtime-chosen backend.
///
/// This is a tagged union over [`HashGrid`], [`Octree`], and [`Bvh`]: query
/// routing is a single `match`, and the per-object visitor loops inside each
/// backend stay monomorphic. The `&mut self` query methods bring a stale
/// structure current first (the BVH rebuilds lazily after mutations) and
/// record [`QueryStats`] readable via [`SpatialIndex::last_query_stats`]; the
/// `*_with` methods are the `&self` forms for callers that manage rebuilds
/// and stats themselves (like a facade holding the index behind a shared
/// lock).
#[derive(Debug)]
pub struct SpatialIndex {
    backend: Backend,
    last_stats: QueryStats,
}

impl SpatialIndex {
    /// Create a hash-grid index.
    pub fn hash_grid(config: HashGridConfig) -> Self {
        Self::wrap(Backend::HashGrid(HashGrid::new(config)))
    }

    /// Create an octree index over the given world bounds.
    pub fn octree(world_bounds: Aabb, config: OctreeConfig) -> Self {
        Self::wrap(Backend::Octree(Octree::new(world_bounds, config)))
    }

    /// Create a loose octree: node bounds scaled by `loose_factor` about
    /// their centers.
    pub fn loose_octree(world_bounds: Aabb, loose_factor: f32) -> Self {
        let config = OctreeConfig {
            loose_factor,
            ..OctreeConfig::default()
        };
        Self::octree(world_bounds, config)
    }

    /// Create a BVH index.
    pub fn bvh(config: BvhConfig) -> Self {
        Self::wrap(Backend::Bvh(Bvh::new(config)))
    }

    /// Create an index of the requested kind with default per-kind tuning.
    ///
    /// `world_bounds` seeds the octrees; `cell_size` seeds the hash grid.
    pub fn with_kind(kind: IndexKind, world_bounds: Aabb, cell_size: f32) -> Self {
        match kind {
            IndexKind::HashGrid => Self::hash_grid(HashGridConfig {
                cell_size,
                ..HashGridConfig::default()
            }),
            IndexKind::Octree => Self::octree(world_bounds, OctreeConfig::default()),
            IndexKind::LooseOctree => Self::loose_octree(world_bounds, 2.0),
            IndexKind::Bvh => Self::bvh(BvhConfig::default()),
        }
    }

    fn wrap(backend: Backend) -> Self {
        Self {
            backend,
            last_stats: QueryStats::default(),
        }
    }

    /// Insert an object. A duplicate id is treated as an update.
    pub fn insert(&mut self, id: u64, bounds: Aabb, layer: u64) {
        dispatch!(&mut self.backend, b => b.insert(id, bounds, layer));
    }

    /// Remove an object. Returns `true` when the id existed.
    pub fn remove(&mut self, id: u64) -> bool {
        dispatch!(&mut self.backend, b => b.remove(id))
    }

    /// Replace an object's bounds. Returns `false` for an unknown id.
    pub fn update(&mut self, id: u64, bounds: Aabb) -> bool {
        dispatch!(&mut self.backend, b => b.update(id, bounds))
    }

    /// Remove every object.
    pub fn clear(&mut self) {
        dispatch!(&mut self.backend, b => b.clear());
    }

    /// Whether the structure is stale.
    pub fn needs_rebuild(&self) -> bool {
        dispatch!(&self.backend, b => b.needs_rebuild())
    }

    /// Reconstruct the structure from the current object set.
    pub fn rebuild(&mut self) {
        dispatch!(&mut self.backend, b => b.rebuild());
    }

    fn ensure_current(&mut self) {
        if self.needs_rebuild() {
            self.rebuild();
        }
    }

    /// Counters recorded by the most recent `&mut self` query.
    pub fn last_query_stats(&self) -> &QueryStats {
        &self.last_stats
    }

    /// Ids of objects whose bounds intersect the query box.
    pub fn query_aabb(&mut self, query: &Aabb, filter: &QueryFilter) -> Vec<u64> {
        self.ensure_current();
        let mut stats = QueryStats::default();
        let out = self.query_aabb_with(query, filter, &mut stats);
        self.last_stats = stats;
        out
    }

    /// `&self` form of [`Self::query_aabb`]; the structure must be current.
    pub fn query_aabb_with(
        &self,
        query: &Aabb,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> Vec<u64> {
        dispatch!(&self.backend, b => b.query_aabb(query, filter, stats))
    }

    /// Ids of objects whose bounds intersect the sphere.
    pub fn query_sphere(&mut self, center: Vec3A, radius: f32, filter: &QueryFilter) -> Vec<u64> {
        self.ensure_current();
        let mut stats = QueryStats::default();
        let out = self.query_sphere_with(center, radius, filter, &mut stats);
        self.last_stats = stats;
        out
    }

    /// `&self` form of [`Self::query_sphere`]; the structure must be current.
    pub fn query_sphere_with(
        &self,
        center: Vec3A,
        radius: f32,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> Vec<u64> {
        dispatch!(&self.backend, b => b.query_sphere(center, radius, filter, stats))
    }

    /// Ids of objects not culled by the frustum.
    pub fn query_frustum(&mut self, frustum: &Frustum, filter: &QueryFilter) -> Vec<u64> {
        self.ensure_current();
        let mut stats = QueryStats::default();
        let out = self.query_frustum_with(frustum, filter, &mut stats);
        self.last_stats = stats;
        out
    }

    /// `&self` form of [`Self::query_frustum`]; the structure must be
    /// current.
    pub fn query_frustum_with(
        &self,
        frustum: &Frustum,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> Vec<u64> {
        dispatch!(&self.backend, b => b.query_frustum(frustum, filter, stats))
    }

    /// Hits along the ray, sorted by distance.
    pub fn query_ray(&mut self, ray: &Ray, max_dist: f32, filter: &QueryFilter) -> Vec<RayHit> {
        self.ensure_current();
        let mut stats = QueryStats::default();
        let out = self.query_ray_with(ray, max_dist, filter, &mut stats);
        self.last_stats = stats;
        out
    }

    /// `&self` form of [`Self::query_ray`]; the structure must be current.
    pub fn query_ray_with(
        &self,
        ray: &Ray,
        max_dist: f32,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> Vec<RayHit> {
        dispatch!(&self.backend, b => b.query_ray(ray, max_dist, filter, stats))
    }

    /// Id of the nearest object within `max_dist`, or 0 when none.
    pub fn query_nearest(&mut self, point: Vec3A, max_dist: f32, filter: &QueryFilter) -> u64 {
        self.ensure_current();
        let mut stats = QueryStats::default();
        let out = self.query_nearest_with(point, max_dist, filter, &mut stats);
        self.last_stats = stats;
        out
    }

    /// `&self` form of [`Self::query_nearest`]; the structure must be
    /// current.
    pub fn query_nearest_with(
        &self,
        point: Vec3A,
        max_dist: f32,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> u64 {
        dispatch!(&self.backend, b => b.query_nearest(point, max_dist, filter, stats))
    }

    /// Up to `k` ids within `max_dist`, nearest first.
    pub fn query_k_nearest(
        &mut self,
        point: Vec3A,
        k: usize,
        max_dist: f32,
        filter: &QueryFilter,
    ) -> Vec<u64> {
        self.ensure_current();
        let mut stats = QueryStats::default();
        let out = self.query_k_nearest_with(point, k, max_dist, filter, &mut stats);
        self.last_stats = stats;
        out
    }

    /// `&self` form of [`Self::query_k_nearest`]; the structure must be
    /// current.
    pub fn query_k_nearest_with(
        &self,
        point: Vec3A,
        k: usize,
        max_dist: f32,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> Vec<u64> {
        dispatch!(&self.backend, b => b.query_k_nearest(point, k, max_dist, filter, stats))
    }

    /// Visit objects intersecting the box without allocating; stop when the
    /// visitor returns `false`.
    pub fn visit_aabb<F: FnMut(u64, &Aabb) -> bool>(
        &mut self,
        query: &Aabb,
        filter: &QueryFilter,
        visitor: F,
    ) {
        self.ensure_current();
        self.visit_aabb_with(query, filter, visitor);
    }

    /// `&self` form of [`Self::visit_aabb`]; the structure must be current.
    pub fn visit_aabb_with<F: FnMut(u64, &Aabb) -> bool>(
        &self,
        query: &Aabb,
        filter: &QueryFilter,
        visitor: F,
    ) {
        dispatch!(&self.backend, b => b.visit_aabb(query, filter, visitor));
    }

    /// Visit objects intersecting the sphere without allocating; stop when
    /// the visitor returns `false`.
    pub fn visit_sphere<F: FnMut(u64, &Aabb) -> bool>(
        &mut self,
        center: Vec3A,
        radius: f32,
        filter: &QueryFilter,
        visitor: F,
    ) {
        self.ensure_current();
        self.visit_sphere_with(center, radius, filter, visitor);
    }

    /// `&self` form of [`Self::visit_sphere`]; the structure must be current.
    pub fn visit_sphere_with<F: FnMut(u64, &Aabb) -> bool>(
        &self,
        center: Vec3A,
        radius: f32,
        filter: &QueryFilter,
        visitor: F,
    ) {
        dispatch!(&self.backend, b => b.visit_sphere(center, radius, filter, visitor));
    }

    /// Number of objects in the index.
    pub fn len(&self) -> usize {
        dispatch!(&self.backend, b => b.len())
    }

    /// Whether the index holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overall bounds of the index.
    pub fn bounds(&self) -> Aabb {
        dispatch!(&self.backend, b => b.bounds())
    }

    /// Bounds of one object, or [`Aabb::INVALID`] for an unknown id.
    pub fn object_bounds(&self, id: u64) -> Aabb {
        dispatch!(&self.backend, b => b.object_bounds(id))
    }

    /// Whether the id is present.
    pub fn contains(&self, id: u64) -> bool {
        dispatch!(&self.backend, b => b.contains(id))
    }

    /// Which backend structure this index uses.
    pub fn kind(&self) -> IndexKind {
        dispatch!(&self.backend, b => b.kind())
    }

    /// Whether the backend tolerates frequent movement without degrading.
    pub fn supports_moving_objects(&self) -> bool {
        dispatch!(&self.backend, b => b.supports_moving_objects())
    }

    /// Approximate heap usage in bytes.
    pub fn memory_usage(&self) -> usize {
        dispatch!(&self.backend, b => b.memory_usage())
    }

    /// Borrow the BVH backend, when this index is one.
    pub fn as_bvh(&self) -> Option<&Bvh> {
        match &self.backend {
            Backend::Bvh(b) => Some(b),
            _ => None,
        }
    }

    /// Borrow the octree backend, when this index is one.
    pub fn as_octree(&self) -> Option<&Octree> {
        match &self.backend {
            Backend::Octree(b) => Some(b),
            _ => None,
        }
    }

    /// Borrow the hash-grid backend, when this index is one.
    pub fn as_hash_grid(&self) -> Option<&HashGrid> {
        match &self.backend {
            Backend::HashGrid(b) => Some(b),
            _ => None,
        }
    }
}
