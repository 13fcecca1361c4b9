// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The spatial manager facade.

use std::time::Instant;

use glam::Vec3A;
use hashbrown::HashMap;
use log::{debug, trace};
use overstory_geom::{Aabb, Frustum, Ray, RayHit};
use overstory_index::{IndexKind, QueryFilter, QueryStats, SpatialIndex};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::layer::{Layer, LayerMask};
use crate::stats::{FrameStats, ProfileData};

/// Number of layers that may carry a dedicated sub-index.
pub const LAYER_INDEX_SLOTS: usize = 16;

/// Frames a cache entry may linger before the per-frame sweep drops it.
const CACHE_MAX_AGE: u64 = 2;

/// Configuration for [`SpatialManager`].
#[derive(Copy, Clone, Debug)]
pub struct ManagerConfig {
    /// World bounds seeding octree backends.
    pub world_bounds: Aabb,
    /// Backend for the primary index.
    pub default_index: IndexKind,
    /// Cell size seeding hash-grid backends.
    pub hash_cell_size: f32,
    /// Serve repeated AABB/sphere queries from a per-frame cache.
    pub enable_query_caching: bool,
    /// Record per-query-type statistics.
    pub enable_profiling: bool,
    /// Cache entries above this are dropped wholesale at the frame sweep.
    pub max_cached_queries: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            world_bounds: Aabb::new(Vec3A::splat(-10_000.0), Vec3A::splat(10_000.0)),
            default_index: IndexKind::Bvh,
            hash_cell_size: 50.0,
            enable_query_caching: true,
            enable_profiling: false,
            max_cached_queries: 100,
        }
    }
}

#[derive(Clone, Debug)]
struct CachedQuery {
    results: Vec<u64>,
    frame: u64,
}

#[derive(Debug)]
struct Inner {
    primary: SpatialIndex,
    layer_indices: [Option<SpatialIndex>; LAYER_INDEX_SLOTS],
    object_layers: HashMap<u64, Layer>,
    cache: HashMap<u64, CachedQuery>,
    frame: u64,
    profiling: HashMap<&'static str, ProfileData>,
    frame_stats: FrameStats,
}

impl Inner {
    fn needs_rebuild(&self) -> bool {
        self.primary.needs_rebuild()
            || self
                .layer_indices
                .iter()
                .flatten()
                .any(SpatialIndex::needs_rebuild)
    }

    fn rebuild_stale(&mut self) {
        if self.primary.needs_rebuild() {
            self.primary.rebuild();
        }
        for index in self.layer_indices.iter_mut().flatten() {
            if index.needs_rebuild() {
                index.rebuild();
            }
        }
    }

    fn layer_slot(&mut self, layer: Layer) -> Option<&mut SpatialIndex> {
        self.layer_indices
            .get_mut(layer.index() as usize)
            .and_then(Option::as_mut)
    }
}

/// Thread-safe facade over a primary spatial index and optional per-layer
/// sub-indices.
///
/// Queries run under a shared lock, so any number of threads may query
/// concurrently; mutations serialize behind the write lock and a query begun
/// after a mutation commits observes it. Repeated AABB and sphere queries
/// within a frame are served from a cache keyed on the query primitive and
/// layer mask; any mutation invalidates the whole cache, and
/// [`SpatialManager::update`] sweeps entries older than two frames so a
/// quiescent scene does not pin stale result vectors.
pub struct SpatialManager {
    config: ManagerConfig,
    inner: RwLock<Inner>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl core::fmt::Debug for SpatialManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SpatialManager")
            .field("kind", &inner.primary.kind())
            .field("objects", &inner.primary.len())
            .field("frame", &inner.frame)
            .field("cached_queries", &inner.cache.len())
            .finish_non_exhaustive()
    }
}

impl Default for SpatialManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl SpatialManager {
    /// Create a manager with the given configuration.
    pub fn new(config: ManagerConfig) -> Self {
        let primary =
            SpatialIndex::with_kind(config.default_index, config.world_bounds, config.hash_cell_size);
        Self {
            config,
            inner: RwLock::new(Inner {
                primary,
                layer_indices: Default::default(),
                object_layers: HashMap::new(),
                cache: HashMap::new(),
                frame: 0,
                profiling: HashMap::new(),
                frame_stats: FrameStats::default(),
            }),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Advance the frame: resets frame counters and sweeps aged cache
    /// entries. Call once per game tick.
    pub fn update(&self, _dt: f32) {
        let mut inner = self.inner.write();
        inner.frame += 1;
        inner.frame_stats = FrameStats::default();

        let frame = inner.frame;
        inner
            .cache
            .retain(|_, entry| frame.saturating_sub(entry.frame) <= CACHE_MAX_AGE);
        if inner.cache.len() > self.config.max_cached_queries {
            inner.cache.clear();
        }
    }

    // =====================================================================
    // Registration
    // =====================================================================

    /// Register an object on a layer. A duplicate id is treated as an
    /// update.
    pub fn register_object(&self, id: u64, bounds: Aabb, layer: Layer) {
        let mut inner = self.inner.write();
        inner.primary.insert(id, bounds, layer.index());
        inner.object_layers.insert(id, layer);
        if let Some(index) = inner.layer_slot(layer) {
            index.insert(id, bounds, layer.index());
        }
        inner.frame_stats.objects_inserted += 1;
        inner.cache.clear();
    }

    /// Register a batch of objects on one layer.
    pub fn register_objects(&self, objects: &[(u64, Aabb)], layer: Layer) {
        let mut inner = self.inner.write();
        for &(id, bounds) in objects {
            inner.primary.insert(id, bounds, layer.index());
            inner.object_layers.insert(id, layer);
            if let Some(index) = inner.layer_slot(layer) {
                index.insert(id, bounds, layer.index());
            }
        }
        inner.frame_stats.objects_inserted += objects.len();
        inner.cache.clear();
    }

    /// Remove an object. Returns `true` when it was registered.
    pub fn unregister_object(&self, id: u64) -> bool {
        let mut inner = self.inner.write();
        if let Some(layer) = inner.object_layers.remove(&id)
            && let Some(index) = inner.layer_slot(layer)
        {
            index.remove(id);
        }
        let removed = inner.primary.remove(id);
        if removed {
            inner.frame_stats.objects_removed += 1;
        }
        inner.cache.clear();
        removed
    }

    /// Replace an object's bounds. Returns `false` for an unknown id.
    pub fn update_object(&self, id: u64, bounds: Aabb) -> bool {
        let mut inner = self.inner.write();
        let updated = inner.primary.update(id, bounds);
        if updated {
            let layer = inner.object_layers.get(&id).copied();
            if let Some(layer) = layer
                && let Some(index) = inner.layer_slot(layer)
            {
                index.update(id, bounds);
            }
            inner.frame_stats.objects_updated += 1;
            inner.cache.clear();
        }
        updated
    }

    /// Whether the id is registered.
    pub fn is_registered(&self, id: u64) -> bool {
        self.inner.read().primary.contains(id)
    }

    /// Bounds of a registered object, [`Aabb::INVALID`] otherwise.
    pub fn object_bounds(&self, id: u64) -> Aabb {
        self.inner.read().primary.object_bounds(id)
    }

    /// Registered layer of an object.
    pub fn object_layer(&self, id: u64) -> Option<Layer> {
        self.inner.read().object_layers.get(&id).copied()
    }

    /// Total registered objects.
    pub fn object_count(&self) -> usize {
        self.inner.read().primary.len()
    }

    // =====================================================================
    // Queries
    // =====================================================================

    /// Run `f` against a guaranteed-current index snapshot under the read
    /// lock, rebuilding stale structures first under the write lock.
    fn with_current<R>(&self, f: impl FnOnce(&Inner) -> R) -> R {
        loop {
            {
                let inner = self.inner.read();
                if !inner.needs_rebuild() {
                    return f(&inner);
                }
            }
            self.inner.write().rebuild_stale();
        }
    }

    fn record_query(
        &self,
        name: &'static str,
        stats: QueryStats,
        elapsed_ms: f32,
        cache_store: Option<(u64, &[u64])>,
    ) {
        if !self.config.enable_profiling && cache_store.is_none() {
            return;
        }
        let mut inner = self.inner.write();
        if let Some((hash, results)) = cache_store {
            let frame = inner.frame;
            inner.cache.insert(
                hash,
                CachedQuery {
                    results: results.to_vec(),
                    frame,
                },
            );
        }
        if self.config.enable_profiling {
            let profile = inner.profiling.entry(name).or_default();
            profile.query_count += 1;
            profile.total_time_ms += elapsed_ms;
            profile.total_nodes_visited += stats.nodes_visited;
            profile.total_objects_tested += stats.objects_tested;
            profile.total_objects_returned += stats.objects_returned;
            inner.frame_stats.queries_this_frame += 1;
            inner.frame_stats.total_query_time_ms += elapsed_ms;
        }
    }

    fn cached(&self, hash: u64) -> Option<Vec<u64>> {
        if !self.config.enable_query_caching {
            return None;
        }
        let inner = self.inner.read();
        if inner.needs_rebuild() {
            return None;
        }
        let hit = inner
            .cache
            .get(&hash)
            .filter(|entry| entry.frame == inner.frame)
            .map(|entry| entry.results.clone());
        if hit.is_some() {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            trace!("spatial query cache hit ({hash:#018x})");
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Ids of objects intersecting the box and admitted by the mask.
    pub fn query_aabb(&self, query: &Aabb, mask: LayerMask) -> Vec<u64> {
        let hash = hash_aabb_query(query, mask);
        if let Some(results) = self.cached(hash) {
            return results;
        }

        let start = Instant::now();
        let mut stats = QueryStats::default();
        let results = self.with_current(|inner| {
            inner
                .primary
                .query_aabb_with(query, &QueryFilter::from_mask(mask.bits()), &mut stats)
        });
        let store = self.config.enable_query_caching.then_some((hash, &results[..]));
        self.record_query("query_aabb", stats, elapsed_ms(start), store);
        results
    }

    /// Ids of objects intersecting the sphere and admitted by the mask.
    pub fn query_sphere(&self, center: Vec3A, radius: f32, mask: LayerMask) -> Vec<u64> {
        let hash = hash_sphere_query(center, radius, mask);
        if let Some(results) = self.cached(hash) {
            return results;
        }

        let start = Instant::now();
        let mut stats = QueryStats::default();
        let results = self.with_current(|inner| {
            inner.primary.query_sphere_with(
                center,
                radius,
                &QueryFilter::from_mask(mask.bits()),
                &mut stats,
            )
        });
        let store = self.config.enable_query_caching.then_some((hash, &results[..]));
        self.record_query("query_sphere", stats, elapsed_ms(start), store);
        results
    }

    /// Ids of objects inside or crossing the frustum.
    pub fn query_frustum(&self, frustum: &Frustum, mask: LayerMask) -> Vec<u64> {
        let start = Instant::now();
        let mut stats = QueryStats::default();
        let results = self.with_current(|inner| {
            inner
                .primary
                .query_frustum_with(frustum, &QueryFilter::from_mask(mask.bits()), &mut stats)
        });
        self.record_query("query_frustum", stats, elapsed_ms(start), None);
        results
    }

    /// Ray hits sorted by distance.
    pub fn query_ray(&self, ray: &Ray, max_dist: f32, mask: LayerMask) -> Vec<RayHit> {
        let start = Instant::now();
        let mut stats = QueryStats::default();
        let results = self.with_current(|inner| {
            inner
                .primary
                .query_ray_with(ray, max_dist, &QueryFilter::from_mask(mask.bits()), &mut stats)
        });
        self.record_query("query_ray", stats, elapsed_ms(start), None);
        results
    }

    /// Ray hits with one id excluded, sorted by distance.
    pub fn query_ray_excluding(
        &self,
        ray: &Ray,
        max_dist: f32,
        mask: LayerMask,
        exclude_id: u64,
    ) -> Vec<RayHit> {
        let start = Instant::now();
        let mut stats = QueryStats::default();
        let filter = QueryFilter::from_mask(mask.bits()).exclude(exclude_id);
        let results =
            self.with_current(|inner| inner.primary.query_ray_with(ray, max_dist, &filter, &mut stats));
        self.record_query("query_ray", stats, elapsed_ms(start), None);
        results
    }

    /// Nearest admitted object within `max_dist`, or 0.
    pub fn query_nearest(&self, point: Vec3A, max_dist: f32, mask: LayerMask) -> u64 {
        let start = Instant::now();
        let mut stats = QueryStats::default();
        let result = self.with_current(|inner| {
            inner.primary.query_nearest_with(
                point,
                max_dist,
                &QueryFilter::from_mask(mask.bits()),
                &mut stats,
            )
        });
        self.record_query("query_nearest", stats, elapsed_ms(start), None);
        result
    }

    /// Up to `k` admitted objects within `max_dist`, nearest first.
    pub fn query_k_nearest(
        &self,
        point: Vec3A,
        k: usize,
        max_dist: f32,
        mask: LayerMask,
    ) -> Vec<u64> {
        let start = Instant::now();
        let mut stats = QueryStats::default();
        let results = self.with_current(|inner| {
            inner.primary.query_k_nearest_with(
                point,
                k,
                max_dist,
                &QueryFilter::from_mask(mask.bits()),
                &mut stats,
            )
        });
        self.record_query("query_k_nearest", stats, elapsed_ms(start), None);
        results
    }

    /// Visit objects intersecting the box without allocating; the visitor
    /// returns `false` to stop. This is the hot-path query form.
    pub fn visit_aabb(&self, query: &Aabb, mask: LayerMask, visitor: impl FnMut(u64, &Aabb) -> bool) {
        self.with_current(|inner| {
            inner
                .primary
                .visit_aabb_with(query, &QueryFilter::from_mask(mask.bits()), visitor);
        });
    }

    /// Visit objects intersecting the sphere without allocating; the visitor
    /// returns `false` to stop.
    pub fn visit_sphere(
        &self,
        center: Vec3A,
        radius: f32,
        mask: LayerMask,
        visitor: impl FnMut(u64, &Aabb) -> bool,
    ) {
        self.with_current(|inner| {
            inner.primary.visit_sphere_with(
                center,
                radius,
                &QueryFilter::from_mask(mask.bits()),
                visitor,
            );
        });
    }

    // =====================================================================
    // Layer management
    // =====================================================================

    /// Install a dedicated index for one of the first sixteen layers.
    ///
    /// Objects already registered on the layer are copied in; later
    /// registrations mirror into it automatically.
    pub fn set_layer_index(&self, layer: Layer, mut index: SpatialIndex) {
        let slot = layer.index() as usize;
        assert!(slot < LAYER_INDEX_SLOTS, "layer has no sub-index slot");

        let mut inner = self.inner.write();
        let existing: Vec<(u64, Aabb)> = inner
            .object_layers
            .iter()
            .filter(|&(_, &l)| l == layer)
            .map(|(&id, _)| (id, inner.primary.object_bounds(id)))
            .collect();
        for (id, bounds) in existing {
            index.insert(id, bounds, layer.index());
        }
        trace!("installed {:?} sub-index for {layer:?}", index.kind());
        inner.layer_indices[slot] = Some(index);
    }

    /// All ids registered on a layer.
    pub fn layer_objects(&self, layer: Layer) -> Vec<u64> {
        self.inner
            .read()
            .object_layers
            .iter()
            .filter(|&(_, &l)| l == layer)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Id and bounds of every object on a layer, for debug drawing.
    pub fn layer_bounds(&self, layer: Layer) -> Vec<(u64, Aabb)> {
        let inner = self.inner.read();
        inner
            .object_layers
            .iter()
            .filter(|&(_, &l)| l == layer)
            .map(|(&id, _)| (id, inner.primary.object_bounds(id)))
            .collect()
    }

    // =====================================================================
    // Cache and statistics
    // =====================================================================

    /// Drop every cached query result.
    pub fn invalidate_cache(&self) {
        self.inner.write().cache.clear();
    }

    /// Fraction of cacheable queries answered from the cache.
    pub fn cache_hit_ratio(&self) -> f32 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total > 0 {
            hits as f32 / total as f32
        } else {
            0.0
        }
    }

    /// Per-query-type accumulators recorded while profiling was enabled.
    pub fn profiling_data(&self) -> HashMap<&'static str, ProfileData> {
        self.inner.read().profiling.clone()
    }

    /// Zero the profiling accumulators.
    pub fn reset_profiling_data(&self) {
        for data in self.inner.write().profiling.values_mut() {
            data.reset();
        }
    }

    /// Counters for the current frame.
    pub fn frame_stats(&self) -> FrameStats {
        self.inner.read().frame_stats
    }

    /// Approximate heap usage of all indices and tables.
    pub fn memory_usage(&self) -> usize {
        let inner = self.inner.read();
        let mut bytes = inner.primary.memory_usage();
        for index in inner.layer_indices.iter().flatten() {
            bytes += index.memory_usage();
        }
        bytes += inner.object_layers.len() * (size_of::<u64>() + size_of::<Layer>());
        bytes += inner
            .cache
            .values()
            .map(|entry| size_of::<CachedQuery>() + entry.results.len() * size_of::<u64>())
            .sum::<usize>();
        bytes
    }

    // =====================================================================
    // Index management
    // =====================================================================

    /// Force a rebuild of the primary and every layer index.
    pub fn rebuild_all(&self) {
        let mut inner = self.inner.write();
        inner.primary.rebuild();
        for index in inner.layer_indices.iter_mut().flatten() {
            index.rebuild();
        }
        inner.cache.clear();
        debug!("rebuilt all spatial indices ({} objects)", inner.primary.len());
    }

    /// Backend the current object distribution favors.
    ///
    /// Small sets and the general case favor the BVH; swarms of uniformly
    /// tiny objects favor the hash grid; large mixed dynamic sets favor the
    /// loose octree.
    pub fn optimal_index_kind(&self) -> IndexKind {
        let inner = self.inner.read();
        let count = inner.primary.len();
        if count < 100 {
            return IndexKind::Bvh;
        }

        let world_size = self.config.world_bounds.size();
        let avg_world = (world_size.x + world_size.y + world_size.z) / 3.0;

        let mut total = 0.0_f32;
        let mut sampled = 0_usize;
        for &id in inner.object_layers.keys() {
            if sampled >= 100 {
                break;
            }
            let bounds = inner.primary.object_bounds(id);
            if bounds.is_valid() {
                let size = bounds.size();
                total += (size.x + size.y + size.z) / 3.0;
                sampled += 1;
            }
        }
        let avg_object = if sampled > 0 { total / sampled as f32 } else { 1.0 };

        if avg_object / avg_world < 0.01 && count > 1000 {
            IndexKind::HashGrid
        } else if count > 500 {
            IndexKind::LooseOctree
        } else {
            IndexKind::Bvh
        }
    }

    /// Rebuild the primary index into the recommended backend when it
    /// differs from the current one.
    pub fn optimize_indices(&self) {
        let optimal = self.optimal_index_kind();
        let mut inner = self.inner.write();
        if inner.primary.kind() == optimal {
            return;
        }

        let mut fresh =
            SpatialIndex::with_kind(optimal, self.config.world_bounds, self.config.hash_cell_size);
        for (&id, &layer) in &inner.object_layers {
            let bounds = inner.primary.object_bounds(id);
            if bounds.is_valid() {
                fresh.insert(id, bounds, layer.index());
            }
        }
        debug!(
            "switching primary index {:?} -> {optimal:?} ({} objects)",
            inner.primary.kind(),
            inner.primary.len()
        );
        inner.primary = fresh;
        inner.cache.clear();
    }
}

#[inline]
fn elapsed_ms(start: Instant) -> f32 {
    start.elapsed().as_secs_f32() * 1000.0
}

// FNV-1a over the query parameters; cheap and stable across calls.
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[inline]
fn fnv_u64(hash: u64, value: u64) -> u64 {
    let mut hash = hash;
    for byte in value.to_le_bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[inline]
fn fnv_f32(hash: u64, value: f32) -> u64 {
    fnv_u64(hash, u64::from(value.to_bits()))
}

fn hash_aabb_query(query: &Aabb, mask: LayerMask) -> u64 {
    let mut hash = fnv_u64(FNV_OFFSET, 0xA1);
    for v in [query.min.x, query.min.y, query.min.z, query.max.x, query.max.y, query.max.z] {
        hash = fnv_f32(hash, v);
    }
    fnv_u64(hash, mask.bits())
}

fn hash_sphere_query(center: Vec3A, radius: f32, mask: LayerMask) -> u64 {
    let mut hash = fnv_u64(FNV_OFFSET, 0xB2);
    for v in [center.x, center.y, center.z, radius] {
        hash = fnv_f32(hash, v);
    }
    fnv_u64(hash, mask.bits())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(center: Vec3A) -> Aabb {
        Aabb::from_center_half_extents(center, Vec3A::ONE)
    }

    fn manager(caching: bool) -> SpatialManager {
        SpatialManager::new(ManagerConfig {
            world_bounds: Aabb::new(Vec3A::splat(-100.0), Vec3A::splat(100.0)),
            enable_query_caching: caching,
            ..ManagerConfig::default()
        })
    }

    #[test]
    fn layer_masked_queries() {
        let m = manager(true);
        m.register_object(1, unit_box(Vec3A::ZERO), Layer::Units);
        m.register_object(2, unit_box(Vec3A::ZERO), Layer::Buildings);

        let probe = unit_box(Vec3A::ZERO);
        assert_eq!(m.query_aabb(&probe, LayerMask::UNITS), vec![1]);
        assert_eq!(m.query_aabb(&probe, LayerMask::BUILDINGS), vec![2]);
        let mut both = m.query_aabb(&probe, LayerMask::all());
        both.sort_unstable();
        assert_eq!(both, vec![1, 2]);
    }

    #[test]
    fn cache_changes_timing_never_values() {
        let cached = manager(true);
        let uncached = manager(false);
        for m in [&cached, &uncached] {
            for i in 0..30_u64 {
                m.register_object(i + 1, unit_box(Vec3A::new(i as f32 * 3.0 - 45.0, 0.0, 0.0)), Layer::Units);
            }
        }

        let probe = Aabb::from_center_half_extents(Vec3A::ZERO, Vec3A::splat(10.0));
        let first = cached.query_aabb(&probe, LayerMask::all());
        let second = cached.query_aabb(&probe, LayerMask::all());
        let reference = uncached.query_aabb(&probe, LayerMask::all());

        assert_eq!(first, second);
        assert_eq!(first, reference);
        assert!(cached.cache_hit_ratio() > 0.0);
        assert_eq!(uncached.cache_hit_ratio(), 0.0);
    }

    #[test]
    fn mutation_invalidates_cache() {
        let m = manager(true);
        m.register_object(1, unit_box(Vec3A::ZERO), Layer::Units);

        let probe = Aabb::from_center_half_extents(Vec3A::ZERO, Vec3A::splat(5.0));
        assert_eq!(m.query_aabb(&probe, LayerMask::all()), vec![1]);

        m.register_object(2, unit_box(Vec3A::new(2.0, 0.0, 0.0)), Layer::Units);
        let mut hits = m.query_aabb(&probe, LayerMask::all());
        hits.sort_unstable();
        assert_eq!(hits, vec![1, 2], "cached result must not survive a mutation");

        assert!(m.unregister_object(2));
        assert_eq!(m.query_aabb(&probe, LayerMask::all()), vec![1]);
    }

    #[test]
    fn frame_update_expires_cache_entries() {
        let m = manager(true);
        m.register_object(1, unit_box(Vec3A::ZERO), Layer::Units);
        let probe = Aabb::from_center_half_extents(Vec3A::ZERO, Vec3A::splat(5.0));

        let _ = m.query_aabb(&probe, LayerMask::all());
        // Entries are only served on the frame that produced them.
        m.update(0.016);
        let before_hits = m.cache_hit_ratio();
        let again = m.query_aabb(&probe, LayerMask::all());
        assert_eq!(again, vec![1]);
        assert!(m.cache_hit_ratio() <= before_hits + f32::EPSILON);
    }

    #[test]
    fn update_object_moves_results() {
        let m = manager(true);
        m.register_object(1, unit_box(Vec3A::ZERO), Layer::Units);
        assert!(m.update_object(1, unit_box(Vec3A::new(50.0, 0.0, 0.0))));
        assert!(!m.update_object(99, unit_box(Vec3A::ZERO)));

        assert!(m.query_sphere(Vec3A::ZERO, 5.0, LayerMask::all()).is_empty());
        assert_eq!(m.query_sphere(Vec3A::new(50.0, 0.0, 0.0), 5.0, LayerMask::all()), vec![1]);
        assert_eq!(m.frame_stats().objects_updated, 1);
    }

    #[test]
    fn layer_sub_index_mirrors_registrations() {
        let m = manager(false);
        m.register_object(1, unit_box(Vec3A::ZERO), Layer::Terrain);
        m.set_layer_index(
            Layer::Terrain,
            SpatialIndex::with_kind(IndexKind::HashGrid, m.config().world_bounds, 10.0),
        );
        m.register_object(2, unit_box(Vec3A::new(5.0, 0.0, 0.0)), Layer::Terrain);
        m.register_object(3, unit_box(Vec3A::ZERO), Layer::Units);

        let inner = m.inner.read();
        let terrain = inner.layer_indices[Layer::Terrain.index() as usize]
            .as_ref()
            .expect("installed above");
        assert_eq!(terrain.len(), 2, "pre-existing and new terrain objects");
        assert!(terrain.contains(1) && terrain.contains(2));
        assert!(!terrain.contains(3));
    }

    #[test]
    fn optimize_switches_to_hash_grid_for_swarms() {
        let m = SpatialManager::new(ManagerConfig {
            world_bounds: Aabb::new(Vec3A::splat(-10_000.0), Vec3A::splat(10_000.0)),
            default_index: IndexKind::Bvh,
            ..ManagerConfig::default()
        });
        // Way past 1000 tiny objects in a huge world.
        for i in 0..1200_u64 {
            let x = (i % 40) as f32 * 10.0 - 200.0;
            let z = (i / 40) as f32 * 10.0 - 150.0;
            m.register_object(
                i + 1,
                Aabb::from_center_half_extents(Vec3A::new(x, 0.0, z), Vec3A::splat(0.5)),
                Layer::Units,
            );
        }
        assert_eq!(m.optimal_index_kind(), IndexKind::HashGrid);
        m.optimize_indices();
        assert_eq!(m.inner.read().primary.kind(), IndexKind::HashGrid);

        // Results survive the swap.
        let hits = m.query_sphere(Vec3A::new(-200.0, 0.0, -150.0), 1.0, LayerMask::all());
        assert_eq!(hits, vec![1]);
    }

    #[test]
    fn small_sets_recommend_bvh() {
        let m = manager(false);
        for i in 0..10_u64 {
            m.register_object(i + 1, unit_box(Vec3A::new(i as f32, 0.0, 0.0)), Layer::Units);
        }
        assert_eq!(m.optimal_index_kind(), IndexKind::Bvh);
    }

    #[test]
    fn profiling_accumulates_per_query_type() {
        let m = SpatialManager::new(ManagerConfig {
            world_bounds: Aabb::new(Vec3A::splat(-100.0), Vec3A::splat(100.0)),
            enable_profiling: true,
            ..ManagerConfig::default()
        });
        m.register_object(1, unit_box(Vec3A::ZERO), Layer::Units);

        let _ = m.query_sphere(Vec3A::ZERO, 5.0, LayerMask::all());
        let _ = m.query_nearest(Vec3A::ZERO, 10.0, LayerMask::all());
        let _ = m.query_nearest(Vec3A::ZERO, 10.0, LayerMask::all());

        let data = m.profiling_data();
        assert_eq!(data["query_sphere"].query_count, 1);
        assert_eq!(data["query_nearest"].query_count, 2);
        assert_eq!(data["query_sphere"].total_objects_returned, 1);

        m.reset_profiling_data();
        assert_eq!(m.profiling_data()["query_nearest"].query_count, 0);
    }

    #[test]
    fn concurrent_readers_with_writer() {
        use std::sync::Arc;

        let m = Arc::new(manager(true));
        for i in 0..50_u64 {
            m.register_object(i + 1, unit_box(Vec3A::new(i as f32 * 2.0 - 50.0, 0.0, 0.0)), Layer::Units);
        }

        let readers: Vec<_> = (0..4)
            .map(|t| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let center = Vec3A::new((i % 50) as f32 - 25.0, 0.0, 0.0);
                        let hits = m.query_sphere(center, 5.0 + (t as f32), LayerMask::all());
                        // Every returned id must have been registered.
                        assert!(hits.iter().all(|&id| id >= 1 && id <= 60));
                    }
                })
            })
            .collect();

        for i in 50..60_u64 {
            m.register_object(i + 1, unit_box(Vec3A::new(0.0, i as f32, 0.0)), Layer::Units);
            m.update(0.016);
        }

        for handle in readers {
            handle.join().expect("reader thread panicked");
        }
    }

    #[test]
    fn visitor_form_allocates_nothing_and_stops() {
        let m = manager(false);
        for i in 0..10_u64 {
            m.register_object(i + 1, unit_box(Vec3A::new(i as f32 * 3.0, 0.0, 0.0)), Layer::Units);
        }
        let mut seen = 0;
        m.visit_aabb(
            &Aabb::new(Vec3A::splat(-100.0), Vec3A::splat(100.0)),
            LayerMask::all(),
            |_, _| {
                seen += 1;
                seen < 4
            },
        );
        assert_eq!(seen, 4);
    }
}
