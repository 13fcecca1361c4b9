// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Uniform spatial hash grid over 3D cells, with optional multi-resolution
//! levels for mixed object sizes.

use alloc::vec::Vec;
use core::hash::{Hash, Hasher};

use glam::Vec3A;
use hashbrown::{HashMap, HashSet};
use overstory_geom::{Aabb, Frustum, Ray, RayHit};
use smallvec::SmallVec;

use crate::backend::SpatialBackend;
use crate::types::{IndexKind, QueryFilter, QueryStats};
use crate::validate::HashGridReport;

/// Integer cell coordinate of one grid level.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CellCoord {
    /// Cell index along X.
    pub x: i32,
    /// Cell index along Y.
    pub y: i32,
    /// Cell index along Z.
    pub z: i32,
}

impl CellCoord {
    /// Spatial hash key: coordinates scaled by large primes and XOR-folded.
    #[inline]
    pub fn key(self) -> u64 {
        const P1: u64 = 73_856_093;
        const P2: u64 = 19_349_663;
        const P3: u64 = 83_492_791;
        (self.x as u64).wrapping_mul(P1)
            ^ (self.y as u64).wrapping_mul(P2)
            ^ (self.z as u64).wrapping_mul(P3)
    }
}

impl Hash for CellCoord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.key());
    }
}

/// Tuning for [`HashGrid`].
#[derive(Copy, Clone, Debug)]
pub struct HashGridConfig {
    /// Edge length of a level-0 cell.
    pub cell_size: f32,
    /// Number of resolution levels; level `n` cells are `2^n` times larger.
    pub resolution_levels: usize,
    /// Pre-reserved object capacity.
    pub expected_objects: usize,
}

impl Default for HashGridConfig {
    fn default() -> Self {
        Self {
            cell_size: 10.0,
            resolution_levels: 3,
            expected_objects: 1000,
        }
    }
}

/// Cell occupancy summary, for tuning the cell size.
#[derive(Copy, Clone, Debug, Default)]
pub struct CellStats {
    /// Occupied cells across all levels.
    pub total_cells: usize,
    /// Largest number of objects recorded in one cell.
    pub max_objects_per_cell: usize,
    /// Mean objects per occupied cell.
    pub avg_objects_per_cell: f32,
}

#[derive(Clone, Debug)]
struct ObjectData {
    bounds: Aabb,
    layer: u64,
    level: usize,
    cells: SmallVec<[CellCoord; 8]>,
}

type CellMap = HashMap<CellCoord, SmallVec<[u64; 8]>>;

/// Open 3D spatial hash.
///
/// Cell coordinates are `floor(position / cell_size)`; an object is recorded
/// in every cell its bounds overlap, at the resolution level where its
/// longest dimension spans at most about two cells. Insert, move, and remove
/// are O(cells overlapped). Best suited to many similarly sized moving
/// objects; the resolution levels absorb moderate size variance.
#[derive(Debug)]
pub struct HashGrid {
    config: HashGridConfig,
    grids: Vec<CellMap>,
    objects: HashMap<u64, ObjectData>,
}

impl HashGrid {
    /// Create a grid with the given tuning.
    pub fn new(config: HashGridConfig) -> Self {
        let levels = config.resolution_levels.max(1);
        let mut objects = HashMap::new();
        objects.reserve(config.expected_objects);
        Self {
            config,
            grids: (0..levels).map(|_| CellMap::new()).collect(),
            objects,
        }
    }

    /// Level-0 cell size.
    pub fn cell_size(&self) -> f32 {
        self.config.cell_size
    }

    /// Rehash everything with a new level-0 cell size.
    pub fn set_cell_size(&mut self, cell_size: f32) {
        if (cell_size - self.config.cell_size).abs() < 1e-6 {
            return;
        }
        let old: Vec<(u64, Aabb, u64)> = self
            .objects
            .iter()
            .map(|(&id, data)| (id, data.bounds, data.layer))
            .collect();
        self.clear();
        self.config.cell_size = cell_size;
        for (id, bounds, layer) in old {
            self.insert(id, bounds, layer);
        }
    }

    /// Number of occupied cells across all levels.
    pub fn cell_count(&self) -> usize {
        self.grids.iter().map(CellMap::len).sum()
    }

    /// Cell edge length at a resolution level.
    #[inline]
    pub fn cell_size_for_level(&self, level: usize) -> f32 {
        self.config.cell_size * (1_u32 << level.min(31)) as f32
    }

    /// Cell containing a position at a resolution level.
    #[inline]
    pub fn position_to_cell(&self, pos: Vec3A, level: usize) -> CellCoord {
        let inv = 1.0 / self.cell_size_for_level(level);
        CellCoord {
            x: floor_to_i32(pos.x * inv),
            y: floor_to_i32(pos.y * inv),
            z: floor_to_i32(pos.z * inv),
        }
    }

    /// Ids recorded in one level-0 cell.
    pub fn objects_in_cell(&self, cell: CellCoord) -> &[u64] {
        self.grids[0].get(&cell).map_or(&[], |ids| ids.as_slice())
    }

    /// Occupancy statistics across all levels.
    pub fn cell_stats(&self) -> CellStats {
        let mut stats = CellStats::default();
        let mut total_objects = 0_usize;
        for grid in &self.grids {
            for ids in grid.values() {
                stats.total_cells += 1;
                stats.max_objects_per_cell = stats.max_objects_per_cell.max(ids.len());
                total_objects += ids.len();
            }
        }
        if stats.total_cells > 0 {
            stats.avg_objects_per_cell = total_objects as f32 / stats.total_cells as f32;
        }
        stats
    }

    /// Check that every object's recorded cell list matches the cells its
    /// bounds actually overlap, and that each recorded cell knows the object.
    pub fn validate(&self) -> HashGridReport {
        let mut report = HashGridReport {
            object_count: self.objects.len(),
            cell_count: self.cell_count(),
            mismatched_objects: Vec::new(),
        };
        for (&id, data) in &self.objects {
            let expected = self.cells_for_aabb(&data.bounds, data.level);
            let recorded_ok = expected == data.cells
                && data.cells.iter().all(|cell| {
                    self.grids[data.level]
                        .get(cell)
                        .is_some_and(|ids| ids.contains(&id))
                });
            if !recorded_ok {
                report.mismatched_objects.push(id);
            }
        }
        report
    }

    fn cells_for_aabb(&self, bounds: &Aabb, level: usize) -> SmallVec<[CellCoord; 8]> {
        let min = self.position_to_cell(bounds.min, level);
        let max = self.position_to_cell(bounds.max, level);
        let mut out = SmallVec::new();
        for x in min.x..=max.x {
            for y in min.y..=max.y {
                for z in min.z..=max.z {
                    out.push(CellCoord { x, y, z });
                }
            }
        }
        out
    }

    /// Level where the object's longest dimension spans at most ~2 cells.
    fn resolution_level(&self, bounds: &Aabb) -> usize {
        let max_dim = bounds.size().max_element();
        for level in 0..self.grids.len() {
            if max_dim <= self.cell_size_for_level(level) * 2.0 {
                return level;
            }
        }
        self.grids.len() - 1
    }

    fn insert_into_cells(&mut self, id: u64, level: usize, cells: &[CellCoord]) {
        for &cell in cells {
            self.grids[level].entry(cell).or_default().push(id);
        }
    }

    fn remove_from_cells(&mut self, id: u64, level: usize, cells: &[CellCoord]) {
        for cell in cells {
            if let Some(ids) = self.grids[level].get_mut(cell) {
                if let Some(pos) = ids.iter().position(|&other| other == id) {
                    ids.swap_remove(pos);
                }
                if ids.is_empty() {
                    self.grids[level].remove(cell);
                }
            }
        }
    }

    /// Gather candidates overlapping `query_bounds` from every level, calling
    /// `f` once per distinct object. Returns `false` when `f` stopped early.
    fn each_candidate(
        &self,
        query_bounds: &Aabb,
        stats: &mut QueryStats,
        mut f: impl FnMut(u64, &Aabb, u64) -> bool,
    ) -> bool {
        let mut tested: HashSet<u64> = HashSet::new();

        for level in 0..self.grids.len() {
            for cell in self.cells_for_aabb(query_bounds, level) {
                stats.nodes_visited += 1;
                let Some(ids) = self.grids[level].get(&cell) else {
                    continue;
                };
                for &id in ids {
                    if !tested.insert(id) {
                        continue;
                    }
                    stats.objects_tested += 1;
                    let data = &self.objects[&id];
                    if !f(id, &data.bounds, data.layer) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// March the ray through one level's cells with 3D DDA, testing each
    /// not-yet-tested object in every visited cell.
    fn ray_march_level(
        &self,
        level: usize,
        ray: &Ray,
        max_dist: f32,
        filter: &QueryFilter,
        tested: &mut HashSet<u64>,
        results: &mut Vec<RayHit>,
        stats: &mut QueryStats,
    ) {
        let cs = self.cell_size_for_level(level);
        let grid = &self.grids[level];
        if grid.is_empty() {
            return;
        }

        let mut cell = self.position_to_cell(ray.origin, level);
        let cell_min = Vec3A::new(cell.x as f32, cell.y as f32, cell.z as f32) * cs;

        let step_x = if ray.direction.x >= 0.0 { 1 } else { -1 };
        let step_y = if ray.direction.y >= 0.0 { 1 } else { -1 };
        let step_z = if ray.direction.z >= 0.0 { 1 } else { -1 };

        // Distance along the ray to the first boundary crossing per axis.
        let mut t_max = Vec3A::new(
            boundary_t(ray.origin.x, cell_min.x, cs, ray.direction.x, ray.inv_dir.x),
            boundary_t(ray.origin.y, cell_min.y, cs, ray.direction.y, ray.inv_dir.y),
            boundary_t(ray.origin.z, cell_min.z, cs, ray.direction.z, ray.inv_dir.z),
        );
        let t_delta = (Vec3A::splat(cs) * ray.inv_dir).abs();

        let mut t = 0.0_f32;
        while t < max_dist {
            stats.nodes_visited += 1;

            if let Some(ids) = grid.get(&cell) {
                for &id in ids {
                    if !tested.insert(id) {
                        continue;
                    }
                    stats.objects_tested += 1;

                    let data = &self.objects[&id];
                    if !filter.passes(id, data.layer) {
                        continue;
                    }
                    if let Some(hit_t) =
                        data.bounds.ray_intersect(ray.origin, ray.direction, max_dist)
                    {
                        results.push(RayHit::new(id, hit_t, ray.point_at(hit_t)));
                    }
                }
            }

            // Step across the nearest cell face.
            if t_max.x < t_max.y && t_max.x < t_max.z {
                t = t_max.x;
                t_max.x += t_delta.x;
                cell.x += step_x;
            } else if t_max.y < t_max.z {
                t = t_max.y;
                t_max.y += t_delta.y;
                cell.y += step_y;
            } else {
                t = t_max.z;
                t_max.z += t_delta.z;
                cell.z += step_z;
            }
        }
    }

    fn nearest_in_level(
        &self,
        level: usize,
        point: Vec3A,
        max_dist: f32,
        filter: &QueryFilter,
        best: &mut (u64, f32),
        stats: &mut QueryStats,
    ) {
        let grid = &self.grids[level];
        if grid.is_empty() {
            return;
        }
        let cs = self.cell_size_for_level(level);
        let center = self.position_to_cell(point, level);

        // No point searching shells past the data: a shell at radius r only
        // reaches cells within Chebyshev distance r, so the farthest corner
        // of the populated region (or max_dist, whichever is closer) bounds
        // the sweep.
        let data_bounds = self.bounds();
        if !data_bounds.is_valid() {
            return;
        }
        let reach = (point - data_bounds.min)
            .abs()
            .max((data_bounds.max - point).abs())
            .max_element();
        let max_radius = floor_to_i32(max_dist.min(reach) / cs) + 1;

        for r in 0..=max_radius {
            stats.nodes_visited += 1;
            for dx in -r..=r {
                for dy in -r..=r {
                    for dz in -r..=r {
                        // Shell only: at least one axis at the rim.
                        if dx.abs() != r && dy.abs() != r && dz.abs() != r {
                            continue;
                        }
                        let cell = CellCoord {
                            x: center.x + dx,
                            y: center.y + dy,
                            z: center.z + dz,
                        };
                        let Some(ids) = grid.get(&cell) else {
                            continue;
                        };
                        for &id in ids {
                            let data = &self.objects[&id];
                            if !filter.passes(id, data.layer) {
                                continue;
                            }
                            stats.objects_tested += 1;
                            let dist2 = data.bounds.distance_squared(point);
                            if dist2 < best.1 {
                                *best = (id, dist2);
                            }
                        }
                    }
                }
            }

            // Everything in later shells is at least (r - 1) cells away; stop
            // once the best hit beats that lower bound.
            let shell_min = ((r - 1).max(0) as f32) * cs;
            if best.0 != 0 && best.1 <= shell_min * shell_min {
                break;
            }
        }
    }
}

impl SpatialBackend for HashGrid {
    fn insert(&mut self, id: u64, bounds: Aabb, layer: u64) {
        if self.objects.contains_key(&id) {
            self.update(id, bounds);
            return;
        }

        let level = self.resolution_level(&bounds);
        let cells = self.cells_for_aabb(&bounds, level);
        self.insert_into_cells(id, level, &cells);
        self.objects.insert(
            id,
            ObjectData {
                bounds,
                layer,
                level,
                cells,
            },
        );
    }

    fn remove(&mut self, id: u64) -> bool {
        let Some(data) = self.objects.remove(&id) else {
            return false;
        };
        let cells = data.cells.clone();
        self.remove_from_cells(id, data.level, &cells);
        true
    }

    fn update(&mut self, id: u64, bounds: Aabb) -> bool {
        let Some(data) = self.objects.get(&id) else {
            return false;
        };

        let old_level = data.level;
        let old_cells = data.cells.clone();
        let new_level = self.resolution_level(&bounds);
        let new_cells = self.cells_for_aabb(&bounds, new_level);

        if new_level != old_level || new_cells != old_cells {
            self.remove_from_cells(id, old_level, &old_cells);
            self.insert_into_cells(id, new_level, &new_cells);
        }

        let data = self.objects.get_mut(&id).expect("checked above");
        data.bounds = bounds;
        data.level = new_level;
        data.cells = new_cells;
        true
    }

    fn clear(&mut self) {
        for grid in &mut self.grids {
            grid.clear();
        }
        self.objects.clear();
    }

    fn query_aabb(&self, query: &Aabb, filter: &QueryFilter, stats: &mut QueryStats) -> Vec<u64> {
        let mut results = Vec::new();
        self.each_candidate(query, stats, |id, bounds, layer| {
            if filter.passes(id, layer) && bounds.intersects(query) {
                results.push(id);
            }
            true
        });
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
        self.each_candidate(&broad, stats, |id, bounds, layer| {
            if filter.passes(id, layer) && bounds.intersects_sphere(center, radius) {
                results.push(id);
            }
            true
        });
        stats.objects_returned += results.len();
        results
    }

    fn query_frustum(
        &self,
        frustum: &Frustum,
        filter: &QueryFilter,
        stats: &mut QueryStats,
    ) -> Vec<u64> {
        // The grid has no hierarchy to cull against; use the frustum's AABB
        // as the broad phase and test candidates exactly.
        let broad = Aabb::from_points(frustum.corners());
        let mut results = Vec::new();
        self.each_candidate(&broad, stats, |id, bounds, layer| {
            if filter.passes(id, layer) && frustum.is_aabb_visible(bounds) {
                results.push(id);
            }
            true
        });
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
        let mut tested = HashSet::new();
        for level in 0..self.grids.len() {
            self.ray_march_level(level, ray, max_dist, filter, &mut tested, &mut results, stats);
        }
        results.sort_unstable_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(core::cmp::Ordering::Equal)
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
        if self.objects.is_empty() {
            return 0;
        }
        let mut best = (0_u64, max_dist * max_dist);
        for level in 0..self.grids.len() {
            self.nearest_in_level(level, point, max_dist, filter, &mut best, stats);
        }
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
        // Sphere query then sort. When max_dist is much larger than the k-th
        // distance this tests more candidates than necessary; callers with a
        // good distance estimate should pass it as max_dist.
        let mut ids = self.query_sphere(point, max_dist, filter, stats);
        ids.sort_unstable_by(|&a, &b| {
            let da = self.objects[&a].bounds.distance_squared(point);
            let db = self.objects[&b].bounds.distance_squared(point);
            da.partial_cmp(&db).unwrap_or(core::cmp::Ordering::Equal)
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
        let mut stats = QueryStats::default();
        self.each_candidate(query, &mut stats, |id, bounds, layer| {
            if filter.passes(id, layer) && bounds.intersects(query) {
                return visitor(id, bounds);
            }
            true
        });
    }

    fn visit_sphere<F: FnMut(u64, &Aabb) -> bool>(
        &self,
        center: Vec3A,
        radius: f32,
        filter: &QueryFilter,
        mut visitor: F,
    ) {
        let broad = Aabb::from_center_half_extents(center, Vec3A::splat(radius));
        let mut stats = QueryStats::default();
        self.each_candidate(&broad, &mut stats, |id, bounds, layer| {
            if filter.passes(id, layer) && bounds.intersects_sphere(center, radius) {
                return visitor(id, bounds);
            }
            true
        });
    }

    fn len(&self) -> usize {
        self.objects.len()
    }

    fn bounds(&self) -> Aabb {
        let mut bounds = Aabb::INVALID;
        for data in self.objects.values() {
            bounds.expand_aabb(&data.bounds);
        }
        bounds
    }

    fn object_bounds(&self, id: u64) -> Aabb {
        self.objects.get(&id).map_or(Aabb::INVALID, |d| d.bounds)
    }

    fn contains(&self, id: u64) -> bool {
        self.objects.contains_key(&id)
    }

    fn kind(&self) -> IndexKind {
        IndexKind::HashGrid
    }

    fn supports_moving_objects(&self) -> bool {
        true
    }

    fn memory_usage(&self) -> usize {
        let mut bytes = 0;
        for grid in &self.grids {
            for ids in grid.values() {
                bytes += size_of::<CellCoord>() + ids.len() * size_of::<u64>();
            }
        }
        for data in self.objects.values() {
            bytes += size_of::<u64>()
                + size_of::<ObjectData>()
                + data.cells.len() * size_of::<CellCoord>();
        }
        bytes
    }
}

/// Floor to i32 without a libm call (float-to-int casts truncate toward
/// zero).
#[inline]
fn floor_to_i32(v: f32) -> i32 {
    #[allow(
        clippy::cast_possible_truncation,
        reason = "Cell coordinates are intentionally 32-bit."
    )]
    let i = v as i32;
    if (i as f32) > v { i - 1 } else { i }
}

/// Distance along the ray to the first cell boundary on one axis.
#[inline]
fn boundary_t(origin: f32, cell_min: f32, cell_size: f32, dir: f32, inv_dir: f32) -> f32 {
    if dir >= 0.0 {
        (cell_min + cell_size - origin) * inv_dir.abs()
    } else {
        (origin - cell_min) * inv_dir.abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box(center: Vec3A) -> Aabb {
        Aabb::from_center_half_extents(center, Vec3A::ONE)
    }

    fn grid() -> HashGrid {
        HashGrid::new(HashGridConfig {
            cell_size: 10.0,
            resolution_levels: 3,
            expected_objects: 16,
        })
    }

    #[test]
    fn recorded_cells_match_overlap() {
        let mut g = grid();
        // Straddles the level-0 cell boundary at x = 10.
        g.insert(1, Aabb::new(Vec3A::new(8.0, 0.0, 0.0), Vec3A::new(12.0, 1.0, 1.0)), 0);
        assert!(g.validate().is_valid());

        g.update(1, unit_box(Vec3A::new(55.0, 5.0, 5.0)));
        assert!(g.validate().is_valid());

        assert!(g.remove(1));
        assert_eq!(g.cell_count(), 0);
    }

    #[test]
    fn large_objects_land_on_coarser_levels() {
        let mut g = grid();
        g.insert(1, unit_box(Vec3A::ZERO), 0);
        // 60 units across: too big for 10- and 20-unit cells.
        g.insert(2, Aabb::from_center_half_extents(Vec3A::ZERO, Vec3A::splat(30.0)), 0);

        let mut stats = QueryStats::default();
        let hits = g.query_aabb(&unit_box(Vec3A::new(25.0, 0.0, 0.0)), &QueryFilter::ALL, &mut stats);
        assert_eq!(hits, alloc::vec![2]);
        assert!(g.validate().is_valid());
    }

    #[test]
    fn duplicate_insert_is_update() {
        let mut g = grid();
        g.insert(1, unit_box(Vec3A::ZERO), 0);
        g.insert(1, unit_box(Vec3A::new(50.0, 0.0, 0.0)), 0);
        assert_eq!(g.len(), 1);

        let mut stats = QueryStats::default();
        let hits = g.query_sphere(Vec3A::new(50.0, 0.0, 0.0), 5.0, &QueryFilter::ALL, &mut stats);
        assert_eq!(hits, alloc::vec![1]);
        assert!(g
            .query_sphere(Vec3A::ZERO, 5.0, &QueryFilter::ALL, &mut stats)
            .is_empty());
    }

    #[test]
    fn ray_march_orders_hits() {
        let mut g = grid();
        g.insert(10, unit_box(Vec3A::new(5.0, 0.0, 0.0)), 0);
        g.insert(11, unit_box(Vec3A::new(15.0, 0.0, 0.0)), 0);
        g.insert(12, unit_box(Vec3A::new(30.0, 0.0, 0.0)), 0);

        let ray = Ray::new(Vec3A::ZERO, Vec3A::X);
        let mut stats = QueryStats::default();
        let hits = g.query_ray(&ray, 100.0, &QueryFilter::ALL, &mut stats);

        let ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, alloc::vec![10, 11, 12]);
        assert!((hits[0].distance - 4.0).abs() < 1e-5);
        assert!((hits[1].distance - 14.0).abs() < 1e-5);
        assert!((hits[2].distance - 29.0).abs() < 1e-5);
    }

    #[test]
    fn ray_negative_direction_and_max_dist() {
        let mut g = grid();
        g.insert(1, unit_box(Vec3A::new(-25.0, 0.0, 0.0)), 0);
        g.insert(2, unit_box(Vec3A::new(-60.0, 0.0, 0.0)), 0);

        let ray = Ray::new(Vec3A::ZERO, Vec3A::NEG_X);
        let mut stats = QueryStats::default();
        let hits = g.query_ray(&ray, 40.0, &QueryFilter::ALL, &mut stats);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
    }

    #[test]
    fn nearest_expands_shells() {
        let mut g = grid();
        g.insert(1, unit_box(Vec3A::new(3.0, 0.0, 0.0)), 0);
        g.insert(2, unit_box(Vec3A::new(40.0, 0.0, 0.0)), 0);

        let mut stats = QueryStats::default();
        assert_eq!(g.query_nearest(Vec3A::ZERO, 100.0, &QueryFilter::ALL, &mut stats), 1);
        // Excluding the nearest finds the next one.
        let f = QueryFilter::ALL.exclude(1);
        assert_eq!(g.query_nearest(Vec3A::ZERO, 100.0, &f, &mut stats), 2);
        // Out of range.
        assert_eq!(g.query_nearest(Vec3A::ZERO, 2.0, &QueryFilter::ALL, &mut stats), 0);
    }

    #[test]
    fn k_nearest_sorted_and_bounded() {
        let mut g = grid();
        for i in 1..=5_u64 {
            g.insert(i, unit_box(Vec3A::new(i as f32 * 7.0, 0.0, 0.0)), 0);
        }
        let mut stats = QueryStats::default();
        let ids = g.query_k_nearest(Vec3A::ZERO, 3, 100.0, &QueryFilter::ALL, &mut stats);
        assert_eq!(ids, alloc::vec![1, 2, 3]);
    }

    #[test]
    fn visitor_stops_early() {
        let mut g = grid();
        for i in 1..=10_u64 {
            g.insert(i, unit_box(Vec3A::new(i as f32, 0.0, 0.0)), 0);
        }
        let mut seen = 0;
        g.visit_aabb(
            &Aabb::new(Vec3A::splat(-100.0), Vec3A::splat(100.0)),
            &QueryFilter::ALL,
            |_, _| {
                seen += 1;
                seen < 3
            },
        );
        assert_eq!(seen, 3);
    }

    #[test]
    fn layer_filter_applies() {
        let mut g = grid();
        g.insert(100, unit_box(Vec3A::ZERO), 1);
        g.insert(200, unit_box(Vec3A::ZERO), 2);

        let mut stats = QueryStats::default();
        let hits = g.query_aabb(
            &unit_box(Vec3A::ZERO),
            &QueryFilter::from_mask(1 << 2),
            &mut stats,
        );
        assert_eq!(hits, alloc::vec![200]);
    }
}
