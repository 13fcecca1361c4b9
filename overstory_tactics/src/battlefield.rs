// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The game-facing spatial system.

use core::cmp::Ordering;

use glam::Vec3A;
use hashbrown::{HashMap, HashSet};
use log::{debug, warn};
use overstory_geom::{Aabb, Frustum, Ray, RayHit};
use overstory_index::IndexKind;
use overstory_manager::{Layer, LayerMask, ManagerConfig, SpatialManager};
use parking_lot::RwLock;

use crate::triggers::{RangeTrigger, SpatialEventCallback, transitions};
use crate::types::{
    ConeQuery, SpatialEvent, SpatialEventKind, TeamId, TerrainHit, UnitFlags, UnitRecord,
};

/// Slack subtracted from the target distance in line-of-sight tests, so a
/// surface at the destination itself does not block sight of it.
const LOS_EPSILON: f32 = 0.1;

/// Configuration for [`Battlefield`].
#[derive(Copy, Clone, Debug)]
pub struct BattlefieldConfig {
    /// World bounds for the underlying indices.
    pub world_bounds: Aabb,
    /// Hash-grid cell size when the manager optimizes toward a grid.
    pub unit_cell_size: f32,
    /// Process range triggers during [`Battlefield::update`].
    pub enable_range_triggers: bool,
    /// Triggers beyond this are rejected at creation.
    pub max_range_triggers: usize,
}

impl Default for BattlefieldConfig {
    fn default() -> Self {
        Self {
            world_bounds: Aabb::new(Vec3A::splat(-5000.0), Vec3A::splat(5000.0)),
            unit_cell_size: 10.0,
            enable_range_triggers: true,
            max_range_triggers: 1000,
        }
    }
}

#[derive(Default)]
struct State {
    units: HashMap<u64, UnitRecord>,
    building_teams: HashMap<u64, TeamId>,
    triggers: HashMap<u64, RangeTrigger>,
    next_trigger_id: u64,
    projectile_count: usize,
}

/// Game-oriented wrapper over the spatial manager.
///
/// Keeps unit/building side tables (team, radius, alive, targetable) next to
/// the spatial registrations and layers the game's query vocabulary on top:
/// team-filtered range queries, vision cones, terrain raycasts, line of
/// sight, pathfinding probes, and range triggers with enter/exit events.
///
/// Trigger callbacks run on the thread that calls [`Battlefield::update`];
/// they must not call back into the battlefield.
pub struct Battlefield {
    config: BattlefieldConfig,
    manager: SpatialManager,
    state: RwLock<State>,
}

impl core::fmt::Debug for Battlefield {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Battlefield")
            .field("units", &state.units.len())
            .field("buildings", &state.building_teams.len())
            .field("projectiles", &state.projectile_count)
            .field("triggers", &state.triggers.len())
            .finish_non_exhaustive()
    }
}

impl Default for Battlefield {
    fn default() -> Self {
        Self::new(BattlefieldConfig::default())
    }
}

impl Battlefield {
    /// Create a battlefield with its own spatial manager.
    pub fn new(config: BattlefieldConfig) -> Self {
        let manager = SpatialManager::new(ManagerConfig {
            world_bounds: config.world_bounds,
            default_index: IndexKind::Bvh,
            hash_cell_size: config.unit_cell_size,
            enable_query_caching: true,
            ..ManagerConfig::default()
        });
        Self {
            config,
            manager,
            state: RwLock::new(State::default()),
        }
    }

    /// The underlying manager, for collaborators that need raw index access.
    pub fn manager(&self) -> &SpatialManager {
        &self.manager
    }

    /// Advance one tick: rolls the manager frame and processes range
    /// triggers.
    pub fn update(&self, dt: f32) {
        self.manager.update(dt);
        if self.config.enable_range_triggers {
            self.process_triggers();
        }
    }

    // =====================================================================
    // Registration
    // =====================================================================

    /// Register a unit as a sphere of `radius` about `position`.
    pub fn register_unit(&self, id: u64, position: Vec3A, radius: f32, team: TeamId) {
        let bounds = Aabb::from_center_half_extents(position, Vec3A::splat(radius));
        self.manager.register_object(id, bounds, Layer::Units);
        self.state.write().units.insert(id, UnitRecord::new(team, radius));
    }

    /// Register a building with explicit bounds.
    pub fn register_building(&self, id: u64, bounds: Aabb, team: TeamId) {
        self.manager.register_object(id, bounds, Layer::Buildings);
        self.state.write().building_teams.insert(id, team);
    }

    /// Register a projectile as a sphere of `radius` about `position`.
    pub fn register_projectile(&self, id: u64, position: Vec3A, radius: f32) {
        let bounds = Aabb::from_center_half_extents(position, Vec3A::splat(radius));
        self.manager.register_object(id, bounds, Layer::Projectiles);
        self.state.write().projectile_count += 1;
    }

    /// Register a terrain chunk.
    pub fn register_terrain_chunk(&self, chunk_id: u64, bounds: Aabb) {
        self.manager.register_object(chunk_id, bounds, Layer::Terrain);
    }

    /// Remove any entity and its side-table records.
    pub fn unregister(&self, id: u64) {
        self.manager.unregister_object(id);
        let mut state = self.state.write();
        if state.units.remove(&id).is_some() {
            return;
        }
        if state.building_teams.remove(&id).is_some() {
            return;
        }
        state.projectile_count = state.projectile_count.saturating_sub(1);
    }

    /// Move an entity to a new position.
    ///
    /// Units keep their registered radius; other entities keep their current
    /// extents, translated to the new center.
    pub fn update_position(&self, id: u64, position: Vec3A) {
        let radius = self.state.read().units.get(&id).map(|u| u.radius);
        if let Some(radius) = radius {
            let bounds = Aabb::from_center_half_extents(position, Vec3A::splat(radius));
            self.manager.update_object(id, bounds);
            return;
        }

        let mut bounds = self.manager.object_bounds(id);
        if bounds.is_valid() {
            let offset = position - bounds.center();
            bounds.translate(offset);
            self.manager.update_object(id, bounds);
        }
    }

    /// Replace an entity's bounds.
    pub fn update_bounds(&self, id: u64, bounds: Aabb) {
        self.manager.update_object(id, bounds);
    }

    /// Mark a unit alive or dead; dead units fail `alive_only` queries.
    pub fn set_unit_alive(&self, id: u64, alive: bool) {
        if let Some(unit) = self.state.write().units.get_mut(&id) {
            unit.flags.set(UnitFlags::ALIVE, alive);
        }
    }

    /// Set unit targetability.
    pub fn set_unit_targetable(&self, id: u64, targetable: bool) {
        if let Some(unit) = self.state.write().units.get_mut(&id) {
            unit.flags.set(UnitFlags::TARGETABLE, targetable);
        }
    }

    // =====================================================================
    // Unit queries
    // =====================================================================

    fn filter_units(
        &self,
        candidates: Vec<u64>,
        team_filter: TeamId,
        alive_only: bool,
        targetable_only: bool,
    ) -> Vec<u64> {
        let state = self.state.read();
        candidates
            .into_iter()
            .filter(|id| {
                let Some(unit) = state.units.get(id) else {
                    return false;
                };
                if alive_only && !unit.is_alive() {
                    return false;
                }
                if targetable_only && !unit.is_targetable() {
                    return false;
                }
                team_filter == TeamId::None || unit.team == team_filter
            })
            .collect()
    }

    /// Units within `radius` of `position`, optionally filtered by team,
    /// liveness, and targetability.
    pub fn units_in_range(
        &self,
        position: Vec3A,
        radius: f32,
        team_filter: TeamId,
        alive_only: bool,
        targetable_only: bool,
    ) -> Vec<u64> {
        let candidates = self.manager.query_sphere(position, radius, LayerMask::UNITS);
        self.filter_units(candidates, team_filter, alive_only, targetable_only)
    }

    /// Units in range with their distances, nearest first.
    pub fn units_in_range_sorted(
        &self,
        position: Vec3A,
        radius: f32,
        team_filter: TeamId,
        alive_only: bool,
    ) -> Vec<(u64, f32)> {
        let units = self.units_in_range(position, radius, team_filter, alive_only, false);
        let mut sorted: Vec<(u64, f32)> = units
            .into_iter()
            .map(|id| (id, self.manager.object_bounds(id).distance(position)))
            .collect();
        sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        sorted
    }

    /// Nearest matching unit, excluding `exclude_id`.
    pub fn nearest_unit(
        &self,
        position: Vec3A,
        max_range: f32,
        team_filter: TeamId,
        alive_only: bool,
        exclude_id: u64,
    ) -> Option<u64> {
        self.units_in_range_sorted(position, max_range, team_filter, alive_only)
            .into_iter()
            .map(|(id, _)| id)
            .find(|&id| id != exclude_id)
    }

    /// Up to `k` matching units, nearest first.
    pub fn k_nearest_units(
        &self,
        position: Vec3A,
        k: usize,
        max_range: f32,
        team_filter: TeamId,
        alive_only: bool,
    ) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .units_in_range_sorted(position, max_range, team_filter, alive_only)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.truncate(k);
        ids
    }

    /// Alive units of `my_team` within range.
    pub fn friendly_units_in_range(
        &self,
        position: Vec3A,
        radius: f32,
        my_team: TeamId,
        alive_only: bool,
    ) -> Vec<u64> {
        self.units_in_range(position, radius, my_team, alive_only, false)
    }

    /// Units hostile to `my_team` within range: any team other than mine and
    /// [`TeamId::Neutral`].
    pub fn enemy_units_in_range(
        &self,
        position: Vec3A,
        radius: f32,
        my_team: TeamId,
        alive_only: bool,
    ) -> Vec<u64> {
        let candidates = self.manager.query_sphere(position, radius, LayerMask::UNITS);
        let state = self.state.read();
        candidates
            .into_iter()
            .filter(|id| {
                let Some(unit) = state.units.get(id) else {
                    return false;
                };
                if alive_only && !unit.is_alive() {
                    return false;
                }
                unit.team != my_team && unit.team != TeamId::Neutral
            })
            .collect()
    }

    // =====================================================================
    // Building queries
    // =====================================================================

    /// Buildings intersecting an area.
    pub fn buildings_in_area(&self, area: &Aabb) -> Vec<u64> {
        self.manager.query_aabb(area, LayerMask::BUILDINGS)
    }

    /// Buildings of one team intersecting an area.
    pub fn buildings_in_area_for_team(&self, area: &Aabb, team: TeamId) -> Vec<u64> {
        let candidates = self.buildings_in_area(area);
        let state = self.state.read();
        candidates
            .into_iter()
            .filter(|id| state.building_teams.get(id) == Some(&team))
            .collect()
    }

    // =====================================================================
    // Cone queries
    // =====================================================================

    /// Entities whose bounds center lies inside the cone.
    ///
    /// Broad phase is a sphere of the cone's range about its origin; each
    /// candidate's center is then tested against the cone angle and range.
    pub fn entities_in_cone(&self, cone: &ConeQuery, mask: LayerMask) -> Vec<u64> {
        let candidates = self.manager.query_sphere(cone.origin, cone.range, mask);
        candidates
            .into_iter()
            .filter(|&id| {
                let bounds = self.manager.object_bounds(id);
                bounds.is_valid() && cone.contains(bounds.center())
            })
            .collect()
    }

    /// Units inside a cone, with team and liveness filters.
    pub fn units_in_cone(
        &self,
        origin: Vec3A,
        direction: Vec3A,
        half_angle_degrees: f32,
        range: f32,
        team_filter: TeamId,
        alive_only: bool,
    ) -> Vec<u64> {
        let cone = ConeQuery {
            origin,
            direction,
            half_angle_degrees,
            range,
        };
        let candidates = self.entities_in_cone(&cone, LayerMask::UNITS);
        self.filter_units(candidates, team_filter, alive_only, false)
    }

    // =====================================================================
    // Raycasts and line of sight
    // =====================================================================

    /// First terrain intersection along the ray.
    pub fn raycast_terrain(&self, ray: &Ray, max_distance: f32) -> Option<TerrainHit> {
        let hits = self.manager.query_ray(ray, max_distance, LayerMask::TERRAIN);
        hits.first().map(|hit| TerrainHit {
            point: hit.point,
            normal: hit.normal,
            distance: hit.distance,
            #[allow(
                clippy::cast_possible_truncation,
                reason = "Terrain tile ids are allocated in 32 bits."
            )]
            tile_id: hit.id as u32,
        })
    }

    /// All entity hits along the ray, sorted by distance.
    pub fn raycast_entities(&self, ray: &Ray, max_distance: f32, mask: LayerMask) -> Vec<RayHit> {
        self.manager.query_ray(ray, max_distance, mask)
    }

    /// First entity hit along the ray that is not `exclude_id`.
    pub fn raycast_first(
        &self,
        ray: &Ray,
        max_distance: f32,
        mask: LayerMask,
        exclude_id: u64,
    ) -> Option<RayHit> {
        self.manager
            .query_ray_excluding(ray, max_distance, mask, exclude_id)
            .into_iter()
            .next()
    }

    /// Whether an unobstructed line exists between two points.
    ///
    /// Raycasts terrain and buildings between `from` and `to`; up to two ids
    /// (typically the two endpoints' entities) are ignored. A hit within
    /// [`LOS_EPSILON`] of the target does not block.
    pub fn has_line_of_sight(
        &self,
        from: Vec3A,
        to: Vec3A,
        exclude_id_a: u64,
        exclude_id_b: u64,
    ) -> bool {
        let delta = to - from;
        let distance = delta.length();
        if distance < 1e-3 {
            return true;
        }
        let ray = Ray::new(from, delta);

        if let Some(hit) = self.raycast_terrain(&ray, distance)
            && hit.distance < distance - LOS_EPSILON
        {
            return false;
        }

        let building_hits = self.manager.query_ray(&ray, distance, LayerMask::BUILDINGS);
        !building_hits.iter().any(|hit| {
            hit.id != exclude_id_a && hit.id != exclude_id_b && hit.distance < distance - LOS_EPSILON
        })
    }

    // =====================================================================
    // Pathfinding integration
    // =====================================================================

    /// Obstacle bounds inside an area, for the navigation graph builder.
    pub fn pathfinding_obstacles(&self, area: &Aabb) -> Vec<Aabb> {
        self.buildings_in_area(area)
            .into_iter()
            .map(|id| self.manager.object_bounds(id))
            .filter(Aabb::is_valid)
            .collect()
    }

    /// Whether a flat probe of `radius` at `position` is free of buildings.
    pub fn is_position_walkable(&self, position: Vec3A, radius: f32) -> bool {
        let probe =
            Aabb::from_center_half_extents(position, Vec3A::new(radius, 0.5, radius));
        let mut blocked = false;
        self.manager.visit_aabb(&probe, LayerMask::BUILDINGS, |_, _| {
            blocked = true;
            false
        });
        !blocked
    }

    /// Walkable grid positions within `radius` of `center`, sampled at
    /// `spacing` on the XZ plane.
    pub fn navigable_positions(&self, center: Vec3A, radius: f32, spacing: f32) -> Vec<Vec3A> {
        let mut positions = Vec::new();
        let steps = (radius / spacing).ceil() as i32;
        for x in -steps..=steps {
            for z in -steps..=steps {
                let pos = center + Vec3A::new(x as f32 * spacing, 0.0, z as f32 * spacing);
                if (pos - center).length() <= radius && self.is_position_walkable(pos, 0.5) {
                    positions.push(pos);
                }
            }
        }
        positions
    }

    // =====================================================================
    // Range triggers
    // =====================================================================

    /// Create a range trigger; returns its id, or 0 when the trigger budget
    /// is exhausted.
    ///
    /// Each [`Battlefield::update`] queries the trigger sphere, filters by
    /// layer mask and team, drops the owner, and fires `on_enter` for ids
    /// newly inside and `on_exit` for ids that left.
    pub fn create_range_trigger(
        &self,
        owner_id: u64,
        center: Vec3A,
        radius: f32,
        on_enter: Option<SpatialEventCallback>,
        on_exit: Option<SpatialEventCallback>,
        layer_mask: LayerMask,
        team_filter: TeamId,
    ) -> u64 {
        let mut state = self.state.write();
        if state.triggers.len() >= self.config.max_range_triggers {
            warn!("range trigger budget exhausted ({} active)", state.triggers.len());
            return 0;
        }
        state.next_trigger_id += 1;
        let id = state.next_trigger_id;
        state.triggers.insert(
            id,
            RangeTrigger {
                owner_id,
                center,
                radius,
                layer_mask,
                team_filter,
                on_enter,
                on_exit,
                in_range: HashSet::new(),
            },
        );
        debug!("created range trigger {id} (owner {owner_id}, radius {radius})");
        id
    }

    /// Move a trigger's center.
    pub fn move_range_trigger(&self, trigger_id: u64, center: Vec3A) {
        if let Some(trigger) = self.state.write().triggers.get_mut(&trigger_id) {
            trigger.center = center;
        }
    }

    /// Change a trigger's radius.
    pub fn set_range_trigger_radius(&self, trigger_id: u64, radius: f32) {
        if let Some(trigger) = self.state.write().triggers.get_mut(&trigger_id) {
            trigger.radius = radius;
        }
    }

    /// Remove a trigger. Returns `true` when it existed.
    pub fn remove_range_trigger(&self, trigger_id: u64) -> bool {
        self.state.write().triggers.remove(&trigger_id).is_some()
    }

    /// Ids currently inside a trigger, as of the last update.
    pub fn entities_in_trigger(&self, trigger_id: u64) -> Vec<u64> {
        self.state
            .read()
            .triggers
            .get(&trigger_id)
            .map(|t| t.in_range.iter().copied().collect())
            .unwrap_or_default()
    }

    fn process_triggers(&self) {
        let mut state = self.state.write();
        let state = &mut *state;

        for trigger in state.triggers.values_mut() {
            let candidates =
                self.manager
                    .query_sphere(trigger.center, trigger.radius, trigger.layer_mask);

            let mut current: HashSet<u64> = candidates.into_iter().collect();
            if trigger.team_filter != TeamId::None {
                current.retain(|&id| {
                    if let Some(unit) = state.units.get(&id) {
                        unit.team == trigger.team_filter
                    } else if let Some(&team) = state.building_teams.get(&id) {
                        team == trigger.team_filter
                    } else {
                        true
                    }
                });
            }
            current.remove(&trigger.owner_id);

            let (entered, exited) = transitions(&trigger.in_range, &current);

            if let Some(on_enter) = trigger.on_enter.as_mut() {
                for id in entered {
                    let position = self.manager.object_bounds(id).center();
                    on_enter(&SpatialEvent {
                        kind: SpatialEventKind::EnterRange,
                        source_id: trigger.owner_id,
                        target_id: id,
                        position,
                        distance: (position - trigger.center).length(),
                    });
                }
            }
            if let Some(on_exit) = trigger.on_exit.as_mut() {
                for id in exited {
                    let position = self.manager.object_bounds(id).center();
                    on_exit(&SpatialEvent {
                        kind: SpatialEventKind::ExitRange,
                        source_id: trigger.owner_id,
                        target_id: id,
                        position,
                        distance: (position - trigger.center).length(),
                    });
                }
            }

            trigger.in_range = current;
        }
    }

    // =====================================================================
    // Frustum culling
    // =====================================================================

    /// Entities visible in a camera frustum, filtered by layer mask.
    pub fn visible_entities(&self, frustum: &Frustum, mask: LayerMask) -> Vec<u64> {
        self.manager.query_frustum(frustum, mask)
    }

    /// Visible units.
    pub fn visible_units(&self, frustum: &Frustum) -> Vec<u64> {
        self.visible_entities(frustum, LayerMask::UNITS)
    }

    /// Visible buildings.
    pub fn visible_buildings(&self, frustum: &Frustum) -> Vec<u64> {
        self.visible_entities(frustum, LayerMask::BUILDINGS)
    }

    // =====================================================================
    // Statistics
    // =====================================================================

    /// Registered unit count.
    pub fn unit_count(&self) -> usize {
        self.state.read().units.len()
    }

    /// Registered building count.
    pub fn building_count(&self) -> usize {
        self.state.read().building_teams.len()
    }

    /// Registered projectile count.
    pub fn projectile_count(&self) -> usize {
        self.state.read().projectile_count
    }

    /// Approximate heap usage of the manager and side tables.
    pub fn memory_usage(&self) -> usize {
        let state = self.state.read();
        self.manager.memory_usage()
            + state.units.len() * (size_of::<u64>() + size_of::<UnitRecord>())
            + state.building_teams.len() * (size_of::<u64>() + size_of::<TeamId>())
            + state.triggers.len() * size_of::<RangeTrigger>()
    }
}
