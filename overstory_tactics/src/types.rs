// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Domain types: teams, unit records, cones, and spatial events.

use bitflags::bitflags;
use glam::Vec3A;

/// Team affiliation used to filter unit and building queries.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum TeamId {
    /// No team; passes every team filter.
    #[default]
    None,
    /// The local player.
    Player,
    /// Hostiles.
    Enemy,
    /// Neither friend nor foe; excluded from enemy queries.
    Neutral,
    /// Friendly non-player units.
    AlliedNpc,
}

bitflags! {
    /// Per-unit state bits consulted by filtered queries.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct UnitFlags: u8 {
        /// Unit is alive; dead units fail `alive_only` queries.
        const ALIVE = 1 << 0;
        /// Unit can be targeted; untargetable units fail `targetable_only`
        /// queries.
        const TARGETABLE = 1 << 1;
    }
}

/// Per-unit record kept alongside the spatial registration.
#[derive(Copy, Clone, Debug)]
pub struct UnitRecord {
    /// Team affiliation.
    pub team: TeamId,
    /// Bounding-sphere radius used for position updates.
    pub radius: f32,
    /// Alive/targetable state.
    pub flags: UnitFlags,
}

impl UnitRecord {
    /// A freshly spawned unit: alive and targetable.
    pub fn new(team: TeamId, radius: f32) -> Self {
        Self {
            team,
            radius,
            flags: UnitFlags::ALIVE | UnitFlags::TARGETABLE,
        }
    }

    /// Whether the unit is alive.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.flags.contains(UnitFlags::ALIVE)
    }

    /// Whether the unit can be targeted.
    #[inline]
    pub fn is_targetable(&self) -> bool {
        self.flags.contains(UnitFlags::TARGETABLE)
    }
}

/// A vision or ability cone.
#[derive(Copy, Clone, Debug)]
pub struct ConeQuery {
    /// Apex of the cone.
    pub origin: Vec3A,
    /// Cone axis; normalized by the test.
    pub direction: Vec3A,
    /// Half-angle in degrees.
    pub half_angle_degrees: f32,
    /// Maximum distance from the apex.
    pub range: f32,
}

impl ConeQuery {
    /// Whether `point` lies inside the cone.
    ///
    /// Points within an epsilon of the apex count as inside regardless of
    /// angle, since the direction to them is ill-defined.
    pub fn contains(&self, point: Vec3A) -> bool {
        let to_point = point - self.origin;
        let dist = to_point.length();
        if dist > self.range {
            return false;
        }
        if dist < 1e-3 {
            return true;
        }
        let cos_angle = (to_point / dist).dot(self.direction.normalize());
        cos_angle >= self.half_angle_degrees.to_radians().cos()
    }
}

/// What a spatial event reports.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpatialEventKind {
    /// An object crossed into a trigger's radius.
    EnterRange,
    /// An object left a trigger's radius.
    ExitRange,
}

/// Event fired by a range trigger.
#[derive(Copy, Clone, Debug)]
pub struct SpatialEvent {
    /// Enter or exit.
    pub kind: SpatialEventKind,
    /// Owner of the trigger that fired.
    pub source_id: u64,
    /// Object that crossed the boundary.
    pub target_id: u64,
    /// Center of the crossing object's bounds.
    pub position: Vec3A,
    /// Distance from the trigger center to `position`.
    pub distance: f32,
}

/// First terrain intersection along a ray.
#[derive(Copy, Clone, Debug)]
pub struct TerrainHit {
    /// World-space hit point.
    pub point: Vec3A,
    /// Surface normal at the hit.
    pub normal: Vec3A,
    /// Distance from the ray origin.
    pub distance: f32,
    /// Id of the terrain tile that was hit.
    pub tile_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cone_accepts_and_rejects() {
        let cone = ConeQuery {
            origin: Vec3A::ZERO,
            direction: Vec3A::Z,
            half_angle_degrees: 30.0,
            range: 10.0,
        };
        assert!(cone.contains(Vec3A::new(0.0, 0.0, 5.0)));
        // 45 degrees off axis.
        assert!(!cone.contains(Vec3A::new(5.0, 0.0, 5.0)));
        // On axis but out of range.
        assert!(!cone.contains(Vec3A::new(0.0, 0.0, 15.0)));
        // The apex itself.
        assert!(cone.contains(Vec3A::ZERO));
    }

    #[test]
    fn fresh_units_are_alive_and_targetable() {
        let u = UnitRecord::new(TeamId::Player, 0.5);
        assert!(u.is_alive());
        assert!(u.is_targetable());

        let mut dead = u;
        dead.flags.remove(UnitFlags::ALIVE);
        assert!(!dead.is_alive());
        assert!(dead.is_targetable());
    }
}
