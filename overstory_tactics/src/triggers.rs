// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Range triggers: persistent spherical regions that fire enter/exit events
//! as objects cross their surface between ticks.

use glam::Vec3A;
use hashbrown::HashSet;
use overstory_manager::LayerMask;

use crate::types::{SpatialEvent, TeamId};

/// Callback invoked for each enter or exit event, on the update thread.
pub type SpatialEventCallback = Box<dyn FnMut(&SpatialEvent) + Send>;

/// One registered trigger.
pub(crate) struct RangeTrigger {
    pub(crate) owner_id: u64,
    pub(crate) center: Vec3A,
    pub(crate) radius: f32,
    pub(crate) layer_mask: LayerMask,
    pub(crate) team_filter: TeamId,
    pub(crate) on_enter: Option<SpatialEventCallback>,
    pub(crate) on_exit: Option<SpatialEventCallback>,
    /// Occupancy as of the last processed tick.
    pub(crate) in_range: HashSet<u64>,
}

impl core::fmt::Debug for RangeTrigger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RangeTrigger")
            .field("owner_id", &self.owner_id)
            .field("center", &self.center)
            .field("radius", &self.radius)
            .field("layer_mask", &self.layer_mask)
            .field("team_filter", &self.team_filter)
            .field("in_range", &self.in_range.len())
            .finish_non_exhaustive()
    }
}

/// Ids that entered (`current \ previous`) and exited
/// (`previous \ current`) between two occupancy snapshots.
pub(crate) fn transitions(
    previous: &HashSet<u64>,
    current: &HashSet<u64>,
) -> (Vec<u64>, Vec<u64>) {
    let entered = current.difference(previous).copied().collect();
    let exited = previous.difference(current).copied().collect();
    (entered, exited)
}
