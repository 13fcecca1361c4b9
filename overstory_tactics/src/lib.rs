// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=overstory_tactics --heading-base-level=0

//! Overstory Tactics: the game-facing spatial layer.
//!
//! [`Battlefield`] wraps a spatial manager with the vocabulary game code
//! actually speaks:
//!
//! - team/alive/targetable-filtered unit queries, sorted and k-nearest forms;
//! - vision and ability cones ([`ConeQuery`]);
//! - terrain raycasts, entity raycasts, and line-of-sight checks;
//! - walkability probes and obstacle collection for the pathfinder;
//! - range triggers firing [`SpatialEvent`]s as objects cross their radius.
//!
//! # Example
//!
//! ```rust
//! use glam::Vec3A;
//! use overstory_tactics::{Battlefield, BattlefieldConfig, TeamId};
//!
//! let field = Battlefield::new(BattlefieldConfig::default());
//! field.register_unit(1, Vec3A::new(3.0, 0.0, 0.0), 0.5, TeamId::Enemy);
//!
//! let hostiles = field.enemy_units_in_range(Vec3A::ZERO, 10.0, TeamId::Player, true);
//! assert_eq!(hostiles, vec![1]);
//! ```

pub mod battlefield;
pub mod triggers;
pub mod types;

pub use battlefield::{Battlefield, BattlefieldConfig};
pub use triggers::SpatialEventCallback;
pub use types::{
    ConeQuery, SpatialEvent, SpatialEventKind, TeamId, TerrainHit, UnitFlags, UnitRecord,
};
