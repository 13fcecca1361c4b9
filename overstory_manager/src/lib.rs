// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=overstory_manager --heading-base-level=0

//! Overstory Manager: the thread-safe facade over the spatial indices.
//!
//! [`SpatialManager`] owns a primary [`SpatialIndex`](overstory_index::SpatialIndex)
//! (and optional per-layer sub-indices), routes every query form to it behind
//! a reader-writer lock, caches repeated AABB/sphere queries within a frame,
//! gathers per-query-type profiling data, and can rebuild the primary index
//! into the backend the current object distribution favors.
//!
//! Objects are registered on a [`Layer`]; queries filter by [`LayerMask`].
//! Typical collaborators: a renderer calling
//! [`SpatialManager::query_frustum`] with its visible-layer mask, a physics
//! broad phase calling [`SpatialManager::visit_aabb`] per body, and game code
//! going through a domain wrapper.
//!
//! # Example
//!
//! ```rust
//! use glam::Vec3A;
//! use overstory_geom::Aabb;
//! use overstory_manager::{Layer, LayerMask, ManagerConfig, SpatialManager};
//!
//! let manager = SpatialManager::new(ManagerConfig::default());
//! manager.register_object(
//!     7,
//!     Aabb::from_center_half_extents(Vec3A::ZERO, Vec3A::ONE),
//!     Layer::Units,
//! );
//!
//! let hits = manager.query_sphere(Vec3A::ZERO, 5.0, LayerMask::UNITS);
//! assert_eq!(hits, vec![7]);
//! ```

pub mod layer;
pub mod manager;
pub mod stats;

pub use layer::{Layer, LayerMask};
pub use manager::{LAYER_INDEX_SLOTS, ManagerConfig, SpatialManager};
pub use stats::{FrameStats, ProfileData};
