// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Index backend implementations.
//!
//! Three structures answer the same query contract with different tradeoffs:
//!
//! - [`hash_grid::HashGrid`]: O(1) updates; best for many similarly sized
//!   moving objects.
//! - [`octree::Octree`]: hierarchical partition; the loose variant tolerates
//!   motion without re-insertion.
//! - [`bvh::Bvh`]: SAH-built hierarchy; best query times for static or
//!   batch-updated sets, at rebuild cost.

pub mod bvh;
pub mod hash_grid;
pub mod octree;
