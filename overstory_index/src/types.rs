// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Query filter, per-query statistics, and backend identification.

/// Filter applied to every spatial query.
///
/// An object passes when its layer bit is set in `layer_mask` and its id is
/// not `exclude_id`. Ids are expected to be nonzero; `exclude_id == 0` (the
/// default) therefore excludes nothing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueryFilter {
    /// Bitmask of layers to include. Bit `n` admits layer `n`.
    pub layer_mask: u64,
    /// Single id to exclude from results (typically the querying object).
    pub exclude_id: u64,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            layer_mask: u64::MAX,
            exclude_id: 0,
        }
    }
}

impl QueryFilter {
    /// Filter admitting every layer, excluding nothing.
    pub const ALL: Self = Self {
        layer_mask: u64::MAX,
        exclude_id: 0,
    };

    /// Create a filter for a layer mask.
    pub const fn from_mask(layer_mask: u64) -> Self {
        Self {
            layer_mask,
            exclude_id: 0,
        }
    }

    /// Exclude one id, keeping the layer mask.
    pub const fn exclude(mut self, id: u64) -> Self {
        self.exclude_id = id;
        self
    }

    /// Whether an object with this id and layer passes the filter.
    #[inline]
    pub fn passes(&self, id: u64, layer: u64) -> bool {
        id != self.exclude_id && self.layer_mask & (1_u64 << layer) != 0
    }
}

/// Traversal counters recorded while answering one query.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryStats {
    /// Index nodes (or grid cells) visited.
    pub nodes_visited: usize,
    /// Objects whose bounds were tested against the query primitive.
    pub objects_tested: usize,
    /// Objects that passed and were returned.
    pub objects_returned: usize,
}

impl QueryStats {
    /// Zero all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Which spatial index structure backs a [`SpatialIndex`](crate::SpatialIndex).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IndexKind {
    /// Uniform hash grid.
    HashGrid,
    /// Octree with tight node bounds.
    Octree,
    /// Octree with loose (scaled) node bounds.
    LooseOctree,
    /// Surface-area-heuristic bounding volume hierarchy.
    Bvh,
}

impl IndexKind {
    /// Human-readable backend name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::HashGrid => "HashGrid",
            Self::Octree => "Octree",
            Self::LooseOctree => "LooseOctree",
            Self::Bvh => "BVH",
        }
    }
}
