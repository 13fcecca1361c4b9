// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Query profiling accumulators.

/// Accumulated statistics for one query type.
#[derive(Clone, Debug, Default)]
pub struct ProfileData {
    /// Queries recorded.
    pub query_count: usize,
    /// Total wall time across those queries.
    pub total_time_ms: f32,
    /// Index nodes visited in total.
    pub total_nodes_visited: usize,
    /// Object bounds tested in total.
    pub total_objects_tested: usize,
    /// Objects returned in total.
    pub total_objects_returned: usize,
}

impl ProfileData {
    /// Zero all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Mean query time, zero when nothing was recorded.
    pub fn average_time_ms(&self) -> f32 {
        if self.query_count > 0 {
            self.total_time_ms / self.query_count as f32
        } else {
            0.0
        }
    }
}

/// Counters reset at the start of each frame by
/// [`SpatialManager::update`](crate::SpatialManager::update).
#[derive(Copy, Clone, Debug, Default)]
pub struct FrameStats {
    /// Profiled queries issued this frame.
    pub queries_this_frame: usize,
    /// Objects whose bounds changed this frame.
    pub objects_updated: usize,
    /// Objects registered this frame.
    pub objects_inserted: usize,
    /// Objects unregistered this frame.
    pub objects_removed: usize,
    /// Wall time spent in profiled queries this frame.
    pub total_query_time_ms: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_handles_empty() {
        let mut p = ProfileData::default();
        assert_eq!(p.average_time_ms(), 0.0);
        p.query_count = 4;
        p.total_time_ms = 2.0;
        assert_eq!(p.average_time_ms(), 0.5);
        p.reset();
        assert_eq!(p.query_count, 0);
    }
}
