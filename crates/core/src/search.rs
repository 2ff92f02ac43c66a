//! Search result types and the distance-ascending merge rule.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config;

/// A single search result: caller-supplied id plus squared L2 distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: i64,
    pub distance: f32,
}

/// Per-request search knobs.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Deadline for the whole request. Shards not reached before expiry are
    /// abandoned and the outcome is marked partial.
    pub timeout: Duration,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(config::DEFAULT_SEARCH_TIMEOUT_MS),
        }
    }
}

/// Outcome of a distributed search: merged hits plus the shards that did
/// not respond. An empty `unresponsive_shards` means the result is complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Global top-k, distance ascending, id ascending on ties.
    pub hits: Vec<Hit>,
    /// Shards skipped due to unavailability or the request deadline.
    pub unresponsive_shards: Vec<u32>,
}

impl SearchOutcome {
    /// True when at least one shard did not contribute.
    pub fn is_partial(&self) -> bool {
        !self.unresponsive_shards.is_empty()
    }
}

/// Merge per-shard hit lists into the global top-k.
///
/// Order is distance ascending with ids ascending on ties, so a fixed index
/// and query always produce the same hit sequence.
pub fn merge_hits(lists: Vec<Vec<Hit>>, k: usize) -> Vec<Hit> {
    let mut merged: Vec<Hit> = lists.into_iter().flatten().collect();
    merged.sort_unstable_by_key(|h| (OrderedFloat(h.distance), h.id));
    merged.truncate(k);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: i64, distance: f32) -> Hit {
        Hit { id, distance }
    }

    #[test]
    fn test_merge_orders_by_distance() {
        let merged = merge_hits(
            vec![vec![hit(1, 3.0), hit(2, 1.0)], vec![hit(3, 2.0)]],
            10,
        );
        let ids: Vec<i64> = merged.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_merge_breaks_ties_by_id_ascending() {
        let merged = merge_hits(vec![vec![hit(9, 1.0)], vec![hit(2, 1.0), hit(5, 1.0)]], 10);
        let ids: Vec<i64> = merged.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[test]
    fn test_merge_truncates_to_k() {
        let merged = merge_hits(vec![(0..20).map(|i| hit(i, i as f32)).collect()], 5);
        assert_eq!(merged.len(), 5);
    }

    #[test]
    fn test_empty_outcome_is_complete() {
        let outcome = SearchOutcome {
            hits: Vec::new(),
            unresponsive_shards: Vec::new(),
        };
        assert!(!outcome.is_partial());
    }
}
