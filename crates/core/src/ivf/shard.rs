//! A shard owns a disjoint subset of inverted lists and serves
//! probe-restricted search over them.
//!
//! Centroid ownership is assigned by the coordinator and stable for the
//! lifetime of the index. The scan is sequential within a shard; the
//! coordinator fans out across shards.

use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;
use std::collections::HashMap;

use crate::distance::l2sq;
use crate::error::IndexError;
use crate::ivf::posting::InvertedList;
use crate::search::Hit;

/// A partition of the centroid space hosted on one node.
#[derive(Debug, Clone)]
pub struct IvfShard {
    shard_id: u32,
    node_id: String,
    dim: usize,
    postings: HashMap<u32, InvertedList>,
    /// Cleared when a storage backing or peer goes away; searches then
    /// surface `ShardUnavailable` and the coordinator degrades to a
    /// partial result.
    available: bool,
}

impl IvfShard {
    pub fn new(shard_id: u32, node_id: impl Into<String>, dim: usize) -> Self {
        Self {
            shard_id,
            node_id: node_id.into(),
            dim,
            postings: HashMap::new(),
            available: true,
        }
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Total postings across all owned lists.
    pub fn len(&self) -> u64 {
        self.postings.values().map(|l| l.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.values().all(|l| l.is_empty())
    }

    /// Number of centroids this shard owns a list for.
    pub fn num_lists(&self) -> usize {
        self.postings.len()
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    /// Insert a list for `centroid`, or extend the existing one in append
    /// order.
    pub fn add_posting(&mut self, centroid: u32, list: InvertedList) {
        match self.postings.get_mut(&centroid) {
            Some(existing) => existing.extend(&list),
            None => {
                self.postings.insert(centroid, list);
            }
        }
    }

    pub fn posting(&self, centroid: u32) -> Option<&InvertedList> {
        self.postings.get(&centroid)
    }

    pub fn posting_mut(&mut self, centroid: u32) -> Option<&mut InvertedList> {
        self.postings.get_mut(&centroid)
    }

    /// Iterate owned `(centroid, list)` pairs in unspecified order.
    pub fn postings(&self) -> impl Iterator<Item = (u32, &InvertedList)> {
        self.postings.iter().map(|(&c, l)| (c, l))
    }

    pub fn postings_mut(&mut self) -> impl Iterator<Item = (u32, &mut InvertedList)> {
        self.postings.iter_mut().map(|(&c, l)| (c, l))
    }

    /// Drop all lists (rebuild path).
    pub fn clear(&mut self) {
        self.postings.clear();
    }

    /// Scan the candidate centroids this shard owns and return the local
    /// top-k by L2². Candidates the shard does not own are ignored; a shard
    /// owning none of them returns an empty vector.
    ///
    /// Equal distances keep the entry encountered first: insertion order
    /// within a list, then the order `candidate_centroids` supplies.
    pub fn search_local(
        &self,
        candidate_centroids: &[u32],
        query: &[f32],
        k: usize,
    ) -> Result<Vec<Hit>, IndexError> {
        if !self.available {
            return Err(IndexError::ShardUnavailable(self.shard_id));
        }

        // Max-heap of (distance, scan_seq, id); among equal distances the
        // later-scanned entry is the greater one and gets evicted first.
        let mut heap: BinaryHeap<(OrderedFloat<f32>, usize, i64)> =
            BinaryHeap::with_capacity(k + 1);
        let mut seq = 0usize;

        for &centroid in candidate_centroids {
            let Some(list) = self.postings.get(&centroid) else {
                continue;
            };
            for (id, vector) in list.iter() {
                let dist = l2sq(vector, query, self.dim);
                heap.push((OrderedFloat(dist), seq, id));
                if heap.len() > k {
                    heap.pop();
                }
                seq += 1;
            }
        }

        let hits = heap
            .into_sorted_vec()
            .into_iter()
            .map(|(dist, _, id)| Hit {
                id,
                distance: dist.0,
            })
            .collect();
        Ok(hits)
    }
}
