//! Distributed IVF coordinator.
//!
//! The coordinator owns the global centroid table and the shard handles.
//! Build trains a single global quantizer on a sample, assigns every vector
//! to its closest centroid, and routes the resulting inverted lists to
//! shards; centroid `c` always lands on shard `c % shard_count`, so a
//! query's probe set uniquely determines the shards it must touch.

use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use crate::clustering::sample::sample_reservoir;
use crate::clustering::{Centroids, Clustering, ClusteringParams};
use crate::config;
use crate::distance::{argmin_l2sq, nearest_centroids};
use crate::error::IndexError;
use crate::index::IndexState;
use crate::ivf::posting::InvertedList;
use crate::ivf::shard::IvfShard;
use crate::search::{merge_hits, Hit, SearchOptions, SearchOutcome};

/// Request/response access to a shard hosted on another cluster member.
///
/// Local shards bypass this; the server crate implements it over HTTP.
pub trait RemoteShard: Send + Sync {
    fn search(
        &self,
        query: &[f32],
        k: usize,
        candidate_centroids: &[u32],
    ) -> Result<Vec<Hit>, IndexError>;
}

/// A shard slot: either held in this process or reached via transport.
pub enum ShardHandle {
    Local(IvfShard),
    Remote {
        node_id: String,
        client: Box<dyn RemoteShard>,
    },
}

impl ShardHandle {
    pub fn node_id(&self) -> &str {
        match self {
            ShardHandle::Local(shard) => shard.node_id(),
            ShardHandle::Remote { node_id, .. } => node_id,
        }
    }

    pub fn as_local(&self) -> Option<&IvfShard> {
        match self {
            ShardHandle::Local(shard) => Some(shard),
            ShardHandle::Remote { .. } => None,
        }
    }

    pub fn as_local_mut(&mut self) -> Option<&mut IvfShard> {
        match self {
            ShardHandle::Local(shard) => Some(shard),
            ShardHandle::Remote { .. } => None,
        }
    }
}

impl fmt::Debug for ShardHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardHandle::Local(shard) => f.debug_tuple("Local").field(shard).finish(),
            ShardHandle::Remote { node_id, .. } => {
                f.debug_struct("Remote").field("node_id", node_id).finish()
            }
        }
    }
}

/// Pick the centroid count for an expected dataset size.
pub fn nlist_for(expected_n: u64) -> usize {
    if expected_n < config::NLIST_SMALL_N {
        ((8.0 * (expected_n as f64).sqrt()).floor() as usize).max(1)
    } else if expected_n < 10_000_000 {
        config::NLIST_TIER_1
    } else if expected_n < 100_000_000 {
        config::NLIST_TIER_2
    } else if expected_n < 1_000_000_000 {
        config::NLIST_TIER_3
    } else {
        expected_n as usize
    }
}

/// Distributed IVF index: one global quantizer, postings partitioned across
/// shards placed on cluster nodes.
#[derive(Debug)]
pub struct DistributedIvf {
    name: String,
    dim: usize,
    nlist: usize,
    shard_count: u32,
    nodes: Vec<String>,
    params: ClusteringParams,
    centroids: Option<Centroids>,
    shards: Vec<ShardHandle>,
    state: IndexState,
    ntotal: u64,
    version: u64,
}

impl DistributedIvf {
    /// Create an empty index.
    ///
    /// `shard_count` is a placement granularity independent of the centroid
    /// count; shard `i` is hosted on `nodes[i % nodes.len()]`.
    pub fn new(
        name: impl Into<String>,
        dim: usize,
        expected_n: u64,
        shard_count: u32,
        nodes: Vec<String>,
    ) -> Result<Self, IndexError> {
        if dim == 0 || dim > config::MAX_DIMENSION {
            return Err(IndexError::InvalidDimension(format!(
                "dimension must be in [1, {}], got {dim}",
                config::MAX_DIMENSION
            )));
        }
        if shard_count == 0 {
            return Err(IndexError::InvalidArgument("shard_count must be > 0".into()));
        }
        if nodes.is_empty() {
            return Err(IndexError::InvalidArgument(
                "at least one node is required".into(),
            ));
        }
        if (shard_count as usize) < nodes.len() {
            return Err(IndexError::InvalidArgument(format!(
                "shard_count {shard_count} is smaller than node count {}",
                nodes.len()
            )));
        }

        let shards = (0..shard_count)
            .map(|i| {
                let node = nodes[i as usize % nodes.len()].clone();
                ShardHandle::Local(IvfShard::new(i, node, dim))
            })
            .collect();

        Ok(Self {
            name: name.into(),
            dim,
            nlist: nlist_for(expected_n),
            shard_count,
            nodes,
            params: ClusteringParams::default(),
            centroids: None,
            shards,
            state: IndexState::Empty,
            ntotal: 0,
            version: 0,
        })
    }

    /// Override the centroid count chosen from `expected_n`.
    pub fn with_nlist(mut self, nlist: usize) -> Self {
        self.nlist = nlist.max(1);
        self
    }

    /// Override the clustering parameters (seed, niter, nredo, ...).
    pub fn with_params(mut self, params: ClusteringParams) -> Self {
        self.params = params;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn nlist(&self) -> usize {
        self.nlist
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn state(&self) -> IndexState {
        self.state
    }

    pub fn is_trained(&self) -> bool {
        self.centroids.is_some()
    }

    /// Number of vectors stored across all shards.
    pub fn size(&self) -> u64 {
        self.ntotal
    }

    /// Monotonic counter bumped by every build/append; used by the
    /// anti-entropy loop to detect divergent replicas.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn centroids(&self) -> Option<&Centroids> {
        self.centroids.as_ref()
    }

    pub fn clustering_params(&self) -> &ClusteringParams {
        &self.params
    }

    /// The shard owning a centroid: `c % shard_count`. Stable for the life
    /// of the index.
    pub fn shard_for_centroid(&self, centroid: u32) -> u32 {
        centroid % self.shard_count
    }

    /// The node hosting a shard: `nodes[shard % nodes.len()]`.
    pub fn node_for_shard(&self, shard: u32) -> &str {
        &self.nodes[shard as usize % self.nodes.len()]
    }

    pub fn shard(&self, shard_id: u32) -> Option<&ShardHandle> {
        self.shards.get(shard_id as usize)
    }

    /// Mark a local shard available or unavailable (fault injection and
    /// storage-backed deployments).
    pub fn set_shard_available(&mut self, shard_id: u32, available: bool) {
        if let Some(shard) = self
            .shards
            .get_mut(shard_id as usize)
            .and_then(ShardHandle::as_local_mut)
        {
            shard.set_available(available);
        }
    }

    /// Replace a shard slot with a transport handle to the peer hosting it.
    pub fn set_remote_shard(
        &mut self,
        shard_id: u32,
        node_id: impl Into<String>,
        client: Box<dyn RemoteShard>,
    ) {
        if let Some(slot) = self.shards.get_mut(shard_id as usize) {
            *slot = ShardHandle::Remote {
                node_id: node_id.into(),
                client,
            };
        }
    }

    /// Train the global quantizer and distribute postings across shards.
    ///
    /// `vectors` is a flat `ids.len() * d` buffer. A failed build leaves the
    /// index in its prior state.
    pub fn build(&mut self, vectors: &[f32], ids: &[i64]) -> Result<(), IndexError> {
        if ids.is_empty() {
            return Err(IndexError::InvalidArgument(
                "build requires at least one vector".into(),
            ));
        }
        if vectors.len() != ids.len() * self.dim {
            return Err(IndexError::shape(vectors.len(), ids.len(), self.dim));
        }
        if self.shards.iter().any(|s| s.as_local().is_none()) {
            return Err(IndexError::InvalidState(
                "build requires all shards to be local".into(),
            ));
        }

        let started = Instant::now();
        let n = ids.len();
        let d = self.dim;
        let k = self.nlist;

        // Train the coarse quantizer on a uniform sample.
        let n_train = (k * config::BUILD_SAMPLE_FACTOR).min(n);
        let sample = sample_reservoir(vectors, d, n, n_train, self.params.seed);
        let clustering = Clustering::with_params(d, k, self.params.clone());
        let centroids = clustering.train(&sample, n_train)?;

        // Assign every vector to its closest centroid.
        let assignments: Vec<u32> = (0..n)
            .into_par_iter()
            .map(|i| argmin_l2sq(centroids.data(), d, k, &vectors[i * d..(i + 1) * d]) as u32)
            .collect();

        // Group postings by centroid, pre-reserving the expected average
        // list length.
        let expected_per_list = n / k + 1;
        let mut buckets: HashMap<u32, InvertedList> = HashMap::new();
        for (i, &centroid) in assignments.iter().enumerate() {
            buckets
                .entry(centroid)
                .or_insert_with(|| InvertedList::with_capacity(d, expected_per_list))
                .append(ids[i], &vectors[i * d..(i + 1) * d]);
        }

        // Route each non-empty bucket to its owning shard. From here on the
        // build cannot fail, so mutating in place preserves the
        // failed-build-keeps-prior-state guarantee.
        for slot in &mut self.shards {
            if let Some(shard) = slot.as_local_mut() {
                shard.clear();
            }
        }
        let num_buckets = buckets.len();
        for (centroid, list) in buckets {
            let shard_id = centroid % self.shard_count;
            let shard = self.shards[shard_id as usize]
                .as_local_mut()
                .expect("all shards verified local above");
            shard.add_posting(centroid, list);
        }

        self.centroids = Some(centroids);
        self.ntotal = n as u64;
        self.state = IndexState::Populated;
        self.version += 1;

        tracing::info!(
            index = %self.name,
            n,
            nlist = k,
            shards = self.shard_count,
            lists = num_buckets,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index built"
        );
        Ok(())
    }

    /// Append vectors after a build, assigning them with the already-trained
    /// centroids. No new centroids are trained; heavy post-build churn
    /// degrades recall until the index is rebuilt.
    pub fn add(&mut self, vectors: &[f32], ids: &[i64]) -> Result<(), IndexError> {
        let Some(centroids) = self.centroids.as_ref() else {
            return Err(IndexError::InvalidState(
                "append requires a trained index".into(),
            ));
        };
        if vectors.len() != ids.len() * self.dim {
            return Err(IndexError::shape(vectors.len(), ids.len(), self.dim));
        }

        let d = self.dim;
        let k = centroids.len();
        let assignments: Vec<u32> = (0..ids.len())
            .into_par_iter()
            .map(|i| argmin_l2sq(centroids.data(), d, k, &vectors[i * d..(i + 1) * d]) as u32)
            .collect();

        for (i, &centroid) in assignments.iter().enumerate() {
            let shard_id = centroid % self.shard_count;
            let shard = self.shards[shard_id as usize].as_local_mut().ok_or(
                IndexError::InvalidState("cannot append into a remote shard".into()),
            )?;
            match shard.posting_mut(centroid) {
                Some(list) => list.append(ids[i], &vectors[i * d..(i + 1) * d]),
                None => {
                    let mut list = InvertedList::new(d);
                    list.append(ids[i], &vectors[i * d..(i + 1) * d]);
                    shard.add_posting(centroid, list);
                }
            }
        }

        self.ntotal += ids.len() as u64;
        self.state = IndexState::Populated;
        self.version += 1;
        Ok(())
    }

    /// Probe the `nprobe` nearest centroids and merge shard-local results.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        nprobe: usize,
    ) -> Result<SearchOutcome, IndexError> {
        self.search_with_opts(query, k, nprobe, &SearchOptions::default())
    }

    /// [`search`](Self::search) with an explicit per-request deadline.
    ///
    /// Shards whose scan has not started when the deadline expires are
    /// abandoned; the outcome then carries them in `unresponsive_shards`.
    pub fn search_with_opts(
        &self,
        query: &[f32],
        k: usize,
        nprobe: usize,
        opts: &SearchOptions,
    ) -> Result<SearchOutcome, IndexError> {
        if self.state != IndexState::Populated {
            return Err(IndexError::InvalidState(format!(
                "search requires a populated index, state is {:?}",
                self.state
            )));
        }
        let centroids = self
            .centroids
            .as_ref()
            .expect("populated index has centroids");
        if query.len() != self.dim {
            return Err(IndexError::InvalidDimension(format!(
                "query has {} components, index dimension is {}",
                query.len(),
                self.dim
            )));
        }
        if k == 0 || k > config::MAX_K {
            return Err(IndexError::InvalidArgument(format!(
                "k must be in [1, {}], got {k}",
                config::MAX_K
            )));
        }
        if nprobe == 0 {
            return Err(IndexError::InvalidArgument("nprobe must be > 0".into()));
        }
        let nprobe = nprobe.min(self.nlist);

        let started = Instant::now();
        let deadline = started + opts.timeout;
        let probes = nearest_centroids(centroids.data(), self.dim, centroids.len(), query, nprobe);

        // Partition the probe set by owning shard, preserving probe order
        // within each subset.
        let mut by_shard: HashMap<u32, Vec<u32>> = HashMap::new();
        for &centroid in &probes {
            by_shard
                .entry(centroid % self.shard_count)
                .or_default()
                .push(centroid);
        }
        let mut partition: Vec<(u32, Vec<u32>)> = by_shard.into_iter().collect();
        partition.sort_unstable_by_key(|(shard, _)| *shard);

        // Fan out one task per affected shard.
        let responses: Vec<(u32, Result<Vec<Hit>, IndexError>)> = partition
            .par_iter()
            .map(|(shard_id, candidates)| {
                if Instant::now() > deadline {
                    return (*shard_id, Err(IndexError::Timeout(opts.timeout.as_millis() as u64)));
                }
                let result = match &self.shards[*shard_id as usize] {
                    ShardHandle::Local(shard) => shard.search_local(candidates, query, k),
                    ShardHandle::Remote { client, .. } => client.search(query, k, candidates),
                };
                (*shard_id, result)
            })
            .collect();

        let mut lists = Vec::with_capacity(responses.len());
        let mut unresponsive = Vec::new();
        for (shard_id, result) in responses {
            match result {
                // A response with NaN distances is malformed; treat the
                // shard as unavailable rather than poisoning the merge.
                Ok(hits) if hits.iter().any(|h| h.distance.is_nan()) => {
                    tracing::warn!(shard_id, "shard returned NaN distances, skipping");
                    unresponsive.push(shard_id);
                }
                Ok(hits) => lists.push(hits),
                Err(err) => {
                    tracing::warn!(shard_id, %err, "shard did not respond");
                    unresponsive.push(shard_id);
                }
            }
        }
        unresponsive.sort_unstable();

        let hits = merge_hits(lists, k);
        tracing::debug!(
            index = %self.name,
            k,
            nprobe,
            hits = hits.len(),
            partial = !unresponsive.is_empty(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "search finished"
        );
        Ok(SearchOutcome {
            hits,
            unresponsive_shards: unresponsive,
        })
    }

    /// Rehydrate an index from snapshot parts. Used by the snapshot codec.
    pub(crate) fn restore(
        name: String,
        dim: usize,
        nlist: usize,
        shard_count: u32,
        nodes: Vec<String>,
        centroids: Centroids,
        shards: Vec<IvfShard>,
        version: u64,
    ) -> Self {
        let ntotal: u64 = shards.iter().map(IvfShard::len).sum();
        let state = if ntotal > 0 {
            IndexState::Populated
        } else {
            IndexState::Trained
        };
        Self {
            name,
            dim,
            nlist,
            shard_count,
            nodes,
            params: ClusteringParams::default(),
            centroids: Some(centroids),
            shards: shards.into_iter().map(ShardHandle::Local).collect(),
            state,
            ntotal,
            version,
        }
    }
}
