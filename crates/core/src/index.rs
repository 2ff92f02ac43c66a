//! Single-node index wrapper and engine dispatch.
//!
//! [`Index`] presents add/search/remove/update over one or more logical
//! shards in a single process, the simplified view for deployments that
//! need no distribution. Documents are mapped to logical shards by a stable
//! hash of their id; searches query every shard and merge by the same rule
//! the distributed coordinator uses.
//!
//! [`IndexEngine`] is the deployment-mode variant servers store: a
//! shard-count-one index is served by the wrapper (which carries the
//! per-id mutation API), anything wider by the distributed coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::clustering::ClusteringParams;
use crate::error::IndexError;
use crate::ivf::coordinator::DistributedIvf;
use crate::ivf::flat::IvfFlatIndex;
use crate::search::{merge_hits, Hit, SearchOptions, SearchOutcome};

/// Lifecycle of an index: `Empty → Trained → Populated`.
///
/// `Trained` means centroids exist but no postings; only `Populated`
/// permits search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    Empty,
    Trained,
    Populated,
}

/// Supported index families. IVF is the only family the core implements;
/// the tagged variant keeps the door open without virtual dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexFamily {
    Ivf,
}

impl FromStr for IndexFamily {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ivf" => Ok(IndexFamily::Ivf),
            other => Err(IndexError::InvalidArgument(format!(
                "unknown index type '{other}' (supported: ivf)"
            ))),
        }
    }
}

impl fmt::Display for IndexFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexFamily::Ivf => write!(f, "ivf"),
        }
    }
}

/// Tagged variant over index families with the narrow capability set
/// `{build, search, size, dimension}` plus the mutation API.
#[derive(Debug)]
pub enum AnyIndex {
    Ivf(IvfFlatIndex),
}

impl AnyIndex {
    pub fn new(family: IndexFamily, dim: usize) -> Self {
        match family {
            IndexFamily::Ivf => AnyIndex::Ivf(IvfFlatIndex::new(dim)),
        }
    }

    pub fn family(&self) -> IndexFamily {
        match self {
            AnyIndex::Ivf(_) => IndexFamily::Ivf,
        }
    }

    pub fn build(&mut self, vectors: &[f32], ids: &[i64]) -> Result<(), IndexError> {
        match self {
            AnyIndex::Ivf(idx) => idx.build(vectors, ids),
        }
    }

    pub fn add(&mut self, vectors: &[f32], ids: &[i64]) -> Result<(), IndexError> {
        match self {
            AnyIndex::Ivf(idx) => idx.add(vectors, ids),
        }
    }

    pub fn search(&self, query: &[f32], k: usize, nprobe: usize) -> Result<Vec<Hit>, IndexError> {
        match self {
            AnyIndex::Ivf(idx) => idx.search(query, k, nprobe),
        }
    }

    pub fn remove(&mut self, id: i64) -> bool {
        match self {
            AnyIndex::Ivf(idx) => idx.remove(id),
        }
    }

    pub fn update(&mut self, id: i64, vector: &[f32]) -> Result<bool, IndexError> {
        match self {
            AnyIndex::Ivf(idx) => idx.update(id, vector),
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            AnyIndex::Ivf(idx) => idx.size(),
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            AnyIndex::Ivf(idx) => idx.dimension(),
        }
    }

    pub fn state(&self) -> IndexState {
        match self {
            AnyIndex::Ivf(idx) => idx.state(),
        }
    }

    /// Trained centroid count; zero before training.
    pub fn nlist(&self) -> usize {
        match self {
            AnyIndex::Ivf(idx) => idx.nlist(),
        }
    }
}

/// Finalizer from splitmix64; stable across platforms and releases, unlike
/// the std hasher.
fn stable_hash(id: i64) -> u64 {
    let mut z = (id as u64).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Single-node index over hash-partitioned logical shards.
#[derive(Debug)]
pub struct Index {
    name: String,
    dim: usize,
    family: IndexFamily,
    shards: Vec<AnyIndex>,
    version: u64,
}

impl Index {
    pub fn new(
        name: impl Into<String>,
        dim: usize,
        shard_count: usize,
        family: IndexFamily,
    ) -> Result<Self, IndexError> {
        if dim == 0 {
            return Err(IndexError::InvalidDimension(
                "dimension must be > 0".into(),
            ));
        }
        if shard_count == 0 {
            return Err(IndexError::InvalidArgument("shard_count must be > 0".into()));
        }
        let shards = (0..shard_count).map(|_| AnyIndex::new(family, dim)).collect();
        Ok(Self {
            name: name.into(),
            dim,
            family,
            shards,
            version: 0,
        })
    }

    /// Fix every logical shard's centroid count instead of deriving it from
    /// the shard's share of the data.
    pub fn with_nlist(mut self, nlist: usize) -> Self {
        self.shards = self
            .shards
            .into_iter()
            .map(|shard| match shard {
                AnyIndex::Ivf(idx) => AnyIndex::Ivf(idx.with_nlist(nlist)),
            })
            .collect();
        self
    }

    /// Override the clustering parameters for every logical shard.
    pub fn with_params(mut self, params: ClusteringParams) -> Self {
        self.shards = self
            .shards
            .into_iter()
            .map(|shard| match shard {
                AnyIndex::Ivf(idx) => AnyIndex::Ivf(idx.with_params(params.clone())),
            })
            .collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn family(&self) -> IndexFamily {
        self.family
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn size(&self) -> u64 {
        self.shards.iter().map(AnyIndex::size).sum()
    }

    /// Total trained centroids across all logical shards.
    pub fn nlist(&self) -> usize {
        self.shards.iter().map(AnyIndex::nlist).sum()
    }

    /// Monotonic counter bumped by every successful mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Aggregate state: `Populated` once any shard holds postings,
    /// `Empty` while none is trained.
    pub fn state(&self) -> IndexState {
        if self.shards.iter().any(|s| s.state() == IndexState::Populated) {
            IndexState::Populated
        } else if self.shards.iter().any(|s| s.state() == IndexState::Trained) {
            IndexState::Trained
        } else {
            IndexState::Empty
        }
    }

    fn shard_for_id(&self, id: i64) -> usize {
        (stable_hash(id) % self.shards.len() as u64) as usize
    }

    /// Partition the input by id hash and hand each slice to its shard.
    fn partition(&self, vectors: &[f32], ids: &[i64]) -> Vec<(Vec<f32>, Vec<i64>)> {
        let d = self.dim;
        let mut parts: Vec<(Vec<f32>, Vec<i64>)> = (0..self.shards.len())
            .map(|_| (Vec::new(), Vec::new()))
            .collect();
        for (i, &id) in ids.iter().enumerate() {
            let shard = self.shard_for_id(id);
            parts[shard].0.extend_from_slice(&vectors[i * d..(i + 1) * d]);
            parts[shard].1.push(id);
        }
        parts
    }

    /// Build every logical shard from its hash-partitioned slice of the
    /// input. Shards that receive no vectors stay empty and are skipped by
    /// search.
    pub fn build(&mut self, vectors: &[f32], ids: &[i64]) -> Result<(), IndexError> {
        if ids.is_empty() {
            return Err(IndexError::InvalidArgument(
                "build requires at least one vector".into(),
            ));
        }
        if vectors.len() != ids.len() * self.dim {
            return Err(IndexError::shape(vectors.len(), ids.len(), self.dim));
        }

        let parts = self.partition(vectors, ids);
        for (shard, (vecs, part_ids)) in self.shards.iter_mut().zip(parts) {
            if part_ids.is_empty() {
                continue;
            }
            shard.build(&vecs, &part_ids)?;
        }
        self.version += 1;
        Ok(())
    }

    /// Append after build; shards assign with their trained centroids.
    pub fn add(&mut self, vectors: &[f32], ids: &[i64]) -> Result<(), IndexError> {
        if vectors.len() != ids.len() * self.dim {
            return Err(IndexError::shape(vectors.len(), ids.len(), self.dim));
        }
        if self.state() != IndexState::Populated {
            return Err(IndexError::InvalidState(
                "append requires a built index".into(),
            ));
        }

        let parts = self.partition(vectors, ids);
        for (shard, (vecs, part_ids)) in self.shards.iter_mut().zip(parts) {
            if part_ids.is_empty() {
                continue;
            }
            // A shard that stayed empty at build time has no centroids;
            // bootstrap it with its first appended vectors.
            match shard.state() {
                IndexState::Empty => shard.build(&vecs, &part_ids)?,
                _ => shard.add(&vecs, &part_ids)?,
            }
        }
        self.version += 1;
        Ok(())
    }

    /// Query all logical shards and merge distance-ascending, ids ascending
    /// on ties.
    pub fn search(&self, query: &[f32], k: usize, nprobe: usize) -> Result<Vec<Hit>, IndexError> {
        if self.state() != IndexState::Populated {
            return Err(IndexError::InvalidState(
                "search requires a built index".into(),
            ));
        }
        let mut lists = Vec::with_capacity(self.shards.len());
        for shard in &self.shards {
            if shard.state() != IndexState::Populated {
                continue;
            }
            lists.push(shard.search(query, k, nprobe)?);
        }
        Ok(merge_hits(lists, k))
    }

    /// Remove every posting with the given id from its owning shard.
    pub fn remove(&mut self, id: i64) -> bool {
        let shard = self.shard_for_id(id);
        let removed = self.shards[shard].remove(id);
        if removed {
            self.version += 1;
        }
        removed
    }

    /// Replace the vector stored under `id`. Returns `false` when absent.
    pub fn update(&mut self, id: i64, vector: &[f32]) -> Result<bool, IndexError> {
        let shard = self.shard_for_id(id);
        let updated = self.shards[shard].update(id, vector)?;
        if updated {
            self.version += 1;
        }
        Ok(updated)
    }
}

/// Tagged variant over deployment modes.
///
/// A `shard_count == 1` index needs no distribution and is served by the
/// single-node wrapper, which carries the per-id mutation API. Wider
/// indexes go through the distributed coordinator; per-id mutations there
/// are rebuild-semantics and rejected.
#[derive(Debug)]
pub enum IndexEngine {
    Single(Index),
    Distributed(DistributedIvf),
}

impl IndexEngine {
    pub fn name(&self) -> &str {
        match self {
            IndexEngine::Single(idx) => idx.name(),
            IndexEngine::Distributed(idx) => idx.name(),
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            IndexEngine::Single(idx) => idx.dimension(),
            IndexEngine::Distributed(idx) => idx.dimension(),
        }
    }

    pub fn state(&self) -> IndexState {
        match self {
            IndexEngine::Single(idx) => idx.state(),
            IndexEngine::Distributed(idx) => idx.state(),
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            IndexEngine::Single(idx) => idx.size(),
            IndexEngine::Distributed(idx) => idx.size(),
        }
    }

    pub fn nlist(&self) -> usize {
        match self {
            IndexEngine::Single(idx) => idx.nlist(),
            IndexEngine::Distributed(idx) => idx.nlist(),
        }
    }

    pub fn shard_count(&self) -> u32 {
        match self {
            IndexEngine::Single(idx) => idx.shard_count() as u32,
            IndexEngine::Distributed(idx) => idx.shard_count(),
        }
    }

    /// Hosting nodes; empty for a single-node index, which lives wherever
    /// its process runs.
    pub fn nodes(&self) -> Vec<String> {
        match self {
            IndexEngine::Single(_) => Vec::new(),
            IndexEngine::Distributed(idx) => idx.nodes().to_vec(),
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            IndexEngine::Single(idx) => idx.version(),
            IndexEngine::Distributed(idx) => idx.version(),
        }
    }

    pub fn is_trained(&self) -> bool {
        match self {
            IndexEngine::Single(idx) => idx.state() != IndexState::Empty,
            IndexEngine::Distributed(idx) => idx.is_trained(),
        }
    }

    pub fn build(&mut self, vectors: &[f32], ids: &[i64]) -> Result<(), IndexError> {
        match self {
            IndexEngine::Single(idx) => idx.build(vectors, ids),
            IndexEngine::Distributed(idx) => idx.build(vectors, ids),
        }
    }

    pub fn add(&mut self, vectors: &[f32], ids: &[i64]) -> Result<(), IndexError> {
        match self {
            IndexEngine::Single(idx) => idx.add(vectors, ids),
            IndexEngine::Distributed(idx) => idx.add(vectors, ids),
        }
    }

    pub fn search(&self, query: &[f32], k: usize, nprobe: usize) -> Result<SearchOutcome, IndexError> {
        self.search_with_opts(query, k, nprobe, &SearchOptions::default())
    }

    /// Search with a per-request deadline. The deadline only matters for
    /// the distributed fan-out; a single-node scan runs to completion.
    pub fn search_with_opts(
        &self,
        query: &[f32],
        k: usize,
        nprobe: usize,
        opts: &SearchOptions,
    ) -> Result<SearchOutcome, IndexError> {
        match self {
            IndexEngine::Single(idx) => Ok(SearchOutcome {
                hits: idx.search(query, k, nprobe)?,
                unresponsive_shards: Vec::new(),
            }),
            IndexEngine::Distributed(idx) => idx.search_with_opts(query, k, nprobe, opts),
        }
    }

    /// Remove every posting with the given id. Returns whether any existed.
    pub fn remove(&mut self, id: i64) -> Result<bool, IndexError> {
        match self {
            IndexEngine::Single(idx) => Ok(idx.remove(id)),
            IndexEngine::Distributed(_) => Err(IndexError::InvalidState(
                "per-id mutations require a single-shard index; rebuild the distributed index instead"
                    .into(),
            )),
        }
    }

    /// Replace the vector stored under `id`. Returns `false` when absent.
    pub fn update(&mut self, id: i64, vector: &[f32]) -> Result<bool, IndexError> {
        match self {
            IndexEngine::Single(idx) => idx.update(id, vector),
            IndexEngine::Distributed(_) => Err(IndexError::InvalidState(
                "per-id mutations require a single-shard index; rebuild the distributed index instead"
                    .into(),
            )),
        }
    }

    pub fn as_distributed(&self) -> Option<&DistributedIvf> {
        match self {
            IndexEngine::Single(_) => None,
            IndexEngine::Distributed(idx) => Some(idx),
        }
    }

    pub fn as_distributed_mut(&mut self) -> Option<&mut DistributedIvf> {
        match self {
            IndexEngine::Single(_) => None,
            IndexEngine::Distributed(idx) => Some(idx),
        }
    }
}
