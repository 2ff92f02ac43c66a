//! IVF building blocks.
//!
//! - [`posting`] — append-only inverted lists keyed by centroid.
//! - [`shard`] — a disjoint subset of inverted lists served from one node.
//! - [`flat`] — a self-contained single-node IVF index.
//! - [`coordinator`] — the distributed build/search coordinator.

/// Distributed IVF coordinator: global quantizer, shard placement, merge.
pub mod coordinator;
/// Single-node IVF-Flat index over one shard's worth of postings.
pub mod flat;
/// Append-only inverted lists of (id, vector) pairs.
pub mod posting;
/// Shard: centroid-keyed map of inverted lists with probe-restricted search.
pub mod shard;

pub use coordinator::{DistributedIvf, RemoteShard, ShardHandle};
pub use flat::IvfFlatIndex;
pub use posting::InvertedList;
pub use shard::IvfShard;
