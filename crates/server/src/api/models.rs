//! Request and response data transfer objects for the REST API.
//!
//! All types derive `Serialize` and/or `Deserialize` for JSON marshalling
//! via Axum. The shard RPC types double as the wire protocol between
//! cluster members.

use serde::{Deserialize, Serialize};
use shardann_core::index::IndexState;
use shardann_core::Hit;

/// `POST /indexes` body.
#[derive(Debug, Deserialize)]
pub struct CreateIndexRequest {
    pub name: String,
    pub dimension: usize,
    /// Expected dataset size; drives the centroid count.
    pub expected_n: u64,
    /// Placement granularity. Defaults to one shard per cluster node.
    pub shard_count: Option<u32>,
    /// Explicit centroid count override for small or test datasets.
    pub nlist: Option<usize>,
    /// Deterministic training seed.
    pub seed: Option<u64>,
}

/// `POST /indexes/:name/build` and `POST /indexes/:name/vectors` body.
#[derive(Debug, Deserialize)]
pub struct VectorsPayload {
    /// Flat `ids.len() * dimension` buffer.
    pub vectors: Vec<f32>,
    pub ids: Vec<i64>,
}

/// `PUT /indexes/:name/vectors/:id` body.
#[derive(Debug, Deserialize)]
pub struct UpdateVectorRequest {
    pub vector: Vec<f32>,
}

/// `POST /indexes/:name/search` body.
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: Vec<f32>,
    pub k: usize,
    pub nprobe: usize,
    /// Per-request deadline; defaults to the server-wide setting.
    pub timeout_ms: Option<u64>,
}

/// Search response: hits plus the partial-result marker.
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<Hit>,
    /// True when at least one shard did not respond.
    pub partial: bool,
    pub unresponsive_shards: Vec<u32>,
}

/// `GET /indexes/:name/stats` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexStats {
    pub name: String,
    pub dimension: usize,
    pub state: IndexState,
    pub size: u64,
    pub nlist: usize,
    pub shard_count: u32,
    pub nodes: Vec<String>,
    pub version: u64,
}

/// `POST /indexes/:name/bulk` body.
#[derive(Debug, Deserialize)]
pub struct BulkLoadRequest {
    pub vectors: Vec<f32>,
    pub ids: Vec<i64>,
    pub batch_size: Option<usize>,
}

/// `POST /indexes/:name/bulk` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct BulkLoadStarted {
    pub load_id: String,
}

/// Status of a shard RPC response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShardStatus {
    Ok,
    Unavailable,
    BadRequest,
}

/// Wire request for a probe-restricted scan on a remote member.
#[derive(Debug, Serialize, Deserialize)]
pub struct ShardSearchRequest {
    pub index: String,
    pub query: Vec<f32>,
    pub k: u32,
    /// Candidate centroids, already filtered to the target member's shards.
    pub centroids: Vec<u32>,
}

/// Wire response for a shard scan.
#[derive(Debug, Serialize, Deserialize)]
pub struct ShardSearchResponse {
    pub hits: Vec<Hit>,
    pub status: ShardStatus,
}

/// `POST /cluster/join` body.
#[derive(Debug, Serialize, Deserialize)]
pub struct JoinRequest {
    pub node_id: String,
    pub address: String,
    pub port: u16,
}

/// `POST /cluster/heartbeat` body.
#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub node_id: String,
}

/// `GET /health` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub indexes: usize,
}
