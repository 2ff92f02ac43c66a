//! HTTP shard transport for multi-host deployments.
//!
//! Implements the core's [`RemoteShard`] trait by posting the shard RPC to
//! the peer hosting the shard. Local shards never go through here. Any
//! connection failure, timeout, or malformed response maps to
//! `ShardUnavailable`, which the coordinator degrades into a partial result.

use std::time::Duration;

use shardann_core::ivf::RemoteShard;
use shardann_core::{Hit, IndexError};

use crate::api::models::{ShardSearchRequest, ShardSearchResponse, ShardStatus};

/// Blocking HTTP client for one remote shard.
///
/// Searches run on the coordinator's worker pool, not the async runtime, so
/// the blocking reqwest client is the right tool here.
pub struct HttpShardClient {
    shard_id: u32,
    index: String,
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpShardClient {
    /// `peer_addr` is `host:port` of the member hosting the shard.
    pub fn new(
        shard_id: u32,
        index: impl Into<String>,
        peer_addr: &str,
        timeout: Duration,
    ) -> Result<Self, IndexError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::InvalidArgument(format!("transport client: {e}")))?;
        Ok(Self {
            shard_id,
            index: index.into(),
            url: format!("http://{peer_addr}/internal/shards/search"),
            client,
        })
    }
}

impl RemoteShard for HttpShardClient {
    fn search(
        &self,
        query: &[f32],
        k: usize,
        candidate_centroids: &[u32],
    ) -> Result<Vec<Hit>, IndexError> {
        let request = ShardSearchRequest {
            index: self.index.clone(),
            query: query.to_vec(),
            k: k as u32,
            centroids: candidate_centroids.to_vec(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .map_err(|e| {
                tracing::warn!(shard_id = self.shard_id, %e, "shard RPC failed");
                IndexError::ShardUnavailable(self.shard_id)
            })?;

        if !response.status().is_success() {
            tracing::warn!(
                shard_id = self.shard_id,
                status = %response.status(),
                "shard RPC rejected"
            );
            return Err(IndexError::ShardUnavailable(self.shard_id));
        }

        let body: ShardSearchResponse = response
            .json()
            .map_err(|_| IndexError::ShardUnavailable(self.shard_id))?;

        match body.status {
            ShardStatus::Ok => Ok(body.hits),
            ShardStatus::BadRequest => Err(IndexError::InvalidArgument(format!(
                "peer rejected shard {} request", self.shard_id
            ))),
            ShardStatus::Unavailable => Err(IndexError::ShardUnavailable(self.shard_id)),
        }
    }
}
