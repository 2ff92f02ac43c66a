//! Node descriptors shared over the wire.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// One cluster member as seen by the membership table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub address: String,
    pub port: u16,
    pub is_active: bool,
    /// Milliseconds since the epoch of the last heartbeat received.
    pub last_heartbeat_ms: u64,
    /// Shards this node hosts, per the stable placement rule.
    pub shard_ids: Vec<u32>,
}

impl NodeInfo {
    pub fn new(node_id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            node_id: node_id.into(),
            address: address.into(),
            port,
            is_active: true,
            last_heartbeat_ms: now_ms(),
            shard_ids: Vec::new(),
        }
    }

    /// `host:port` string for transport clients.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Wall-clock milliseconds since the epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
