//! shardann-server — HTTP server for the shardann IVF index.
//!
//! Provides the REST API, the shard RPC transport, cluster membership, the
//! bulk loader, and the anti-entropy loop. Index logic lives in
//! `shardann-core`.

/// Anti-entropy loop: periodic index-version reconciliation across peers.
pub mod antientropy;
/// REST API layer: Axum router, HTTP handlers, models, metrics.
pub mod api;
/// Bulk vector ingestion with progress tracking.
pub mod bulk;
/// Cluster membership: node info, registry, and failure detection.
pub mod cluster;
/// HTTP shard transport for multi-host deployments.
pub mod transport;
