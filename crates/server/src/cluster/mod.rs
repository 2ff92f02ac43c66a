//! Cluster membership for multi-node deployments.
//!
//! Nodes discover each other through seed nodes, exchange periodic
//! heartbeats, and mark peers inactive after a missed-heartbeat window.
//! There is no consensus layer: index state is rebuilt or restored from
//! snapshots, and the anti-entropy loop flags divergence.
//!
//! - **types**: node descriptors shared over the wire.
//! - **registry**: the membership table and failure detector.

/// Membership table and failure detection.
pub mod registry;
/// Node descriptors.
pub mod types;

pub use registry::NodeRegistry;
pub use types::NodeInfo;
