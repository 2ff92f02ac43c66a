//! Anti-entropy loop.
//!
//! Index state replicates through snapshots, not consensus, so replicas can
//! drift after a rebuild. This loop periodically compares per-index version
//! counters with every active peer and flags divergence in the logs and
//! metrics. Repair stays operator-driven (reload the snapshot); the search
//! contract tolerates stale replicas.

use std::time::Duration;

use shardann_core::registry::IndexRegistry;

use crate::api::metrics;
use crate::api::models::IndexStats;
use crate::cluster::NodeRegistry;

/// One reconciliation pass. Returns the number of divergent (index, peer)
/// pairs observed.
pub async fn reconcile_once(
    registry: &IndexRegistry,
    nodes: &NodeRegistry,
    self_node_id: &str,
    client: &reqwest::Client,
) -> usize {
    let mut divergences = 0;

    for peer in nodes.active() {
        if peer.node_id == self_node_id {
            continue;
        }
        for name in registry.list() {
            let Some(handle) = registry.get(&name) else {
                continue;
            };
            let local_version = handle.read().version();

            let url = format!("http://{}/indexes/{}/stats", peer.addr(), name);
            let stats: IndexStats = match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => match resp.json().await {
                    Ok(stats) => stats,
                    Err(_) => continue,
                },
                // A peer without the index or temporarily down is a
                // membership concern, not a divergence.
                _ => continue,
            };

            if stats.version != local_version {
                divergences += 1;
                metrics::record_divergence(&name, &peer.node_id);
                tracing::warn!(
                    index = %name,
                    peer = %peer.node_id,
                    local_version,
                    peer_version = stats.version,
                    "index version divergence detected"
                );
            }
        }
    }

    divergences
}

/// Background task: reconcile on a fixed interval until the process exits.
pub async fn run_loop(
    registry: IndexRegistry,
    nodes: NodeRegistry,
    self_node_id: String,
    interval: Duration,
) {
    let client = reqwest::Client::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let divergences = reconcile_once(&registry, &nodes, &self_node_id, &client).await;
        if divergences == 0 {
            tracing::debug!("anti-entropy pass clean");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_peers_is_clean() {
        let registry = IndexRegistry::new();
        let nodes = NodeRegistry::new();
        let client = reqwest::Client::new();
        assert_eq!(reconcile_once(&registry, &nodes, "self", &client).await, 0);
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_not_divergence() {
        let registry = IndexRegistry::new();
        let idx = shardann_core::ivf::DistributedIvf::new("a", 2, 10, 1, vec!["self".into()])
            .unwrap()
            .with_nlist(2);
        registry
            .create(shardann_core::index::IndexEngine::Distributed(idx))
            .unwrap();

        let nodes = NodeRegistry::new();
        nodes.register(crate::cluster::NodeInfo::new("peer", "127.0.0.1", 9));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        assert_eq!(reconcile_once(&registry, &nodes, "self", &client).await, 0);
    }
}
