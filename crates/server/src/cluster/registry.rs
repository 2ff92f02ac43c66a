//! Membership table and failure detection.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cluster::types::{now_ms, NodeInfo};

/// Thread-safe table of known cluster members.
///
/// Cloning produces a new handle to the same shared table.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: Arc<RwLock<HashMap<String, NodeInfo>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a member. A re-registered node becomes active again.
    pub fn register(&self, mut node: NodeInfo) {
        node.is_active = true;
        node.last_heartbeat_ms = now_ms();
        tracing::info!(node_id = %node.node_id, addr = %node.addr(), "node registered");
        self.nodes.write().insert(node.node_id.clone(), node);
    }

    /// Remove a member entirely. Returns `true` if it existed.
    pub fn unregister(&self, node_id: &str) -> bool {
        self.nodes.write().remove(node_id).is_some()
    }

    /// Record a heartbeat. Returns `false` for unknown nodes.
    pub fn heartbeat(&self, node_id: &str) -> bool {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(node_id) {
            Some(node) => {
                node.last_heartbeat_ms = now_ms();
                node.is_active = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, node_id: &str) -> Option<NodeInfo> {
        self.nodes.read().get(node_id).cloned()
    }

    /// All members, active first, sorted by node id within each group.
    pub fn all(&self) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = self.nodes.read().values().cloned().collect();
        nodes.sort_by(|a, b| {
            b.is_active
                .cmp(&a.is_active)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        nodes
    }

    /// Active members sorted by node id.
    pub fn active(&self) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = self
            .nodes
            .read()
            .values()
            .filter(|n| n.is_active)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Mark members inactive whose last heartbeat is older than `window`.
    /// Returns the ids of nodes that just transitioned to inactive.
    pub fn mark_failures(&self, window: Duration) -> Vec<String> {
        let cutoff = now_ms().saturating_sub(window.as_millis() as u64);
        let mut failed = Vec::new();
        let mut nodes = self.nodes.write();
        for node in nodes.values_mut() {
            if node.is_active && node.last_heartbeat_ms < cutoff {
                node.is_active = false;
                failed.push(node.node_id.clone());
            }
        }
        drop(nodes);
        for node_id in &failed {
            tracing::warn!(node_id = %node_id, "node missed heartbeat window, marked inactive");
        }
        failed.sort_unstable();
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeInfo {
        NodeInfo::new(id, "127.0.0.1", 7070)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = NodeRegistry::new();
        registry.register(node("a"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("a").unwrap().is_active);
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn test_heartbeat_refreshes_known_nodes_only() {
        let registry = NodeRegistry::new();
        registry.register(node("a"));
        assert!(registry.heartbeat("a"));
        assert!(!registry.heartbeat("ghost"));
    }

    #[test]
    fn test_mark_failures_flags_stale_nodes() {
        let registry = NodeRegistry::new();
        let mut stale = node("stale");
        stale.last_heartbeat_ms = 0;
        registry.nodes.write().insert("stale".into(), stale);
        registry.register(node("fresh"));

        let failed = registry.mark_failures(Duration::from_secs(10));
        assert_eq!(failed, vec!["stale".to_string()]);
        assert!(!registry.get("stale").unwrap().is_active);
        assert!(registry.get("fresh").unwrap().is_active);

        // Already-inactive nodes are not reported twice.
        assert!(registry.mark_failures(Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn test_reregistration_revives_node() {
        let registry = NodeRegistry::new();
        let mut stale = node("a");
        stale.last_heartbeat_ms = 0;
        registry.nodes.write().insert("a".into(), stale);
        registry.mark_failures(Duration::from_secs(1));
        assert!(!registry.get("a").unwrap().is_active);

        registry.register(node("a"));
        assert!(registry.get("a").unwrap().is_active);
    }

    #[test]
    fn test_active_is_sorted() {
        let registry = NodeRegistry::new();
        registry.register(node("c"));
        registry.register(node("a"));
        registry.register(node("b"));
        let ids: Vec<String> = registry.active().into_iter().map(|n| n.node_id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
