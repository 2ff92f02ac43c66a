//! Prometheus metrics recording and background collection.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

use shardann_core::registry::IndexRegistry;

/// Records HTTP request metrics.
pub fn record_request(method: &str, path: &str, status: u16, duration: Duration) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];
    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Records a completed build.
pub fn record_build(index: &str, vectors: u64, duration: Duration) {
    let labels = [("index", index.to_string())];
    counter!("shardann_builds_total", &labels).increment(1);
    counter!("shardann_vectors_indexed_total", &labels).increment(vectors);
    histogram!("shardann_build_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Records a search and its latency.
pub fn record_search(index: &str, partial: bool, duration: Duration) {
    let labels = [
        ("index", index.to_string()),
        ("partial", partial.to_string()),
    ];
    counter!("shardann_searches_total", &labels).increment(1);
    histogram!("shardann_search_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Records shard-scan traffic served for peers.
pub fn record_shard_scan(index: &str, hits: usize) {
    let labels = [("index", index.to_string())];
    counter!("shardann_shard_scans_total", &labels).increment(1);
    counter!("shardann_shard_scan_hits_total", &labels).increment(hits as u64);
}

/// Records an anti-entropy divergence observation.
pub fn record_divergence(index: &str, peer: &str) {
    counter!(
        "shardann_version_divergence_total",
        "index" => index.to_string(),
        "peer" => peer.to_string()
    )
    .increment(1);
}

/// Updates index-level Prometheus gauges.
pub fn update_index_metrics(registry: &IndexRegistry) {
    gauge!("shardann_indexes_total").set(registry.len() as f64);
    for name in registry.list() {
        if let Some(handle) = registry.get(&name) {
            let index = handle.read();
            let labels = [("index", name.clone())];
            gauge!("shardann_vectors_total", &labels).set(index.size() as f64);
            gauge!("shardann_nlist", &labels).set(index.nlist() as f64);
            gauge!("shardann_index_version", &labels).set(index.version() as f64);
        }
    }
}
