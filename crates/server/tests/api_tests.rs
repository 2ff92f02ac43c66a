use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use shardann_core::registry::IndexRegistry;
use shardann_core::storage::LocalStore;
use shardann_server::api::create_router;
use shardann_server::api::handlers::AppState;
use shardann_server::api::models::{
    HealthResponse, IndexStats, SearchResponse, ShardSearchResponse, ShardStatus,
};
use shardann_server::bulk::BulkLoader;
use shardann_server::cluster::NodeRegistry;

async fn spawn_app() -> (String, TempDir) {
    spawn_app_with_id("test-node").await
}

async fn spawn_app_with_id(node_id: &str) -> (String, TempDir) {
    let tmp_dir = TempDir::new().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let prometheus_handle =
        match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(_) => metrics_exporter_prometheus::PrometheusBuilder::new()
                .build_recorder()
                .handle(),
        };

    let state = AppState {
        registry: IndexRegistry::new(),
        store: Arc::new(LocalStore::new(&data_dir)),
        nodes: NodeRegistry::new(),
        bulk: BulkLoader::new(),
        node_id: node_id.into(),
        prometheus_handle,
        start_time: Instant::now(),
        search_timeout: Duration::from_secs(5),
    };

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}", addr);

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server crashed");
    });

    (base_url, tmp_dir)
}

/// Deterministic two-cluster dataset: even ids near the origin, odd ids
/// near (10, 10, ...).
fn dataset(n: usize, dim: usize) -> (Vec<f32>, Vec<i64>) {
    let mut vectors = Vec::with_capacity(n * dim);
    for i in 0..n {
        let base = if i % 2 == 0 { 0.0 } else { 10.0 };
        for j in 0..dim {
            vectors.push(base + ((i * 31 + j * 7) % 10) as f32 * 0.01);
        }
    }
    (vectors, (0..n as i64).collect())
}

/// Distributed engine: two placement shards on the one test member.
async fn create_index(client: &Client, base: &str, name: &str, dim: usize, nlist: usize) {
    let resp = client
        .post(format!("{base}/indexes"))
        .json(&json!({
            "name": name,
            "dimension": dim,
            "expected_n": 1000,
            "shard_count": 2,
            "nlist": nlist,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
}

/// Single-node engine: `shard_count == 1` routes through the wrapper that
/// serves the per-id mutation API.
async fn create_single_index(client: &Client, base: &str, name: &str, dim: usize, nlist: usize) {
    let resp = client
        .post(format!("{base}/indexes"))
        .json(&json!({
            "name": name,
            "dimension": dim,
            "expected_n": 1000,
            "shard_count": 1,
            "nlist": nlist,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
}

async fn build_index(client: &Client, base: &str, name: &str, vectors: &[f32], ids: &[i64]) {
    let resp = client
        .post(format!("{base}/indexes/{name}/build"))
        .json(&json!({ "vectors": vectors, "ids": ids }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "{}", resp.text().await.unwrap());
}

#[tokio::test]
async fn test_health_endpoint() {
    let (base, _tmp) = spawn_app().await;
    let client = Client::new();

    let health: HealthResponse = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.node_id, "test-node");
    assert_eq!(health.indexes, 0);
}

#[tokio::test]
async fn test_create_build_search_flow() {
    let (base, _tmp) = spawn_app().await;
    let client = Client::new();
    let (vectors, ids) = dataset(200, 4);

    create_index(&client, &base, "flow", 4, 8).await;
    build_index(&client, &base, "flow", &vectors, &ids).await;

    let stats: IndexStats = client
        .get(format!("{base}/indexes/flow/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats.size, 200);
    assert_eq!(stats.nlist, 8);

    let response: SearchResponse = client
        .post(format!("{base}/indexes/flow/search"))
        .json(&json!({ "query": &vectors[..4], "k": 5, "nprobe": 8 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(!response.partial);
    assert_eq!(response.hits.len(), 5);
    assert_eq!(response.hits[0].id, 0, "self-query finds the stored vector");
    assert!(response
        .hits
        .windows(2)
        .all(|w| w[0].distance <= w[1].distance));
}

#[tokio::test]
async fn test_create_duplicate_is_conflict() {
    let (base, _tmp) = spawn_app().await;
    let client = Client::new();

    create_index(&client, &base, "dup", 4, 4).await;
    let resp = client
        .post(format!("{base}/indexes"))
        .json(&json!({ "name": "dup", "dimension": 4, "expected_n": 100 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn test_build_shape_mismatch_is_bad_request() {
    let (base, _tmp) = spawn_app().await;
    let client = Client::new();
    create_index(&client, &base, "shape", 128, 4).await;

    let vectors = vec![0.0f32; 129];
    let resp = client
        .post(format!("{base}/indexes/shape/build"))
        .json(&json!({ "vectors": vectors, "ids": [1] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // The failed build left the index empty.
    let stats: IndexStats = client
        .get(format!("{base}/indexes/shape/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats.size, 0);
}

#[tokio::test]
async fn test_search_unknown_index_is_not_found() {
    let (base, _tmp) = spawn_app().await;
    let client = Client::new();

    let resp = client
        .post(format!("{base}/indexes/ghost/search"))
        .json(&json!({ "query": [0.0], "k": 1, "nprobe": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_search_before_build_is_conflict() {
    let (base, _tmp) = spawn_app().await;
    let client = Client::new();
    create_index(&client, &base, "unbuilt", 4, 4).await;

    let resp = client
        .post(format!("{base}/indexes/unbuilt/search"))
        .json(&json!({ "query": [0.0, 0.0, 0.0, 0.0], "k": 1, "nprobe": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn test_nprobe_zero_is_bad_request() {
    let (base, _tmp) = spawn_app().await;
    let client = Client::new();
    let (vectors, ids) = dataset(100, 4);
    create_index(&client, &base, "np", 4, 4).await;
    build_index(&client, &base, "np", &vectors, &ids).await;

    let resp = client
        .post(format!("{base}/indexes/np/search"))
        .json(&json!({ "query": &vectors[..4], "k": 1, "nprobe": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_nan_query_is_bad_request() {
    let (base, _tmp) = spawn_app().await;
    let client = Client::new();
    let (vectors, ids) = dataset(100, 4);
    create_index(&client, &base, "nan", 4, 4).await;
    build_index(&client, &base, "nan", &vectors, &ids).await;

    // JSON cannot carry NaN, so use a value that overflows f32 to Inf.
    let resp = client
        .post(format!("{base}/indexes/nan/search"))
        .json(&json!({ "query": [1e39, 0.0, 0.0, 0.0], "k": 1, "nprobe": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_save_load_roundtrip() {
    let (base, _tmp) = spawn_app().await;
    let client = Client::new();
    let (vectors, ids) = dataset(150, 4);
    create_index(&client, &base, "persist", 4, 8).await;
    build_index(&client, &base, "persist", &vectors, &ids).await;

    let resp = client
        .post(format!("{base}/indexes/persist/save"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Drop the in-memory copy, then restore from the snapshot.
    let resp = client
        .delete(format!("{base}/indexes/persist"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let stats: IndexStats = client
        .post(format!("{base}/indexes/persist/load"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats.size, 150);

    let response: SearchResponse = client
        .post(format!("{base}/indexes/persist/search"))
        .json(&json!({ "query": &vectors[..4], "k": 3, "nprobe": 8 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response.hits[0].id, 0);
}

#[tokio::test]
async fn test_add_vectors_after_build() {
    let (base, _tmp) = spawn_app().await;
    let client = Client::new();
    let (vectors, ids) = dataset(100, 4);
    create_index(&client, &base, "append", 4, 4).await;
    build_index(&client, &base, "append", &vectors, &ids).await;

    let resp = client
        .post(format!("{base}/indexes/append/vectors"))
        .json(&json!({ "vectors": [5.0, 5.0, 5.0, 5.0], "ids": [9999] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let response: SearchResponse = client
        .post(format!("{base}/indexes/append/search"))
        .json(&json!({ "query": [5.0, 5.0, 5.0, 5.0], "k": 1, "nprobe": 4 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response.hits[0].id, 9999);
}

#[tokio::test]
async fn test_remove_and_update_vector_single_node() {
    let (base, _tmp) = spawn_app().await;
    let client = Client::new();
    let (vectors, ids) = dataset(100, 4);
    create_single_index(&client, &base, "mut", 4, 4).await;
    build_index(&client, &base, "mut", &vectors, &ids).await;

    let stats: IndexStats = client
        .delete(format!("{base}/indexes/mut/vectors/3"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats.size, 99);

    // Removing the same id again finds nothing.
    let resp = client
        .delete(format!("{base}/indexes/mut/vectors/3"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .put(format!("{base}/indexes/mut/vectors/4"))
        .json(&json!({ "vector": [9.0, 9.0, 9.0, 9.0] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let response: SearchResponse = client
        .post(format!("{base}/indexes/mut/search"))
        .json(&json!({ "query": [9.0, 9.0, 9.0, 9.0], "k": 1, "nprobe": 100 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response.hits[0].id, 4);
    assert_eq!(response.hits[0].distance, 0.0);

    // Updating an unknown id stores nothing.
    let resp = client
        .put(format!("{base}/indexes/mut/vectors/99999"))
        .json(&json!({ "vector": [0.0, 0.0, 0.0, 0.0] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_per_id_mutations_rejected_on_distributed() {
    let (base, _tmp) = spawn_app().await;
    let client = Client::new();
    let (vectors, ids) = dataset(100, 4);
    create_index(&client, &base, "frozen", 4, 4).await;
    build_index(&client, &base, "frozen", &vectors, &ids).await;

    let resp = client
        .delete(format!("{base}/indexes/frozen/vectors/3"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = client
        .put(format!("{base}/indexes/frozen/vectors/3"))
        .json(&json!({ "vector": [0.0, 0.0, 0.0, 0.0] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn test_shard_rpc_scan() {
    let (base, _tmp) = spawn_app().await;
    let client = Client::new();
    let (vectors, ids) = dataset(120, 4);
    create_index(&client, &base, "rpc", 4, 6).await;
    build_index(&client, &base, "rpc", &vectors, &ids).await;

    let response: ShardSearchResponse = client
        .post(format!("{base}/internal/shards/search"))
        .json(&json!({
            "index": "rpc",
            "query": &vectors[..4],
            "k": 5,
            "centroids": [0, 1, 2, 3, 4, 5],
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(response.status, ShardStatus::Ok);
    assert_eq!(response.hits[0].id, 0);
}

#[tokio::test]
async fn test_shard_rpc_unknown_index() {
    let (base, _tmp) = spawn_app().await;
    let client = Client::new();

    let response: ShardSearchResponse = client
        .post(format!("{base}/internal/shards/search"))
        .json(&json!({
            "index": "missing",
            "query": [0.0],
            "k": 1,
            "centroids": [0],
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response.status, ShardStatus::BadRequest);
    assert!(response.hits.is_empty());
}

#[tokio::test]
async fn test_cluster_membership_endpoints() {
    let (base, _tmp) = spawn_app().await;
    let client = Client::new();

    let members: Vec<serde_json::Value> = client
        .post(format!("{base}/cluster/join"))
        .json(&json!({ "node_id": "peer-1", "address": "127.0.0.1", "port": 7171 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(members.len(), 1);

    let resp = client
        .post(format!("{base}/cluster/heartbeat"))
        .json(&json!({ "node_id": "peer-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{base}/cluster/heartbeat"))
        .json(&json!({ "node_id": "stranger" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let nodes: Vec<serde_json::Value> = client
        .get(format!("{base}/cluster/nodes"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(nodes.len(), 1);
}

#[tokio::test]
async fn test_bulk_load_and_progress() {
    let (base, _tmp) = spawn_app().await;
    let client = Client::new();
    let (vectors, ids) = dataset(200, 4);
    create_index(&client, &base, "bulk", 4, 8).await;

    let started: serde_json::Value = client
        .post(format!("{base}/indexes/bulk/bulk"))
        .json(&json!({ "vectors": vectors, "ids": ids, "batch_size": 50 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let load_id = started["load_id"].as_str().unwrap().to_string();

    // Poll until the load settles.
    let mut status = String::new();
    for _ in 0..100 {
        let progress: serde_json::Value = client
            .get(format!("{base}/indexes/bulk/bulk/{load_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        status = progress["status"].as_str().unwrap().to_string();
        if status == "completed" || status.starts_with("failed") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(status, "completed");

    let stats: IndexStats = client
        .get(format!("{base}/indexes/bulk/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats.size, 200);
}

#[tokio::test]
async fn test_distributed_search_via_transport() {
    // Two members: node-a coordinates, node-b hosts shard 0 over the wire.
    let (base_a, _tmp_a) = spawn_app_with_id("node-a").await;
    let (base_b, _tmp_b) = spawn_app_with_id("node-b").await;
    let client = Client::new();

    let port_of = |base: &str| base.rsplit(':').next().unwrap().parse::<u16>().unwrap();

    // node-a learns about both members before creating the index, so shard
    // placement spreads over [node-a, node-b].
    for (id, base) in [("node-a", &base_a), ("node-b", &base_b)] {
        let resp = client
            .post(format!("{base_a}/cluster/join"))
            .json(&json!({ "node_id": id, "address": "127.0.0.1", "port": port_of(base) }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let (vectors, ids) = dataset(160, 4);

    // Both members build the same deterministic index; node-b's copy is
    // what its shard RPC endpoint serves.
    for base in [&base_a, &base_b] {
        let resp = client
            .post(format!("{base}/indexes"))
            .json(&json!({
                "name": "dist",
                "dimension": 4,
                "expected_n": 1000,
                "shard_count": 2,
                "nlist": 6,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        build_index(&client, base, "dist", &vectors, &ids).await;
    }

    // Baseline before any shard goes remote.
    let local: SearchResponse = client
        .post(format!("{base_a}/indexes/dist/search"))
        .json(&json!({ "query": &vectors[..4], "k": 10, "nprobe": 6 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!local.partial);

    let distributed: serde_json::Value = client
        .post(format!("{base_a}/indexes/dist/distribute"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(distributed["remote_shards"], 1);

    // Same query now fans out over HTTP for node-b's shard; results match.
    let remote: SearchResponse = client
        .post(format!("{base_a}/indexes/dist/search"))
        .json(&json!({ "query": &vectors[..4], "k": 10, "nprobe": 6 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!remote.partial);
    assert_eq!(local.hits, remote.hits);
}

#[tokio::test]
async fn test_metrics_endpoint_renders() {
    let (base, _tmp) = spawn_app().await;
    let client = Client::new();

    let resp = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
}
