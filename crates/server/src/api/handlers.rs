//! HTTP request handlers and shared application state.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::{Duration, Instant};

use shardann_core::config;
use shardann_core::index::{Index, IndexEngine, IndexFamily};
use shardann_core::ivf::{DistributedIvf, ShardHandle};
use shardann_core::registry::{IndexHandle, IndexRegistry};
use shardann_core::search::{merge_hits, SearchOptions};
use shardann_core::storage::{decode_index, encode_index, BlobStore, LocalStore};
use shardann_core::{clustering::ClusteringParams, IndexError};

use crate::api::errors::ApiError;
use crate::api::metrics;
use crate::api::models::*;
use crate::bulk::{BulkLoader, LoadProgress};
use crate::cluster::{NodeInfo, NodeRegistry};
use crate::transport::HttpShardClient;

/// Shared application state passed to every handler via Axum's `State`
/// extractor.
#[derive(Clone)]
pub struct AppState {
    pub registry: IndexRegistry,
    pub store: Arc<LocalStore>,
    pub nodes: NodeRegistry,
    pub bulk: BulkLoader,
    pub node_id: String,
    pub prometheus_handle: PrometheusHandle,
    pub start_time: Instant,
    pub search_timeout: Duration,
}

fn validate_index_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() || name.len() > config::MAX_INDEX_NAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "Index name must be 1-{} characters",
            config::MAX_INDEX_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ApiError::BadRequest(
            "Index name may only contain alphanumerics, '-', '_', '.'".into(),
        ));
    }
    Ok(())
}

fn validate_finite(values: &[f32]) -> Result<(), ApiError> {
    if values.iter().any(|v| v.is_nan() || v.is_infinite()) {
        return Err(ApiError::BadRequest("Vector contains NaN or Inf".into()));
    }
    Ok(())
}

fn get_index(state: &AppState, name: &str) -> Result<IndexHandle, ApiError> {
    state
        .registry
        .get(name)
        .ok_or_else(|| ApiError::NotFound(format!("Index '{name}' not found")))
}

fn stats_of(engine: &IndexEngine) -> IndexStats {
    IndexStats {
        name: engine.name().to_string(),
        dimension: engine.dimension(),
        state: engine.state(),
        size: engine.size(),
        nlist: engine.nlist(),
        shard_count: engine.shard_count(),
        nodes: engine.nodes(),
        version: engine.version(),
    }
}

// ── Index lifecycle ────────────────────────────────────────────────

pub async fn create_index(
    State(state): State<AppState>,
    Json(req): Json<CreateIndexRequest>,
) -> Result<(StatusCode, Json<IndexStats>), ApiError> {
    validate_index_name(&req.name)?;
    if req.dimension == 0 || req.dimension > config::MAX_DIMENSION {
        return Err(ApiError::BadRequest(format!(
            "Dimension must be in [1, {}]",
            config::MAX_DIMENSION
        )));
    }
    if state.registry.get(&req.name).is_some() {
        return Err(ApiError::Conflict(format!(
            "Index '{}' already exists",
            req.name
        )));
    }

    // Shards spread over the currently active members; a single-node
    // deployment places everything locally.
    let members = state.nodes.active();
    let node_ids: Vec<String> = if members.is_empty() {
        vec![state.node_id.clone()]
    } else {
        members.into_iter().map(|n| n.node_id).collect()
    };
    let shard_count = req.shard_count.unwrap_or(node_ids.len() as u32);

    let params = req.seed.map(|seed| ClusteringParams {
        seed,
        ..ClusteringParams::default()
    });

    // One shard needs no distribution: the single-node wrapper serves it
    // and carries the per-id mutation API. Anything wider goes through the
    // coordinator, where mutations are rebuild-semantics.
    let engine = if shard_count == 1 {
        let mut index = Index::new(&req.name, req.dimension, 1, IndexFamily::Ivf)?;
        if let Some(nlist) = req.nlist {
            index = index.with_nlist(nlist);
        }
        if let Some(params) = params {
            index = index.with_params(params);
        }
        IndexEngine::Single(index)
    } else {
        let mut index = DistributedIvf::new(
            &req.name,
            req.dimension,
            req.expected_n,
            shard_count,
            node_ids,
        )?;
        if let Some(nlist) = req.nlist {
            index = index.with_nlist(nlist);
        }
        if let Some(params) = params {
            index = index.with_params(params);
        }
        IndexEngine::Distributed(index)
    };

    let handle = state.registry.create(engine)?;
    let stats = stats_of(&handle.read());
    tracing::info!(index = %req.name, dimension = req.dimension, shard_count, "index created");
    Ok((StatusCode::CREATED, Json(stats)))
}

pub async fn list_indexes(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.registry.list())
}

pub async fn delete_index(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.registry.remove(&name) {
        tracing::info!(index = %name, "index deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Index '{name}' not found")))
    }
}

pub async fn get_stats(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<IndexStats>, ApiError> {
    let handle = get_index(&state, &name)?;
    let stats = stats_of(&handle.read());
    Ok(Json(stats))
}

// ── Build, append, search ──────────────────────────────────────────

pub async fn build_index(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<VectorsPayload>,
) -> Result<Json<IndexStats>, ApiError> {
    let handle = get_index(&state, &name)?;
    validate_finite(&req.vectors)?;

    let started = Instant::now();
    let build_handle = handle.clone();
    tokio::task::spawn_blocking(move || build_handle.write().build(&req.vectors, &req.ids))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    let stats = stats_of(&handle.read());
    metrics::record_build(&name, stats.size, started.elapsed());
    Ok(Json(stats))
}

pub async fn add_vectors(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<VectorsPayload>,
) -> Result<Json<IndexStats>, ApiError> {
    let handle = get_index(&state, &name)?;
    validate_finite(&req.vectors)?;

    let add_handle = handle.clone();
    tokio::task::spawn_blocking(move || add_handle.write().add(&req.vectors, &req.ids))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    let stats = stats_of(&handle.read());
    Ok(Json(stats))
}

/// Remove every posting with the given id.
///
/// Served by the single-node wrapper; distributed indexes answer 409, as
/// per-id mutations there are rebuild-semantics.
pub async fn remove_vector(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
) -> Result<Json<IndexStats>, ApiError> {
    let handle = get_index(&state, &name)?;

    let mutate_handle = handle.clone();
    let removed = tokio::task::spawn_blocking(move || mutate_handle.write().remove(id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    if !removed {
        return Err(ApiError::NotFound(format!(
            "No vector with id {id} in '{name}'"
        )));
    }

    tracing::info!(index = %name, id, "vector removed");
    let stats = stats_of(&handle.read());
    Ok(Json(stats))
}

/// Replace the vector stored under an id. 404 when the id is absent.
pub async fn update_vector(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, i64)>,
    Json(req): Json<UpdateVectorRequest>,
) -> Result<Json<IndexStats>, ApiError> {
    let handle = get_index(&state, &name)?;
    validate_finite(&req.vector)?;

    let mutate_handle = handle.clone();
    let updated =
        tokio::task::spawn_blocking(move || mutate_handle.write().update(id, &req.vector))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))??;
    if !updated {
        return Err(ApiError::NotFound(format!(
            "No vector with id {id} in '{name}'"
        )));
    }

    let stats = stats_of(&handle.read());
    Ok(Json(stats))
}

pub async fn search(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let handle = get_index(&state, &name)?;
    validate_finite(&req.query)?;

    let opts = SearchOptions {
        timeout: req
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(state.search_timeout),
    };

    let started = Instant::now();
    let outcome = tokio::task::spawn_blocking(move || {
        handle
            .read()
            .search_with_opts(&req.query, req.k, req.nprobe, &opts)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    metrics::record_search(&name, outcome.is_partial(), started.elapsed());
    Ok(Json(SearchResponse {
        partial: outcome.is_partial(),
        unresponsive_shards: outcome.unresponsive_shards,
        hits: outcome.hits,
    }))
}

// ── Persistence ────────────────────────────────────────────────────

pub async fn save_index(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let handle = get_index(&state, &name)?;
    let store = state.store.clone();

    let bytes = tokio::task::spawn_blocking(move || -> Result<usize, IndexError> {
        let engine = handle.read();
        let index = engine.as_distributed().ok_or_else(|| {
            IndexError::InvalidState(
                "snapshots cover distributed indexes; rebuild single-node indexes from source"
                    .into(),
            )
        })?;
        let blob = encode_index(index)?;
        store.save(index.name(), &blob)?;
        Ok(blob.len())
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(serde_json::json!({ "saved": name, "bytes": bytes })))
}

pub async fn load_index(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<IndexStats>, ApiError> {
    validate_index_name(&name)?;

    let members = state.nodes.active();
    let node_ids: Vec<String> = if members.is_empty() {
        vec![state.node_id.clone()]
    } else {
        members.into_iter().map(|n| n.node_id).collect()
    };

    let store = state.store.clone();
    let load_name = name.clone();
    let index = tokio::task::spawn_blocking(move || -> Result<DistributedIvf, IndexError> {
        let bytes = store.load(&load_name)?;
        decode_index(&load_name, node_ids, &bytes)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    let handle = state.registry.insert(IndexEngine::Distributed(index));
    let stats = stats_of(&handle.read());
    tracing::info!(index = %name, size = stats.size, "index loaded from snapshot");
    Ok(Json(stats))
}

/// Convert shard slots owned by peers into transport handles.
///
/// A built (or snapshot-loaded) index starts with every shard local. Once
/// the peers hosting the other shards have loaded the same snapshot, this
/// hands their shards over to the HTTP transport; searches then fan out
/// across the cluster.
pub async fn distribute_index(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let handle = get_index(&state, &name)?;

    // The transport uses the blocking HTTP client, so set it up off the
    // async runtime.
    let nodes = state.nodes.clone();
    let self_id = state.node_id.clone();
    let timeout = state.search_timeout;
    let rpc_name = name.clone();
    let remote_shards = tokio::task::spawn_blocking(move || -> Result<u32, ApiError> {
        let mut engine = handle.write();
        let Some(index) = engine.as_distributed_mut() else {
            return Err(ApiError::Conflict(
                "Single-node indexes have nothing to distribute".into(),
            ));
        };
        let mut remote_shards = 0u32;
        for shard_id in 0..index.shard_count() {
            let owner = index.node_for_shard(shard_id).to_string();
            if owner == self_id {
                continue;
            }
            let Some(peer) = nodes.get(&owner) else {
                return Err(ApiError::Conflict(format!(
                    "Node '{owner}' hosting shard {shard_id} is not a known member"
                )));
            };
            if !peer.is_active {
                return Err(ApiError::ServiceUnavailable(format!(
                    "Node '{owner}' hosting shard {shard_id} is inactive"
                )));
            }
            let client = HttpShardClient::new(shard_id, rpc_name.clone(), &peer.addr(), timeout)?;
            index.set_remote_shard(shard_id, owner, Box::new(client));
            remote_shards += 1;
        }
        Ok(remote_shards)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    tracing::info!(index = %name, remote_shards, "shards handed to transport");
    Ok(Json(
        serde_json::json!({ "index": name, "remote_shards": remote_shards }),
    ))
}

// ── Bulk loading ───────────────────────────────────────────────────

pub async fn bulk_load(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<BulkLoadRequest>,
) -> Result<(StatusCode, Json<BulkLoadStarted>), ApiError> {
    let handle = get_index(&state, &name)?;
    validate_finite(&req.vectors)?;
    let dim = handle.read().dimension();
    if req.vectors.len() != req.ids.len() * dim {
        return Err(ApiError::BadRequest(format!(
            "vector buffer of {} floats does not match {} ids at dimension {dim}",
            req.vectors.len(),
            req.ids.len()
        )));
    }

    let load_id = uuid::Uuid::new_v4().to_string();
    let batch_size = req.batch_size.unwrap_or(config::DEFAULT_BULK_BATCH_SIZE);
    state.bulk.register(&load_id, req.ids.len() as u64);

    let loader = state.bulk.clone();
    let worker_id = load_id.clone();
    tokio::task::spawn_blocking(move || {
        loader.run(&worker_id, handle, req.vectors, req.ids, batch_size);
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(BulkLoadStarted { load_id }),
    ))
}

pub async fn bulk_progress(
    State(state): State<AppState>,
    Path((_name, load_id)): Path<(String, String)>,
) -> Result<Json<LoadProgress>, ApiError> {
    state
        .bulk
        .progress(&load_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No load '{load_id}'")))
}

// ── Shard RPC (cluster-internal) ───────────────────────────────────

/// Probe-restricted scan over the shards this member hosts locally.
///
/// Peers partition a query's probe set by owning shard and send each member
/// only the centroids it hosts; centroids owned by shards that are not
/// local here are ignored.
pub async fn shard_search(
    State(state): State<AppState>,
    Json(req): Json<ShardSearchRequest>,
) -> Json<ShardSearchResponse> {
    let empty = |status: ShardStatus| {
        Json(ShardSearchResponse {
            hits: Vec::new(),
            status,
        })
    };

    let index_name = req.index.clone();
    let Some(handle) = state.registry.get(&index_name) else {
        return empty(ShardStatus::BadRequest);
    };
    let k = req.k as usize;
    if k == 0 {
        return empty(ShardStatus::BadRequest);
    }

    let response = tokio::task::spawn_blocking(move || {
        let engine = handle.read();
        let Some(index) = engine.as_distributed() else {
            return ShardSearchResponse {
                hits: Vec::new(),
                status: ShardStatus::BadRequest,
            };
        };
        if req.query.len() != index.dimension() {
            return ShardSearchResponse {
                hits: Vec::new(),
                status: ShardStatus::BadRequest,
            };
        }

        let mut lists = Vec::new();
        for shard_id in 0..index.shard_count() {
            let candidates: Vec<u32> = req
                .centroids
                .iter()
                .copied()
                .filter(|&c| index.shard_for_centroid(c) == shard_id)
                .collect();
            if candidates.is_empty() {
                continue;
            }
            let Some(ShardHandle::Local(shard)) = index.shard(shard_id) else {
                continue;
            };
            match shard.search_local(&candidates, &req.query, k) {
                Ok(hits) => lists.push(hits),
                Err(_) => {
                    return ShardSearchResponse {
                        hits: Vec::new(),
                        status: ShardStatus::Unavailable,
                    }
                }
            }
        }

        ShardSearchResponse {
            hits: merge_hits(lists, k),
            status: ShardStatus::Ok,
        }
    })
    .await
    .unwrap_or(ShardSearchResponse {
        hits: Vec::new(),
        status: ShardStatus::Unavailable,
    });

    metrics::record_shard_scan(&index_name, response.hits.len());
    Json(response)
}

// ── Cluster membership ─────────────────────────────────────────────

pub async fn join_cluster(
    State(state): State<AppState>,
    Json(req): Json<JoinRequest>,
) -> Json<Vec<NodeInfo>> {
    state
        .nodes
        .register(NodeInfo::new(req.node_id, req.address, req.port));
    Json(state.nodes.all())
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<StatusCode, ApiError> {
    if state.nodes.heartbeat(&req.node_id) {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::NotFound(format!(
            "Unknown node '{}'",
            req.node_id
        )))
    }
}

pub async fn list_nodes(State(state): State<AppState>) -> Json<Vec<NodeInfo>> {
    Json(state.nodes.all())
}

// ── Health and metrics ─────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        indexes: state.registry.len(),
    })
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> String {
    metrics::update_index_metrics(&state.registry);
    state.prometheus_handle.render()
}
