//! REST API layer built on Axum.
//!
//! HTTP handlers for index lifecycle, build/search, bulk loading, cluster
//! membership, and the cluster-internal shard RPC. Middleware covers
//! request timeouts, concurrency and body-size limits, metrics collection,
//! and request ID tracing.

/// API error types mapped to HTTP status codes.
pub mod errors;
/// HTTP request handlers and application state.
pub mod handlers;
/// Prometheus metrics recording and background collection.
pub mod metrics;
/// Request and response data transfer objects.
pub mod models;

use axum::error_handling::HandleErrorLayer;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{middleware, Router};
use handlers::AppState;
use std::time::{Duration, Instant};
use tower::limit::ConcurrencyLimitLayer;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use shardann_core::config;

async fn request_id_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("request", request_id = %request_id);
    async move {
        let mut response = next.run(req).await;
        response.headers_mut().insert(
            axum::http::HeaderName::from_static("x-request-id"),
            axum::http::HeaderValue::from_str(&request_id)
                .expect("UUID v4 is always valid ASCII for header values"),
        );
        response
    }
    .instrument(span)
    .await
}

async fn metrics_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(req).await;
    metrics::record_request(&method, &path, response.status().as_u16(), start.elapsed());
    response
}

/// Builds the Axum router with all routes and middleware layers.
///
/// The middleware stack (outermost to innermost):
/// Concurrency limit → Timeout → Body limit → CORS → Trace →
/// Request ID → Metrics.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route(
            "/indexes",
            get(handlers::list_indexes).post(handlers::create_index),
        )
        .route(
            "/indexes/:name",
            get(handlers::get_stats).delete(handlers::delete_index),
        )
        .route("/indexes/:name/build", post(handlers::build_index))
        .route("/indexes/:name/vectors", post(handlers::add_vectors))
        .route(
            "/indexes/:name/vectors/:id",
            put(handlers::update_vector).delete(handlers::remove_vector),
        )
        .route("/indexes/:name/search", post(handlers::search))
        .route("/indexes/:name/distribute", post(handlers::distribute_index))
        .route("/indexes/:name/save", post(handlers::save_index))
        .route("/indexes/:name/load", post(handlers::load_index))
        .route("/indexes/:name/stats", get(handlers::get_stats))
        .route("/indexes/:name/bulk", post(handlers::bulk_load))
        .route("/indexes/:name/bulk/:load_id", get(handlers::bulk_progress))
        .route("/internal/shards/search", post(handlers::shard_search))
        .route("/cluster/join", post(handlers::join_cluster))
        .route("/cluster/heartbeat", post(handlers::heartbeat))
        .route("/cluster/nodes", get(handlers::list_nodes))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(config::MAX_REQUEST_BODY_BYTES))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|err: tower::BoxError| async move {
                    if err.is::<tower::timeout::error::Elapsed>() {
                        StatusCode::REQUEST_TIMEOUT
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                }))
                .layer(ConcurrencyLimitLayer::new(config::MAX_CONCURRENT_REQUESTS))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config::REQUEST_TIMEOUT_SECS,
                ))),
        )
        .with_state(state)
}
