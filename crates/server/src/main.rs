use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use shardann_core::config;
use shardann_core::index::{Index, IndexEngine, IndexFamily};
use shardann_core::registry::IndexRegistry;
use shardann_core::storage::{decode_index, list_snapshots, BlobStore, LocalStore};

use shardann_server::antientropy;
use shardann_server::api::handlers::AppState;
use shardann_server::api::create_router;
use shardann_server::api::models::{HeartbeatRequest, JoinRequest};
use shardann_server::bulk::BulkLoader;
use shardann_server::cluster::{NodeInfo, NodeRegistry};

#[derive(Parser)]
#[command(name = "shardann", about = "Distributed IVF vector search node")]
struct Args {
    /// Node identifier within the cluster
    #[arg(long, default_value = "node1")]
    node_id: String,

    /// Listen address
    #[arg(long, default_value = "0.0.0.0")]
    address: String,

    /// Listen port
    #[arg(short, long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Vector dimension for the demo driver
    #[arg(long, default_value_t = 128)]
    dimension: usize,

    /// Index family: ivf
    #[arg(long, default_value = "ivf")]
    index_type: String,

    /// Comma-separated seed nodes (host:port) to join at startup
    #[arg(long)]
    seed_nodes: Option<String>,

    /// Data directory for index snapshots
    #[arg(short, long, default_value = config::DEFAULT_DATA_DIR)]
    data_dir: String,

    /// Per-search timeout in milliseconds
    #[arg(long, default_value_t = config::DEFAULT_SEARCH_TIMEOUT_MS)]
    search_timeout_ms: u64,

    /// Run the single-node demo and exit
    #[arg(long, default_value_t = false)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(
                    "shardann_server=info"
                        .parse()
                        .expect("valid directive literal"),
                )
                .add_directive(
                    "shardann_core=info"
                        .parse()
                        .expect("valid directive literal"),
                ),
        )
        .init();

    let args = Args::parse();

    if args.port == 0 {
        eprintln!("Error: port must be > 0");
        std::process::exit(1);
    }
    if args.dimension == 0 || args.dimension > config::MAX_DIMENSION {
        eprintln!(
            "Error: dimension must be in [1, {}]",
            config::MAX_DIMENSION
        );
        std::process::exit(1);
    }
    let family: IndexFamily = match args.index_type.parse() {
        Ok(family) => family,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let data_path = std::path::Path::new(&args.data_dir);
    if data_path.exists() && !data_path.is_dir() {
        eprintln!(
            "Error: data_dir '{}' exists but is not a directory",
            args.data_dir
        );
        std::process::exit(1);
    }

    if args.demo {
        run_demo(args.dimension, family);
        return Ok(());
    }

    let registry = IndexRegistry::new();
    let store = Arc::new(LocalStore::new(&args.data_dir));
    let nodes = NodeRegistry::new();
    nodes.register(NodeInfo::new(&args.node_id, &args.address, args.port));

    // Restore snapshots present in the data directory.
    for name in list_snapshots(&args.data_dir) {
        match store
            .load(&name)
            .and_then(|bytes| decode_index(&name, vec![args.node_id.clone()], &bytes))
        {
            Ok(index) => {
                tracing::info!(index = %name, size = index.size(), "restored index");
                registry.insert(IndexEngine::Distributed(index));
            }
            Err(e) => {
                tracing::warn!(index = %name, %e, "could not restore snapshot");
            }
        }
    }

    let prometheus_handle =
        metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let state = AppState {
        registry: registry.clone(),
        store,
        nodes: nodes.clone(),
        bulk: BulkLoader::new(),
        node_id: args.node_id.clone(),
        prometheus_handle,
        start_time: Instant::now(),
        search_timeout: Duration::from_millis(args.search_timeout_ms),
    };

    // Join the cluster through the seed nodes.
    let seeds: Vec<String> = args
        .seed_nodes
        .as_deref()
        .map(|csv| {
            csv.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    if !seeds.is_empty() {
        join_via_seeds(&nodes, &args.node_id, &args.address, args.port, &seeds).await;
    }

    // Heartbeat + failure detection.
    {
        let nodes = nodes.clone();
        let self_id = args.node_id.clone();
        tokio::spawn(async move {
            let client = reqwest::Client::new();
            let mut ticker =
                tokio::time::interval(Duration::from_secs(config::HEARTBEAT_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                for peer in nodes.active() {
                    if peer.node_id == self_id {
                        continue;
                    }
                    let url = format!("http://{}/cluster/heartbeat", peer.addr());
                    let body = HeartbeatRequest {
                        node_id: self_id.clone(),
                    };
                    if client.post(&url).json(&body).send().await.is_ok() {
                        nodes.heartbeat(&peer.node_id);
                    }
                }
                nodes.mark_failures(Duration::from_secs(config::NODE_FAILURE_WINDOW_SECS));
            }
        });
    }

    // Index gauge collection.
    {
        let metrics_registry = registry.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(15));
            loop {
                ticker.tick().await;
                shardann_server::api::metrics::update_index_metrics(&metrics_registry);
            }
        });
    }

    // Anti-entropy reconciliation.
    tokio::spawn(antientropy::run_loop(
        registry.clone(),
        nodes.clone(),
        args.node_id.clone(),
        Duration::from_secs(config::ANTI_ENTROPY_INTERVAL_SECS),
    ));

    let app = create_router(state);
    let addr = format!("{}:{}", args.address, args.port);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        node_id = %args.node_id,
        addr = %addr,
        data_dir = %args.data_dir,
        indexes = registry.len(),
        seeds = seeds.len(),
        "shardann node ready"
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_signal())
        .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Register with each seed and merge the membership it returns.
async fn join_via_seeds(
    nodes: &NodeRegistry,
    node_id: &str,
    address: &str,
    port: u16,
    seeds: &[String],
) {
    let client = reqwest::Client::new();
    let body = JoinRequest {
        node_id: node_id.to_string(),
        address: address.to_string(),
        port,
    };
    for seed in seeds {
        let url = format!("http://{seed}/cluster/join");
        match client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                match resp.json::<Vec<NodeInfo>>().await {
                    Ok(members) => {
                        for member in members {
                            if member.node_id != node_id {
                                nodes.register(member);
                            }
                        }
                        tracing::info!(seed = %seed, members = nodes.len(), "joined cluster");
                    }
                    Err(e) => tracing::warn!(seed = %seed, %e, "bad join response"),
                }
            }
            Ok(resp) => tracing::warn!(seed = %seed, status = %resp.status(), "join rejected"),
            Err(e) => tracing::warn!(seed = %seed, %e, "seed unreachable"),
        }
    }
}

/// Exercise the single-node wrapper end to end: build, probe, mutate.
fn run_demo(dimension: usize, family: IndexFamily) {
    let n = 2_000;
    let mut rng = StdRng::seed_from_u64(config::KMEANS_DEFAULT_SEED);
    let vectors: Vec<f32> = (0..n * dimension)
        .map(|_| rng.random_range(-1.0..1.0))
        .collect();
    let ids: Vec<i64> = (0..n as i64).collect();

    let mut index = match Index::new("demo", dimension, 2, family) {
        Ok(index) => index,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let started = Instant::now();
    if let Err(e) = index.build(&vectors, &ids) {
        eprintln!("Error: demo build failed: {e}");
        std::process::exit(1);
    }
    tracing::info!(
        n,
        dimension,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "demo index built"
    );

    let query = &vectors[..dimension];
    let started = Instant::now();
    match index.search(query, 10, 16) {
        Ok(hits) => {
            tracing::info!(
                top_id = hits.first().map(|h| h.id).unwrap_or(-1),
                hits = hits.len(),
                elapsed_us = started.elapsed().as_micros() as u64,
                "demo self-query done"
            );
        }
        Err(e) => {
            eprintln!("Error: demo search failed: {e}");
            std::process::exit(1);
        }
    }

    index.remove(5);
    if let Err(e) = index.update(6, query) {
        eprintln!("Error: demo update failed: {e}");
        std::process::exit(1);
    }
    tracing::info!(size = index.size(), "demo mutations applied");
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    tracing::info!("Shutting down gracefully, draining in-flight requests...");
}
