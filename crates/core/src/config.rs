//! Global configuration constants for shardann.
//!
//! All clustering defaults, input validation limits, and server defaults are
//! defined here. These are compile-time constants; runtime configuration is
//! handled via CLI arguments and environment variables in the server crate.

/// Default maximum number of k-means refinement passes.
pub const KMEANS_DEFAULT_NITER: usize = 25;

/// Default number of independent k-means restarts.
///
/// The restart with the lowest total assignment cost wins.
pub const KMEANS_DEFAULT_NREDO: usize = 1;

/// Default deterministic PRNG seed for sampling and initialization.
pub const KMEANS_DEFAULT_SEED: u64 = 1234;

/// Default lower bound on training points drawn per centroid.
pub const KMEANS_MIN_POINTS_PER_CENTROID: usize = 39;

/// Default upper bound on training points drawn per centroid.
pub const KMEANS_MAX_POINTS_PER_CENTROID: usize = 256;

/// Default hard cap on the training sample as a fraction of the dataset.
pub const KMEANS_MAX_SAMPLE_RATIO: f64 = 0.22;

/// Convergence threshold: training stops early once the largest squared
/// centroid displacement between passes falls below this value.
pub const KMEANS_CONVERGENCE_EPS: f32 = 1e-6;

/// Training sample factor used by the build pipeline: `n_train = min(k * 64, n)`.
pub const BUILD_SAMPLE_FACTOR: usize = 64;

/// Dataset size below which `nlist = 8 * sqrt(N)`.
pub const NLIST_SMALL_N: u64 = 1_000_000;

/// `nlist` for datasets in `[1e6, 1e7)`.
pub const NLIST_TIER_1: usize = 65_536;

/// `nlist` for datasets in `[1e7, 1e8)`.
pub const NLIST_TIER_2: usize = 262_144;

/// `nlist` for datasets in `[1e8, 1e9)`.
pub const NLIST_TIER_3: usize = 1_048_576;

/// Maximum allowed vector dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Maximum number of results (`k`) per search request.
pub const MAX_K: usize = 10_000;

/// Maximum length of an index name in characters.
pub const MAX_INDEX_NAME_LEN: usize = 128;

/// Default per-search timeout in milliseconds.
pub const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 5_000;

/// Default number of vectors per bulk-load batch.
pub const DEFAULT_BULK_BATCH_SIZE: usize = 1_000;

/// Default HTTP server port.
pub const DEFAULT_PORT: u16 = 7070;

/// Default directory for index snapshot files.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Per-request HTTP timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum HTTP request body size in bytes (64 MB — bulk loads carry vectors).
pub const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Maximum number of concurrent in-flight requests.
pub const MAX_CONCURRENT_REQUESTS: usize = 512;

/// Interval in seconds between cluster heartbeats.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 5;

/// A node missing heartbeats for this long is marked inactive.
pub const NODE_FAILURE_WINDOW_SECS: u64 = 15;

/// Interval in seconds between anti-entropy reconciliation passes.
pub const ANTI_ENTROPY_INTERVAL_SECS: u64 = 60;
