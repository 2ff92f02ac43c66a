//! Error kinds surfaced by index operations.
//!
//! The core reports all errors synchronously to the caller except shard
//! failures and search timeouts, which degrade into partial results (see
//! [`crate::search::SearchOutcome`]).

use thiserror::Error;

/// Errors returned by build, search, and persistence operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Vector buffer length is inconsistent with the dimension or the id count.
    #[error("invalid dimension: {0}")]
    InvalidDimension(String),

    /// Fewer training vectors than requested centroids.
    #[error("insufficient data: need at least {needed} vectors, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Operation requires a different index state (e.g. search before build).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A request parameter is out of range (e.g. `nprobe == 0`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A shard did not respond or returned malformed results.
    #[error("shard {0} unavailable")]
    ShardUnavailable(u32),

    /// The search deadline expired before all shards responded.
    #[error("search timed out after {0} ms")]
    Timeout(u64),

    /// A persistence blob failed magic, version, size, or checksum validation.
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),

    /// Underlying storage failure.
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl IndexError {
    /// Shorthand for shape mismatches between a vector buffer and the id list.
    pub fn shape(vectors_len: usize, ids_len: usize, dim: usize) -> Self {
        IndexError::InvalidDimension(format!(
            "vector buffer of {vectors_len} floats does not match {ids_len} ids at dimension {dim}"
        ))
    }
}
