//! Blob stores and the binary snapshot codec.
//!
//! Persistence is optional: the core operates in-memory and serializes an
//! index to a single blob on demand. Blobs go through the [`BlobStore`]
//! trait so deployments can back them with the local filesystem or a remote
//! object store.

/// Binary snapshot encode/decode for a built index.
pub mod snapshot;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::IndexError;

pub use snapshot::{decode_index, encode_index};

/// Named blob persistence consumed by the index core.
pub trait BlobStore: Send + Sync {
    fn save(&self, name: &str, bytes: &[u8]) -> Result<(), IndexError>;
    fn load(&self, name: &str) -> Result<Vec<u8>, IndexError>;
}

fn validate_blob_name(name: &str) -> Result<(), IndexError> {
    if name.is_empty()
        || name.len() > crate::config::MAX_INDEX_NAME_LEN
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(IndexError::InvalidArgument(format!(
            "invalid blob name '{name}'"
        )));
    }
    Ok(())
}

/// Filesystem-backed blob store. One `<name>.ivf` file per index; writes go
/// to a temp file first and rename into place so a crash never leaves a
/// half-written snapshot.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.ivf"))
    }
}

impl BlobStore for LocalStore {
    fn save(&self, name: &str, bytes: &[u8]) -> Result<(), IndexError> {
        validate_blob_name(name)?;
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(name);
        let tmp_path = self.dir.join(format!("{name}.ivf.tmp"));

        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &path)?;
        tracing::info!(name, bytes = bytes.len(), path = %path.display(), "snapshot saved");
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Vec<u8>, IndexError> {
        validate_blob_name(name)?;
        let bytes = fs::read(self.path_for(name))?;
        Ok(bytes)
    }
}

/// In-memory blob store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryStore {
    fn save(&self, name: &str, bytes: &[u8]) -> Result<(), IndexError> {
        validate_blob_name(name)?;
        self.blobs.write().insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Vec<u8>, IndexError> {
        validate_blob_name(name)?;
        self.blobs.read().get(name).cloned().ok_or_else(|| {
            IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no blob named '{name}'"),
            ))
        })
    }
}

/// List snapshot names present in a local data directory.
pub fn list_snapshots(dir: &str) -> Vec<String> {
    let path = Path::new(dir);
    let Ok(entries) = fs::read_dir(path) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("ivf") {
                path.file_stem()?.to_str().map(String::from)
            } else {
                None
            }
        })
        .collect();
    names.sort_unstable();
    names
}
