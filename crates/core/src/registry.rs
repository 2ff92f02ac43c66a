//! Named index registry with thread-safe concurrent access.
//!
//! The registry hands out cloned handles to [`IndexEngine`]s; each engine
//! serializes its own readers and writers with a reader-writer lock, so
//! many searches can run concurrently with at most one mutator per index.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::IndexError;
use crate::index::IndexEngine;

/// Shared handle to one index engine.
pub type IndexHandle = Arc<RwLock<IndexEngine>>;

/// All indexes hosted by this process, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct IndexRegistry {
    indexes: Arc<RwLock<HashMap<String, IndexHandle>>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new index. Fails if the name is taken.
    pub fn create(&self, engine: IndexEngine) -> Result<IndexHandle, IndexError> {
        let mut indexes = self.indexes.write();
        let name = engine.name().to_string();
        if indexes.contains_key(&name) {
            return Err(IndexError::InvalidArgument(format!(
                "index '{name}' already exists"
            )));
        }
        let handle = Arc::new(RwLock::new(engine));
        indexes.insert(name, handle.clone());
        Ok(handle)
    }

    /// Insert or replace an index (snapshot restore path).
    pub fn insert(&self, engine: IndexEngine) -> IndexHandle {
        let name = engine.name().to_string();
        let handle = Arc::new(RwLock::new(engine));
        self.indexes.write().insert(name, handle.clone());
        handle
    }

    /// Cloned handle to the named index, or `None`.
    pub fn get(&self, name: &str) -> Option<IndexHandle> {
        self.indexes.read().get(name).cloned()
    }

    /// Drop an index. Returns `true` if it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.indexes.write().remove(name).is_some()
    }

    /// Sorted names of all registered indexes.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.indexes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Index, IndexFamily};
    use crate::ivf::DistributedIvf;

    fn distributed(name: &str) -> IndexEngine {
        IndexEngine::Distributed(
            DistributedIvf::new(name, 4, 100, 2, vec!["local".into()])
                .unwrap()
                .with_nlist(4),
        )
    }

    fn single(name: &str) -> IndexEngine {
        IndexEngine::Single(Index::new(name, 4, 1, IndexFamily::Ivf).unwrap())
    }

    #[test]
    fn test_create_and_get() {
        let registry = IndexRegistry::new();
        registry.create(distributed("a")).unwrap();

        let handle = registry.get("a").unwrap();
        assert_eq!(handle.read().dimension(), 4);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_create_duplicate_fails() {
        let registry = IndexRegistry::new();
        registry.create(distributed("a")).unwrap();
        assert!(registry.create(single("a")).is_err());
    }

    #[test]
    fn test_insert_replaces() {
        let registry = IndexRegistry::new();
        registry.create(distributed("a")).unwrap();
        registry.insert(single("a"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("a").unwrap().read().as_distributed().is_none());
    }

    #[test]
    fn test_remove_and_list() {
        let registry = IndexRegistry::new();
        registry.create(distributed("b")).unwrap();
        registry.create(single("a")).unwrap();
        assert_eq!(registry.list(), vec!["a".to_string(), "b".to_string()]);

        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert_eq!(registry.list(), vec!["b".to_string()]);
    }

    #[test]
    fn test_handles_share_state() {
        let registry = IndexRegistry::new();
        registry.create(distributed("a")).unwrap();

        let h1 = registry.get("a").unwrap();
        let h2 = registry.get("a").unwrap();
        let vectors: Vec<f32> = (0..40).map(|i| i as f32).collect();
        let ids: Vec<i64> = (0..10).collect();
        h1.write().build(&vectors, &ids).unwrap();
        assert_eq!(h2.read().size(), 10);
    }
}
