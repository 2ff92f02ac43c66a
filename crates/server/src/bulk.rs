//! Bulk vector ingestion with progress tracking.
//!
//! Large loads run off the request path: the handler registers a load,
//! spawns the worker, and returns a load id the client polls for progress.
//! An untrained index is built from the whole payload (training needs the
//! full sample); subsequent loads append batch by batch.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use shardann_core::registry::IndexHandle;

/// Point-in-time progress of one bulk load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadProgress {
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
    pub percent: f64,
    pub status: String,
}

impl LoadProgress {
    fn pending(total: u64) -> Self {
        Self {
            total,
            processed: 0,
            failed: 0,
            percent: 0.0,
            status: "pending".into(),
        }
    }
}

/// Tracks active and finished loads; workers update it, handlers read it.
#[derive(Debug, Clone, Default)]
pub struct BulkLoader {
    loads: Arc<RwLock<HashMap<String, LoadProgress>>>,
}

impl BulkLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a load before spawning its worker so progress polls never
    /// race the spawn.
    pub fn register(&self, load_id: &str, total: u64) {
        self.loads
            .write()
            .insert(load_id.to_string(), LoadProgress::pending(total));
    }

    pub fn progress(&self, load_id: &str) -> Option<LoadProgress> {
        self.loads.read().get(load_id).cloned()
    }

    /// Ids of loads that are still pending or running.
    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .loads
            .read()
            .iter()
            .filter(|(_, p)| p.status == "pending" || p.status == "running")
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_unstable();
        ids
    }

    fn update<F: FnOnce(&mut LoadProgress)>(&self, load_id: &str, f: F) {
        let mut loads = self.loads.write();
        if let Some(progress) = loads.get_mut(load_id) {
            f(progress);
            progress.percent = if progress.total == 0 {
                100.0
            } else {
                progress.processed as f64 / progress.total as f64 * 100.0
            };
        }
    }

    /// Run a load to completion. Synchronous: callers put this on a
    /// blocking worker.
    pub fn run(
        &self,
        load_id: &str,
        handle: IndexHandle,
        vectors: Vec<f32>,
        ids: Vec<i64>,
        batch_size: usize,
    ) {
        let started = Instant::now();
        let total = ids.len() as u64;
        let dim = handle.read().dimension();
        self.update(load_id, |p| p.status = "running".into());

        // Training needs the whole sample, so a first load builds in one
        // step; later loads append batch by batch.
        let needs_build = !handle.read().is_trained();
        if needs_build {
            let result = handle.write().build(&vectors, &ids);
            match result {
                Ok(()) => self.update(load_id, |p| {
                    p.processed = total;
                    p.status = "completed".into();
                }),
                Err(err) => {
                    tracing::error!(load_id, %err, "bulk build failed");
                    self.update(load_id, |p| {
                        p.failed = total;
                        p.status = format!("failed: {err}");
                    });
                }
            }
        } else {
            let batch = batch_size.max(1);
            for (i, id_chunk) in ids.chunks(batch).enumerate() {
                let offset = i * batch * dim;
                let vec_chunk = &vectors[offset..offset + id_chunk.len() * dim];
                let result = handle.write().add(vec_chunk, id_chunk);
                match result {
                    Ok(()) => self.update(load_id, |p| p.processed += id_chunk.len() as u64),
                    Err(err) => {
                        tracing::error!(load_id, %err, "bulk batch failed");
                        self.update(load_id, |p| {
                            p.failed = total - p.processed;
                            p.status = format!("failed: {err}");
                        });
                        return;
                    }
                }
            }
            self.update(load_id, |p| p.status = "completed".into());
        }

        tracing::info!(
            load_id,
            total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "bulk load finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock as PlRwLock;
    use shardann_core::index::IndexEngine;
    use shardann_core::ivf::DistributedIvf;

    fn handle() -> IndexHandle {
        let idx = DistributedIvf::new("bulk", 2, 100, 2, vec!["local".into()])
            .unwrap()
            .with_nlist(4);
        Arc::new(PlRwLock::new(IndexEngine::Distributed(idx)))
    }

    fn dataset(n: usize) -> (Vec<f32>, Vec<i64>) {
        let vectors = (0..n * 2).map(|i| i as f32 * 0.1).collect();
        let ids = (0..n as i64).collect();
        (vectors, ids)
    }

    #[test]
    fn test_first_load_builds_index() {
        let loader = BulkLoader::new();
        let handle = handle();
        let (vectors, ids) = dataset(50);

        loader.register("load-1", 50);
        loader.run("load-1", handle.clone(), vectors, ids, 10);

        let progress = loader.progress("load-1").unwrap();
        assert_eq!(progress.status, "completed");
        assert_eq!(progress.processed, 50);
        assert_eq!(progress.percent, 100.0);
        assert_eq!(handle.read().size(), 50);
    }

    #[test]
    fn test_second_load_appends_in_batches() {
        let loader = BulkLoader::new();
        let handle = handle();
        let (vectors, ids) = dataset(40);
        loader.register("a", 40);
        loader.run("a", handle.clone(), vectors, ids, 10);

        let more_vectors: Vec<f32> = (0..20).map(|i| 100.0 + i as f32).collect();
        let more_ids: Vec<i64> = (100..110).collect();
        loader.register("b", 10);
        loader.run("b", handle.clone(), more_vectors, more_ids, 3);

        let progress = loader.progress("b").unwrap();
        assert_eq!(progress.status, "completed");
        assert_eq!(handle.read().size(), 50);
    }

    #[test]
    fn test_failed_build_reports_failure() {
        let loader = BulkLoader::new();
        let handle = handle();
        // Too few vectors to train 4 centroids.
        loader.register("bad", 2);
        loader.run("bad", handle.clone(), vec![0.0, 0.0, 1.0, 1.0], vec![1, 2], 10);

        let progress = loader.progress("bad").unwrap();
        assert!(progress.status.starts_with("failed"));
        assert_eq!(progress.failed, 2);
    }

    #[test]
    fn test_active_lists_unfinished_loads() {
        let loader = BulkLoader::new();
        loader.register("x", 10);
        assert_eq!(loader.active(), vec!["x".to_string()]);
    }
}
