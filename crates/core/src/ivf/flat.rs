//! Single-node IVF-Flat index.
//!
//! One trained quantizer and one shard's worth of postings, living in a
//! single process. This is the unit the single-node wrapper composes; the
//! distributed coordinator has its own multi-shard build path.
//!
//! Mutations after build are rebuild-semantics: `add` assigns with the
//! already-trained centroids and never retrains, so heavy churn degrades
//! recall until the caller rebuilds.

use rayon::prelude::*;

use crate::clustering::sample::sample_reservoir;
use crate::clustering::{Centroids, Clustering, ClusteringParams};
use crate::config;
use crate::distance::{argmin_l2sq, nearest_centroids};
use crate::error::IndexError;
use crate::index::IndexState;
use crate::ivf::coordinator::nlist_for;
use crate::ivf::posting::InvertedList;
use crate::ivf::shard::IvfShard;
use crate::search::Hit;

/// In-process IVF index over full (uncompressed) vectors.
#[derive(Debug)]
pub struct IvfFlatIndex {
    dim: usize,
    nlist_override: Option<usize>,
    params: ClusteringParams,
    centroids: Option<Centroids>,
    shard: IvfShard,
    state: IndexState,
    ntotal: u64,
}

impl IvfFlatIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            nlist_override: None,
            params: ClusteringParams::default(),
            centroids: None,
            shard: IvfShard::new(0, "local", dim),
            state: IndexState::Empty,
            ntotal: 0,
        }
    }

    /// Fix the centroid count instead of deriving it from the dataset size.
    pub fn with_nlist(mut self, nlist: usize) -> Self {
        self.nlist_override = Some(nlist.max(1));
        self
    }

    pub fn with_params(mut self, params: ClusteringParams) -> Self {
        self.params = params;
        self
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn size(&self) -> u64 {
        self.ntotal
    }

    pub fn state(&self) -> IndexState {
        self.state
    }

    pub fn is_trained(&self) -> bool {
        self.centroids.is_some()
    }

    /// Centroid count; zero before training.
    pub fn nlist(&self) -> usize {
        self.centroids.as_ref().map_or(0, Centroids::len)
    }

    /// Train the quantizer on a sample of the input and populate postings.
    pub fn build(&mut self, vectors: &[f32], ids: &[i64]) -> Result<(), IndexError> {
        if ids.is_empty() {
            return Err(IndexError::InvalidArgument(
                "build requires at least one vector".into(),
            ));
        }
        if vectors.len() != ids.len() * self.dim {
            return Err(IndexError::shape(vectors.len(), ids.len(), self.dim));
        }

        let n = ids.len();
        let d = self.dim;
        // Degenerate small inputs clamp to one centroid per vector.
        let k = self.nlist_override.unwrap_or_else(|| nlist_for(n as u64)).min(n);

        let n_train = (k * config::BUILD_SAMPLE_FACTOR).min(n);
        let sample = sample_reservoir(vectors, d, n, n_train, self.params.seed);
        let centroids = Clustering::with_params(d, k, self.params.clone()).train(&sample, n_train)?;

        let assignments: Vec<u32> = (0..n)
            .into_par_iter()
            .map(|i| argmin_l2sq(centroids.data(), d, k, &vectors[i * d..(i + 1) * d]) as u32)
            .collect();

        self.shard.clear();
        for (i, &centroid) in assignments.iter().enumerate() {
            match self.shard.posting_mut(centroid) {
                Some(list) => list.append(ids[i], &vectors[i * d..(i + 1) * d]),
                None => {
                    let mut list = InvertedList::with_capacity(d, n / k + 1);
                    list.append(ids[i], &vectors[i * d..(i + 1) * d]);
                    self.shard.add_posting(centroid, list);
                }
            }
        }

        self.centroids = Some(centroids);
        self.ntotal = n as u64;
        self.state = IndexState::Populated;
        Ok(())
    }

    /// Append vectors using the trained centroids.
    pub fn add(&mut self, vectors: &[f32], ids: &[i64]) -> Result<(), IndexError> {
        let Some(centroids) = self.centroids.as_ref() else {
            return Err(IndexError::InvalidState(
                "append requires a trained index".into(),
            ));
        };
        if vectors.len() != ids.len() * self.dim {
            return Err(IndexError::shape(vectors.len(), ids.len(), self.dim));
        }

        let d = self.dim;
        let k = centroids.len();
        for (i, &id) in ids.iter().enumerate() {
            let x = &vectors[i * d..(i + 1) * d];
            let centroid = argmin_l2sq(centroids.data(), d, k, x) as u32;
            match self.shard.posting_mut(centroid) {
                Some(list) => list.append(id, x),
                None => {
                    let mut list = InvertedList::new(d);
                    list.append(id, x);
                    self.shard.add_posting(centroid, list);
                }
            }
        }
        self.ntotal += ids.len() as u64;
        self.state = IndexState::Populated;
        Ok(())
    }

    /// Probe the `nprobe` nearest centroids and return the top-k.
    pub fn search(&self, query: &[f32], k: usize, nprobe: usize) -> Result<Vec<Hit>, IndexError> {
        if self.state != IndexState::Populated {
            return Err(IndexError::InvalidState(format!(
                "search requires a populated index, state is {:?}",
                self.state
            )));
        }
        let centroids = self
            .centroids
            .as_ref()
            .expect("populated index has centroids");
        if query.len() != self.dim {
            return Err(IndexError::InvalidDimension(format!(
                "query has {} components, index dimension is {}",
                query.len(),
                self.dim
            )));
        }
        if k == 0 {
            return Err(IndexError::InvalidArgument("k must be > 0".into()));
        }
        if nprobe == 0 {
            return Err(IndexError::InvalidArgument("nprobe must be > 0".into()));
        }

        let nprobe = nprobe.min(centroids.len());
        let probes = nearest_centroids(centroids.data(), self.dim, centroids.len(), query, nprobe);
        self.shard.search_local(&probes, query, k)
    }

    /// Remove every posting with the given id. Returns whether any existed.
    pub fn remove(&mut self, id: i64) -> bool {
        let mut removed = 0usize;
        for (_, list) in self.shard.postings_mut() {
            removed += list.remove_id(id);
        }
        self.ntotal -= removed as u64;
        removed > 0
    }

    /// Replace the vector stored under `id`. Returns `false` (and stores
    /// nothing) when the id is absent.
    pub fn update(&mut self, id: i64, vector: &[f32]) -> Result<bool, IndexError> {
        if vector.len() != self.dim {
            return Err(IndexError::InvalidDimension(format!(
                "vector has {} components, index dimension is {}",
                vector.len(),
                self.dim
            )));
        }
        if !self.remove(id) {
            return Ok(false);
        }
        self.add(vector, &[id])?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_dataset(n: usize, d: usize, seed: u64) -> (Vec<f32>, Vec<i64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let vectors = (0..n * d).map(|_| rng.random_range(-1.0..1.0)).collect();
        let ids = (0..n as i64).collect();
        (vectors, ids)
    }

    #[test]
    fn test_build_and_exact_self_search() {
        let (vectors, ids) = random_dataset(120, 4, 1);
        let mut idx = IvfFlatIndex::new(4).with_nlist(8);
        idx.build(&vectors, &ids).unwrap();

        assert_eq!(idx.size(), 120);
        assert_eq!(idx.nlist(), 8);

        let query = vectors[40 * 4..41 * 4].to_vec();
        let hits = idx.search(&query, 1, 8).unwrap();
        assert_eq!(hits[0].id, 40);
        assert_eq!(hits[0].distance, 0.0);
    }

    #[test]
    fn test_auto_nlist_clamps_to_n() {
        let (vectors, ids) = random_dataset(10, 2, 2);
        let mut idx = IvfFlatIndex::new(2);
        idx.build(&vectors, &ids).unwrap();
        assert!(idx.nlist() <= 10);
    }

    #[test]
    fn test_remove_then_search_misses_id() {
        let (vectors, ids) = random_dataset(50, 3, 3);
        let mut idx = IvfFlatIndex::new(3).with_nlist(4);
        idx.build(&vectors, &ids).unwrap();

        assert!(idx.remove(20));
        assert!(!idx.remove(20), "second removal finds nothing");
        assert_eq!(idx.size(), 49);

        let query = vectors[20 * 3..21 * 3].to_vec();
        let hits = idx.search(&query, 5, 4).unwrap();
        assert!(hits.iter().all(|h| h.id != 20));
    }

    #[test]
    fn test_update_moves_vector() {
        let (vectors, ids) = random_dataset(60, 2, 4);
        let mut idx = IvfFlatIndex::new(2).with_nlist(4);
        idx.build(&vectors, &ids).unwrap();

        assert!(idx.update(5, &[100.0, 100.0]).unwrap());
        assert_eq!(idx.size(), 60);

        let hits = idx.search(&[100.0, 100.0], 1, 4).unwrap();
        assert_eq!(hits[0].id, 5);
        assert_eq!(hits[0].distance, 0.0);
    }

    #[test]
    fn test_update_missing_id_is_noop() {
        let (vectors, ids) = random_dataset(30, 2, 5);
        let mut idx = IvfFlatIndex::new(2).with_nlist(2);
        idx.build(&vectors, &ids).unwrap();

        assert!(!idx.update(999, &[0.0, 0.0]).unwrap());
        assert_eq!(idx.size(), 30);
    }

    #[test]
    fn test_add_before_build_fails() {
        let mut idx = IvfFlatIndex::new(2);
        assert!(matches!(
            idx.add(&[0.0, 0.0], &[1]),
            Err(IndexError::InvalidState(_))
        ));
    }
}
