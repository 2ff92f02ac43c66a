//! k-means coarse quantizer training.
//!
//! Training runs Lloyd refinement on a (usually sampled) subset of the
//! dataset: shuffle-based initialization, `argmin` assignment, mean update,
//! early stop once centroids settle. Every random choice flows from the
//! configured seed, so a fixed seed yields bit-identical centroids.

/// Deterministic uniform-without-replacement samplers.
pub mod sample;

use crate::config;
use crate::distance::{argmin_l2sq, l2sq};
use crate::error::IndexError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Tuning knobs for quantizer training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringParams {
    /// Maximum refinement passes per restart.
    pub niter: usize,
    /// Independent restarts; the lowest-cost result wins.
    pub nredo: usize,
    /// Deterministic PRNG seed for sampling and initialization.
    pub seed: u64,
    /// Lower bound on training points drawn per centroid.
    pub min_points_per_centroid: usize,
    /// Upper bound on training points drawn per centroid.
    pub max_points_per_centroid: usize,
    /// Hard cap on the sample as a fraction of the dataset.
    pub max_sample_ratio: f64,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            niter: config::KMEANS_DEFAULT_NITER,
            nredo: config::KMEANS_DEFAULT_NREDO,
            seed: config::KMEANS_DEFAULT_SEED,
            min_points_per_centroid: config::KMEANS_MIN_POINTS_PER_CENTROID,
            max_points_per_centroid: config::KMEANS_MAX_POINTS_PER_CENTROID,
            max_sample_ratio: config::KMEANS_MAX_SAMPLE_RATIO,
        }
    }
}

/// Trained centroid table: a dense `k * dim` matrix plus the parallel
/// centroid index array. Immutable after training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Centroids {
    dim: usize,
    data: Vec<f32>,
    ids: Vec<u32>,
}

impl Centroids {
    pub(crate) fn from_flat(dim: usize, data: Vec<f32>) -> Self {
        let k = data.len() / dim;
        Self {
            dim,
            data,
            ids: (0..k as u32).collect(),
        }
    }

    /// Number of centroids (`k`).
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The flat `k * dim` centroid matrix.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Parallel array of centroid indices `[0, k)`.
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    /// Borrow one centroid vector.
    pub fn get(&self, idx: u32) -> &[f32] {
        let offset = idx as usize * self.dim;
        &self.data[offset..offset + self.dim]
    }
}

/// Mini-batch k-means trainer for the coarse quantizer.
#[derive(Debug, Clone)]
pub struct Clustering {
    /// Vector dimension.
    pub d: usize,
    /// Number of centroids to fit.
    pub k: usize,
    /// Training parameters.
    pub params: ClusteringParams,
}

impl Clustering {
    pub fn new(d: usize, k: usize) -> Self {
        Self::with_params(d, k, ClusteringParams::default())
    }

    pub fn with_params(d: usize, k: usize, params: ClusteringParams) -> Self {
        Self { d, k, params }
    }

    /// Train `k` centroids on `n` vectors stored flat in `vectors`.
    ///
    /// Runs `nredo` independently seeded restarts and keeps the one with the
    /// lowest total assignment cost.
    pub fn train(&self, vectors: &[f32], n: usize) -> Result<Centroids, IndexError> {
        if self.d == 0 || vectors.len() % self.d != 0 || vectors.len() / self.d != n {
            return Err(IndexError::InvalidDimension(format!(
                "training buffer of {} floats is not {} vectors of dimension {}",
                vectors.len(),
                n,
                self.d
            )));
        }
        if n < self.k {
            return Err(IndexError::InsufficientData {
                needed: self.k,
                got: n,
            });
        }

        let mut best: Option<(Vec<f32>, f64)> = None;
        for redo in 0..self.params.nredo.max(1) {
            let (centroids, cost) = self.run_lloyd(vectors, n, self.params.seed + redo as u64);
            tracing::debug!(redo, cost, "k-means restart finished");
            let improves = match &best {
                Some((_, best_cost)) => cost < *best_cost,
                None => true,
            };
            if improves {
                best = Some((centroids, cost));
            }
        }

        let (data, cost) = best.expect("at least one restart runs");
        tracing::debug!(k = self.k, n, cost, "quantizer trained");
        Ok(Centroids::from_flat(self.d, data))
    }

    /// One seeded Lloyd run. Returns the centroid matrix and the total
    /// assignment cost from the final refinement pass.
    fn run_lloyd(&self, vectors: &[f32], n: usize, seed: u64) -> (Vec<f32>, f64) {
        let d = self.d;
        let k = self.k;
        let mut rng = StdRng::seed_from_u64(seed);

        // Random seeding: shuffle [0, n) and take the first k as centroids.
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut rng);
        let mut centroids: Vec<f32> = Vec::with_capacity(k * d);
        for &idx in &indices[..k] {
            centroids.extend_from_slice(&vectors[idx * d..(idx + 1) * d]);
        }

        let mut cost = 0.0f64;
        for iter in 0..self.params.niter.max(1) {
            // Assignment pass.
            let assignments: Vec<(usize, f32)> = (0..n)
                .into_par_iter()
                .map(|i| {
                    let x = &vectors[i * d..(i + 1) * d];
                    let c = argmin_l2sq(&centroids, d, k, x);
                    (c, l2sq(&centroids[c * d..], x, d))
                })
                .collect();
            cost = assignments.iter().map(|&(_, dist)| dist as f64).sum();

            // Update pass: centroids move to the mean of their members;
            // empty centroids keep their prior position.
            let mut sums = vec![0.0f32; k * d];
            let mut counts = vec![0usize; k];
            for (i, &(c, _)) in assignments.iter().enumerate() {
                counts[c] += 1;
                let base = c * d;
                for (j, &val) in vectors[i * d..(i + 1) * d].iter().enumerate() {
                    sums[base + j] += val;
                }
            }

            let mut max_change = 0.0f32;
            for (c, &count) in counts.iter().enumerate() {
                if count == 0 {
                    continue;
                }
                let base = c * d;
                for j in 0..d {
                    sums[base + j] /= count as f32;
                }
                let change = l2sq(&centroids[base..], &sums[base..], d);
                if change > max_change {
                    max_change = change;
                }
                centroids[base..base + d].copy_from_slice(&sums[base..base + d]);
            }

            if iter > 0 && max_change < config::KMEANS_CONVERGENCE_EPS {
                break;
            }
        }

        (centroids, cost)
    }

    /// Sample size for a dataset of `n` vectors:
    /// `clamp(min(n, k * u, floor(max_sample_ratio * n)), k, n)` with
    /// `u` drawn once from the seeded PRNG in
    /// `[min_points_per_centroid, max_points_per_centroid]`.
    pub fn sample_size(&self, n: usize) -> usize {
        let mut lo = self.params.min_points_per_centroid as u64;
        let mut hi = self.params.max_points_per_centroid as u64;
        if lo > hi {
            std::mem::swap(&mut lo, &mut hi);
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let points_per_centroid = rng.random_range(lo..=hi);

        let k = self.k as u64;
        let n_u64 = n as u64;
        let target = k.saturating_mul(points_per_centroid);
        let ratio_cap = (self.params.max_sample_ratio * n as f64).floor() as u64;

        let s = n_u64.min(target).min(ratio_cap).max(k).min(n_u64);
        s as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(vectors: &[[f32; 2]]) -> Vec<f32> {
        vectors.iter().flat_map(|v| v.iter().copied()).collect()
    }

    #[test]
    fn test_train_rejects_too_few_vectors() {
        let c = Clustering::new(2, 4);
        let data = flat(&[[0.0, 0.0], [1.0, 1.0]]);
        let err = c.train(&data, 2).unwrap_err();
        assert!(matches!(
            err,
            IndexError::InsufficientData { needed: 4, got: 2 }
        ));
    }

    #[test]
    fn test_train_rejects_ragged_buffer() {
        let c = Clustering::new(3, 1);
        let err = c.train(&[0.0, 1.0, 2.0, 3.0], 1).unwrap_err();
        assert!(matches!(err, IndexError::InvalidDimension(_)));
    }

    #[test]
    fn test_train_rejects_count_mismatch() {
        let c = Clustering::new(2, 1);
        let err = c.train(&[0.0, 1.0, 2.0, 3.0], 3).unwrap_err();
        assert!(matches!(err, IndexError::InvalidDimension(_)));
    }

    #[test]
    fn test_two_well_separated_clusters() {
        let data = flat(&[[0.1, 0.1], [0.2, 0.0], [9.8, 10.1], [10.2, 9.9]]);
        let c = Clustering::new(2, 2);
        let centroids = c.train(&data, 4).unwrap();

        assert_eq!(centroids.len(), 2);
        assert_eq!(centroids.ids(), &[0, 1]);

        // One centroid near (0.15, 0.05), the other near (10.0, 10.0).
        let mut lows = 0;
        let mut highs = 0;
        for idx in 0..2u32 {
            let c = centroids.get(idx);
            if (c[0] - 0.15).abs() < 0.5 && (c[1] - 0.05).abs() < 0.5 {
                lows += 1;
            }
            if (c[0] - 10.0).abs() < 0.5 && (c[1] - 10.0).abs() < 0.5 {
                highs += 1;
            }
        }
        assert_eq!((lows, highs), (1, 1));
    }

    #[test]
    fn test_training_is_deterministic_for_fixed_seed() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 200;
        let d = 8;
        let data: Vec<f32> = (0..n * d).map(|_| rng.random_range(-1.0..1.0)).collect();

        let c = Clustering::new(d, 16);
        let a = c.train(&data, n).unwrap();
        let b = c.train(&data, n).unwrap();
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn test_different_seeds_usually_differ() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 100;
        let d = 4;
        let data: Vec<f32> = (0..n * d).map(|_| rng.random_range(-1.0..1.0)).collect();

        let mut p1 = ClusteringParams::default();
        p1.seed = 1;
        p1.niter = 1;
        let mut p2 = p1.clone();
        p2.seed = 2;

        let a = Clustering::with_params(d, 8, p1).train(&data, n).unwrap();
        let b = Clustering::with_params(d, 8, p2).train(&data, n).unwrap();
        assert_ne!(a.data(), b.data());
    }

    #[test]
    fn test_n_equals_k_keeps_every_point() {
        // Every vector becomes its own centroid; cost is zero.
        let data = flat(&[[0.0, 0.0], [5.0, 0.0], [0.0, 5.0]]);
        let centroids = Clustering::new(2, 3).train(&data, 3).unwrap();
        assert_eq!(centroids.len(), 3);
        for i in 0..3usize {
            let x = &data[i * 2..(i + 1) * 2];
            let c = crate::distance::argmin_l2sq(centroids.data(), 2, 3, x);
            assert_eq!(l2sq(centroids.get(c as u32), x, 2), 0.0);
        }
    }

    #[test]
    fn test_nredo_keeps_lowest_cost_restart() {
        let mut rng = StdRng::seed_from_u64(99);
        let n = 120;
        let d = 4;
        let data: Vec<f32> = (0..n * d).map(|_| rng.random_range(-1.0..1.0)).collect();

        // With niter = 1 restarts barely refine, so restart choice matters.
        let mut single = ClusteringParams::default();
        single.niter = 1;
        let mut multi = single.clone();
        multi.nredo = 8;

        let cost_of = |centroids: &Centroids| -> f64 {
            (0..n)
                .map(|i| {
                    let x = &data[i * d..(i + 1) * d];
                    let c = argmin_l2sq(centroids.data(), d, centroids.len(), x);
                    l2sq(centroids.get(c as u32), x, d) as f64
                })
                .sum()
        };

        let base = Clustering::with_params(d, 10, single).train(&data, n).unwrap();
        let best = Clustering::with_params(d, 10, multi).train(&data, n).unwrap();
        assert!(cost_of(&best) <= cost_of(&base) + 1e-6);
    }

    #[test]
    fn test_sample_size_bounds() {
        let c = Clustering::new(8, 10);
        let n = 100_000;
        let s = c.sample_size(n);
        assert!(s >= 10, "lower clamp is k");
        assert!(s <= n);
        // Capped by max_sample_ratio.
        assert!(s as f64 <= c.params.max_sample_ratio * n as f64 + 1.0);
    }

    #[test]
    fn test_sample_size_is_deterministic() {
        let c = Clustering::new(8, 64);
        assert_eq!(c.sample_size(50_000), c.sample_size(50_000));
    }

    #[test]
    fn test_sample_size_tiny_dataset_clamps_to_n() {
        let c = Clustering::new(2, 4);
        assert_eq!(c.sample_size(4), 4);
    }
}
