//! Deterministic uniform-without-replacement samplers over flat vector buffers.
//!
//! Two semantically equivalent forms: shuffle-and-prefix, and a reservoir
//! (Algorithm R) variant that streams the input in O(n) time and O(s * d)
//! space. The build pipeline prefers the reservoir form for large datasets.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Draw `s` vectors by shuffling `[0, n)` and copying out the prefix.
pub fn sample_shuffle(vectors: &[f32], d: usize, n: usize, s: usize, seed: u64) -> Vec<f32> {
    let s = s.min(n);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut rng);

    let mut sample = Vec::with_capacity(s * d);
    for &idx in &indices[..s] {
        sample.extend_from_slice(&vectors[idx * d..(idx + 1) * d]);
    }
    sample
}

/// Draw `s` vectors with reservoir sampling (Algorithm R).
///
/// Each of the `n` input vectors ends up in the reservoir with probability
/// `s / n`; no index array over the full dataset is materialized.
pub fn sample_reservoir(vectors: &[f32], d: usize, n: usize, s: usize, seed: u64) -> Vec<f32> {
    let s = s.min(n);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut reservoir: Vec<f32> = vectors[..s * d].to_vec();
    for i in s..n {
        let j = rng.random_range(0..=i);
        if j < s {
            let src = &vectors[i * d..(i + 1) * d];
            reservoir[j * d..(j + 1) * d].copy_from_slice(src);
        }
    }
    reservoir
}
