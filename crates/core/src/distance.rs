//! Squared-L2 distance kernel and nearest-centroid selection.
//!
//! Squared distance preserves the ordering of true Euclidean distance while
//! skipping the square root, so every hot path in the crate works in L2².
//! The inner loops use SIMD-friendly chunked accumulation so the compiler
//! can auto-vectorize; no heap allocation happens on the kernel path.

use ordered_float::OrderedFloat;

/// SIMD-friendly chunk size for the f32 inner loops.
const CHUNK: usize = 8;

/// Squared Euclidean distance between `x[..d]` and `y[..d]`.
///
/// Both slices must have length >= `d`. Accumulates in independent lanes
/// per chunk so results stay within 1e-5 relative error of the naive sum.
#[inline]
pub fn l2sq(x: &[f32], y: &[f32], d: usize) -> f32 {
    debug_assert!(x.len() >= d && y.len() >= d);

    let full_chunks = d / CHUNK;
    let mut total = 0.0f32;

    for c in 0..full_chunks {
        let base = c * CHUNK;
        let mut acc = [0.0f32; CHUNK];
        for j in 0..CHUNK {
            let diff = x[base + j] - y[base + j];
            acc[j] = diff * diff;
        }
        total += acc.iter().sum::<f32>();
    }

    for i in (full_chunks * CHUNK)..d {
        let diff = x[i] - y[i];
        total += diff * diff;
    }

    total
}

/// Index of the point in `points` (a flat `n * d` buffer) closest to `y`.
///
/// Ties resolve to the lowest index (strict `<` during the scan).
/// `n` must be > 0; callers guard the empty case.
#[inline]
pub fn argmin_l2sq(points: &[f32], d: usize, n: usize, y: &[f32]) -> usize {
    debug_assert!(n > 0, "argmin over an empty point set");
    debug_assert!(points.len() >= n * d);

    let mut best_idx = 0;
    let mut best_dist = f32::MAX;
    for i in 0..n {
        let dist = l2sq(&points[i * d..], y, d);
        if dist < best_dist {
            best_dist = dist;
            best_idx = i;
        }
    }
    best_idx
}

/// The `nprobe` indices in `points` closest to `y`, nearest first.
///
/// Returns exactly `min(nprobe, n)` distinct indices; equal distances break
/// toward the lower centroid index so probe sets are deterministic.
pub fn nearest_centroids(points: &[f32], d: usize, n: usize, y: &[f32], nprobe: usize) -> Vec<u32> {
    let mut distances: Vec<(OrderedFloat<f32>, u32)> = (0..n)
        .map(|i| (OrderedFloat(l2sq(&points[i * d..], y, d)), i as u32))
        .collect();
    distances.sort_unstable();
    distances.truncate(nprobe);
    distances.into_iter().map(|(_, i)| i).collect()
}
