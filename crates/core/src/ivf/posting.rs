//! Append-only inverted lists.
//!
//! One list per centroid, holding parallel arrays of ids and contiguously
//! stored vectors. Contiguous storage lets a probe scan the list with a
//! tight inner loop over cache-friendly memory; random-access deletion is
//! not supported (mutations go through [`remove_id`](InvertedList::remove_id),
//! which compacts the whole list).

/// The bucket of vectors whose closest centroid is a given one.
///
/// Invariant: `vectors.len() == ids.len() * dim`. Entries keep insertion
/// order; duplicate ids are stored as duplicate postings.
#[derive(Debug, Clone, Default)]
pub struct InvertedList {
    dim: usize,
    ids: Vec<i64>,
    vectors: Vec<f32>,
}

impl InvertedList {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            ids: Vec::new(),
            vectors: Vec::new(),
        }
    }

    /// Pre-size the list for `n` entries.
    pub fn with_capacity(dim: usize, n: usize) -> Self {
        Self {
            dim,
            ids: Vec::with_capacity(n),
            vectors: Vec::with_capacity(n * dim),
        }
    }

    /// Append one posting. `vector` must have length `dim`.
    pub fn append(&mut self, id: i64, vector: &[f32]) {
        debug_assert_eq!(vector.len(), self.dim);
        self.ids.push(id);
        self.vectors.extend_from_slice(vector);
    }

    /// Append every entry of `other`, preserving its order.
    pub fn extend(&mut self, other: &InvertedList) {
        debug_assert_eq!(other.dim, self.dim);
        self.ids.extend_from_slice(&other.ids);
        self.vectors.extend_from_slice(&other.vectors);
    }

    /// Remove every posting with the given id, compacting in place.
    /// Returns the number of entries removed; remaining order is preserved.
    pub fn remove_id(&mut self, id: i64) -> usize {
        let dim = self.dim;
        let mut write = 0usize;
        for read in 0..self.ids.len() {
            if self.ids[read] == id {
                continue;
            }
            if write != read {
                self.ids[write] = self.ids[read];
                self.vectors
                    .copy_within(read * dim..(read + 1) * dim, write * dim);
            }
            write += 1;
        }
        let removed = self.ids.len() - write;
        self.ids.truncate(write);
        self.vectors.truncate(write * dim);
        removed
    }

    /// Number of postings in the list.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// The flat `len * dim` vector buffer.
    pub fn vectors(&self) -> &[f32] {
        &self.vectors
    }

    /// Iterate postings in insertion order as `(id, vector)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &[f32])> {
        self.ids
            .iter()
            .copied()
            .zip(self.vectors.chunks_exact(self.dim))
    }
}
