//! In-memory vector store with item metadata.
//!
//! Stores one embedding per live item together with the item itself, so the
//! "every embedding has an item and vice versa" invariant holds by construction.

use std::collections::HashMap;

use crate::items::Item;

/// An entry in the vector store.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// The item as it looked when last synced
    pub item: Item,
    /// Hash of the semantic text that was embedded
    pub content_hash: u64,
    /// The embedding vector
    pub embedding: Vec<f32>,
}

/// Embeddings keyed by item id.
#[derive(Debug, Clone)]
pub struct VectorStore {
    entries: HashMap<String, VectorEntry>,
    /// Expected embedding dimensions
    dimensions: usize,
}

impl VectorStore {
    /// Create a new empty store with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            entries: HashMap::new(),
            dimensions,
        }
    }

    /// Create a store with pre-allocated capacity.
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace the entry of `item.id`.
    ///
    /// Returns an error if the embedding has the wrong size or zero norm.
    pub fn insert(
        &mut self,
        item: Item,
        content_hash: u64,
        embedding: Vec<f32>,
    ) -> Result<(), IndexError> {
        if embedding.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        if l2_norm(&embedding) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        self.entries.insert(
            item.id.clone(),
            VectorEntry {
                item,
                content_hash,
                embedding,
            },
        );

        Ok(())
    }

    /// Replace the stored item metadata without touching the embedding.
    pub fn refresh_item(&mut self, item: Item) -> bool {
        match self.entries.get_mut(&item.id) {
            Some(entry) => {
                entry.item = item;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<VectorEntry> {
        self.entries.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&VectorEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VectorEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Entries ordered by item id, for deterministic traversal.
    pub fn sorted_entries(&self) -> Vec<&VectorEntry> {
        let mut entries: Vec<&VectorEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.item.id.cmp(&b.item.id));
        entries
    }
}

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store a zero-norm vector")]
    ZeroNormVector,
}

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity in [-1, 1]. Zero vectors are similar to nothing.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot_product / (norm_a * norm_b)
}

/// Arithmetic mean of equally sized vectors. `None` for an empty input.
pub fn mean_vector<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut iter = vectors.into_iter();
    let first = iter.next()?;
    let mut sum = first.to_vec();
    let mut count = 1usize;

    for v in iter {
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += x;
        }
        count += 1;
    }

    let count = count as f32;
    sum.iter_mut().for_each(|x| *x /= count);
    Some(sum)
}

/// Scale to unit length. Zero vectors are returned unchanged.
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = l2_norm(&v);
    if norm >= f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}
