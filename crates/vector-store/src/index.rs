use crate::error::{Result, StoreError};
use ndarray::ArrayView1;
use std::collections::HashMap;

/// Cosine similarity of two equal-length vectors; `0.0` when either is zero
/// or the lengths differ.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    a.dot(&b) / (norm_a * norm_b)
}

/// Brute-force vector index keyed by checksum
#[derive(Debug, Default)]
pub struct VectorIndex {
    dimension: usize,
    vectors: HashMap<String, Vec<f32>>,
}

impl VectorIndex {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: HashMap::new(),
        }
    }

    fn check(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(StoreError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Add or replace the vector for `id`
    pub fn add(&mut self, id: &str, vector: Vec<f32>) -> Result<()> {
        self.check(&vector)?;
        self.vectors.insert(id.to_string(), vector);
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.vectors.contains_key(id)
    }

    /// Similarity of `query` to each of `ids`, in input order. Ids without a
    /// vector are skipped.
    pub fn similarities<'a>(&self, query: &[f32], ids: &[&'a str]) -> Result<Vec<(&'a str, f32)>> {
        self.check(query)?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.vectors
                    .get(*id)
                    .map(|vector| (*id, cosine_similarity(query, vector)))
            })
            .collect())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}
