//! In-memory vector index
//!
//! Holds one fixed-dimension embedding per CHILD chunk, keyed by chunk id,
//! together with the embedding-model version that produced it. The index
//! rejects vectors of the wrong dimension at upsert and queries of the
//! wrong dimension at search; the configured dimension is exposed for the
//! health-check precondition.

use crate::errors::{AppError, Result};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

pub struct VectorIndex {
    dimension: usize,
    model_version: String,
    vectors: RwLock<HashMap<Uuid, Vec<f32>>>,
}

impl VectorIndex {
    pub fn new(dimension: usize, model_version: impl Into<String>) -> Self {
        Self {
            dimension,
            model_version: model_version.into(),
            vectors: RwLock::new(HashMap::new()),
        }
    }

    /// Configured vector dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embedding-model version the stored vectors were produced with
    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn len(&self) -> usize {
        self.vectors.read().expect("vector index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace a chunk's embedding
    pub fn upsert(&self, chunk_id: Uuid, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(AppError::EmbeddingDimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        self.vectors
            .write()
            .expect("vector index lock poisoned")
            .insert(chunk_id, vector);
        Ok(())
    }

    pub fn remove(&self, chunk_id: Uuid) {
        self.vectors
            .write()
            .expect("vector index lock poisoned")
            .remove(&chunk_id);
    }

    pub fn remove_many(&self, chunk_ids: &[Uuid]) {
        let mut vectors = self.vectors.write().expect("vector index lock poisoned");
        for id in chunk_ids {
            vectors.remove(id);
        }
    }

    /// Score every stored vector against the query by cosine similarity.
    /// The caller filters and ranks; result order is unspecified.
    pub fn score_all(&self, query: &[f32]) -> Result<Vec<(Uuid, f32)>> {
        if query.len() != self.dimension {
            return Err(AppError::EmbeddingDimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let vectors = self.vectors.read().expect("vector index lock poisoned");
        Ok(vectors
            .iter()
            .map(|(id, v)| (*id, cosine_similarity(query, v)))
            .collect())
    }
}

/// Cosine similarity in [-1,1]; zero-norm vectors score 0
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
