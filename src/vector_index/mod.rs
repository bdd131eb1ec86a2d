//! VectorIndex (C2): an in-memory ANN capability built from the chunk
//! store, abstracting over HNSW and brute-force implementations so callers
//! can select per build.

pub mod brute_force;
pub mod hnsw;

use thiserror::Error;

use crate::chunk::Metadata;
use crate::embedding::Embedding;

/// A single candidate returned by a vector index query.
#[derive(Debug, Clone)]
pub struct IndexResult {
    pub chunk_id: String,
    /// Cosine similarity mapped from `[-1, 1]` into `[0, 1]`.
    pub score: f32,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("dimension mismatch: index built for {expected}, query has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid query vector: {reason}")]
    InvalidQueryVector { reason: String },
}

/// A post-ANN predicate over chunk metadata. Evaluated after retrieval, so
/// ANN implementations oversample (`max(k, 4*k)` candidates) whenever one is
/// present.
pub type MetadataFilter<'a> = dyn Fn(&Metadata) -> bool + Send + Sync + 'a;

/// One entry the index was built from: the normalized vector plus whatever
/// metadata a filter predicate might need.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub embedding: Embedding,
    pub metadata: Metadata,
}

/// Capability: "given a query vector, return the top-K chunk ids with
/// scores." Implementations are immutable after build; concurrent queries
/// are safe and wait-free.
pub trait VectorIndex: Send + Sync {
    fn search(
        &self,
        query: &Embedding,
        k: usize,
        filter: Option<&MetadataFilter<'_>>,
    ) -> Result<Vec<IndexResult>, IndexError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn name(&self) -> &'static str;

    fn dimensions(&self) -> usize;
}

/// Validates a query vector against an index's dimensionality: finite
/// components, matching length. Shared by every `VectorIndex` impl so the
/// edge-case behavior (C2 §4.2) is uniform.
pub fn validate_query_vector(query: &Embedding, dimensions: usize) -> Result<(), IndexError> {
    if query.len() != dimensions {
        return Err(IndexError::DimensionMismatch {
            expected: dimensions,
            actual: query.len(),
        });
    }
    if !query.is_finite() {
        return Err(IndexError::InvalidQueryVector {
            reason: "query vector contains NaN or infinite components".to_string(),
        });
    }
    Ok(())
}

/// Oversample factor applied when a metadata filter is present: ANN
/// retrieval requests `max(k, 4*k)` candidates before filtering.
pub fn oversample_k(k: usize, has_filter: bool) -> usize {
    if has_filter {
        (k * 4).max(k)
    } else {
        k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversample_applies_only_with_filter() {
        assert_eq!(oversample_k(10, false), 10);
        assert_eq!(oversample_k(10, true), 40);
    }

    #[test]
    fn validate_rejects_dimension_mismatch() {
        let q = Embedding::new(vec![1.0, 2.0]);
        assert!(matches!(
            validate_query_vector(&q, 3),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn validate_rejects_nan() {
        let q = Embedding::new(vec![1.0, f32::NAN]);
        assert!(matches!(
            validate_query_vector(&q, 2),
            Err(IndexError::InvalidQueryVector { .. })
        ));
    }

    #[test]
    fn validate_accepts_good_vector() {
        let q = Embedding::new(vec![1.0, 0.0]);
        assert!(validate_query_vector(&q, 2).is_ok());
    }
}
