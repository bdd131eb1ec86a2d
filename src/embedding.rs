//! The `Embedding` value type and the `EmbeddingProvider` capability.
//!
//! The concrete provider (model loading, tokenization, ONNX/GPU inference)
//! is an external collaborator; the core only depends on this trait and the
//! little-endian blob encoding used to persist vectors (see `store::helpers`).

use async_trait::async_trait;

/// A dense embedding vector. Kept as a thin newtype so call sites can't
/// accidentally mix it up with an arbitrary `Vec<f32>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Embedding(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Whether every component is finite. Non-finite embeddings are a
    /// format error per the data model invariants.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// L2-normalized copy. `VectorIndex` implementations store normalized
    /// vectors so cosine similarity reduces to a dot product.
    pub fn normalized(&self) -> Embedding {
        let norm = self.0.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return self.clone();
        }
        Embedding(self.0.iter().map(|v| v / norm).collect())
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Embedding(values)
    }
}

/// Result of embedding a single piece of text.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub vector: Embedding,
    pub token_count: u32,
    pub model: String,
}

/// Capability: turn text into vectors. `dimensions()` is advertised at
/// construction and must be stable for the lifetime of the provider —
/// `MultiProjectFusion` (C7) relies on it to fail fast on cross-model
/// mixing.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, recorded on the project and checked by C7.
    fn model_name(&self) -> &str;

    /// Vector dimensionality this provider produces.
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> anyhow::Result<EmbeddingResult>;

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<EmbeddingResult>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// A hash-seeded embedding provider with no backing model. Produces
/// stable vectors so storage and ranking plumbing are exercisable, but
/// carries no semantic meaning — the CLI falls back to this only until a
/// real embedding capability is configured.
pub struct PlaceholderEmbeddingProvider {
    dims: usize,
}

impl PlaceholderEmbeddingProvider {
    pub fn new(dims: usize) -> Self {
        PlaceholderEmbeddingProvider { dims }
    }

    fn deterministic_vector(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish();
        (0..self.dims)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                ((state >> 33) as f32 / u32::MAX as f32) * 2.0 - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for PlaceholderEmbeddingProvider {
    fn model_name(&self) -> &str {
        "placeholder-no-model"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> anyhow::Result<EmbeddingResult> {
        Ok(EmbeddingResult {
            vector: Embedding::new(self.deterministic_vector(text)),
            token_count: text.split_whitespace().count() as u32,
            model: self.model_name().to_string(),
        })
    }
}

#[cfg(test)]
pub mod fake {
    //! A deterministic in-memory embedding provider for tests, so the full
    //! pipeline is exercisable without any real model weights.
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    pub struct FakeEmbeddingProvider {
        pub model: String,
        pub dims: usize,
    }

    impl FakeEmbeddingProvider {
        pub fn new(dims: usize) -> Self {
            FakeEmbeddingProvider {
                model: "fake-embedder".into(),
                dims,
            }
        }

        /// Deterministic pseudo-embedding: hash-seeded, so identical text
        /// always yields an identical vector and near-identical text yields
        /// a nearby one in the common case used by tests.
        fn deterministic_vector(&self, text: &str) -> Vec<f32> {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            let seed = hasher.finish();
            let mut state = seed;
            (0..self.dims)
                .map(|_| {
                    state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                    ((state >> 33) as f32 / u32::MAX as f32) * 2.0 - 1.0
                })
                .collect()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FakeEmbeddingProvider {
        fn model_name(&self) -> &str {
            &self.model
        }

        fn dimensions(&self) -> usize {
            self.dims
        }

        async fn embed(&self, text: &str) -> anyhow::Result<EmbeddingResult> {
            Ok(EmbeddingResult {
                vector: Embedding::new(self.deterministic_vector(text)),
                token_count: text.split_whitespace().count() as u32,
                model: self.model.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_has_unit_length() {
        let e = Embedding::new(vec![3.0, 4.0]);
        let n = e.normalized();
        let len: f32 = n.as_slice().iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((len - 1.0).abs() < 1e-5);
    }

    #[test]
    fn normalized_zero_vector_stays_zero() {
        let e = Embedding::new(vec![0.0, 0.0]);
        let n = e.normalized();
        assert_eq!(n.as_slice(), &[0.0, 0.0]);
    }

    #[test]
    fn is_finite_detects_nan() {
        let e = Embedding::new(vec![1.0, f32::NAN]);
        assert!(!e.is_finite());
    }
}
