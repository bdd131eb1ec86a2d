//! HNSW-backed `VectorIndex`, the default ANN algorithm (§4.2).
//!
//! Indices are transient and derived — rebuilt from scratch on first query
//! after any mutation (§3 Lifecycle) — so unlike the teacher's on-disk
//! `LoadedHnsw`, this implementation only ever owns an in-process graph; it
//! never needs the self-referential mmap wrapper the teacher uses for
//! persisted indices.

use hnsw_rs::dist::DistCosine;
use hnsw_rs::hnsw::Hnsw;

use crate::chunk::Metadata;
use crate::embedding::Embedding;

use super::{validate_query_vector, IndexEntry, IndexError, IndexResult, MetadataFilter, VectorIndex};

const MAX_NB_CONNECTION: usize = 24;
const MAX_LAYER: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const DEFAULT_EF_SEARCH: usize = 100;

pub struct HnswIndex {
    inner: Hnsw<'static, f32, DistCosine>,
    id_map: Vec<String>,
    metadata: Vec<Metadata>,
    dimensions: usize,
    ef_search: usize,
}

impl HnswIndex {
    /// Builds a fresh index from every entry's normalized embedding.
    /// `dimensions` must equal the project's recorded embedding dimension;
    /// callers (C6) are responsible for the dimension-sentinel check before
    /// calling this.
    pub fn build(entries: Vec<IndexEntry>, dimensions: usize) -> Self {
        Self::build_with_ef_search(entries, dimensions, DEFAULT_EF_SEARCH)
    }

    pub fn build_with_ef_search(entries: Vec<IndexEntry>, dimensions: usize, ef_search: usize) -> Self {
        let inner = Hnsw::<f32, DistCosine>::new(
            MAX_NB_CONNECTION,
            entries.len().max(1),
            MAX_LAYER,
            EF_CONSTRUCTION,
            DistCosine {},
        );

        let mut id_map = Vec::with_capacity(entries.len());
        let mut metadata = Vec::with_capacity(entries.len());
        let mut data: Vec<(Vec<f32>, usize)> = Vec::with_capacity(entries.len());
        for (idx, entry) in entries.into_iter().enumerate() {
            id_map.push(entry.chunk_id);
            metadata.push(entry.metadata);
            data.push((entry.embedding.normalized().into_inner(), idx));
        }
        let refs: Vec<(&Vec<f32>, usize)> = data.iter().map(|(v, idx)| (v, *idx)).collect();
        if !refs.is_empty() {
            inner.parallel_insert(&refs);
        }

        HnswIndex {
            inner,
            id_map,
            metadata,
            dimensions,
            ef_search: ef_search.max(1),
        }
    }
}

impl VectorIndex for HnswIndex {
    fn search(
        &self,
        query: &Embedding,
        k: usize,
        filter: Option<&MetadataFilter<'_>>,
    ) -> Result<Vec<IndexResult>, IndexError> {
        if self.id_map.is_empty() {
            return Ok(Vec::new());
        }
        validate_query_vector(query, self.dimensions)?;

        let normalized = query.normalized();
        let requested = super::oversample_k(k, filter.is_some()).max(k);
        let neighbours = self
            .inner
            .search(normalized.as_slice(), requested, self.ef_search.max(requested));

        let mut results: Vec<IndexResult> = Vec::with_capacity(neighbours.len());
        for n in neighbours {
            let idx = n.d_id;
            if idx >= self.id_map.len() {
                continue;
            }
            if let Some(f) = filter {
                if !f(&self.metadata[idx]) {
                    continue;
                }
            }
            // hnsw_rs's DistCosine yields a distance in [0, 2]; map back to
            // the same [0, 1] similarity scale every VectorIndex uses.
            let similarity = (1.0 - n.distance / 2.0).clamp(0.0, 1.0);
            results.push(IndexResult {
                chunk_id: self.id_map[idx].clone(),
                score: similarity,
            });
        }
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(k);
        Ok(results)
    }

    fn len(&self) -> usize {
        self.id_map.len()
    }

    fn name(&self) -> &'static str {
        "HNSW"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, v: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk_id: id.to_string(),
            embedding: Embedding::new(v),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn empty_index_returns_empty_no_error() {
        let index = HnswIndex::build(vec![], 4);
        let out = index
            .search(&Embedding::new(vec![1.0, 0.0, 0.0, 0.0]), 5, None)
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let index = HnswIndex::build(vec![entry("a", vec![1.0, 0.0, 0.0, 0.0])], 4);
        let result = index.search(&Embedding::new(vec![1.0, 0.0]), 5, None);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn finds_nearest_neighbour() {
        let entries = vec![
            entry("a", vec![1.0, 0.0, 0.0, 0.0]),
            entry("b", vec![0.0, 1.0, 0.0, 0.0]),
            entry("c", vec![0.0, 0.0, 1.0, 0.0]),
        ];
        let index = HnswIndex::build(entries, 4);
        let out = index
            .search(&Embedding::new(vec![0.99, 0.01, 0.0, 0.0]), 1, None)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].chunk_id, "a");
    }
}
