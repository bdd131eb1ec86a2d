//! Brute-force exhaustive cosine-similarity variant of `VectorIndex`.
//!
//! Selected for small projects (< 1000 chunks) or deterministic
//! evaluation, per §4.2. Uses a bounded min-heap so memory stays O(k)
//! regardless of corpus size, the same shape as the teacher's
//! `BoundedScoreHeap` in `search.rs`.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::chunk::Metadata;
use crate::embedding::Embedding;

use super::{validate_query_vector, IndexEntry, IndexError, IndexResult, MetadataFilter, VectorIndex};

/// Total-order wrapper over `f32` so scores can live in a `BinaryHeap`.
/// Non-finite scores are never pushed (callers filter them first).
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedFloat(f32);

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Cosine similarity between two equal-length vectors, mapped from
/// `[-1, 1]` into `[0, 1]`. Returns `None` on dimension mismatch or a
/// zero-norm vector.
pub fn cosine_similarity_normalized(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return None;
    }
    let cos = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    Some((cos + 1.0) / 2.0)
}

pub struct BruteForceIndex {
    entries: Vec<IndexEntry>,
    dimensions: usize,
}

impl BruteForceIndex {
    pub fn build(entries: Vec<IndexEntry>, dimensions: usize) -> Self {
        BruteForceIndex { entries, dimensions }
    }
}

impl VectorIndex for BruteForceIndex {
    fn search(
        &self,
        query: &Embedding,
        k: usize,
        filter: Option<&MetadataFilter<'_>>,
    ) -> Result<Vec<IndexResult>, IndexError> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        validate_query_vector(query, self.dimensions)?;

        let bound = super::oversample_k(k, filter.is_some()).max(k);
        let mut heap: BinaryHeap<Reverse<(OrderedFloat, usize)>> = BinaryHeap::with_capacity(bound + 1);

        for (idx, entry) in self.entries.iter().enumerate() {
            if let Some(f) = filter {
                if !f(&entry.metadata) {
                    continue;
                }
            }
            let Some(score) = cosine_similarity_normalized(query.as_slice(), entry.embedding.as_slice())
            else {
                continue;
            };
            if !score.is_finite() {
                continue;
            }
            heap.push(Reverse((OrderedFloat(score), idx)));
            if heap.len() > bound {
                heap.pop();
            }
        }

        let mut results: Vec<(f32, usize)> = heap
            .into_iter()
            .map(|Reverse((OrderedFloat(score), idx))| (score, idx))
            .collect();
        // Descending score, first-indexed stability on ties.
        results.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        results.truncate(k);

        Ok(results
            .into_iter()
            .map(|(score, idx)| IndexResult {
                chunk_id: self.entries[idx].chunk_id.clone(),
                score,
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn name(&self) -> &'static str {
        "brute-force"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn entry(id: &str, v: Vec<f32>) -> IndexEntry {
    IndexEntry {
        chunk_id: id.to_string(),
        embedding: Embedding::new(v),
        metadata: Metadata::new(),
    }
}
