//! FusionRetriever (C5): the heart of single-project retrieval.
//!
//! Combines the dense `VectorIndex` (C2) and lexical `LexicalIndex` (C3)
//! rankings via Reciprocal Rank Fusion, then optionally reranks (C4).

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::chunk::{Chunk, Metadata};
use crate::embedding::EmbeddingProvider;
use crate::error::{CancellableResult, Cancelled, CoreError};
use crate::lexical_index::LexicalIndex;
use crate::reranker::{RerankCandidate, Reranker};
use crate::vector_index::VectorIndex;

/// Default Reciprocal Rank Fusion constant, used when a `FusionRetriever`
/// is built without an explicit override. `rrf_score(c) = sum 1/(κ + rank
/// + 1)` over every ranked list `c` appears in. Configurable per §4.13 via
/// `Config::rrf_k_or_default` and `FusionRetriever::with_rrf_k`.
pub const DEFAULT_RRF_K: f32 = 60.0;

/// A single fused search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub content: String,
    pub file_path: String,
    pub line_range: crate::chunk::LineRange,
    pub project_id: String,
    pub dense_score: Option<f32>,
    pub lexical_score: Option<f32>,
    pub fused_score: f32,
    pub reranked_score: Option<f32>,
    pub metadata: Metadata,
}

impl SearchHit {
    /// The score downstream components (dedup, ordering, `min_score`)
    /// should treat as authoritative: reranked if present, else fused.
    pub fn effective_score(&self) -> f32 {
        self.reranked_score.unwrap_or(self.fused_score)
    }
}

/// Filter predicates applied by `FusionRetriever::search`.
#[derive(Default, Clone)]
pub struct SearchFilter {
    pub file_type: Option<crate::chunk::FileType>,
    pub language: Option<String>,
}

fn matches_filter(chunk: &Chunk, filter: &SearchFilter) -> bool {
    if let Some(ft) = filter.file_type {
        if chunk.file_type != ft {
            return false;
        }
    }
    if let Some(lang) = &filter.language {
        if chunk.language.as_deref() != Some(lang.as_str()) {
            return false;
        }
    }
    true
}

/// Options for a single-project search.
pub struct SearchOptions {
    pub final_k: usize,
    /// Applied post-fusion against the normalized `[0,1]` score (§9 Open
    /// Questions resolution), not the raw RRF sum.
    pub min_score: Option<f32>,
    pub filter: SearchFilter,
    pub rerank: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            final_k: 10,
            min_score: None,
            filter: SearchFilter::default(),
            rerank: true,
        }
    }
}

/// Fuses a dense ranking and a lexical ranking via RRF with constant `rrf_k`
/// (κ). Ties are broken by the larger individual dense score, then by chunk
/// id ascending. A chunk appearing in only one list gets a single term — the
/// non-member list contributes nothing for it.
pub fn rrf_fuse(
    dense: &[(String, f32)],
    lexical: &[(String, f32)],
    limit: usize,
    rrf_k: f32,
) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut dense_scores: HashMap<String, f32> = HashMap::new();

    for (rank, (id, score)) in dense.iter().enumerate() {
        *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (rrf_k + rank as f32 + 1.0);
        dense_scores.insert(id.clone(), *score);
    }
    for (rank, (id, _)) in lexical.iter().enumerate() {
        *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (rrf_k + rank as f32 + 1.0);
    }

    let mut ranked: Vec<(String, f32)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| {
                let da = dense_scores.get(&a.0).copied().unwrap_or(f32::MIN);
                let db = dense_scores.get(&b.0).copied().unwrap_or(f32::MIN);
                db.total_cmp(&da)
            })
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(limit);
    ranked
}

/// Normalizes a fused RRF score into `[0, 1]` relative to the maximum
/// possible contribution (two lists, rank 0 in both): `2 / (κ + 1)`.
pub fn normalize_rrf_score(score: f32, rrf_k: f32) -> f32 {
    let max_possible = 2.0 / (rrf_k + 1.0);
    (score / max_possible).clamp(0.0, 1.0)
}

/// Default candidate-set size for fusion: `max(40, 2 * final_k)`.
pub fn candidate_set_size(final_k: usize) -> usize {
    40.max(final_k * 2)
}

pub struct FusionRetriever {
    store: Arc<crate::store::Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Arc<dyn Reranker>,
    rrf_k: f32,
}

impl FusionRetriever {
    pub fn new(
        store: Arc<crate::store::Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Arc<dyn Reranker>,
    ) -> Self {
        Self::with_rrf_k(store, embedder, reranker, DEFAULT_RRF_K)
    }

    pub fn with_rrf_k(
        store: Arc<crate::store::Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Arc<dyn Reranker>,
        rrf_k: f32,
    ) -> Self {
        FusionRetriever {
            store,
            embedder,
            reranker,
            rrf_k,
        }
    }

    /// Runs the full single-project pipeline: embed → parallel C2/C3 →
    /// RRF → optional rerank → truncate.
    ///
    /// `cancel` is honored at every suspension point (the embed call and
    /// the rerank call); on cancellation the partial result is discarded
    /// and `Err(Cancelled)` is returned instead of a `CoreError`, per §5's
    /// cancellation model.
    pub async fn search(
        &self,
        project_id: &str,
        query: &str,
        vector_index: &dyn VectorIndex,
        lexical_index: &LexicalIndex,
        opts: &SearchOptions,
        chunk_lookup: &HashMap<String, Chunk>,
        cancel: &CancellationToken,
    ) -> CancellableResult<(Vec<SearchHit>, bool)> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        let m = candidate_set_size(opts.final_k);

        let embed_result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            res = self.embedder.embed(query) => res,
        };
        let embed_result = match embed_result {
            Ok(r) => r,
            Err(e) => return Ok(Err(CoreError::capability("embedding", e))),
        };

        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let dense_result = vector_index.search(&embed_result.vector, m, None);
        let lexical_result: Vec<_> = lexical_index.query(query, m, None);

        let (dense, lexical, degraded) = match dense_result {
            Ok(dense_hits) => (
                dense_hits
                    .into_iter()
                    .map(|h| (h.chunk_id, h.score))
                    .collect::<Vec<_>>(),
                lexical_result
                    .into_iter()
                    .map(|h| (h.chunk_id, h.score))
                    .collect::<Vec<_>>(),
                false,
            ),
            Err(err) => {
                if lexical_index.is_empty() && lexical_result.is_empty() {
                    return Ok(Err(CoreError::RetrievalUnavailable {
                        vector_error: Box::new(CoreError::Index(err)),
                        lexical_error: Box::new(CoreError::Configuration {
                            message: "lexical index is empty".to_string(),
                        }),
                    }));
                }
                tracing::warn!(error = %err, "vector index search failed, degrading to lexical-only");
                (
                    Vec::new(),
                    lexical_result
                        .into_iter()
                        .map(|h| (h.chunk_id, h.score))
                        .collect::<Vec<_>>(),
                    true,
                )
            }
        };

        if dense.is_empty() && lexical.is_empty() && !degraded {
            return Ok(Ok((Vec::new(), false)));
        }

        let dense_scores: HashMap<String, f32> = dense.iter().cloned().collect();
        let fused = rrf_fuse(&dense, &lexical, m, self.rrf_k);

        let mut hits: Vec<SearchHit> = fused
            .into_iter()
            .filter_map(|(chunk_id, score)| {
                let chunk = chunk_lookup.get(&chunk_id)?;
                if !matches_filter(chunk, &opts.filter) {
                    return None;
                }
                Some(SearchHit {
                    chunk_id: chunk_id.clone(),
                    content: chunk.content.clone(),
                    file_path: chunk.file_path.clone(),
                    line_range: chunk.line_range,
                    project_id: project_id.to_string(),
                    dense_score: dense_scores.get(&chunk_id).copied(),
                    lexical_score: None,
                    fused_score: normalize_rrf_score(score, self.rrf_k),
                    reranked_score: None,
                    metadata: chunk.metadata.clone(),
                })
            })
            .collect();

        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        if opts.rerank && hits.len() >= 2 {
            let top_n = hits.len().min(40);
            let candidates: Vec<RerankCandidate> = hits
                .iter()
                .take(top_n)
                .map(|h| RerankCandidate {
                    chunk_id: h.chunk_id.clone(),
                    content: h.content.clone(),
                })
                .collect();
            let reranked = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled),
                res = self.reranker.rerank(query, &candidates, top_n) => res,
            };
            let reranked = match reranked {
                Ok(r) => r,
                Err(e) => return Ok(Err(CoreError::capability("reranker", e))),
            };

            let mut by_id: HashMap<String, &SearchHit> =
                hits.iter().map(|h| (h.chunk_id.clone(), h)).collect();
            let mut new_hits = Vec::with_capacity(reranked.len());
            for r in &reranked {
                if let Some(h) = by_id.remove(&r.chunk_id) {
                    let mut h = h.clone();
                    h.reranked_score = Some(r.score);
                    new_hits.push(h);
                }
            }
            hits = new_hits;
        }

        if let Some(min_score) = opts.min_score {
            hits.retain(|h| h.effective_score() >= min_score);
        }

        hits.truncate(opts.final_k);
        Ok(Ok((hits, degraded)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rrf_rewards_overlap() {
        let dense = vec![("a".to_string(), 0.9), ("b".to_string(), 0.8)];
        let lexical = vec![("a".to_string(), 5.0), ("c".to_string(), 3.0)];
        let fused = rrf_fuse(&dense, &lexical, 10, DEFAULT_RRF_K);
        assert_eq!(fused[0].0, "a");
    }

    #[test]
    fn rrf_respects_limit() {
        let dense: Vec<_> = (0..20).map(|i| (format!("d{i}"), 1.0)).collect();
        let fused = rrf_fuse(&dense, &[], 5, DEFAULT_RRF_K);
        assert_eq!(fused.len(), 5);
    }

    #[test]
    fn rrf_scores_are_positive() {
        let dense = vec![("a".to_string(), 0.5)];
        let fused = rrf_fuse(&dense, &[], 10, DEFAULT_RRF_K);
        assert!(fused[0].1 > 0.0);
    }

    #[test]
    fn normalize_rrf_score_is_bounded() {
        assert!(normalize_rrf_score(2.0 / (DEFAULT_RRF_K + 1.0), DEFAULT_RRF_K) <= 1.0001);
        assert!(normalize_rrf_score(0.0, DEFAULT_RRF_K) >= 0.0);
    }

    #[test]
    fn rrf_k_is_configurable() {
        let dense = vec![("a".to_string(), 0.9)];
        let tight = rrf_fuse(&dense, &[], 10, 1.0);
        let loose = rrf_fuse(&dense, &[], 10, 1000.0);
        assert!(tight[0].1 > loose[0].1);
    }

    proptest! {
        #[test]
        fn rrf_fused_scores_always_sorted_descending(
            dense in proptest::collection::vec("[a-e]", 0..8),
            lexical in proptest::collection::vec("[a-e]", 0..8),
        ) {
            let dense: Vec<_> = dense.into_iter().enumerate().map(|(i, id)| (id, 1.0 - i as f32 * 0.01)).collect();
            let lexical: Vec<_> = lexical.into_iter().enumerate().map(|(i, id)| (id, 1.0 - i as f32 * 0.01)).collect();
            let fused = rrf_fuse(&dense, &lexical, 100, DEFAULT_RRF_K);
            for w in fused.windows(2) {
                prop_assert!(w[0].1 >= w[1].1);
            }
        }

        #[test]
        fn rrf_monotonicity_holds(
            shared in proptest::collection::vec("[a-c]", 1..4),
        ) {
            // `a` ranks >= `b` in both sub-rankings implies fused(a) >= fused(b).
            if shared.len() >= 2 {
                let a = &shared[0];
                let b = &shared[1];
                if a != b {
                    let dense = vec![(a.clone(), 0.9), (b.clone(), 0.5)];
                    let lexical = vec![(a.clone(), 5.0), (b.clone(), 2.0)];
                    let fused = rrf_fuse(&dense, &lexical, 10, DEFAULT_RRF_K);
                    let rank_a = fused.iter().position(|(id, _)| id == a);
                    let rank_b = fused.iter().position(|(id, _)| id == b);
                    if let (Some(ra), Some(rb)) = (rank_a, rank_b) {
                        prop_assert!(ra <= rb);
                    }
                }
            }
        }
    }
}
