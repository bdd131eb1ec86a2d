//! The `Reranker` capability (C4).
//!
//! Core requires only the contract: input order preserved on ties, output a
//! strict permutation-and-truncation of the input, and graceful degradation
//! to identity when the underlying model can't produce scores. The concrete
//! cross-encoder implementation is an external collaborator.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

/// A single candidate passed into `rerank`.
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub chunk_id: String,
    pub content: String,
}

/// A reranked candidate with its cross-encoder score.
#[derive(Debug, Clone)]
pub struct RerankedCandidate {
    pub chunk_id: String,
    pub score: f32,
}

#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        top_n: usize,
    ) -> anyhow::Result<Vec<RerankedCandidate>>;
}

/// Wraps an inner reranker and degrades to identity-passthrough if a call
/// ever fails, logging exactly one warning for the lifetime of the wrapper
/// rather than once per query.
pub struct DegradingReranker<R: Reranker> {
    inner: R,
    warned: AtomicBool,
}

impl<R: Reranker> DegradingReranker<R> {
    pub fn new(inner: R) -> Self {
        DegradingReranker {
            inner,
            warned: AtomicBool::new(false),
        }
    }

    fn identity(candidates: &[RerankCandidate], top_n: usize) -> Vec<RerankedCandidate> {
        candidates
            .iter()
            .take(top_n)
            .enumerate()
            .map(|(i, c)| RerankedCandidate {
                chunk_id: c.chunk_id.clone(),
                // Preserve input order via a strictly descending synthetic
                // score so downstream sorts don't reshuffle ties.
                score: -(i as f32),
            })
            .collect()
    }
}

#[async_trait]
impl<R: Reranker> Reranker for DegradingReranker<R> {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        top_n: usize,
    ) -> anyhow::Result<Vec<RerankedCandidate>> {
        if candidates.len() <= 1 {
            return Ok(Self::identity(candidates, top_n));
        }
        match self.inner.rerank(query, candidates, top_n).await {
            Ok(ranked) => Ok(ranked),
            Err(err) => {
                if !self.warned.swap(true, Ordering::SeqCst) {
                    tracing::warn!(error = %err, "reranker unavailable, degrading to identity");
                }
                Ok(Self::identity(candidates, top_n))
            }
        }
    }
}

/// Maps a cross-encoder logit to a probability-like score in `(0, 1)`.
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// A reranker with no backing model. Always reports unavailable so
/// `DegradingReranker` falls back to identity — the default the CLI wires
/// up until a real cross-encoder capability is configured.
pub struct UnavailableReranker;

#[async_trait]
impl Reranker for UnavailableReranker {
    async fn rerank(
        &self,
        _query: &str,
        _candidates: &[RerankCandidate],
        _top_n: usize,
    ) -> anyhow::Result<Vec<RerankedCandidate>> {
        anyhow::bail!("no reranker capability configured")
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;

    /// Scores candidates by a fixed permutation supplied at construction,
    /// for tests that need deterministic reranking.
    pub struct FixedOrderReranker {
        pub order: Vec<String>,
    }

    #[async_trait]
    impl Reranker for FixedOrderReranker {
        async fn rerank(
            &self,
            _query: &str,
            candidates: &[RerankCandidate],
            top_n: usize,
        ) -> anyhow::Result<Vec<RerankedCandidate>> {
            let mut ranked: Vec<RerankedCandidate> = candidates
                .iter()
                .map(|c| {
                    let rank = self
                        .order
                        .iter()
                        .position(|id| id == &c.chunk_id)
                        .unwrap_or(usize::MAX);
                    RerankedCandidate {
                        chunk_id: c.chunk_id.clone(),
                        score: -(rank as f32),
                    }
                })
                .collect();
            ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
            ranked.truncate(top_n);
            Ok(ranked)
        }
    }

    /// Always fails, to exercise the degrading wrapper.
    pub struct AlwaysFailsReranker;

    #[async_trait]
    impl Reranker for AlwaysFailsReranker {
        async fn rerank(
            &self,
            _query: &str,
            _candidates: &[RerankCandidate],
            _top_n: usize,
        ) -> anyhow::Result<Vec<RerankedCandidate>> {
            anyhow::bail!("model weights unavailable")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fake::{AlwaysFailsReranker, FixedOrderReranker};

    fn candidates(ids: &[&str]) -> Vec<RerankCandidate> {
        ids.iter()
            .map(|id| RerankCandidate {
                chunk_id: id.to_string(),
                content: format!("content for {id}"),
            })
            .collect()
    }

    #[test]
    fn sigmoid_is_bounded_and_monotonic() {
        assert!(sigmoid(0.0) > 0.49 && sigmoid(0.0) < 0.51);
        assert!(sigmoid(-100.0) < 0.001);
        assert!(sigmoid(100.0) > 0.999);
        assert!(sigmoid(1.0) > sigmoid(0.0));
    }

    #[tokio::test]
    async fn single_candidate_is_passthrough() {
        let reranker = DegradingReranker::new(FixedOrderReranker { order: vec![] });
        let cands = candidates(&["a"]);
        let out = reranker.rerank("q", &cands, 5).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].chunk_id, "a");
    }

    #[tokio::test]
    async fn degrades_to_identity_on_failure_without_dropping_ids() {
        let reranker = DegradingReranker::new(AlwaysFailsReranker);
        let cands = candidates(&["a", "b", "c"]);
        let out = reranker.rerank("q", &cands, 2).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk_id, "a");
        assert_eq!(out[1].chunk_id, "b");
    }

    #[tokio::test]
    async fn output_is_permutation_and_truncation_of_input() {
        let reranker = DegradingReranker::new(FixedOrderReranker {
            order: vec!["c".into(), "a".into(), "b".into()],
        });
        let cands = candidates(&["a", "b", "c"]);
        let out = reranker.rerank("q", &cands, 10).await.unwrap();
        let ids: Vec<_> = out.iter().map(|r| r.chunk_id.clone()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
