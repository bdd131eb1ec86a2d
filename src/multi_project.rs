//! MultiProjectFusion (C7): parallel fan-out of C5 across projects, merged
//! by fused score.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::chunk::Project;
use crate::error::{CancellableResult, Cancelled, CoreError};
use crate::fusion::{FusionRetriever, SearchHit, SearchOptions};
use crate::reranker::{RerankCandidate, Reranker};
use crate::store_manager::StoreManager;

/// Result of a multi-project search: merged hits plus any per-project
/// failures the caller should know about.
pub struct MultiProjectResult {
    pub hits: Vec<SearchHit>,
    pub partial_failures: Vec<(String, String)>,
}

/// Validates every project shares the same embedding model identity
/// before any retrieval is attempted. No cross-model retrieval is ever
/// performed.
pub fn validate_model_identity(projects: &[Project]) -> Result<(), CoreError> {
    let Some(first) = projects.first() else {
        return Ok(());
    };
    let offenders: Vec<String> = projects
        .iter()
        .skip(1)
        .filter(|p| !p.model_compatible(first))
        .map(|p| p.id.clone())
        .collect();
    if !offenders.is_empty() {
        return Err(CoreError::EmbeddingModelMismatch { offenders });
    }
    Ok(())
}

pub struct MultiProjectFusion {
    retriever: Arc<FusionRetriever>,
    store_manager: Arc<StoreManager>,
    reranker: Arc<dyn Reranker>,
}

impl MultiProjectFusion {
    pub fn new(
        retriever: Arc<FusionRetriever>,
        store_manager: Arc<StoreManager>,
        reranker: Arc<dyn Reranker>,
    ) -> Self {
        MultiProjectFusion {
            retriever,
            store_manager,
            reranker,
        }
    }

    /// `cancel` is honored at every suspension point (each project's index
    /// build/fetch, each project's `FusionRetriever::search`, and the
    /// merged rerank call). On cancellation the partial merged result is
    /// discarded and `Err(Cancelled)` is returned.
    pub async fn search(
        &self,
        projects: &[Project],
        query: &str,
        opts: &SearchOptions,
        cancel: &CancellationToken,
    ) -> CancellableResult<MultiProjectResult> {
        if let Err(e) = validate_model_identity(projects) {
            return Ok(Err(e));
        }
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let mut all_hits = Vec::new();
        let mut partial_failures = Vec::new();

        // Fan out sequentially awaited futures built up front so each
        // project's retrieval runs concurrently; failures of one project
        // don't abort the others.
        let mut futures = Vec::with_capacity(projects.len());
        for project in projects {
            let retriever = self.retriever.clone();
            let store_manager = self.store_manager.clone();
            let project_id = project.id.clone();
            let project_name = project.name.clone();
            let query = query.to_string();
            let cancel = cancel.clone();
            let per_project_opts = SearchOptions {
                final_k: opts.final_k,
                min_score: opts.min_score,
                filter: opts.filter.clone(),
                rerank: false, // rerank once, across the merged union, below
            };
            futures.push(async move {
                let indexes = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Cancelled),
                    res = store_manager.get_indexes(&project_id) => res,
                };
                let indexes = match indexes {
                    Ok(i) => i,
                    Err(e) => return Ok(Err(e)),
                };
                let search_outcome = retriever
                    .search(
                        &project_id,
                        &query,
                        indexes.vector.as_ref(),
                        &indexes.lexical,
                        &per_project_opts,
                        &indexes.chunks,
                        &cancel,
                    )
                    .await?;
                match search_outcome {
                    Ok((hits, _degraded)) => Ok(Ok((project_name, hits))),
                    Err(e) => Ok(Err(e)),
                }
            });
        }

        let results: Vec<CancellableResult<(String, Vec<SearchHit>)>> =
            futures::future::join_all(futures).await;

        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        for (project, result) in projects.iter().zip(results) {
            match result {
                Err(Cancelled) => return Err(Cancelled),
                Ok(Ok((_name, hits))) => all_hits.extend(hits),
                Ok(Err(err)) => {
                    tracing::warn!(project_id = %project.id, error = %err, "project retrieval failed, continuing with remaining projects");
                    partial_failures.push((project.id.clone(), err.to_string()));
                }
            }
        }

        all_hits.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score));

        if opts.rerank && all_hits.len() >= 2 {
            let top_n = all_hits.len().min(40);
            let candidates: Vec<RerankCandidate> = all_hits
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

            let mut by_id: std::collections::HashMap<String, crate::fusion::SearchHit> =
                all_hits.into_iter().map(|h| (h.chunk_id.clone(), h)).collect();
            let mut merged = Vec::with_capacity(reranked.len());
            for r in reranked {
                if let Some(mut h) = by_id.remove(&r.chunk_id) {
                    h.reranked_score = Some(r.score);
                    merged.push(h);
                }
            }
            all_hits = merged;
        }

        all_hits.truncate(opts.final_k);

        Ok(Ok(MultiProjectResult {
            hits: all_hits,
            partial_failures,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Project;
    use chrono::Utc;

    fn project(id: &str, model: &str, dim: usize) -> Project {
        Project {
            id: id.to_string(),
            name: id.to_string(),
            path: "/tmp".into(),
            embedding_model: model.to_string(),
            embedding_dimensions: dim,
            file_count: 0,
            chunk_count: 0,
            indexed_at: Utc::now(),
            updated_at: Utc::now(),
            tags: vec![],
            description: None,
        }
    }

    #[test]
    fn validate_model_identity_passes_when_matching() {
        let projects = vec![project("a", "e5", 768), project("b", "e5", 768)];
        assert!(validate_model_identity(&projects).is_ok());
    }

    #[test]
    fn validate_model_identity_fails_fast_on_mismatch() {
        let projects = vec![
            project("a", "e5", 768),
            project("b", "e5", 1024),
            project("c", "minilm", 384),
        ];
        let err = validate_model_identity(&projects).unwrap_err();
        match err {
            CoreError::EmbeddingModelMismatch { offenders } => {
                assert_eq!(offenders, vec!["b".to_string(), "c".to_string()]);
            }
            _ => panic!("expected EmbeddingModelMismatch"),
        }
    }

    #[test]
    fn validate_model_identity_empty_is_ok() {
        assert!(validate_model_identity(&[]).is_ok());
    }
}
