//! EvalHarness (C12): runs a golden query/relevant-files dataset against
//! the retriever and scores it with standard IR metrics, detecting
//! regressions against the most recent prior run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::Store;

/// One golden query and the set of file paths considered relevant to it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GoldenEntry {
    pub query: String,
    pub relevant_file_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub reciprocal_rank: f64,
    pub hit_rate: f64,
    pub precision_at_k: f64,
    pub recall_at_k: f64,
    pub ndcg: f64,
    pub average_precision: f64,
}

impl Metrics {
    fn average(metrics: &[Metrics]) -> Metrics {
        let n = metrics.len().max(1) as f64;
        let mut out = Metrics::default();
        for m in metrics {
            out.reciprocal_rank += m.reciprocal_rank;
            out.hit_rate += m.hit_rate;
            out.precision_at_k += m.precision_at_k;
            out.recall_at_k += m.recall_at_k;
            out.ndcg += m.ndcg;
            out.average_precision += m.average_precision;
        }
        out.reciprocal_rank /= n;
        out.hit_rate /= n;
        out.precision_at_k /= n;
        out.recall_at_k /= n;
        out.ndcg /= n;
        out.average_precision /= n;
        out
    }
}

/// Computes per-query metrics from a ranked list of retrieved file paths
/// (best first) against the golden relevant set.
pub fn score_query(retrieved: &[String], relevant: &[String], k: usize) -> Metrics {
    let relevant_set: std::collections::HashSet<&str> =
        relevant.iter().map(|s| s.as_str()).collect();
    let top_k: Vec<&String> = retrieved.iter().take(k).collect();

    let reciprocal_rank = top_k
        .iter()
        .position(|r| relevant_set.contains(r.as_str()))
        .map(|pos| 1.0 / (pos + 1) as f64)
        .unwrap_or(0.0);

    let hit_rate = if reciprocal_rank > 0.0 { 1.0 } else { 0.0 };

    let hits_in_k = top_k
        .iter()
        .filter(|r| relevant_set.contains(r.as_str()))
        .count();
    let precision_at_k = if top_k.is_empty() {
        0.0
    } else {
        hits_in_k as f64 / top_k.len() as f64
    };
    let recall_at_k = if relevant_set.is_empty() {
        0.0
    } else {
        hits_in_k as f64 / relevant_set.len() as f64
    };

    let dcg: f64 = top_k
        .iter()
        .enumerate()
        .filter(|(_, r)| relevant_set.contains(r.as_str()))
        .map(|(i, _)| 1.0 / ((i as f64 + 2.0).log2()))
        .sum();
    let ideal_hits = relevant_set.len().min(top_k.len());
    let idcg: f64 = (0..ideal_hits).map(|i| 1.0 / ((i as f64 + 2.0).log2())).sum();
    let ndcg = if idcg > 0.0 { dcg / idcg } else { 0.0 };

    let mut hits_seen = 0.0;
    let mut precision_sum = 0.0;
    for (i, r) in top_k.iter().enumerate() {
        if relevant_set.contains(r.as_str()) {
            hits_seen += 1.0;
            precision_sum += hits_seen / (i as f64 + 1.0);
        }
    }
    let average_precision = if relevant_set.is_empty() {
        0.0
    } else {
        precision_sum / relevant_set.len() as f64
    };

    Metrics {
        reciprocal_rank,
        hit_rate,
        precision_at_k,
        recall_at_k,
        ndcg,
        average_precision,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegressionVerdict {
    Improved,
    Stable,
    Regressed,
}

/// Threshold for regression detection: a MAP delta beyond ±0.05 against
/// the most recent prior run for the same dataset.
const REGRESSION_THRESHOLD: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct PerQueryResult {
    pub query: String,
    pub metrics: Metrics,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EvalRunResult {
    pub run_id: String,
    pub mean_average_precision: f64,
    pub aggregate: Metrics,
    pub per_query: Vec<PerQueryResult>,
    pub regression: Option<RegressionVerdict>,
}

/// A function the harness calls per query to obtain the ranked file paths
/// actually retrieved. Kept abstract so the harness doesn't depend on the
/// full async retrieval stack directly.
#[async_trait::async_trait]
pub trait RetrievalRunner: Send + Sync {
    async fn retrieve_file_paths(&self, query: &str) -> anyhow::Result<Vec<String>>;
}

pub struct EvalHarness {
    store: Arc<Store>,
}

impl EvalHarness {
    pub fn new(store: Arc<Store>) -> Self {
        EvalHarness { store }
    }

    /// Runs `dataset` against `runner`, scoring each entry at cutoff `k`.
    /// A per-query retrieval error is recorded as a zero-metric result
    /// with its error message and does not abort the run; an empty or
    /// missing dataset does.
    pub async fn run(
        &self,
        project_id: Option<&str>,
        dataset_name: &str,
        dataset: &[GoldenEntry],
        runner: &dyn RetrievalRunner,
        k: usize,
    ) -> Result<EvalRunResult, crate::error::CoreError> {
        if dataset.is_empty() {
            return Err(crate::error::CoreError::EvalDataset(
                "dataset is empty".to_string(),
            ));
        }

        let mut per_query = Vec::with_capacity(dataset.len());
        for entry in dataset {
            match runner.retrieve_file_paths(&entry.query).await {
                Ok(retrieved) => {
                    let metrics = score_query(&retrieved, &entry.relevant_file_paths, k);
                    per_query.push(PerQueryResult {
                        query: entry.query.clone(),
                        metrics,
                        error: None,
                    });
                }
                Err(err) => {
                    tracing::warn!(query = %entry.query, error = %err, "query retrieval failed during eval run");
                    per_query.push(PerQueryResult {
                        query: entry.query.clone(),
                        metrics: Metrics::default(),
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        let valid: Vec<Metrics> = per_query
            .iter()
            .filter(|r| r.error.is_none())
            .map(|r| r.metrics.clone())
            .collect();
        if valid.is_empty() {
            return Err(crate::error::CoreError::EvalDataset(
                "every query in the dataset failed to retrieve".to_string(),
            ));
        }

        let aggregate = Metrics::average(&valid);
        let mean_average_precision = aggregate.average_precision;

        let store = self.store.clone();
        let dataset_name_owned = dataset_name.to_string();
        let project_id_owned = project_id.map(|s| s.to_string());
        let prior_map = tokio::task::spawn_blocking({
            let store = store.clone();
            let dataset_name_owned = dataset_name_owned.clone();
            move || store.latest_eval_map(dataset_name_owned.as_str())
        })
        .await
        .ok()
        .and_then(|r| r.ok())
        .flatten();

        let regression = prior_map.map(|prior| {
            let delta = mean_average_precision - prior;
            if delta > REGRESSION_THRESHOLD {
                RegressionVerdict::Improved
            } else if delta < -REGRESSION_THRESHOLD {
                RegressionVerdict::Regressed
            } else {
                RegressionVerdict::Stable
            }
        });

        let run_id = uuid::Uuid::new_v4().to_string();
        let store_for_persist = store.clone();
        let per_query_for_persist = per_query.clone();
        let aggregate_for_persist = aggregate.clone();
        let run_id_for_persist = run_id.clone();
        let _ = tokio::task::spawn_blocking(move || {
            store_for_persist.persist_eval_run(
                &run_id_for_persist,
                project_id_owned.as_deref(),
                &dataset_name_owned,
                &aggregate_for_persist,
                &per_query_for_persist,
            )
        })
        .await;

        Ok(EvalRunResult {
            run_id,
            mean_average_precision,
            aggregate,
            per_query,
            regression,
        })
    }
}

/// A persisted run as returned by `Store::get_eval_run`, for the `eval
/// report` CLI subcommand.
#[derive(Debug, Clone)]
pub struct EvalRunSummary {
    pub run_id: String,
    pub project_id: Option<String>,
    pub dataset_name: String,
    pub metrics: Metrics,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Store {
    /// Looks up a previously persisted run by id, for operator inspection.
    pub fn get_eval_run(&self, run_id: &str) -> Result<Option<EvalRunSummary>, crate::store::StoreError> {
        self.block_on(async {
            let row: Option<(String, Option<String>, String, String, String)> = sqlx::query_as(
                "SELECT id, project_id, dataset_name, metrics, created_at
                 FROM eval_runs WHERE id = ?1",
            )
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;

            Ok(row.map(|(id, project_id, dataset_name, metrics_json, created_at)| {
                EvalRunSummary {
                    run_id: id,
                    project_id,
                    dataset_name,
                    metrics: serde_json::from_str(&metrics_json).unwrap_or_default(),
                    created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&chrono::Utc))
                        .unwrap_or_else(|_| chrono::Utc::now()),
                }
            }))
        })
    }

    pub(crate) fn latest_eval_map(
        &self,
        dataset_name: &str,
    ) -> Result<Option<f64>, crate::store::StoreError> {
        self.block_on(async {
            let row: Option<(String,)> = sqlx::query_as(
                "SELECT metrics FROM eval_runs WHERE dataset_name = ?1
                 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(dataset_name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.and_then(|(json,)| {
                serde_json::from_str::<Metrics>(&json)
                    .ok()
                    .map(|m| m.average_precision)
            }))
        })
    }

    pub(crate) fn persist_eval_run(
        &self,
        run_id: &str,
        project_id: Option<&str>,
        dataset_name: &str,
        aggregate: &Metrics,
        per_query: &[PerQueryResult],
    ) -> Result<(), crate::store::StoreError> {
        self.block_on(async {
            let now = chrono::Utc::now().to_rfc3339();
            let metrics_json = serde_json::to_string(aggregate).unwrap_or_else(|_| "{}".into());
            sqlx::query(
                "INSERT INTO eval_runs (id, project_id, dataset_name, status, metrics, created_at)
                 VALUES (?1, ?2, ?3, 'completed', ?4, ?5)",
            )
            .bind(run_id)
            .bind(project_id)
            .bind(dataset_name)
            .bind(metrics_json)
            .bind(&now)
            .execute(&self.pool)
            .await?;

            for result in per_query {
                let id = uuid::Uuid::new_v4().to_string();
                let metrics_json = serde_json::to_string(&result.metrics).unwrap_or_else(|_| "{}".into());
                sqlx::query(
                    "INSERT INTO eval_results (id, run_id, query, metrics, error, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .bind(id)
                .bind(run_id)
                .bind(&result.query)
                .bind(metrics_json)
                .bind(&result.error)
                .bind(&now)
                .execute(&self.pool)
                .await?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_top_hit_scores_reciprocal_rank_one() {
        let retrieved = vec!["a.rs".to_string(), "b.rs".to_string()];
        let relevant = vec!["a.rs".to_string()];
        let m = score_query(&retrieved, &relevant, 10);
        assert_eq!(m.reciprocal_rank, 1.0);
        assert_eq!(m.hit_rate, 1.0);
    }

    #[test]
    fn miss_scores_zero_across_rank_metrics() {
        let retrieved = vec!["x.rs".to_string()];
        let relevant = vec!["a.rs".to_string()];
        let m = score_query(&retrieved, &relevant, 10);
        assert_eq!(m.reciprocal_rank, 0.0);
        assert_eq!(m.hit_rate, 0.0);
        assert_eq!(m.ndcg, 0.0);
    }

    #[test]
    fn recall_counts_all_relevant_files_found() {
        let retrieved = vec!["a.rs".to_string(), "b.rs".to_string(), "c.rs".to_string()];
        let relevant = vec!["a.rs".to_string(), "c.rs".to_string(), "z.rs".to_string()];
        let m = score_query(&retrieved, &relevant, 10);
        assert!((m.recall_at_k - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn average_precision_rewards_early_hits() {
        let early = score_query(
            &["a.rs".to_string(), "x.rs".to_string()],
            &["a.rs".to_string()],
            10,
        );
        let late = score_query(
            &["x.rs".to_string(), "a.rs".to_string()],
            &["a.rs".to_string()],
            10,
        );
        assert!(early.average_precision > late.average_precision);
    }

    struct FixedRunner(Vec<String>);

    #[async_trait::async_trait]
    impl RetrievalRunner for FixedRunner {
        async fn retrieve_file_paths(&self, _query: &str) -> anyhow::Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    struct FailingRunner;

    #[async_trait::async_trait]
    impl RetrievalRunner for FailingRunner {
        async fn retrieve_file_paths(&self, _query: &str) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("retrieval backend unavailable")
        }
    }

    #[tokio::test]
    async fn empty_dataset_errors_without_running() {
        let store = Store::open_in_memory().unwrap();
        let harness = EvalHarness::new(store);
        let runner = FixedRunner(vec![]);
        let result = harness.run(None, "empty", &[], &runner, 10).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn per_query_error_is_tolerated_not_fatal() {
        let store = Store::open_in_memory().unwrap();
        let harness = EvalHarness::new(store);
        let dataset = vec![
            GoldenEntry {
                query: "q1".into(),
                relevant_file_paths: vec!["a.rs".into()],
            },
        ];
        let runner = FailingRunner;
        let result = harness.run(None, "ds", &dataset, &runner, 10).await;
        assert!(result.is_err()); // all queries failed -> zero valid entries -> dataset error
    }

    #[tokio::test]
    async fn successful_run_persists_and_is_queryable_for_regression() {
        let store = Store::open_in_memory().unwrap();
        let harness = EvalHarness::new(store.clone());
        let dataset = vec![GoldenEntry {
            query: "q1".into(),
            relevant_file_paths: vec!["a.rs".into()],
        }];
        let runner = FixedRunner(vec!["a.rs".into()]);
        let first = harness.run(None, "ds", &dataset, &runner, 10).await.unwrap();
        assert!(first.regression.is_none()); // no prior run yet

        let second = harness.run(None, "ds", &dataset, &runner, 10).await.unwrap();
        assert_eq!(second.regression, Some(RegressionVerdict::Stable));
    }
}
