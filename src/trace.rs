//! TraceRecorder (C11): append-only, best-effort recording of each query
//! for later evaluation (C12) and operator inspection.
//!
//! Writes are sampled and never block or fail the caller's response: a
//! dropped trace is acceptable, a blocked or broken query is not.

use std::sync::Arc;

use rand::Rng;

use crate::store::Store;

#[derive(Debug, Clone, Default)]
pub struct TraceLatencies {
    pub retrieval_ms: Option<u64>,
    pub assembly_ms: Option<u64>,
    pub total_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub project_ids: Vec<String>,
    pub query: String,
    pub retrieved_file_paths: Vec<String>,
    pub top_k: usize,
    pub latencies: TraceLatencies,
    pub retrieval_method: String,
    pub routing_method: Option<String>,
    pub routing_confidence: Option<f32>,
    pub answer: Option<String>,
    pub feedback: Option<String>,
}

pub struct TraceRecorder {
    store: Arc<Store>,
    /// Fraction of queries recorded, in `[0, 1]`. `0.0` disables recording
    /// entirely; each query's inclusion is an independent coin flip.
    sampling_rate: f32,
}

impl TraceRecorder {
    pub fn new(store: Arc<Store>, sampling_rate: f32) -> Self {
        TraceRecorder {
            store,
            sampling_rate: sampling_rate.clamp(0.0, 1.0),
        }
    }

    fn should_sample(&self) -> bool {
        if self.sampling_rate <= 0.0 {
            return false;
        }
        if self.sampling_rate >= 1.0 {
            return true;
        }
        rand::thread_rng().gen::<f32>() < self.sampling_rate
    }

    /// Records `entry` if this query was sampled. Called after the
    /// response has already been returned to the caller — a slow or
    /// failing write must never be visible upstream, so every error here
    /// is logged and discarded.
    pub async fn record(&self, entry: TraceEntry) {
        if !self.should_sample() {
            return;
        }

        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || store.insert_trace(&entry_to_row(entry)))
            .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "trace write failed, discarding"),
            Err(err) => tracing::warn!(error = %err, "trace write task panicked, discarding"),
        }
    }
}

pub(crate) struct TraceRow {
    pub project_ids: Vec<String>,
    pub query: String,
    pub retrieved_file_paths: Vec<String>,
    pub top_k: usize,
    pub latencies: TraceLatencies,
    pub retrieval_method: String,
    pub routing_method: Option<String>,
    pub routing_confidence: Option<f32>,
    pub answer: Option<String>,
    pub feedback: Option<String>,
}

fn entry_to_row(entry: TraceEntry) -> TraceRow {
    TraceRow {
        project_ids: entry.project_ids,
        query: entry.query,
        retrieved_file_paths: entry.retrieved_file_paths,
        top_k: entry.top_k,
        latencies: entry.latencies,
        retrieval_method: entry.retrieval_method,
        routing_method: entry.routing_method,
        routing_confidence: entry.routing_confidence,
        answer: entry.answer,
        feedback: entry.feedback,
    }
}

impl Store {
    pub(crate) fn insert_trace(&self, row: &TraceRow) -> Result<(), crate::store::StoreError> {
        self.block_on(async {
            let id = uuid::Uuid::new_v4().to_string();
            let project_ids = serde_json::to_string(&row.project_ids).unwrap_or_else(|_| "[]".into());
            let retrieved = serde_json::to_string(&row.retrieved_file_paths).unwrap_or_else(|_| "[]".into());
            let now = chrono::Utc::now().to_rfc3339();

            sqlx::query(
                "INSERT INTO eval_traces
                    (id, project_ids, query, retrieved_file_paths, top_k,
                     latency_retrieval_ms, latency_assembly_ms, latency_total_ms,
                     retrieval_method, routing_method, routing_confidence,
                     answer, feedback, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )
            .bind(id)
            .bind(project_ids)
            .bind(&row.query)
            .bind(retrieved)
            .bind(row.top_k as i64)
            .bind(row.latencies.retrieval_ms.map(|v| v as i64))
            .bind(row.latencies.assembly_ms.map(|v| v as i64))
            .bind(row.latencies.total_ms.map(|v| v as i64))
            .bind(&row.retrieval_method)
            .bind(&row.routing_method)
            .bind(row.routing_confidence)
            .bind(&row.answer)
            .bind(&row.feedback)
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    pub(crate) fn count_traces(&self) -> Result<i64, crate::store::StoreError> {
        self.block_on(async {
            let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM eval_traces")
                .fetch_one(&self.pool)
                .await?;
            Ok(row.0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> TraceEntry {
        TraceEntry {
            project_ids: vec!["p1".into()],
            query: "how does auth work".into(),
            retrieved_file_paths: vec!["src/auth.rs".into()],
            top_k: 10,
            latencies: TraceLatencies {
                retrieval_ms: Some(12),
                assembly_ms: Some(3),
                total_ms: Some(20),
            },
            retrieval_method: "fusion".into(),
            routing_method: Some("heuristic".into()),
            routing_confidence: Some(0.9),
            answer: None,
            feedback: None,
        }
    }

    #[tokio::test]
    async fn sampling_rate_zero_never_records() {
        let store = Store::open_in_memory().unwrap();
        let recorder = TraceRecorder::new(store.clone(), 0.0);
        recorder.record(entry()).await;
        assert_eq!(store.count_traces().unwrap(), 0);
    }

    #[tokio::test]
    async fn sampling_rate_one_always_records() {
        let store = Store::open_in_memory().unwrap();
        let recorder = TraceRecorder::new(store.clone(), 1.0);
        recorder.record(entry()).await;
        recorder.record(entry()).await;
        assert_eq!(store.count_traces().unwrap(), 2);
    }

    #[tokio::test]
    async fn sampling_rate_clamped_to_valid_range() {
        let store = Store::open_in_memory().unwrap();
        let recorder = TraceRecorder::new(store.clone(), 5.0);
        recorder.record(entry()).await;
        assert_eq!(store.count_traces().unwrap(), 1);
    }
}
