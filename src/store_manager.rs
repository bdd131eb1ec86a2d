//! StoreManager (C6): lazy build/cache/invalidate lifecycle for C2 and C3,
//! keyed by `project_id`.
//!
//! Passed explicitly through the pipeline as a handle — never an ambient
//! singleton (§9 design notes) — constructed once by the frontend and
//! threaded into `MultiProjectFusion`/`QueryRouter`/the CLI.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

use crate::error::CoreError;
use crate::lexical_index::{LexicalIndex, LexicalSource};
use crate::store::Store;
use crate::vector_index::hnsw::HnswIndex;
use crate::vector_index::{IndexEntry, VectorIndex};

const BRUTE_FORCE_THRESHOLD: u64 = 1000;

/// Both derived indices for one project, built together since they share
/// the same paged scan of the store.
pub struct ProjectIndexes {
    pub vector: Arc<dyn VectorIndex>,
    pub lexical: Arc<LexicalIndex>,
    pub chunks: Arc<HashMap<String, crate::chunk::Chunk>>,
}

type BuildSlot = Arc<OnceCell<Result<Arc<ProjectIndexes>, String>>>;

pub struct StoreManager {
    store: Arc<Store>,
    slots: Mutex<HashMap<String, BuildSlot>>,
    ef_search: usize,
    bm25_k1: f32,
    bm25_b: f32,
}

impl StoreManager {
    pub fn new(store: Arc<Store>) -> Self {
        StoreManager {
            store,
            slots: Mutex::new(HashMap::new()),
            ef_search: 100,
            bm25_k1: crate::lexical_index::DEFAULT_K1,
            bm25_b: crate::lexical_index::DEFAULT_B,
        }
    }

    pub fn with_ef_search(store: Arc<Store>, ef_search: usize) -> Self {
        StoreManager {
            store,
            slots: Mutex::new(HashMap::new()),
            ef_search,
            bm25_k1: crate::lexical_index::DEFAULT_K1,
            bm25_b: crate::lexical_index::DEFAULT_B,
        }
    }

    /// Constructs a `StoreManager` with the BM25/ANN tunables surfaced by
    /// `Config` (§4.13), rather than the teacher's built-in defaults.
    pub fn with_params(store: Arc<Store>, ef_search: usize, bm25_k1: f32, bm25_b: f32) -> Self {
        StoreManager {
            store,
            slots: Mutex::new(HashMap::new()),
            ef_search,
            bm25_k1,
            bm25_b,
        }
    }

    /// Returns the cached indexes for `project_id`, building them on first
    /// access. Concurrent callers arriving mid-build share the same
    /// in-flight attempt; a failed build clears the slot so the next
    /// caller retries from scratch.
    pub async fn get_indexes(&self, project_id: &str) -> Result<Arc<ProjectIndexes>, CoreError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots
                .entry(project_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = slot
            .get_or_init(|| async { self.build(project_id).await.map_err(|e| e.to_string()) })
            .await
            .clone();

        match result {
            Ok(indexes) => Ok(indexes),
            Err(message) => {
                // Clear the failed slot so the next caller gets a fresh
                // `OnceCell` rather than a permanently-cached error.
                let mut slots = self.slots.lock().await;
                slots.remove(project_id);
                Err(CoreError::Configuration { message })
            }
        }
    }

    async fn build(&self, project_id: &str) -> Result<Arc<ProjectIndexes>, CoreError> {
        let project = self.store.get_project(project_id)?;
        let dimensions = project.embedding_dimensions;

        let store = self.store.clone();
        let project_id_owned = project_id.to_string();
        let (chunks, total) = tokio::task::spawn_blocking(move || -> Result<_, CoreError> {
            let mut chunks = Vec::new();
            store.for_each_chunk(&project_id_owned, 1000, |chunk| {
                chunks.push(chunk);
            })?;
            let total = chunks.len();
            Ok((chunks, total))
        })
        .await
        .map_err(|e| CoreError::Configuration { message: e.to_string() })??;

        if let Some(first) = chunks.first() {
            if first.embedding.len() != dimensions {
                return Err(CoreError::DimensionMismatch {
                    project_id: project_id.to_string(),
                    expected: dimensions,
                    actual: first.embedding.len(),
                });
            }
        }

        let mut lookup = HashMap::with_capacity(chunks.len());
        let mut vector_entries = Vec::with_capacity(chunks.len());
        let mut lexical_sources = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            vector_entries.push(IndexEntry {
                chunk_id: chunk.id.clone(),
                embedding: crate::embedding::Embedding::new(chunk.embedding.clone()),
                metadata: chunk.metadata.clone(),
            });
            lexical_sources.push(LexicalSource {
                chunk_id: chunk.id.clone(),
                content: chunk.content.clone(),
                metadata: chunk.metadata.clone(),
            });
            lookup.insert(chunk.id.clone(), chunk);
        }

        let vector: Arc<dyn VectorIndex> = if total < BRUTE_FORCE_THRESHOLD as usize {
            Arc::new(crate::vector_index::brute_force::BruteForceIndex::build(
                vector_entries,
                dimensions,
            ))
        } else {
            Arc::new(HnswIndex::build_with_ef_search(
                vector_entries,
                dimensions,
                self.ef_search,
            ))
        };
        let lexical = Arc::new(LexicalIndex::build_with_params(
            lexical_sources,
            self.bm25_k1,
            self.bm25_b,
        ));

        Ok(Arc::new(ProjectIndexes {
            vector,
            lexical,
            chunks: Arc::new(lookup),
        }))
    }

    /// Drops both cached indices for `project_id`. Any in-flight build
    /// completes but its result is discarded on the next access since a
    /// fresh slot is created.
    pub async fn invalidate(&self, project_id: &str) {
        let mut slots = self.slots.lock().await;
        slots.remove(project_id);
    }

    pub async fn dispose(&self) {
        let mut slots = self.slots.lock().await;
        slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, FileType, LineRange, Project};

    fn setup(dim: usize) -> (Arc<Store>, String) {
        let store = Store::open_in_memory().unwrap();
        let project = Project {
            id: "p1".into(),
            name: "p1".into(),
            path: "/tmp".into(),
            embedding_model: "fake".into(),
            embedding_dimensions: dim,
            file_count: 0,
            chunk_count: 0,
            indexed_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            tags: vec![],
            description: None,
        };
        store.create_project(&project).unwrap();
        let chunk = Chunk {
            id: "c1".into(),
            project_id: "p1".into(),
            content: "fn authenticate() {}".into(),
            embedding: vec![0.1; dim],
            file_path: "a.rs".into(),
            file_type: FileType::Code,
            language: Some("rust".into()),
            line_range: LineRange::new(1, 2),
            metadata: Default::default(),
        };
        store.insert_chunks("p1", &[chunk], dim).unwrap();
        (store, "p1".to_string())
    }

    #[tokio::test]
    async fn builds_and_caches_indexes() {
        let (store, project_id) = setup(4);
        let manager = StoreManager::new(store);
        let first = manager.get_indexes(&project_id).await.unwrap();
        let second = manager.get_indexes(&project_id).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn invalidate_forces_rebuild() {
        let (store, project_id) = setup(4);
        let manager = StoreManager::new(store);
        let first = manager.get_indexes(&project_id).await.unwrap();
        manager.invalidate(&project_id).await;
        let second = manager.get_indexes(&project_id).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn concurrent_builds_share_one_attempt() {
        let (store, project_id) = setup(4);
        let manager = Arc::new(StoreManager::new(store));
        let a = manager.clone();
        let b = manager.clone();
        let pid_a = project_id.clone();
        let pid_b = project_id.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.get_indexes(&pid_a).await.unwrap() }),
            tokio::spawn(async move { b.get_indexes(&pid_b).await.unwrap() }),
        );
        assert!(Arc::ptr_eq(&ra.unwrap(), &rb.unwrap()));
    }

    #[tokio::test]
    async fn dimension_mismatch_fails_before_build_completes() {
        let (store, project_id) = setup(4);
        // Insert a chunk with a mismatched dimension directly via a second
        // project of wrong dimension to trigger the sentinel check path.
        let manager = StoreManager::new(store.clone());
        store
            .create_project(&Project {
                id: "bad".into(),
                name: "bad".into(),
                path: "/tmp".into(),
                embedding_model: "fake".into(),
                embedding_dimensions: 8,
                file_count: 0,
                chunk_count: 0,
                indexed_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
                tags: vec![],
                description: None,
            })
            .unwrap();
        let chunk = Chunk {
            id: "c-bad".into(),
            project_id: "bad".into(),
            content: "x".into(),
            embedding: vec![0.1; 8],
            file_path: "a.rs".into(),
            file_type: FileType::Code,
            language: None,
            line_range: LineRange::new(1, 2),
            metadata: Default::default(),
        };
        store.insert_chunks("bad", &[chunk], 8).unwrap();
        // Manually corrupt the recorded dimension to provoke a mismatch.
        store
            .block_on(sqlx::query("UPDATE projects SET embedding_dimensions = 99 WHERE id = 'bad'").execute(&store.pool))
            .unwrap();
        let result = manager.get_indexes("bad").await;
        assert!(result.is_err());
        let _ = project_id;
    }
}
