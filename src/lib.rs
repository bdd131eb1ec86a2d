//! # corpusquery — local-first retrieval and routing core
//!
//! Hybrid dense + lexical retrieval over project-scoped code chunks, with
//! multi-project routing, adaptive query classification, and
//! token-budgeted context assembly. Embedding, reranking, and
//! language-model routing are supplied by the caller through small async
//! traits rather than baked in, so the core has no model-loading or
//! network code of its own.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use corpusquery::{Store, StoreManager, FusionRetriever, SearchOptions};
//!
//! # async fn run(
//! #     embedder: Arc<dyn corpusquery::embedding::EmbeddingProvider>,
//! #     reranker: Arc<dyn corpusquery::reranker::Reranker>,
//! # ) -> anyhow::Result<()> {
//! let store = Store::open(std::path::Path::new(".corpusquery/index.db"))?;
//! let manager = StoreManager::new(store.clone());
//! let retriever = FusionRetriever::new(store.clone(), embedder, reranker);
//! let cancel = CancellationToken::new();
//!
//! let indexes = manager.get_indexes("my-project").await?;
//! let opts = SearchOptions::default();
//! let chunks = Default::default();
//! let outcome = retriever
//!     .search(
//!         "my-project",
//!         "how is auth handled",
//!         indexes.vector.as_ref(),
//!         &indexes.lexical,
//!         &opts,
//!         &chunks,
//!         &cancel,
//!     )
//!     .await;
//! match outcome {
//!     Ok(Ok((hits, _degraded))) => { let _ = hits; }
//!     Ok(Err(e)) => return Err(e.into()),
//!     Err(_cancelled) => {}
//! }
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod chunk;
pub mod classifier;
pub mod config;
pub mod embedding;
pub mod error;
pub mod eval;
pub mod fusion;
pub mod lexical_index;
pub mod lm;
pub mod multi_project;
pub mod reranker;
pub mod router;
pub mod store;
pub mod store_manager;
pub mod trace;
pub mod vector_index;

pub use chunk::{Chunk, FileHash, FileType, LineRange, MetaValue, Metadata, Project};
pub use error::{CancellableResult, Cancelled, CoreError, Result};
pub use fusion::{FusionRetriever, SearchFilter, SearchHit, SearchOptions};
pub use multi_project::{MultiProjectFusion, MultiProjectResult};
pub use store::Store;
pub use store_manager::{ProjectIndexes, StoreManager};

/// Name of the per-project index directory.
pub const INDEX_DIR: &str = ".corpusquery";
