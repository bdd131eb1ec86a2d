//! Unified error taxonomy for the retrieval core.
//!
//! Every public operation returns `Result<T, CoreError>`. Discrimination is
//! by variant, not by a class hierarchy, and every variant carries enough
//! context to reconstruct a machine-readable code and an optional
//! remediation hint without string parsing.

use thiserror::Error;

/// Sum type covering every failure class in the core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("dimension mismatch: project {project_id} expects {expected}, got {actual}")]
    DimensionMismatch {
        project_id: String,
        expected: usize,
        actual: usize,
    },

    #[error("corrupted embedding blob for chunk {chunk_id}: {detail}")]
    CorruptedEmbedding { chunk_id: String, detail: String },

    #[error(
        "embedding model mismatch across projects: {offenders:?}"
    )]
    EmbeddingModelMismatch { offenders: Vec<String> },

    #[error("invalid query vector: {reason}")]
    InvalidQueryVector { reason: String },

    #[error("capability call failed ({capability}): {source}")]
    Capability {
        capability: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("capability timed out ({capability}) after {millis}ms")]
    CapabilityTimeout { capability: &'static str, millis: u64 },

    #[error("retrieval unavailable: both vector and lexical indexes failed")]
    RetrievalUnavailable {
        #[source]
        vector_error: Box<CoreError>,
        #[source]
        lexical_error: Box<CoreError>,
    },

    #[error("assembly error: budget {budget} tokens, first chunk needs at least {first_chunk_min_tokens}")]
    AssemblyBudgetExceeded {
        budget: usize,
        first_chunk_min_tokens: usize,
    },

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("index error: {0}")]
    Index(#[from] crate::vector_index::IndexError),

    #[error("eval dataset error: {0}")]
    EvalDataset(String),
}

impl CoreError {
    /// Machine-readable code for user-facing surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Configuration { .. } => "CONFIGURATION_ERROR",
            CoreError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            CoreError::CorruptedEmbedding { .. } => "CORRUPTED_EMBEDDING",
            CoreError::EmbeddingModelMismatch { .. } => "EMBEDDING_MODEL_MISMATCH",
            CoreError::InvalidQueryVector { .. } => "INVALID_QUERY_VECTOR",
            CoreError::Capability { .. } => "CAPABILITY_ERROR",
            CoreError::CapabilityTimeout { .. } => "CAPABILITY_TIMEOUT",
            CoreError::RetrievalUnavailable { .. } => "RETRIEVAL_UNAVAILABLE",
            CoreError::AssemblyBudgetExceeded { .. } => "ASSEMBLY_BUDGET_EXCEEDED",
            CoreError::ProjectNotFound(_) => "PROJECT_NOT_FOUND",
            CoreError::Store(_) => "STORE_ERROR",
            CoreError::Index(_) => "INDEX_ERROR",
            CoreError::EvalDataset(_) => "EVAL_DATASET_ERROR",
        }
    }

    /// Optional remediation hint, surfaced to the caller alongside the message.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            CoreError::ProjectNotFound(_) => Some("Run 'project create <path>' to index it first"),
            CoreError::DimensionMismatch { .. } => {
                Some("Re-index with a consistent embedding model, or create a new project")
            }
            CoreError::EmbeddingModelMismatch { .. } => {
                Some("Only query projects sharing the same embedding model together")
            }
            CoreError::Store(crate::store::StoreError::SchemaNewerThanBinary(_)) => {
                Some("Upgrade the binary to open this database")
            }
            _ => None,
        }
    }

    pub fn capability(capability: &'static str, source: impl Into<anyhow::Error>) -> Self {
        CoreError::Capability {
            capability,
            source: source.into(),
        }
    }
}

/// Distinct from `CoreError`: cancellation is a control-flow value, never
/// logged as a failure and never converted into an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation cancelled")
    }
}

/// Result type alias for cancellable operations.
pub type CancellableResult<T> = Result<Result<T, CoreError>, Cancelled>;

pub type Result<T> = std::result::Result<T, CoreError>;
