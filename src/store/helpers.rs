//! Shared row types, the store error taxonomy, and the embedding blob
//! codec for `ChunkStore` (C1).

use thiserror::Error;

use crate::chunk::{Chunk, FileType, LineRange, Metadata};

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("system time error: {0}")]
    SystemTime(#[from] std::time::SystemTimeError),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("schema version {0} is older than supported; run migrations")]
    SchemaMismatch(i32),

    #[error("database schema version {0} is newer than this binary understands")]
    SchemaNewerThanBinary(i32),

    #[error(
        "embedding model mismatch: project recorded '{recorded}', got '{actual}'"
    )]
    ModelMismatch { recorded: String, actual: String },

    #[error("dimension mismatch for project {project_id}: expected {expected}, got {actual}")]
    DimensionMismatch {
        project_id: String,
        expected: usize,
        actual: usize,
    },

    #[error("project not found: {0}")]
    ProjectNotFound(String),
}

/// Raw row as read from the `chunks` table.
pub(crate) struct ChunkRow {
    pub id: String,
    pub project_id: String,
    pub content: String,
    pub embedding: Vec<u8>,
    pub file_path: String,
    pub file_type: String,
    pub language: Option<String>,
    pub start_line: i64,
    pub end_line: i64,
    pub metadata: String,
}

/// Clamps a possibly-out-of-range signed line number into a 1-indexed
/// `u32`, matching the teacher's defensive row-parsing convention.
pub fn clamp_line_number(value: i64) -> u32 {
    value.clamp(1, u32::MAX as i64) as u32
}

impl ChunkRow {
    pub fn into_chunk(self) -> Chunk {
        let metadata: Metadata = serde_json::from_str(&self.metadata).unwrap_or_else(|err| {
            tracing::warn!(chunk_id = %self.id, error = %err, "corrupted metadata JSON, treating as empty");
            Metadata::new()
        });
        let embedding = bytes_to_embedding(&self.embedding, &self.id);
        Chunk {
            id: self.id,
            project_id: self.project_id,
            content: self.content,
            embedding,
            file_path: self.file_path,
            file_type: self.file_type.parse().unwrap_or(FileType::Unknown),
            language: self.language,
            line_range: LineRange::new(
                clamp_line_number(self.start_line),
                clamp_line_number(self.end_line),
            ),
            metadata,
        }
    }
}

/// Encodes an embedding as packed little-endian IEEE-754 f32 bytes, no
/// header. Panics on a dimension mismatch against `expected_dim` —
/// storing a wrongly-sized embedding silently corrupts the index.
pub fn embedding_to_bytes(embedding: &[f32], expected_dim: usize) -> Vec<u8> {
    assert_eq!(
        embedding.len(),
        expected_dim,
        "embedding length must match the project's recorded dimension before encoding"
    );
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decodes a little-endian f32 blob. Length is implied by the byte count
/// divided by four; a non-multiple-of-4 length logs at `warn` and yields
/// an empty vector rather than panicking on read.
pub fn bytes_to_embedding(bytes: &[u8], chunk_id: &str) -> Vec<f32> {
    if bytes.len() % 4 != 0 {
        tracing::warn!(
            chunk_id,
            byte_len = bytes.len(),
            "embedding blob length is not a multiple of 4, treating as empty"
        );
        return Vec::new();
    }
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_line_number_floors_at_one() {
        assert_eq!(clamp_line_number(-5), 1);
        assert_eq!(clamp_line_number(0), 1);
    }

    #[test]
    fn clamp_line_number_passes_through_valid() {
        assert_eq!(clamp_line_number(42), 42);
    }

    #[test]
    fn embedding_round_trips() {
        let v = vec![1.0f32, -2.5, 0.0, 3.25];
        let bytes = embedding_to_bytes(&v, 4);
        let back = bytes_to_embedding(&bytes, "chunk-1");
        assert_eq!(v, back);
    }

    #[test]
    #[should_panic]
    fn embedding_to_bytes_panics_on_dimension_mismatch() {
        embedding_to_bytes(&[1.0, 2.0], 3);
    }

    #[test]
    fn bytes_to_embedding_handles_truncated_blob() {
        let out = bytes_to_embedding(&[0, 1, 2], "chunk-1");
        assert!(out.is_empty());
    }
}
