//! Chunk CRUD for `ChunkStore` (C1): `insert_chunks`,
//! `delete_chunks_for_file`, `count_chunks`, and a paged `iter_chunks`
//! cursor so rebuilds never have to hold the whole corpus in memory.

use chrono::Utc;

use crate::chunk::Chunk;

use super::helpers::{embedding_to_bytes, ChunkRow, StoreError};
use super::{Store, DEFAULT_PAGE_SIZE};

impl Store {
    /// Inserts a batch of chunks transactionally. Enforces dimension
    /// uniformity against `expected_dim`: any chunk whose embedding length
    /// differs fails the whole batch atomically (§8 "dimension gate").
    pub fn insert_chunks(
        &self,
        project_id: &str,
        chunks: &[Chunk],
        expected_dim: usize,
    ) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        for chunk in chunks {
            if chunk.embedding.len() != expected_dim {
                return Err(StoreError::DimensionMismatch {
                    project_id: project_id.to_string(),
                    expected: expected_dim,
                    actual: chunk.embedding.len(),
                });
            }
        }

        self.block_on(async {
            let mut tx = self.pool.begin().await?;
            let now = Utc::now().to_rfc3339();

            for chunk in chunks {
                let metadata_json =
                    serde_json::to_string(&chunk.metadata).unwrap_or_else(|_| "{}".to_string());
                let embedding_bytes = embedding_to_bytes(&chunk.embedding, expected_dim);

                sqlx::query(
                    "INSERT INTO chunks
                        (id, project_id, content, embedding, file_path, file_type,
                         language, start_line, end_line, metadata, inserted_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                     ON CONFLICT(id) DO UPDATE SET
                        content=excluded.content, embedding=excluded.embedding",
                )
                .bind(&chunk.id)
                .bind(project_id)
                .bind(&chunk.content)
                .bind(embedding_bytes)
                .bind(&chunk.file_path)
                .bind(chunk.file_type.to_string())
                .bind(&chunk.language)
                .bind(chunk.line_range.start as i64)
                .bind(chunk.line_range.end as i64)
                .bind(metadata_json)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query(
                "UPDATE projects SET chunk_count = chunk_count + ?1, updated_at = ?2 WHERE id = ?3",
            )
            .bind(chunks.len() as i64)
            .bind(&now)
            .bind(project_id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(())
        })
    }

    /// Deletes every chunk for `(project_id, file_path)`. Called before
    /// re-ingest so re-indexing a file never leaves stale chunks behind.
    pub fn delete_chunks_for_file(
        &self,
        project_id: &str,
        file_path: &str,
    ) -> Result<u64, StoreError> {
        self.block_on(async {
            let result = sqlx::query(
                "DELETE FROM chunks WHERE project_id = ?1 AND file_path = ?2",
            )
            .bind(project_id)
            .bind(file_path)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
    }

    pub fn count_chunks(&self, project_id: &str) -> Result<u64, StoreError> {
        self.block_on(async {
            let row: (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM chunks WHERE project_id = ?1")
                    .bind(project_id)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(row.0 as u64)
        })
    }

    /// Reads one page of chunks ordered by insertion, starting after
    /// `after_id` (pass `None` for the first page). Returns an empty page
    /// when exhausted.
    pub fn iter_chunks_page(
        &self,
        project_id: &str,
        after_id: Option<&str>,
        page_size: u32,
    ) -> Result<Vec<Chunk>, StoreError> {
        let page_size = if page_size == 0 { DEFAULT_PAGE_SIZE } else { page_size };
        self.block_on(async {
            let rows: Vec<ChunkRow> = match after_id {
                None => query_as_chunk_row(
                    "SELECT id, project_id, content, embedding, file_path, file_type,
                            language, start_line, end_line, metadata
                     FROM chunks WHERE project_id = ?1 ORDER BY inserted_at, id LIMIT ?2",
                )
                .bind(project_id)
                .bind(page_size as i64)
                .fetch_all(&self.pool)
                .await?,
                Some(cursor) => query_as_chunk_row(
                    "SELECT id, project_id, content, embedding, file_path, file_type,
                            language, start_line, end_line, metadata
                     FROM chunks
                     WHERE project_id = ?1
                       AND (inserted_at, id) > (
                           SELECT inserted_at, id FROM chunks WHERE id = ?2
                       )
                     ORDER BY inserted_at, id LIMIT ?3",
                )
                .bind(project_id)
                .bind(cursor)
                .bind(page_size as i64)
                .fetch_all(&self.pool)
                .await?,
            };
            Ok(rows.into_iter().map(ChunkRow::into_chunk).collect())
        })
    }

    /// Streams every chunk for `project_id` through `page_size`-sized
    /// pages, invoking `visit` per chunk. Bounds memory regardless of
    /// corpus size, matching §4.1's paged-streaming contract.
    pub fn for_each_chunk(
        &self,
        project_id: &str,
        page_size: u32,
        mut visit: impl FnMut(Chunk),
    ) -> Result<(), StoreError> {
        let mut cursor: Option<String> = None;
        loop {
            let page = self.iter_chunks_page(project_id, cursor.as_deref(), page_size)?;
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(|c| c.id.clone());
            for chunk in page {
                visit(chunk);
            }
        }
        Ok(())
    }
}

// sqlx's `query_as` needs a type implementing FromRow; ChunkRow is
// pub(crate), so this thin shim keeps the derive local to this module
// without exposing it crate-wide.
fn query_as_chunk_row(
    sql: &str,
) -> sqlx::query::QueryAs<'_, sqlx::Sqlite, ChunkRow, sqlx::sqlite::SqliteArguments<'_>> {
    sqlx::query_as(sql)
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for ChunkRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;
        Ok(ChunkRow {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            content: row.try_get("content")?,
            embedding: row.try_get("embedding")?,
            file_path: row.try_get("file_path")?,
            file_type: row.try_get("file_type")?,
            language: row.try_get("language")?,
            start_line: row.try_get("start_line")?,
            end_line: row.try_get("end_line")?,
            metadata: row.try_get("metadata")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{FileType, LineRange, Metadata};

    fn chunk(id: &str, project_id: &str, dim: usize) -> Chunk {
        Chunk {
            id: id.to_string(),
            project_id: project_id.to_string(),
            content: format!("fn {id}() {{}}"),
            embedding: vec![0.1; dim],
            file_path: "src/lib.rs".to_string(),
            file_type: FileType::Code,
            language: Some("rust".to_string()),
            line_range: LineRange::new(1, 2),
            metadata: Metadata::new(),
        }
    }

    fn setup_project(store: &Store, project_id: &str, dim: usize) {
        store
            .create_project(&crate::chunk::Project {
                id: project_id.to_string(),
                name: project_id.to_string(),
                path: "/tmp/proj".to_string(),
                embedding_model: "fake".to_string(),
                embedding_dimensions: dim,
                file_count: 0,
                chunk_count: 0,
                indexed_at: Utc::now(),
                updated_at: Utc::now(),
                tags: vec![],
                description: None,
            })
            .unwrap();
    }

    #[test]
    fn insert_and_count_round_trips() {
        let store = Store::open_in_memory().unwrap();
        setup_project(&store, "p1", 4);
        let chunks = vec![chunk("c1", "p1", 4), chunk("c2", "p1", 4)];
        store.insert_chunks("p1", &chunks, 4).unwrap();
        assert_eq!(store.count_chunks("p1").unwrap(), 2);
    }

    #[test]
    fn insert_rejects_dimension_mismatch_atomically() {
        let store = Store::open_in_memory().unwrap();
        setup_project(&store, "p1", 4);
        let mut chunks: Vec<Chunk> = (0..1000).map(|i| chunk(&format!("c{i}"), "p1", 4)).collect();
        chunks[500].embedding = vec![0.1; 3];
        let result = store.insert_chunks("p1", &chunks, 4);
        assert!(result.is_err());
        assert_eq!(store.count_chunks("p1").unwrap(), 0);
    }

    #[test]
    fn delete_chunks_for_file_removes_only_that_file() {
        let store = Store::open_in_memory().unwrap();
        setup_project(&store, "p1", 4);
        let mut c1 = chunk("c1", "p1", 4);
        c1.file_path = "a.rs".into();
        let mut c2 = chunk("c2", "p1", 4);
        c2.file_path = "b.rs".into();
        store.insert_chunks("p1", &[c1, c2], 4).unwrap();
        store.delete_chunks_for_file("p1", "a.rs").unwrap();
        let mut paths = vec![];
        store.for_each_chunk("p1", 1000, |c| paths.push(c.file_path)).unwrap();
        assert_eq!(paths, vec!["b.rs".to_string()]);
    }

    #[test]
    fn for_each_chunk_pages_through_entire_project() {
        let store = Store::open_in_memory().unwrap();
        setup_project(&store, "p1", 4);
        let chunks: Vec<Chunk> = (0..10).map(|i| chunk(&format!("c{i}"), "p1", 4)).collect();
        store.insert_chunks("p1", &chunks, 4).unwrap();
        let mut seen = vec![];
        store.for_each_chunk("p1", 3, |c| seen.push(c.id)).unwrap();
        assert_eq!(seen.len(), 10);
    }
}
