//! Project CRUD for `ChunkStore` (C1).

use chrono::{DateTime, Utc};

use crate::chunk::Project;

use super::helpers::StoreError;
use super::Store;

struct ProjectRow {
    id: String,
    name: String,
    path: String,
    embedding_model: String,
    embedding_dimensions: i64,
    file_count: i64,
    chunk_count: i64,
    indexed_at: String,
    updated_at: String,
    tags: String,
    description: Option<String>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for ProjectRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;
        Ok(ProjectRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            path: row.try_get("path")?,
            embedding_model: row.try_get("embedding_model")?,
            embedding_dimensions: row.try_get("embedding_dimensions")?,
            file_count: row.try_get("file_count")?,
            chunk_count: row.try_get("chunk_count")?,
            indexed_at: row.try_get("indexed_at")?,
            updated_at: row.try_get("updated_at")?,
            tags: row.try_get("tags")?,
            description: row.try_get("description")?,
        })
    }
}

fn parse_rfc3339(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            id: row.id,
            name: row.name,
            path: row.path,
            embedding_model: row.embedding_model,
            embedding_dimensions: row.embedding_dimensions.max(0) as usize,
            file_count: row.file_count.max(0) as u64,
            chunk_count: row.chunk_count.max(0) as u64,
            indexed_at: parse_rfc3339(&row.indexed_at),
            updated_at: parse_rfc3339(&row.updated_at),
            tags: serde_json::from_str(&row.tags).unwrap_or_default(),
            description: row.description,
        }
    }
}

impl Store {
    pub fn create_project(&self, project: &Project) -> Result<(), StoreError> {
        self.block_on(async {
            sqlx::query(
                "INSERT INTO projects
                    (id, name, path, embedding_model, embedding_dimensions,
                     file_count, chunk_count, indexed_at, updated_at, tags, description)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )
            .bind(&project.id)
            .bind(&project.name)
            .bind(&project.path)
            .bind(&project.embedding_model)
            .bind(project.embedding_dimensions as i64)
            .bind(project.file_count as i64)
            .bind(project.chunk_count as i64)
            .bind(project.indexed_at.to_rfc3339())
            .bind(project.updated_at.to_rfc3339())
            .bind(serde_json::to_string(&project.tags).unwrap_or_else(|_| "[]".into()))
            .bind(&project.description)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    pub fn get_project(&self, project_id: &str) -> Result<Project, StoreError> {
        self.block_on(async {
            let row: Option<ProjectRow> =
                sqlx::query_as("SELECT * FROM projects WHERE id = ?1")
                    .bind(project_id)
                    .fetch_optional(&self.pool)
                    .await?;
            row.map(Project::from)
                .ok_or_else(|| StoreError::ProjectNotFound(project_id.to_string()))
        })
    }

    pub fn get_project_by_name(&self, name: &str) -> Result<Option<Project>, StoreError> {
        self.block_on(async {
            let row: Option<ProjectRow> =
                sqlx::query_as("SELECT * FROM projects WHERE name = ?1")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row.map(Project::from))
        })
    }

    /// Cascades to chunks, file hashes, and per-project evaluation rows
    /// via `ON DELETE CASCADE`.
    pub fn delete_project(&self, project_id: &str) -> Result<(), StoreError> {
        self.block_on(async {
            let result = sqlx::query("DELETE FROM projects WHERE id = ?1")
                .bind(project_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::ProjectNotFound(project_id.to_string()));
            }
            Ok(())
        })
    }

    pub fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        self.block_on(async {
            let rows: Vec<ProjectRow> =
                sqlx::query_as("SELECT * FROM projects ORDER BY name")
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows.into_iter().map(Project::into).collect())
        })
    }
}
