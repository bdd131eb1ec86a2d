//! ChunkStore (C1): persistent, project-scoped storage for chunks,
//! embeddings, and file hashes, backed by a single-file embedded SQLite
//! database.
//!
//! `Store` exposes a synchronous facade over an internal `sqlx` connection
//! pool, the same shape the teacher uses: a private single-threaded
//! `tokio::runtime::Runtime` drives the async driver so callers never need
//! to be async themselves. Higher orchestration layers (C5–C8, C11) are
//! natively async and call these methods via `spawn_blocking` where that
//! matters for cancellation responsiveness.

pub mod chunks;
pub mod helpers;
pub mod migrations;
pub mod projects;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

pub use helpers::{StoreError, CURRENT_SCHEMA_VERSION};

/// Default page size for `iter_chunks`, matching §4.1's "1000-chunk
/// default window, ordered by insertion for deterministic rebuilds."
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

pub struct Store {
    pub(crate) pool: SqlitePool,
    rt: tokio::runtime::Runtime,
    closed: AtomicBool,
}

impl Store {
    /// Opens (creating if absent) the database at `path`, applies the
    /// durability pragmas, and runs migrations up to
    /// `CURRENT_SCHEMA_VERSION`.
    pub fn open(path: &Path) -> Result<Arc<Store>, StoreError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Runtime(e.to_string()))?;

        let pool = rt.block_on(Self::open_pool(path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(path) {
                let mut perms = metadata.permissions();
                perms.set_mode(0o600);
                let _ = std::fs::set_permissions(path, perms);
            }
        }

        let store = Store {
            pool,
            rt,
            closed: AtomicBool::new(false),
        };
        store.rt.block_on(store.init())?;
        Ok(Arc::new(store))
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Arc<Store>, StoreError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Runtime(e.to_string()))?;
        let pool = rt.block_on(async {
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
        })?;
        let store = Store {
            pool,
            rt,
            closed: AtomicBool::new(false),
        };
        store.rt.block_on(store.init())?;
        Ok(Arc::new(store))
    }

    async fn open_pool(path: &Path) -> Result<SqlitePool, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::query("PRAGMA cache_size = -20000").execute(&pool).await?;
        sqlx::query("PRAGMA temp_store = MEMORY").execute(&pool).await?;
        sqlx::query("PRAGMA mmap_size = 268435456").execute(&pool).await?;

        Ok(pool)
    }

    async fn init(&self) -> Result<(), StoreError> {
        for statement in include_str!("schema.sql").split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT value FROM metadata WHERE key = 'schema_version'")
                .fetch_optional(&self.pool)
                .await?;

        match existing {
            None => {
                sqlx::query(
                    "INSERT INTO metadata (key, value) VALUES ('schema_version', ?1)",
                )
                .bind(CURRENT_SCHEMA_VERSION.to_string())
                .execute(&self.pool)
                .await?;
            }
            Some((raw,)) => {
                let stored: i32 = raw.parse().unwrap_or(0);
                if stored > CURRENT_SCHEMA_VERSION {
                    return Err(StoreError::SchemaNewerThanBinary(stored));
                }
                if stored < CURRENT_SCHEMA_VERSION {
                    migrations::migrate(&self.pool, stored, CURRENT_SCHEMA_VERSION).await?;
                }
            }
        }

        Ok(())
    }

    /// Runs `future` on the store's private runtime, blocking the calling
    /// thread. This is the synchronous facade every CRUD method funnels
    /// through.
    pub(crate) fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.rt.block_on(future)
    }

    /// Flushes WAL content back into the main database file and marks the
    /// store closed so `Drop` doesn't attempt a second checkpoint.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.rt.block_on(
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(&self.pool),
        );
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        // Best-effort: never panic out of a destructor.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = self
                .rt
                .block_on(sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(&self.pool));
        }));
        if result.is_err() {
            tracing::warn!("panic during Store drop checkpoint, ignoring");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_runs_migrations() {
        let store = Store::open_in_memory().unwrap();
        let version: (String,) = store
            .block_on(
                sqlx::query_as("SELECT value FROM metadata WHERE key = 'schema_version'")
                    .fetch_one(&store.pool),
            )
            .unwrap();
        assert_eq!(version.0, CURRENT_SCHEMA_VERSION.to_string());
    }

    #[test]
    fn close_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.close();
        store.close();
    }
}
