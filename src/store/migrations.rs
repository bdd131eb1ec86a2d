//! Schema migrations for the chunk store.
//!
//! When `CURRENT_SCHEMA_VERSION` changes, migrations allow upgrading an
//! existing database in place instead of requiring a full rebuild.
//!
//! ## Adding a new migration
//!
//! 1. Increment `CURRENT_SCHEMA_VERSION` in `helpers.rs`.
//! 2. Add a migration function: `async fn migrate_vN_to_vM(conn) -> Result<(), StoreError>`.
//! 3. Add the case to `run_migration()`.
//! 4. Keep the step idempotent (`IF NOT EXISTS`) so a half-applied prior
//!    attempt doesn't error on retry.

use super::helpers::StoreError;

/// Runs every migration step from `from` to `to`, inside one transaction,
/// then records the new version. Forward-only: opening a database whose
/// recorded version is newer than `to` is a fatal `SchemaNewerThanBinary`.
pub async fn migrate(pool: &sqlx::SqlitePool, from: i32, to: i32) -> Result<(), StoreError> {
    if from == to {
        return Ok(());
    }
    if from > to {
        return Err(StoreError::SchemaNewerThanBinary(from));
    }

    tracing::info!(from_version = from, to_version = to, "starting schema migration");

    let mut tx = pool.begin().await?;
    for version in from..to {
        tracing::info!(from = version, to = version + 1, "running migration step");
        run_migration(&mut tx, version, version + 1).await?;
    }
    sqlx::query("UPDATE metadata SET value = ?1 WHERE key = 'schema_version'")
        .bind(to.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(new_version = to, "schema migration complete");
    Ok(())
}

#[allow(clippy::match_single_binding)] // future migration arms land here
async fn run_migration(
    _conn: &mut sqlx::SqliteConnection,
    from: i32,
    to: i32,
) -> Result<(), StoreError> {
    match (from, to) {
        _ => Err(StoreError::SchemaMismatch(from)),
    }
}
