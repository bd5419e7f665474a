//! SQLite database module for the record store.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

use crate::constants::EXPECTED_DB_VERSION;
use crate::queries::{ddl, metadata};

type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Open a file-based database pool for production use
/// Enables WAL mode and foreign keys, creating the file if needed
pub async fn open_database_connection(db_path: &Path) -> Result<SqlitePool, DynError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    log::info!("SQLite database: {}", db_path.display());
    Ok(pool)
}

/// Create tables and indexes if missing and stamp (or verify) the schema version
pub async fn init_database_schema(pool: &SqlitePool) -> Result<(), DynError> {
    for sql in [
        ddl::create_metadata_table(),
        ddl::create_chunks_table(),
        ddl::create_chunks_key_index(),
        ddl::create_combination_jobs_table(),
        ddl::create_combination_jobs_status_index(),
        ddl::create_active_job_index(),
        ddl::create_silence_analyses_table(),
    ] {
        sqlx::query(&sql).execute(pool).await?;
    }

    let version: Option<String> = sqlx::query_scalar(&metadata::select_by_key("version"))
        .fetch_optional(pool)
        .await?;

    match version {
        None => {
            sqlx::query(&metadata::upsert("version", EXPECTED_DB_VERSION))
                .execute(pool)
                .await?;
        }
        Some(version) if version != EXPECTED_DB_VERSION => {
            return Err(format!(
                "Unsupported database version: '{}'. This application only supports version '{}'",
                version, EXPECTED_DB_VERSION
            )
            .into());
        }
        Some(_) => {}
    }

    Ok(())
}

/// Create a database in a temporary directory for testing
/// Returns the pool and the directory guard; the files are removed when the guard drops
pub async fn create_test_connection_in_temporary_file(
) -> Result<(SqlitePool, tempfile::TempDir), DynError> {
    let dir = tempfile::tempdir()?;
    let pool = open_database_connection(&dir.path().join("test.sqlite")).await?;
    Ok((pool, dir))
}
