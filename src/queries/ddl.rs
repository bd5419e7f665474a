use sea_query::{
    ColumnDef, Index, IndexCreateStatement, PostgresQueryBuilder, SqliteQueryBuilder, Table,
    TableCreateStatement,
};

use crate::schema::{Chunks, CombinationJobs, Metadata, SilenceAnalyses};

/// Name of the partial unique index that serializes jobs per (conversation, speaker)
pub const ACTIVE_JOB_INDEX: &str = "idx_combination_jobs_active_key";

fn metadata_table() -> TableCreateStatement {
    Table::create()
        .table(Metadata::Table)
        .if_not_exists()
        .col(ColumnDef::new(Metadata::Key).string().primary_key())
        .col(ColumnDef::new(Metadata::Value).string().not_null())
        .to_owned()
}

fn chunks_table() -> TableCreateStatement {
    Table::create()
        .table(Chunks::Table)
        .if_not_exists()
        .col(ColumnDef::new(Chunks::ConversationId).string().not_null())
        .col(ColumnDef::new(Chunks::ChunkIndex).big_integer().not_null())
        .col(ColumnDef::new(Chunks::Speaker).string().not_null())
        .col(ColumnDef::new(Chunks::StoragePath).text().not_null())
        .col(ColumnDef::new(Chunks::ByteSize).big_integer().not_null())
        .col(ColumnDef::new(Chunks::MimeType).string().not_null())
        .col(ColumnDef::new(Chunks::Container).string().not_null())
        .col(ColumnDef::new(Chunks::Status).string().not_null())
        .col(ColumnDef::new(Chunks::UploadedAtMs).big_integer().not_null())
        .to_owned()
}

fn chunks_key_index() -> IndexCreateStatement {
    Index::create()
        .if_not_exists()
        .unique()
        .name("idx_chunks_key")
        .table(Chunks::Table)
        .col(Chunks::ConversationId)
        .col(Chunks::Speaker)
        .col(Chunks::ChunkIndex)
        .to_owned()
}

fn combination_jobs_table() -> TableCreateStatement {
    Table::create()
        .table(CombinationJobs::Table)
        .if_not_exists()
        .col(ColumnDef::new(CombinationJobs::Id).string().primary_key())
        .col(
            ColumnDef::new(CombinationJobs::ConversationId)
                .string()
                .not_null(),
        )
        .col(ColumnDef::new(CombinationJobs::Speaker).string().not_null())
        .col(ColumnDef::new(CombinationJobs::Status).string().not_null())
        .col(ColumnDef::new(CombinationJobs::Container).string().null())
        .col(ColumnDef::new(CombinationJobs::CombinedFilePath).text().null())
        .col(ColumnDef::new(CombinationJobs::TotalChunks).big_integer().null())
        .col(ColumnDef::new(CombinationJobs::ErrorMessage).text().null())
        .col(
            ColumnDef::new(CombinationJobs::StartedAtMs)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(CombinationJobs::CompletedAtMs)
                .big_integer()
                .null(),
        )
        .col(
            ColumnDef::new(CombinationJobs::HeartbeatAtMs)
                .big_integer()
                .not_null(),
        )
        .to_owned()
}

fn combination_jobs_status_index() -> IndexCreateStatement {
    Index::create()
        .if_not_exists()
        .name("idx_combination_jobs_status_heartbeat")
        .table(CombinationJobs::Table)
        .col(CombinationJobs::Status)
        .col(CombinationJobs::HeartbeatAtMs)
        .to_owned()
}

fn silence_analyses_table() -> TableCreateStatement {
    Table::create()
        .table(SilenceAnalyses::Table)
        .if_not_exists()
        .col(ColumnDef::new(SilenceAnalyses::FilePath).text().primary_key())
        .col(ColumnDef::new(SilenceAnalyses::Segments).text().not_null())
        .col(
            ColumnDef::new(SilenceAnalyses::DurationSeconds)
                .double()
                .not_null(),
        )
        .col(ColumnDef::new(SilenceAnalyses::ThresholdDb).double().not_null())
        .col(
            ColumnDef::new(SilenceAnalyses::MinSilenceDurationSeconds)
                .double()
                .not_null(),
        )
        .col(
            ColumnDef::new(SilenceAnalyses::AnalyzedAtMs)
                .big_integer()
                .not_null(),
        )
        .to_owned()
}

/// CREATE UNIQUE INDEX IF NOT EXISTS idx_combination_jobs_active_key
///     ON combination_jobs(conversation_id, speaker) WHERE status <> 'failed'
///
/// At most one processing-or-completed job may exist per key; failed jobs do not
/// block a fresh attempt. Same text for SQLite and PostgreSQL.
pub fn create_active_job_index() -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON combination_jobs (conversation_id, speaker) WHERE status <> 'failed'",
        ACTIVE_JOB_INDEX
    )
}

/// CREATE TABLE IF NOT EXISTS metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL)
pub fn create_metadata_table() -> String {
    metadata_table().to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS chunks (...)
pub fn create_chunks_table() -> String {
    chunks_table().to_string(SqliteQueryBuilder)
}

/// CREATE UNIQUE INDEX IF NOT EXISTS idx_chunks_key ON chunks(conversation_id, speaker, chunk_index)
pub fn create_chunks_key_index() -> String {
    chunks_key_index().to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS combination_jobs (...)
pub fn create_combination_jobs_table() -> String {
    combination_jobs_table().to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_combination_jobs_status_heartbeat ON combination_jobs(status, heartbeat_at_ms)
pub fn create_combination_jobs_status_index() -> String {
    combination_jobs_status_index().to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS silence_analyses (...)
pub fn create_silence_analyses_table() -> String {
    silence_analyses_table().to_string(SqliteQueryBuilder)
}

// ============================================================================
// PostgreSQL variants
// ============================================================================

/// CREATE TABLE IF NOT EXISTS metadata - PostgreSQL
pub fn create_metadata_table_pg() -> String {
    metadata_table().to_string(PostgresQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS chunks - PostgreSQL
pub fn create_chunks_table_pg() -> String {
    chunks_table().to_string(PostgresQueryBuilder)
}

/// CREATE UNIQUE INDEX IF NOT EXISTS idx_chunks_key - PostgreSQL
pub fn create_chunks_key_index_pg() -> String {
    chunks_key_index().to_string(PostgresQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS combination_jobs - PostgreSQL
pub fn create_combination_jobs_table_pg() -> String {
    combination_jobs_table().to_string(PostgresQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_combination_jobs_status_heartbeat - PostgreSQL
pub fn create_combination_jobs_status_index_pg() -> String {
    combination_jobs_status_index().to_string(PostgresQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS silence_analyses - PostgreSQL
pub fn create_silence_analyses_table_pg() -> String {
    silence_analyses_table().to_string(PostgresQueryBuilder)
}
