use sea_query::{
    Expr, InsertStatement, OnConflict, Order, PostgresQueryBuilder, Query, SelectStatement,
    SqliteQueryBuilder, UpdateStatement,
};

use crate::models::{Chunk, ChunkStatus, Speaker};
use crate::schema::Chunks;

const CHUNK_COLUMNS: [Chunks; 9] = [
    Chunks::ConversationId,
    Chunks::ChunkIndex,
    Chunks::Speaker,
    Chunks::StoragePath,
    Chunks::ByteSize,
    Chunks::MimeType,
    Chunks::Container,
    Chunks::Status,
    Chunks::UploadedAtMs,
];

fn upsert_stmt(chunk: &Chunk) -> InsertStatement {
    Query::insert()
        .into_table(Chunks::Table)
        .columns(CHUNK_COLUMNS)
        .values_panic([
            chunk.conversation_id.as_str().into(),
            chunk.chunk_index.into(),
            chunk.speaker.as_str().into(),
            chunk.storage_path.as_str().into(),
            chunk.byte_size.into(),
            chunk.mime_type.as_str().into(),
            chunk.container.as_str().into(),
            chunk.status.as_str().into(),
            chunk.uploaded_at_ms.into(),
        ])
        .on_conflict(
            OnConflict::columns([Chunks::ConversationId, Chunks::Speaker, Chunks::ChunkIndex])
                .update_columns([
                    Chunks::StoragePath,
                    Chunks::ByteSize,
                    Chunks::MimeType,
                    Chunks::Container,
                    Chunks::Status,
                    Chunks::UploadedAtMs,
                ])
                .to_owned(),
        )
        .to_owned()
}

fn select_for_key_stmt(conversation_id: &str, speaker: Speaker) -> SelectStatement {
    Query::select()
        .columns(CHUNK_COLUMNS)
        .from(Chunks::Table)
        .and_where(Expr::col(Chunks::ConversationId).eq(conversation_id))
        .and_where(Expr::col(Chunks::Speaker).eq(speaker.as_str()))
        .and_where(Expr::col(Chunks::Status).ne(ChunkStatus::Failed.as_str()))
        .order_by(Chunks::ChunkIndex, Order::Asc)
        .to_owned()
}

fn mark_combined_stmt(conversation_id: &str, speaker: Speaker, max_index: i64) -> UpdateStatement {
    Query::update()
        .table(Chunks::Table)
        .value(Chunks::Status, ChunkStatus::Combined.as_str())
        .and_where(Expr::col(Chunks::ConversationId).eq(conversation_id))
        .and_where(Expr::col(Chunks::Speaker).eq(speaker.as_str()))
        .and_where(Expr::col(Chunks::Status).eq(ChunkStatus::Uploaded.as_str()))
        .and_where(Expr::col(Chunks::ChunkIndex).lte(max_index))
        .to_owned()
}

/// INSERT INTO chunks (...) VALUES (...)
/// ON CONFLICT (conversation_id, speaker, chunk_index) DO UPDATE SET ...
pub fn upsert(chunk: &Chunk) -> String {
    upsert_stmt(chunk).to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM chunks WHERE conversation_id = ? AND speaker = ? AND status <> 'failed'
/// ORDER BY chunk_index
pub fn select_for_key(conversation_id: &str, speaker: Speaker) -> String {
    select_for_key_stmt(conversation_id, speaker).to_string(SqliteQueryBuilder)
}

/// UPDATE chunks SET status = 'combined'
/// WHERE conversation_id = ? AND speaker = ? AND status = 'uploaded' AND chunk_index <= ?
pub fn mark_combined(conversation_id: &str, speaker: Speaker, max_index: i64) -> String {
    mark_combined_stmt(conversation_id, speaker, max_index).to_string(SqliteQueryBuilder)
}

// ============================================================================
// PostgreSQL variants
// ============================================================================

/// Chunk upsert - PostgreSQL
pub fn upsert_pg(chunk: &Chunk) -> String {
    upsert_stmt(chunk).to_string(PostgresQueryBuilder)
}

/// Ordered chunk scan for one key - PostgreSQL
pub fn select_for_key_pg(conversation_id: &str, speaker: Speaker) -> String {
    select_for_key_stmt(conversation_id, speaker).to_string(PostgresQueryBuilder)
}

/// Mark absorbed chunks as combined - PostgreSQL
pub fn mark_combined_pg(conversation_id: &str, speaker: Speaker, max_index: i64) -> String {
    mark_combined_stmt(conversation_id, speaker, max_index).to_string(PostgresQueryBuilder)
}
