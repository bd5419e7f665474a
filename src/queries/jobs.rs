use sea_query::{
    Expr, InsertStatement, Order, PostgresQueryBuilder, Query, SelectStatement,
    SqliteQueryBuilder, UpdateStatement,
};

use crate::models::{CombinationJob, ContainerKind, JobStatus, Speaker};
use crate::schema::CombinationJobs;

const JOB_COLUMNS: [CombinationJobs; 11] = [
    CombinationJobs::Id,
    CombinationJobs::ConversationId,
    CombinationJobs::Speaker,
    CombinationJobs::Status,
    CombinationJobs::Container,
    CombinationJobs::CombinedFilePath,
    CombinationJobs::TotalChunks,
    CombinationJobs::ErrorMessage,
    CombinationJobs::StartedAtMs,
    CombinationJobs::CompletedAtMs,
    CombinationJobs::HeartbeatAtMs,
];

fn insert_stmt(job: &CombinationJob) -> InsertStatement {
    Query::insert()
        .into_table(CombinationJobs::Table)
        .columns([
            CombinationJobs::Id,
            CombinationJobs::ConversationId,
            CombinationJobs::Speaker,
            CombinationJobs::Status,
            CombinationJobs::StartedAtMs,
            CombinationJobs::HeartbeatAtMs,
        ])
        .values_panic([
            job.id.as_str().into(),
            job.conversation_id.as_str().into(),
            job.speaker.as_str().into(),
            job.status.as_str().into(),
            job.started_at_ms.into(),
            job.heartbeat_at_ms.into(),
        ])
        .to_owned()
}

fn select_by_id_stmt(id: &str) -> SelectStatement {
    Query::select()
        .columns(JOB_COLUMNS)
        .from(CombinationJobs::Table)
        .and_where(Expr::col(CombinationJobs::Id).eq(id))
        .to_owned()
}

fn select_for_key_stmt(conversation_id: &str, speaker: Speaker, active_only: bool) -> SelectStatement {
    let mut stmt = Query::select();
    stmt.columns(JOB_COLUMNS)
        .from(CombinationJobs::Table)
        .and_where(Expr::col(CombinationJobs::ConversationId).eq(conversation_id))
        .and_where(Expr::col(CombinationJobs::Speaker).eq(speaker.as_str()));
    if active_only {
        stmt.and_where(Expr::col(CombinationJobs::Status).ne(JobStatus::Failed.as_str()));
    }
    stmt.order_by(CombinationJobs::StartedAtMs, Order::Desc)
        .limit(1)
        .to_owned()
}

fn update_heartbeat_stmt(id: &str, now_ms: i64) -> UpdateStatement {
    Query::update()
        .table(CombinationJobs::Table)
        .value(CombinationJobs::HeartbeatAtMs, now_ms)
        .and_where(Expr::col(CombinationJobs::Id).eq(id))
        .and_where(Expr::col(CombinationJobs::Status).eq(JobStatus::Processing.as_str()))
        .to_owned()
}

fn mark_completed_stmt(
    id: &str,
    combined_file_path: &str,
    total_chunks: i64,
    container: ContainerKind,
    now_ms: i64,
) -> UpdateStatement {
    Query::update()
        .table(CombinationJobs::Table)
        .values([
            (CombinationJobs::Status, JobStatus::Completed.as_str().into()),
            (CombinationJobs::CombinedFilePath, combined_file_path.into()),
            (CombinationJobs::TotalChunks, total_chunks.into()),
            (CombinationJobs::Container, container.as_str().into()),
            (CombinationJobs::CompletedAtMs, now_ms.into()),
            (CombinationJobs::HeartbeatAtMs, now_ms.into()),
        ])
        .and_where(Expr::col(CombinationJobs::Id).eq(id))
        .and_where(Expr::col(CombinationJobs::Status).eq(JobStatus::Processing.as_str()))
        .to_owned()
}

fn mark_failed_stmt(
    id: &str,
    error_message: &str,
    container: Option<ContainerKind>,
    now_ms: i64,
) -> UpdateStatement {
    let mut stmt = Query::update();
    stmt.table(CombinationJobs::Table).values([
        (CombinationJobs::Status, JobStatus::Failed.as_str().into()),
        (CombinationJobs::ErrorMessage, error_message.into()),
        (CombinationJobs::CompletedAtMs, now_ms.into()),
    ]);
    if let Some(container) = container {
        stmt.value(CombinationJobs::Container, container.as_str());
    }
    stmt.and_where(Expr::col(CombinationJobs::Id).eq(id))
        .and_where(Expr::col(CombinationJobs::Status).eq(JobStatus::Processing.as_str()))
        .to_owned()
}

fn select_stale_ids_stmt(cutoff_ms: i64) -> SelectStatement {
    Query::select()
        .column(CombinationJobs::Id)
        .from(CombinationJobs::Table)
        .and_where(Expr::col(CombinationJobs::Status).eq(JobStatus::Processing.as_str()))
        .and_where(Expr::col(CombinationJobs::HeartbeatAtMs).lt(cutoff_ms))
        .order_by(CombinationJobs::HeartbeatAtMs, Order::Asc)
        .to_owned()
}

/// INSERT INTO combination_jobs (id, conversation_id, speaker, status, started_at_ms, heartbeat_at_ms)
/// VALUES (?, ?, ?, 'processing', ?, ?)
pub fn insert(job: &CombinationJob) -> String {
    insert_stmt(job).to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM combination_jobs WHERE id = ?
pub fn select_by_id(id: &str) -> String {
    select_by_id_stmt(id).to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM combination_jobs WHERE conversation_id = ? AND speaker = ? AND status <> 'failed'
/// ORDER BY started_at_ms DESC LIMIT 1
pub fn select_active_for_key(conversation_id: &str, speaker: Speaker) -> String {
    select_for_key_stmt(conversation_id, speaker, true).to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM combination_jobs WHERE conversation_id = ? AND speaker = ?
/// ORDER BY started_at_ms DESC LIMIT 1
pub fn select_latest_for_key(conversation_id: &str, speaker: Speaker) -> String {
    select_for_key_stmt(conversation_id, speaker, false).to_string(SqliteQueryBuilder)
}

/// UPDATE combination_jobs SET heartbeat_at_ms = ? WHERE id = ? AND status = 'processing'
pub fn update_heartbeat(id: &str, now_ms: i64) -> String {
    update_heartbeat_stmt(id, now_ms).to_string(SqliteQueryBuilder)
}

/// UPDATE combination_jobs SET status = 'completed', combined_file_path = ?, ...
/// WHERE id = ? AND status = 'processing'
pub fn mark_completed(
    id: &str,
    combined_file_path: &str,
    total_chunks: i64,
    container: ContainerKind,
    now_ms: i64,
) -> String {
    mark_completed_stmt(id, combined_file_path, total_chunks, container, now_ms)
        .to_string(SqliteQueryBuilder)
}

/// UPDATE combination_jobs SET status = 'failed', error_message = ?, completed_at_ms = ?
/// WHERE id = ? AND status = 'processing'
pub fn mark_failed(
    id: &str,
    error_message: &str,
    container: Option<ContainerKind>,
    now_ms: i64,
) -> String {
    mark_failed_stmt(id, error_message, container, now_ms).to_string(SqliteQueryBuilder)
}

/// SELECT id FROM combination_jobs WHERE status = 'processing' AND heartbeat_at_ms < ?
pub fn select_stale_ids(cutoff_ms: i64) -> String {
    select_stale_ids_stmt(cutoff_ms).to_string(SqliteQueryBuilder)
}

// ============================================================================
// PostgreSQL variants
// ============================================================================

/// Insert a processing job - PostgreSQL
pub fn insert_pg(job: &CombinationJob) -> String {
    insert_stmt(job).to_string(PostgresQueryBuilder)
}

/// Job by id - PostgreSQL
pub fn select_by_id_pg(id: &str) -> String {
    select_by_id_stmt(id).to_string(PostgresQueryBuilder)
}

/// Non-failed job for a key - PostgreSQL
pub fn select_active_for_key_pg(conversation_id: &str, speaker: Speaker) -> String {
    select_for_key_stmt(conversation_id, speaker, true).to_string(PostgresQueryBuilder)
}

/// Latest job for a key - PostgreSQL
pub fn select_latest_for_key_pg(conversation_id: &str, speaker: Speaker) -> String {
    select_for_key_stmt(conversation_id, speaker, false).to_string(PostgresQueryBuilder)
}

/// Heartbeat refresh - PostgreSQL
pub fn update_heartbeat_pg(id: &str, now_ms: i64) -> String {
    update_heartbeat_stmt(id, now_ms).to_string(PostgresQueryBuilder)
}

/// processing -> completed - PostgreSQL
pub fn mark_completed_pg(
    id: &str,
    combined_file_path: &str,
    total_chunks: i64,
    container: ContainerKind,
    now_ms: i64,
) -> String {
    mark_completed_stmt(id, combined_file_path, total_chunks, container, now_ms)
        .to_string(PostgresQueryBuilder)
}

/// processing -> failed - PostgreSQL
pub fn mark_failed_pg(
    id: &str,
    error_message: &str,
    container: Option<ContainerKind>,
    now_ms: i64,
) -> String {
    mark_failed_stmt(id, error_message, container, now_ms).to_string(PostgresQueryBuilder)
}

/// Stale processing jobs - PostgreSQL
pub fn select_stale_ids_pg(cutoff_ms: i64) -> String {
    select_stale_ids_stmt(cutoff_ms).to_string(PostgresQueryBuilder)
}
