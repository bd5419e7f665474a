//! Durable job, chunk and silence-analysis records.
//!
//! All cross-worker coordination goes through this store: the partial unique index
//! on `combination_jobs` is the lock, the `status` column is the completion signal.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::sqlite::SqlitePool;

use crate::models::{
    Chunk, CombinationJob, ContainerKind, SilenceAnalysis, SilenceSegment, Speaker,
};
use crate::queries::{chunks, jobs, silence};

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The insert was rejected by a uniqueness constraint
    #[error("conflicting record already exists")]
    Conflict,
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for RecordError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => RecordError::Conflict,
            _ => RecordError::Database(err),
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a job row; `Err(RecordError::Conflict)` when a non-failed job already
    /// exists for the same (conversation, speaker).
    async fn insert_job(&self, job: &CombinationJob) -> Result<(), RecordError>;

    async fn get_job(&self, id: &str) -> Result<Option<CombinationJob>, RecordError>;

    /// The processing or completed job for a key, if any.
    async fn find_active_job(
        &self,
        conversation_id: &str,
        speaker: Speaker,
    ) -> Result<Option<CombinationJob>, RecordError>;

    /// Most recent job for a key regardless of status.
    async fn find_latest_job(
        &self,
        conversation_id: &str,
        speaker: Speaker,
    ) -> Result<Option<CombinationJob>, RecordError>;

    /// Refresh the lease; false once the job is no longer processing.
    async fn heartbeat(&self, id: &str, now_ms: i64) -> Result<bool, RecordError>;

    /// processing -> completed. False if the job had already left processing.
    async fn complete_job(
        &self,
        id: &str,
        combined_file_path: &str,
        total_chunks: i64,
        container: ContainerKind,
        now_ms: i64,
    ) -> Result<bool, RecordError>;

    /// processing -> failed. False if the job had already left processing.
    async fn fail_job(
        &self,
        id: &str,
        error_message: &str,
        container: Option<ContainerKind>,
        now_ms: i64,
    ) -> Result<bool, RecordError>;

    /// Ids of processing jobs whose heartbeat is older than `cutoff_ms`.
    async fn stale_job_ids(&self, cutoff_ms: i64) -> Result<Vec<String>, RecordError>;

    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), RecordError>;

    /// Non-failed chunks of a key ordered by chunk_index.
    async fn list_chunks(
        &self,
        conversation_id: &str,
        speaker: Speaker,
    ) -> Result<Vec<Chunk>, RecordError>;

    async fn mark_chunks_combined(
        &self,
        conversation_id: &str,
        speaker: Speaker,
        max_index: i64,
    ) -> Result<u64, RecordError>;

    async fn get_silence_analysis(
        &self,
        file_path: &str,
    ) -> Result<Option<SilenceAnalysis>, RecordError>;

    async fn upsert_silence_analysis(&self, analysis: &SilenceAnalysis)
        -> Result<(), RecordError>;
}

// Raw rows shared by both backends

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    conversation_id: String,
    speaker: String,
    status: String,
    container: Option<String>,
    combined_file_path: Option<String>,
    total_chunks: Option<i64>,
    error_message: Option<String>,
    started_at_ms: i64,
    completed_at_ms: Option<i64>,
    heartbeat_at_ms: i64,
}

impl TryFrom<JobRow> for CombinationJob {
    type Error = RecordError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(CombinationJob {
            speaker: row.speaker.parse().map_err(RecordError::Corrupt)?,
            status: row.status.parse().map_err(RecordError::Corrupt)?,
            container: row
                .container
                .map(|c| c.parse())
                .transpose()
                .map_err(RecordError::Corrupt)?,
            id: row.id,
            conversation_id: row.conversation_id,
            combined_file_path: row.combined_file_path,
            total_chunks: row.total_chunks,
            error_message: row.error_message,
            started_at_ms: row.started_at_ms,
            completed_at_ms: row.completed_at_ms,
            heartbeat_at_ms: row.heartbeat_at_ms,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChunkRow {
    conversation_id: String,
    chunk_index: i64,
    speaker: String,
    storage_path: String,
    byte_size: i64,
    mime_type: String,
    container: String,
    status: String,
    uploaded_at_ms: i64,
}

impl TryFrom<ChunkRow> for Chunk {
    type Error = RecordError;

    fn try_from(row: ChunkRow) -> Result<Self, Self::Error> {
        Ok(Chunk {
            speaker: row.speaker.parse().map_err(RecordError::Corrupt)?,
            container: row.container.parse().map_err(RecordError::Corrupt)?,
            status: row.status.parse().map_err(RecordError::Corrupt)?,
            conversation_id: row.conversation_id,
            chunk_index: row.chunk_index,
            storage_path: row.storage_path,
            byte_size: row.byte_size,
            mime_type: row.mime_type,
            uploaded_at_ms: row.uploaded_at_ms,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SilenceRow {
    file_path: String,
    segments: String,
    duration_seconds: f64,
    threshold_db: f64,
    min_silence_duration_seconds: f64,
    analyzed_at_ms: i64,
}

impl TryFrom<SilenceRow> for SilenceAnalysis {
    type Error = RecordError;

    fn try_from(row: SilenceRow) -> Result<Self, Self::Error> {
        let segments: Vec<SilenceSegment> = serde_json::from_str(&row.segments)
            .map_err(|e| RecordError::Corrupt(format!("segments of '{}': {}", row.file_path, e)))?;
        Ok(SilenceAnalysis {
            file_path: row.file_path,
            segments,
            duration_seconds: row.duration_seconds,
            threshold_db: row.threshold_db,
            min_silence_duration_seconds: row.min_silence_duration_seconds,
            analyzed_at_ms: row.analyzed_at_ms,
        })
    }
}

fn segments_json(analysis: &SilenceAnalysis) -> Result<String, RecordError> {
    serde_json::to_string(&analysis.segments).map_err(|e| RecordError::Corrupt(e.to_string()))
}

fn analysis_row<'a>(analysis: &'a SilenceAnalysis, segments_json: &'a str) -> silence::AnalysisRow<'a> {
    silence::AnalysisRow {
        file_path: &analysis.file_path,
        segments_json,
        duration_seconds: analysis.duration_seconds,
        threshold_db: analysis.threshold_db,
        min_silence_duration_seconds: analysis.min_silence_duration_seconds,
        analyzed_at_ms: analysis.analyzed_at_ms,
    }
}

/// Record store backed by a SQLite file
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn insert_job(&self, job: &CombinationJob) -> Result<(), RecordError> {
        sqlx::query(&jobs::insert(job)).execute(&self.pool).await?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<CombinationJob>, RecordError> {
        sqlx::query_as::<_, JobRow>(&jobs::select_by_id(id))
            .fetch_optional(&self.pool)
            .await?
            .map(CombinationJob::try_from)
            .transpose()
    }

    async fn find_active_job(
        &self,
        conversation_id: &str,
        speaker: Speaker,
    ) -> Result<Option<CombinationJob>, RecordError> {
        sqlx::query_as::<_, JobRow>(&jobs::select_active_for_key(conversation_id, speaker))
            .fetch_optional(&self.pool)
            .await?
            .map(CombinationJob::try_from)
            .transpose()
    }

    async fn find_latest_job(
        &self,
        conversation_id: &str,
        speaker: Speaker,
    ) -> Result<Option<CombinationJob>, RecordError> {
        sqlx::query_as::<_, JobRow>(&jobs::select_latest_for_key(conversation_id, speaker))
            .fetch_optional(&self.pool)
            .await?
            .map(CombinationJob::try_from)
            .transpose()
    }

    async fn heartbeat(&self, id: &str, now_ms: i64) -> Result<bool, RecordError> {
        let result = sqlx::query(&jobs::update_heartbeat(id, now_ms))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_job(
        &self,
        id: &str,
        combined_file_path: &str,
        total_chunks: i64,
        container: ContainerKind,
        now_ms: i64,
    ) -> Result<bool, RecordError> {
        let sql = jobs::mark_completed(id, combined_file_path, total_chunks, container, now_ms);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_job(
        &self,
        id: &str,
        error_message: &str,
        container: Option<ContainerKind>,
        now_ms: i64,
    ) -> Result<bool, RecordError> {
        let sql = jobs::mark_failed(id, error_message, container, now_ms);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn stale_job_ids(&self, cutoff_ms: i64) -> Result<Vec<String>, RecordError> {
        let ids = sqlx::query_scalar::<_, String>(&jobs::select_stale_ids(cutoff_ms))
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), RecordError> {
        sqlx::query(&chunks::upsert(chunk)).execute(&self.pool).await?;
        Ok(())
    }

    async fn list_chunks(
        &self,
        conversation_id: &str,
        speaker: Speaker,
    ) -> Result<Vec<Chunk>, RecordError> {
        sqlx::query_as::<_, ChunkRow>(&chunks::select_for_key(conversation_id, speaker))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Chunk::try_from)
            .collect()
    }

    async fn mark_chunks_combined(
        &self,
        conversation_id: &str,
        speaker: Speaker,
        max_index: i64,
    ) -> Result<u64, RecordError> {
        let sql = chunks::mark_combined(conversation_id, speaker, max_index);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn get_silence_analysis(
        &self,
        file_path: &str,
    ) -> Result<Option<SilenceAnalysis>, RecordError> {
        sqlx::query_as::<_, SilenceRow>(&silence::select_by_path(file_path))
            .fetch_optional(&self.pool)
            .await?
            .map(SilenceAnalysis::try_from)
            .transpose()
    }

    async fn upsert_silence_analysis(
        &self,
        analysis: &SilenceAnalysis,
    ) -> Result<(), RecordError> {
        let json = segments_json(analysis)?;
        let sql = silence::upsert(&analysis_row(analysis, &json));
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }
}

/// Record store backed by PostgreSQL
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn insert_job(&self, job: &CombinationJob) -> Result<(), RecordError> {
        sqlx::query(&jobs::insert_pg(job)).execute(&self.pool).await?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<CombinationJob>, RecordError> {
        sqlx::query_as::<_, JobRow>(&jobs::select_by_id_pg(id))
            .fetch_optional(&self.pool)
            .await?
            .map(CombinationJob::try_from)
            .transpose()
    }

    async fn find_active_job(
        &self,
        conversation_id: &str,
        speaker: Speaker,
    ) -> Result<Option<CombinationJob>, RecordError> {
        sqlx::query_as::<_, JobRow>(&jobs::select_active_for_key_pg(conversation_id, speaker))
            .fetch_optional(&self.pool)
            .await?
            .map(CombinationJob::try_from)
            .transpose()
    }

    async fn find_latest_job(
        &self,
        conversation_id: &str,
        speaker: Speaker,
    ) -> Result<Option<CombinationJob>, RecordError> {
        sqlx::query_as::<_, JobRow>(&jobs::select_latest_for_key_pg(conversation_id, speaker))
            .fetch_optional(&self.pool)
            .await?
            .map(CombinationJob::try_from)
            .transpose()
    }

    async fn heartbeat(&self, id: &str, now_ms: i64) -> Result<bool, RecordError> {
        let result = sqlx::query(&jobs::update_heartbeat_pg(id, now_ms))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_job(
        &self,
        id: &str,
        combined_file_path: &str,
        total_chunks: i64,
        container: ContainerKind,
        now_ms: i64,
    ) -> Result<bool, RecordError> {
        let sql = jobs::mark_completed_pg(id, combined_file_path, total_chunks, container, now_ms);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_job(
        &self,
        id: &str,
        error_message: &str,
        container: Option<ContainerKind>,
        now_ms: i64,
    ) -> Result<bool, RecordError> {
        let sql = jobs::mark_failed_pg(id, error_message, container, now_ms);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn stale_job_ids(&self, cutoff_ms: i64) -> Result<Vec<String>, RecordError> {
        let ids = sqlx::query_scalar::<_, String>(&jobs::select_stale_ids_pg(cutoff_ms))
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), RecordError> {
        sqlx::query(&chunks::upsert_pg(chunk)).execute(&self.pool).await?;
        Ok(())
    }

    async fn list_chunks(
        &self,
        conversation_id: &str,
        speaker: Speaker,
    ) -> Result<Vec<Chunk>, RecordError> {
        sqlx::query_as::<_, ChunkRow>(&chunks::select_for_key_pg(conversation_id, speaker))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Chunk::try_from)
            .collect()
    }

    async fn mark_chunks_combined(
        &self,
        conversation_id: &str,
        speaker: Speaker,
        max_index: i64,
    ) -> Result<u64, RecordError> {
        let sql = chunks::mark_combined_pg(conversation_id, speaker, max_index);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn get_silence_analysis(
        &self,
        file_path: &str,
    ) -> Result<Option<SilenceAnalysis>, RecordError> {
        sqlx::query_as::<_, SilenceRow>(&silence::select_by_path_pg(file_path))
            .fetch_optional(&self.pool)
            .await?
            .map(SilenceAnalysis::try_from)
            .transpose()
    }

    async fn upsert_silence_analysis(
        &self,
        analysis: &SilenceAnalysis,
    ) -> Result<(), RecordError> {
        let json = segments_json(analysis)?;
        let sql = silence::upsert_pg(&analysis_row(analysis, &json));
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }
}
