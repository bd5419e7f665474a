//! Combination job lifecycle: create or join, reconstruct, finish exactly once.
//!
//! Coordination happens only through the record store. The partial unique index on
//! `(conversation_id, speaker) WHERE status <> 'failed'` decides which caller creates
//! the job; every other caller joins it and reports its state. Only the creator moves
//! the job out of `processing`, and only while the row is still `processing`.

use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::chunk_store::ChunkStore;
use crate::constants::{CREATE_JOB_ATTEMPTS, STALE_JOB_MESSAGE};
use crate::context::RequestContext;
use crate::download::ChunkDownloader;
use crate::error::CombineError;
use crate::models::{now_ms, Chunk, ChunkStatus, CombinationJob, ContainerKind, JobStatus, Speaker};
use crate::reassemble::reassemble;
use crate::records::{RecordError, RecordStore};
use crate::reencode::{ReEncoder, ReencodePolicy};
use crate::transcription::TranscriptionTrigger;
use crate::wav::PcmFormat;
use crate::webm;

#[derive(Debug, Clone)]
pub struct CombineSettings {
    pub format: PcmFormat,
    pub download_batch_size: usize,
    pub reencode: ReencodePolicy,
    pub heartbeat_interval: Duration,
    pub stale_after: Duration,
}

impl Default for CombineSettings {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            format: PcmFormat::default(),
            download_batch_size: DEFAULT_DOWNLOAD_BATCH_SIZE,
            reencode: ReencodePolicy::default(),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            stale_after: Duration::from_secs(DEFAULT_STALE_AFTER_SECS),
        }
    }
}

/// What a caller learns about the job for its key
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CombinationOutcome {
    Processing {
        job_id: String,
    },
    Completed {
        job_id: String,
        combined_file_path: String,
        total_chunks: i64,
    },
    Failed {
        job_id: String,
        reason: String,
    },
}

impl CombinationOutcome {
    pub fn from_job(job: &CombinationJob) -> Self {
        let job_id = job.id.clone();
        match job.status {
            JobStatus::Processing => CombinationOutcome::Processing { job_id },
            JobStatus::Completed => CombinationOutcome::Completed {
                job_id,
                combined_file_path: job.combined_file_path.clone().unwrap_or_default(),
                total_chunks: job.total_chunks.unwrap_or_default(),
            },
            JobStatus::Failed => CombinationOutcome::Failed {
                job_id,
                reason: job.error_message.clone().unwrap_or_default(),
            },
        }
    }
}

/// Storage path of a combined recording.
///
/// The patient channel keeps the legacy layout directly under the conversation; the ai
/// channel lives in an `ai/` subfolder.
pub fn combined_path(
    conversation_id: &str,
    speaker: Speaker,
    timestamp_ms: i64,
    extension: &str,
) -> String {
    match speaker {
        Speaker::Patient => format!(
            "{}/combined-{}.{}",
            conversation_id, timestamp_ms, extension
        ),
        Speaker::Ai => format!(
            "{}/ai/combined-{}.{}",
            conversation_id, timestamp_ms, extension
        ),
    }
}

/// Storage path of one uploaded chunk
pub fn chunk_path(
    conversation_id: &str,
    speaker: Speaker,
    chunk_index: i64,
    container: ContainerKind,
) -> String {
    format!(
        "{}/chunks/{}/{:06}.{}",
        conversation_id,
        speaker,
        chunk_index,
        container.extension()
    )
}

/// Conversation ids end up in storage paths, so they must be a single plain segment
pub fn validate_conversation_id(conversation_id: &str) -> Result<(), CombineError> {
    let invalid = conversation_id.trim().is_empty()
        || conversation_id != conversation_id.trim()
        || conversation_id == "."
        || conversation_id == ".."
        || conversation_id.contains(['/', '\\']);
    if invalid {
        return Err(CombineError::InvalidInput(format!(
            "invalid conversation id '{}'",
            conversation_id
        )));
    }
    Ok(())
}

/// Aborts the heartbeat task when the job run ends, however it ends
struct HeartbeatGuard(JoinHandle<()>);

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Clone)]
pub struct CombinationService {
    records: Arc<dyn RecordStore>,
    store: Arc<dyn ChunkStore>,
    downloader: ChunkDownloader,
    reencoder: ReEncoder,
    transcription: Arc<dyn TranscriptionTrigger>,
    settings: CombineSettings,
}

impl CombinationService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        store: Arc<dyn ChunkStore>,
        reencoder: ReEncoder,
        transcription: Arc<dyn TranscriptionTrigger>,
        settings: CombineSettings,
    ) -> Self {
        let downloader = ChunkDownloader::new(Arc::clone(&store), settings.download_batch_size);
        Self {
            records,
            store,
            downloader,
            reencoder,
            transcription,
            settings,
        }
    }

    pub fn settings(&self) -> &CombineSettings {
        &self.settings
    }

    /// Store one uploaded chunk and record it.
    ///
    /// Re-uploading an index replaces the previous payload. A failed store write is
    /// recorded as a `failed` chunk and returned as an error.
    pub async fn ingest_chunk(
        &self,
        ctx: &RequestContext,
        conversation_id: &str,
        speaker: Speaker,
        chunk_index: i64,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<Chunk, CombineError> {
        validate_conversation_id(conversation_id)?;
        if chunk_index < 0 {
            return Err(CombineError::InvalidInput(format!(
                "chunk index must be non-negative, got {}",
                chunk_index
            )));
        }
        if bytes.is_empty() {
            return Err(CombineError::InvalidInput("chunk payload is empty".to_string()));
        }

        let container = ContainerKind::detect(mime_type, &bytes);
        let mut chunk = Chunk {
            conversation_id: conversation_id.to_string(),
            chunk_index,
            speaker,
            storage_path: chunk_path(conversation_id, speaker, chunk_index, container),
            byte_size: bytes.len() as i64,
            mime_type: mime_type.to_string(),
            container,
            status: ChunkStatus::Uploaded,
            uploaded_at_ms: now_ms(),
        };

        let stored = self
            .store
            .put(&chunk.storage_path, bytes, container.content_type(), true)
            .await;
        if let Err(e) = stored {
            error!("{} failed to store chunk {}: {}", ctx, chunk.storage_path, e);
            chunk.status = ChunkStatus::Failed;
            self.records.upsert_chunk(&chunk).await?;
            return Err(CombineError::Upload(e));
        }

        self.records.upsert_chunk(&chunk).await?;
        debug!(
            "{} stored chunk {} ({} bytes, {})",
            ctx,
            chunk.storage_path,
            chunk.byte_size,
            container.as_str()
        );
        Ok(chunk)
    }

    /// Insert a `processing` job for the key, or return the job that already holds it.
    ///
    /// Returns `(job, true)` for the caller that created the job. A conflicting job can
    /// vanish between the insert and the re-read (it failed or was reaped); the insert
    /// is then retried a bounded number of times.
    pub async fn create_or_join(
        &self,
        ctx: &RequestContext,
        conversation_id: &str,
        speaker: Speaker,
    ) -> Result<(CombinationJob, bool), CombineError> {
        validate_conversation_id(conversation_id)?;

        for attempt in 1..=CREATE_JOB_ATTEMPTS {
            let job = CombinationJob::new_processing(conversation_id, speaker, now_ms());
            match self.records.insert_job(&job).await {
                Ok(()) => {
                    info!("{} created job {} for {}/{}", ctx, job.id, conversation_id, speaker);
                    return Ok((job, true));
                }
                Err(RecordError::Conflict) => {
                    if let Some(existing) =
                        self.records.find_active_job(conversation_id, speaker).await?
                    {
                        info!(
                            "{} joined {} job {} for {}/{}",
                            ctx, existing.status, existing.id, conversation_id, speaker
                        );
                        return Ok((existing, false));
                    }
                    debug!(
                        "{} conflicting job vanished, retrying insert (attempt {}/{})",
                        ctx, attempt, CREATE_JOB_ATTEMPTS
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CombineError::Record(RecordError::Conflict))
    }

    /// Create-or-join and, as creator, run the job to its terminal state on a spawned task.
    pub async fn combine(
        &self,
        ctx: &RequestContext,
        conversation_id: &str,
        speaker: Speaker,
    ) -> Result<CombinationOutcome, CombineError> {
        let (job, is_new) = self.create_or_join(ctx, conversation_id, speaker).await?;
        if !is_new {
            return Ok(CombinationOutcome::from_job(&job));
        }

        // The job owns its task: dropping the caller's future only detaches it
        let service = self.clone();
        let task_ctx = ctx.clone();
        tokio::spawn(async move { service.run(&task_ctx, job).await })
            .await
            .map_err(|e| CombineError::Worker(e.to_string()))?
    }

    /// Latest job for the key, whatever its status
    pub async fn latest_job(
        &self,
        conversation_id: &str,
        speaker: Speaker,
    ) -> Result<Option<CombinationJob>, CombineError> {
        validate_conversation_id(conversation_id)?;
        Ok(self.records.find_latest_job(conversation_id, speaker).await?)
    }

    /// Run a job this caller created. Every failure ends in the `failed` state with the
    /// error recorded; only a failure to record that state is returned as `Err`.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        job: CombinationJob,
    ) -> Result<CombinationOutcome, CombineError> {
        if job.status.is_terminal() {
            return Ok(CombinationOutcome::from_job(&job));
        }
        let _heartbeat = self.spawn_heartbeat(ctx, &job.id);

        let mut container = None;
        let result = self.reconstruct(ctx, &job, &mut container).await;

        let finished = match result {
            Ok((path, total_chunks, kind)) => {
                let completed = self
                    .records
                    .complete_job(&job.id, &path, total_chunks, kind, now_ms())
                    .await?;
                if completed {
                    let absorbed = self
                        .records
                        .mark_chunks_combined(&job.conversation_id, job.speaker, total_chunks - 1)
                        .await?;
                    info!(
                        "{} job {} completed: {} ({} chunks, {} marked combined)",
                        ctx, job.id, path, total_chunks, absorbed
                    );
                    self.transcription.trigger(ctx, &job.conversation_id, &path);
                    return Ok(CombinationOutcome::Completed {
                        job_id: job.id,
                        combined_file_path: path,
                        total_chunks,
                    });
                }
                warn!(
                    "{} job {} left processing before completion; {} is orphaned",
                    ctx, job.id, path
                );
                false
            }
            Err(e) => {
                error!("{} job {} failed: {}", ctx, job.id, e);
                self.records
                    .fail_job(&job.id, &e.to_string(), container, now_ms())
                    .await?
            }
        };

        if !finished {
            debug!("{} job {} was already terminal", ctx, job.id);
        }
        match self.records.get_job(&job.id).await? {
            Some(current) => Ok(CombinationOutcome::from_job(&current)),
            None => Err(CombineError::Record(RecordError::Corrupt(format!(
                "job {} disappeared",
                job.id
            )))),
        }
    }

    /// Download, merge, optionally re-encode and upload. Returns the stored path, the
    /// number of chunks and the container kind.
    async fn reconstruct(
        &self,
        ctx: &RequestContext,
        job: &CombinationJob,
        container: &mut Option<ContainerKind>,
    ) -> Result<(String, i64, ContainerKind), CombineError> {
        let chunks = self
            .records
            .list_chunks(&job.conversation_id, job.speaker)
            .await?;
        let first = chunks.first().ok_or(CombineError::NoChunks)?;

        let kind = first.container;
        *container = Some(kind);
        if let Some(other) = chunks.iter().find(|c| c.container != kind) {
            return Err(CombineError::MixedContainers {
                chunk_index: other.chunk_index,
                expected: kind,
                found: other.container,
            });
        }

        let payloads = self.downloader.download_all(ctx, &chunks).await?;

        if kind == ContainerKind::SelfFraming {
            if let Some(doc_type) = webm::read_doc_type(&payloads[0]) {
                debug!("{} first chunk doc type: {}", ctx, doc_type);
            }
        }
        let needs_reencode = self.settings.reencode.applies(kind, &payloads);
        let merged = reassemble(ctx, &payloads, kind, self.settings.format)?;
        drop(payloads);

        let merged = if needs_reencode {
            let input = kind.media_type(&merged);
            self.reencoder
                .normalize(ctx, &merged, input.extension)
                .await?
        } else {
            merged
        };

        let media = kind.media_type(&merged);
        let path = combined_path(&job.conversation_id, job.speaker, now_ms(), media.extension);
        self.store
            .put(&path, merged, media.content_type, false)
            .await
            .map_err(CombineError::Upload)?;

        Ok((path, chunks.len() as i64, kind))
    }

    fn spawn_heartbeat(&self, ctx: &RequestContext, job_id: &str) -> HeartbeatGuard {
        let records = Arc::clone(&self.records);
        let interval = self.settings.heartbeat_interval;
        let job_id = job_id.to_string();
        let ctx = ctx.child("heartbeat");

        HeartbeatGuard(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match records.heartbeat(&job_id, now_ms()).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!("{} job {} no longer processing", ctx, job_id);
                        break;
                    }
                    Err(e) => warn!("{} heartbeat for {} failed: {}", ctx, job_id, e),
                }
            }
        }))
    }

    /// Fail every `processing` job whose heartbeat is older than `stale_after`,
    /// freeing its key. Returns the number of jobs reclaimed.
    pub async fn reap_stale_jobs(&self, ctx: &RequestContext) -> Result<usize, CombineError> {
        let now = now_ms();
        let cutoff = now - self.settings.stale_after.as_millis() as i64;
        let mut reclaimed = 0;
        for id in self.records.stale_job_ids(cutoff).await? {
            if self
                .records
                .fail_job(&id, STALE_JOB_MESSAGE, None, now)
                .await?
            {
                warn!("{} reclaimed stale job {}", ctx, id);
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            info!("{} reclaimed {} stale jobs", ctx, reclaimed);
        }
        Ok(reclaimed)
    }
}
