use sqlx::sqlite::SqlitePool;
use tokio::runtime::Runtime;

use voice_session_recorder::models::{
    Chunk, ChunkStatus, CombinationJob, ContainerKind, JobStatus, SilenceAnalysis,
    SilenceSegment, Speaker,
};
use voice_session_recorder::queries::metadata;
use voice_session_recorder::records::{RecordError, RecordStore, SqliteRecordStore};
use voice_session_recorder::EXPECTED_DB_VERSION;

/// Returns (store, _guard) - keep _guard alive to prevent temp file deletion
async fn create_test_store() -> (SqliteRecordStore, SqlitePool, tempfile::TempDir) {
    let (pool, guard) = voice_session_recorder::db::create_test_connection_in_temporary_file()
        .await
        .unwrap();
    voice_session_recorder::db::init_database_schema(&pool)
        .await
        .unwrap();
    (SqliteRecordStore::new(pool.clone()), pool, guard)
}

fn chunk(conversation_id: &str, index: i64, speaker: Speaker, status: ChunkStatus) -> Chunk {
    Chunk {
        conversation_id: conversation_id.to_string(),
        chunk_index: index,
        speaker,
        storage_path: format!("{}/chunks/{}/{:06}.webm", conversation_id, speaker, index),
        byte_size: 100,
        mime_type: "audio/webm".to_string(),
        container: ContainerKind::SelfFraming,
        status,
        uploaded_at_ms: 1_000 + index,
    }
}

#[test]
fn test_schema_init_is_idempotent_and_stamps_version() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (_store, pool, _guard) = create_test_store().await;
        voice_session_recorder::db::init_database_schema(&pool)
            .await
            .unwrap();

        let version: String = sqlx::query_scalar(&metadata::select_by_key("version"))
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, EXPECTED_DB_VERSION);
    });
}

#[test]
fn test_schema_init_rejects_other_versions() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (_store, pool, _guard) = create_test_store().await;
        sqlx::query(&metadata::upsert("version", "0"))
            .execute(&pool)
            .await
            .unwrap();

        let err = voice_session_recorder::db::init_database_schema(&pool)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported database version"), "{}", err);
    });
}

#[test]
fn test_second_active_job_for_key_conflicts() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (store, _pool, _guard) = create_test_store().await;

        let first = CombinationJob::new_processing("conv-1", Speaker::Patient, 10);
        store.insert_job(&first).await.unwrap();

        let second = CombinationJob::new_processing("conv-1", Speaker::Patient, 11);
        assert!(matches!(
            store.insert_job(&second).await,
            Err(RecordError::Conflict)
        ));

        // A different channel of the same conversation is its own key
        let ai = CombinationJob::new_processing("conv-1", Speaker::Ai, 12);
        store.insert_job(&ai).await.unwrap();

        let active = store
            .find_active_job("conv-1", Speaker::Patient)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, first.id);
        assert_eq!(active.status, JobStatus::Processing);
    });
}

#[test]
fn test_failed_job_no_longer_blocks_its_key() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (store, _pool, _guard) = create_test_store().await;

        let first = CombinationJob::new_processing("conv-2", Speaker::Ai, 10);
        store.insert_job(&first).await.unwrap();
        assert!(store
            .fail_job(&first.id, "boom", Some(ContainerKind::RawPcmWav), 20)
            .await
            .unwrap());
        assert!(store.find_active_job("conv-2", Speaker::Ai).await.unwrap().is_none());

        let second = CombinationJob::new_processing("conv-2", Speaker::Ai, 30);
        store.insert_job(&second).await.unwrap();

        let latest = store
            .find_latest_job("conv-2", Speaker::Ai)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, second.id);

        let failed = store.get_job(&first.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
        assert_eq!(failed.container, Some(ContainerKind::RawPcmWav));
        assert_eq!(failed.completed_at_ms, Some(20));
    });
}

#[test]
fn test_terminal_transition_happens_once() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (store, _pool, _guard) = create_test_store().await;

        let job = CombinationJob::new_processing("conv-3", Speaker::Patient, 10);
        store.insert_job(&job).await.unwrap();

        assert!(store
            .complete_job(&job.id, "conv-3/combined-20.webm", 4, ContainerKind::SelfFraming, 20)
            .await
            .unwrap());
        assert!(!store.fail_job(&job.id, "late failure", None, 30).await.unwrap());
        assert!(!store
            .complete_job(&job.id, "conv-3/combined-40.webm", 5, ContainerKind::SelfFraming, 40)
            .await
            .unwrap());
        assert!(!store.heartbeat(&job.id, 50).await.unwrap());

        let done = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.combined_file_path.as_deref(), Some("conv-3/combined-20.webm"));
        assert_eq!(done.total_chunks, Some(4));
        assert!(done.error_message.is_none());
    });
}

#[test]
fn test_stale_job_ids_only_lists_old_processing_jobs() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (store, _pool, _guard) = create_test_store().await;

        let old = CombinationJob::new_processing("conv-a", Speaker::Patient, 100);
        let recent = CombinationJob::new_processing("conv-b", Speaker::Patient, 5_000);
        let old_done = CombinationJob::new_processing("conv-c", Speaker::Patient, 100);
        for job in [&old, &recent, &old_done] {
            store.insert_job(job).await.unwrap();
        }
        store
            .complete_job(&old_done.id, "conv-c/combined-1.webm", 1, ContainerKind::SelfFraming, 200)
            .await
            .unwrap();

        assert_eq!(store.stale_job_ids(1_000).await.unwrap(), vec![old.id.clone()]);

        assert!(store.heartbeat(&old.id, 2_000).await.unwrap());
        assert!(store.stale_job_ids(1_000).await.unwrap().is_empty());
    });
}

#[test]
fn test_chunks_listed_in_index_order_without_failed() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (store, _pool, _guard) = create_test_store().await;

        for index in [2, 0, 3, 1] {
            store
                .upsert_chunk(&chunk("conv-4", index, Speaker::Patient, ChunkStatus::Uploaded))
                .await
                .unwrap();
        }
        store
            .upsert_chunk(&chunk("conv-4", 3, Speaker::Patient, ChunkStatus::Failed))
            .await
            .unwrap();
        store
            .upsert_chunk(&chunk("conv-4", 0, Speaker::Ai, ChunkStatus::Uploaded))
            .await
            .unwrap();

        let chunks = store.list_chunks("conv-4", Speaker::Patient).await.unwrap();
        let indexes: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);

        let marked = store
            .mark_chunks_combined("conv-4", Speaker::Patient, 1)
            .await
            .unwrap();
        assert_eq!(marked, 2);
        let chunks = store.list_chunks("conv-4", Speaker::Patient).await.unwrap();
        let statuses: Vec<ChunkStatus> = chunks.iter().map(|c| c.status).collect();
        assert_eq!(
            statuses,
            vec![ChunkStatus::Combined, ChunkStatus::Combined, ChunkStatus::Uploaded]
        );
    });
}

#[test]
fn test_silence_analysis_upsert_replaces_by_path() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (store, _pool, _guard) = create_test_store().await;
        assert!(store.get_silence_analysis("conv-5/combined-1.webm").await.unwrap().is_none());

        let mut analysis = SilenceAnalysis {
            file_path: "conv-5/combined-1.webm".to_string(),
            segments: vec![
                SilenceSegment { start: 2.0, end: 4.0 },
                SilenceSegment { start: 10.0, end: 10.6 },
            ],
            duration_seconds: 12.0,
            threshold_db: -50.0,
            min_silence_duration_seconds: 0.5,
            analyzed_at_ms: 1,
        };
        store.upsert_silence_analysis(&analysis).await.unwrap();
        assert_eq!(
            store.get_silence_analysis(&analysis.file_path).await.unwrap(),
            Some(analysis.clone())
        );

        analysis.segments.truncate(1);
        analysis.analyzed_at_ms = 2;
        store.upsert_silence_analysis(&analysis).await.unwrap();
        assert_eq!(
            store.get_silence_analysis(&analysis.file_path).await.unwrap(),
            Some(analysis)
        );
    });
}
