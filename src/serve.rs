use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use log::{error, info, warn};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::chunk_store::{ChunkStore, HttpChunkStore, LocalChunkStore};
use crate::combine::{CombinationService, CombineSettings};
use crate::config::{DatabaseBackend, ServiceConfig, StorageBackend};
use crate::context::RequestContext;
use crate::credentials::{get_password, load_credentials, CredentialType};
use crate::error::CombineError;
use crate::ffmpeg::FfmpegRunner;
use crate::models::Speaker;
use crate::records::{PgRecordStore, RecordStore, SqliteRecordStore};
use crate::reencode::ReEncoder;
use crate::silence::{SilenceAnalyzer, SilenceError};
use crate::transcription::{
    HttpTranscriptionTrigger, NoopTranscriptionTrigger, TranscriptionTrigger,
};

type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Largest accepted chunk upload
const MAX_CHUNK_BYTES: usize = 64 * 1024 * 1024;

// State shared by all API handlers
pub struct AppState {
    pub combine: CombinationService,
    pub silence: SilenceAnalyzer,
}

/// Open the record store configured in [database], creating the schema if needed
pub async fn open_record_store(config: &ServiceConfig) -> Result<Arc<dyn RecordStore>, DynError> {
    let db = &config.database;
    match db.backend {
        DatabaseBackend::Sqlite => {
            let path = db
                .sqlite_path
                .as_ref()
                .ok_or("[database] sqlite_path is required")?;
            let pool = crate::db::open_database_connection(path).await?;
            crate::db::init_database_schema(&pool).await?;
            Ok(Arc::new(SqliteRecordStore::new(pool)))
        }
        DatabaseBackend::Postgres => {
            let url = db
                .postgres_url
                .as_deref()
                .ok_or("[database] postgres_url is required")?;
            let database = db
                .postgres_database
                .as_deref()
                .ok_or("[database] postgres_database is required")?;
            let profile = db
                .credential_profile
                .as_deref()
                .ok_or("[database] credential_profile is required")?;
            let password = get_password(&load_credentials()?, CredentialType::Postgres, profile)?;

            let pool =
                crate::db_postgres::open_postgres_connection_create_if_needed(url, &password, database)
                    .await?;
            crate::db_postgres::init_database_schema_pg(&pool).await?;
            info!("PostgreSQL database: {}", database);
            Ok(Arc::new(PgRecordStore::new(pool)))
        }
    }
}

/// Build the object store configured in [storage]
pub fn open_chunk_store(config: &ServiceConfig) -> Result<Arc<dyn ChunkStore>, DynError> {
    let storage = &config.storage;
    match storage.backend {
        StorageBackend::Local => {
            let root = storage.root.as_ref().ok_or("[storage] root is required")?;
            std::fs::create_dir_all(root)?;
            info!("Local object storage: {}", root.display());
            Ok(Arc::new(LocalChunkStore::new(root.clone())))
        }
        StorageBackend::Http => {
            let url = storage.url.as_deref().ok_or("[storage] url is required")?;
            let bucket = storage.bucket.as_deref().ok_or("[storage] bucket is required")?;
            let profile = storage
                .credential_profile
                .as_deref()
                .ok_or("[storage] credential_profile is required")?;
            let key = get_password(&load_credentials()?, CredentialType::Storage, profile)?;
            info!("HTTP object storage: {} (bucket {})", url, bucket);
            Ok(Arc::new(HttpChunkStore::new(
                url,
                bucket,
                &key,
                config.storage_timeout(),
            )?))
        }
    }
}

fn transcription_trigger(config: &ServiceConfig) -> Result<Arc<dyn TranscriptionTrigger>, DynError> {
    let Some(t) = &config.transcription else {
        return Ok(Arc::new(NoopTranscriptionTrigger));
    };
    let Some(url) = t.url.as_deref() else {
        return Ok(Arc::new(NoopTranscriptionTrigger));
    };
    let api_key = match t.credential_profile.as_deref() {
        Some(profile) => Some(get_password(
            &load_credentials()?,
            CredentialType::Transcription,
            profile,
        )?),
        None => None,
    };
    let timeout = Duration::from_secs(t.request_timeout_secs.unwrap_or(30));
    info!("Transcription trigger: {}", url);
    Ok(Arc::new(HttpTranscriptionTrigger::new(url, api_key, timeout)?))
}

/// Wire every service from the configuration
pub async fn build_state(config: &ServiceConfig) -> Result<AppState, DynError> {
    let records = open_record_store(config).await?;
    let store = open_chunk_store(config)?;
    let runner = FfmpegRunner::new(config.ffmpeg_path(), config.external_timeout());
    let scratch_root = config.combine.temp_dir.clone();

    let reencoder = ReEncoder::new(
        runner.clone(),
        config.reencode_codec(),
        config.reencode_bitrate(),
        scratch_root.clone(),
    );
    let settings: CombineSettings = config.combine_settings();
    let combine = CombinationService::new(
        Arc::clone(&records),
        Arc::clone(&store),
        reencoder,
        transcription_trigger(config)?,
        settings,
    );
    let silence = SilenceAnalyzer::new(
        store,
        records,
        runner,
        config.silence_settings(),
        scratch_root,
    );

    Ok(AppState { combine, silence })
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/conversations/{conversation_id}/chunks/{chunk_index}",
            put(upload_chunk_handler),
        )
        .route(
            "/api/conversations/{conversation_id}/combine",
            post(combine_handler).get(combine_status_handler),
        )
        .route("/api/silence", post(silence_handler))
        .layer(DefaultBodyLimit::max(MAX_CHUNK_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Periodically fail processing jobs whose worker stopped heartbeating
pub fn spawn_reaper_task(state: Arc<AppState>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ctx = RequestContext::new("reaper");
            if let Err(e) = state.combine.reap_stale_jobs(&ctx).await {
                error!("{} reaper run failed: {}", ctx, e);
            }
        }
    })
}

/// Run the HTTP API until Ctrl-C
pub fn serve_api(config: ServiceConfig) -> Result<(), DynError> {
    let port = config.server.port;

    println!("Starting voice session API server");
    println!("Listening on: http://[::]:{} (IPv4 + IPv6)", port);
    println!("Endpoints:");
    println!("  GET  /health  - Health check");
    println!("  PUT  /api/conversations/:id/chunks/:index?speaker=&mime_type=  - Upload chunk");
    println!("  POST /api/conversations/:id/combine?speaker=  - Combine chunks");
    println!("  GET  /api/conversations/:id/combine?speaker=  - Latest combination job");
    println!("  POST /api/silence  - Silence analysis of a stored file");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let state = Arc::new(
            build_state(&config)
                .await
                .map_err(|e| format!("Failed to initialize services: {}", e))?,
        );
        let reaper = spawn_reaper_task(Arc::clone(&state), config.reaper_interval());

        let app = router(state);
        let listener = tokio::net::TcpListener::bind(format!("[::]:{}", port))
            .await
            .map_err(|e| format!("Failed to bind to port {}: {}", port, e))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for shutdown signal: {}", e);
                    std::future::pending::<()>().await;
                }
                info!("Shutdown signal received");
            })
            .await
            .map_err(|e| format!("Server error: {}", e))?;

        reaper.abort();
        Ok::<(), DynError>(())
    })
}

// Health check endpoint - returns 200 OK if server is running
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

fn combine_error_response(ctx: &RequestContext, err: CombineError) -> Response {
    match err {
        CombineError::InvalidInput(msg) => error_response(StatusCode::BAD_REQUEST, msg),
        other => {
            error!("{} {}", ctx, other);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SpeakerQuery {
    pub speaker: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkQuery {
    pub speaker: Option<String>,
    pub mime_type: Option<String>,
}

/// Absent speaker means the legacy single (patient) channel
fn parse_speaker(raw: Option<&str>) -> Result<Speaker, Response> {
    match raw {
        None | Some("") => Ok(Speaker::default()),
        Some(s) => s
            .parse()
            .map_err(|e: String| error_response(StatusCode::BAD_REQUEST, e)),
    }
}

async fn upload_chunk_handler(
    State(state): State<Arc<AppState>>,
    Path((conversation_id, chunk_index)): Path<(String, i64)>,
    Query(query): Query<ChunkQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let speaker = match parse_speaker(query.speaker.as_deref()) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let mime_type = query
        .mime_type
        .or_else(|| {
            headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_default();

    let ctx = RequestContext::new("upload");
    match state
        .combine
        .ingest_chunk(
            &ctx,
            &conversation_id,
            speaker,
            chunk_index,
            &mime_type,
            body.to_vec(),
        )
        .await
    {
        Ok(chunk) => (StatusCode::OK, Json(chunk)).into_response(),
        Err(e) => combine_error_response(&ctx, e),
    }
}

async fn combine_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Query(query): Query<SpeakerQuery>,
) -> Response {
    let speaker = match parse_speaker(query.speaker.as_deref()) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let ctx = RequestContext::new("combine");
    match state.combine.combine(&ctx, &conversation_id, speaker).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => combine_error_response(&ctx, e),
    }
}

async fn combine_status_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Query(query): Query<SpeakerQuery>,
) -> Response {
    let speaker = match parse_speaker(query.speaker.as_deref()) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let ctx = RequestContext::new("status");
    match state.combine.latest_job(&conversation_id, speaker).await {
        Ok(Some(job)) => (StatusCode::OK, Json(job)).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("no combination job for {}/{}", conversation_id, speaker),
        ),
        Err(e) => combine_error_response(&ctx, e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SilenceRequest {
    pub file_path: String,
}

async fn silence_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SilenceRequest>,
) -> Response {
    let ctx = RequestContext::new("silence");
    match state.silence.analyze(&ctx, &request.file_path).await {
        Ok(analysis) => (StatusCode::OK, Json(analysis)).into_response(),
        Err(SilenceError::InvalidInput(msg)) => error_response(StatusCode::BAD_REQUEST, msg),
        Err(e @ SilenceError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, e.to_string()),
        Err(e @ SilenceError::Tool(_)) => {
            error!("{} {}", ctx, e);
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
        Err(e) => {
            error!("{} {}", ctx, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
