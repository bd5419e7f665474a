/// Expected database schema version
/// All record stores must use this version for compatibility
pub const EXPECTED_DB_VERSION: &str = "1";

/// Recording parameters of the PCM pipeline (16-bit mono at 48kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_CHANNELS: u16 = 1;
pub const DEFAULT_BITS_PER_SAMPLE: u16 = 16;
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Chunks fetched concurrently per download batch
pub const DEFAULT_DOWNLOAD_BATCH_SIZE: usize = 50;

/// Wall-clock ceiling for one external ffmpeg invocation
pub const DEFAULT_EXTERNAL_TIMEOUT_SECS: u64 = 5 * 60;

/// Heartbeat interval of a running combination job
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// A processing job whose heartbeat is older than this is reclaimed by the reaper
pub const DEFAULT_STALE_AFTER_SECS: u64 = 10 * 60;

/// How often the server runs the reaper
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 60;

/// Silence detection defaults
pub const DEFAULT_NOISE_FLOOR_DB: f64 = -50.0;
pub const DEFAULT_MIN_SILENCE_SECS: f64 = 0.5;

/// Re-encode defaults for self-framing recordings
pub const DEFAULT_REENCODE_CODEC: &str = "libopus";
pub const DEFAULT_REENCODE_BITRATE: &str = "64k";

/// Attempts at inserting a job when the conflicting row disappears between insert and read
pub const CREATE_JOB_ATTEMPTS: usize = 3;

/// Message recorded on jobs reclaimed by the reaper
pub const STALE_JOB_MESSAGE: &str = "worker heartbeat expired";
