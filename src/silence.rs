//! Silence detection over stored recordings, cached per file path.
//!
//! ffmpeg's `silencedetect` filter reports intervals on stderr:
//!
//! ```text
//! [silencedetect @ 0x5581] silence_start: 2.0
//! [silencedetect @ 0x5581] silence_end: 4.0 | silence_duration: 2.0
//! ```
//!
//! and the input section carries `Duration: 00:00:12.34` (or `N/A` for streams
//! without an index, in which case the last `time=` progress stamp is used).

use log::{info, warn};
use regex::Regex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use crate::chunk_store::{ChunkStore, StoreError};
use crate::context::RequestContext;
use crate::ffmpeg::{ExternalToolError, FfmpegRunner};
use crate::models::{now_ms, SilenceAnalysis, SilenceSegment};
use crate::records::{RecordError, RecordStore};

// ffmpeg prints timestamps near zero in exponent form, e.g. 6.25e-05
static SILENCE_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"silence_start:\s*(-?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?)").unwrap()
});
static SILENCE_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"silence_end:\s*(-?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?)").unwrap()
});
static DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap());
static PROGRESS_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum SilenceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("failed to fetch '{path}': {source}")]
    Fetch {
        path: String,
        #[source]
        source: StoreError,
    },
    #[error("silence detection failed: {0}")]
    Tool(#[from] ExternalToolError),
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Detection thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceSettings {
    pub noise_floor_db: f64,
    pub min_silence_secs: f64,
}

impl Default for SilenceSettings {
    fn default() -> Self {
        Self {
            noise_floor_db: crate::constants::DEFAULT_NOISE_FLOOR_DB,
            min_silence_secs: crate::constants::DEFAULT_MIN_SILENCE_SECS,
        }
    }
}

/// Segments and total duration recovered from ffmpeg's stderr
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorReport {
    pub segments: Vec<SilenceSegment>,
    pub duration_seconds: f64,
}

fn hms_to_seconds(caps: &regex::Captures<'_>) -> Option<f64> {
    let h: f64 = caps.get(1)?.as_str().parse().ok()?;
    let m: f64 = caps.get(2)?.as_str().parse().ok()?;
    let s: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + s)
}

enum Event {
    Start(f64),
    End(f64),
}

/// Parse `silencedetect` output.
///
/// Each start is paired with the next end greater than it. A trailing start with no
/// end is dropped. Negative starts clamp to zero. The result is sorted and
/// non-overlapping.
pub fn parse_detector_output(stderr: &str) -> DetectorReport {
    let mut events: Vec<(usize, Event)> = Vec::new();
    for caps in SILENCE_START.captures_iter(stderr) {
        if let (Some(m), Ok(v)) = (caps.get(0), caps[1].parse::<f64>()) {
            events.push((m.start(), Event::Start(v)));
        }
    }
    for caps in SILENCE_END.captures_iter(stderr) {
        if let (Some(m), Ok(v)) = (caps.get(0), caps[1].parse::<f64>()) {
            events.push((m.start(), Event::End(v)));
        }
    }
    events.sort_by_key(|(pos, _)| *pos);

    let mut segments: Vec<SilenceSegment> = Vec::new();
    let mut pending: Option<f64> = None;
    for (_, event) in events {
        match event {
            Event::Start(start) => {
                // A repeated start before any end continues the same interval
                if pending.is_none() {
                    pending = Some(start);
                }
            }
            Event::End(end) => {
                if let Some(start) = pending {
                    if end > start {
                        let start = start.max(0.0);
                        if end > start {
                            segments.push(SilenceSegment { start, end });
                        }
                        pending = None;
                    }
                }
            }
        }
    }

    segments.sort_by(|a, b| a.start.total_cmp(&b.start));
    let mut merged: Vec<SilenceSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        match merged.last_mut() {
            Some(last) if segment.start <= last.end => last.end = last.end.max(segment.end),
            _ => merged.push(segment),
        }
    }

    let duration_seconds = DURATION
        .captures(stderr)
        .and_then(|caps| hms_to_seconds(&caps))
        .or_else(|| {
            PROGRESS_TIME
                .captures_iter(stderr)
                .last()
                .and_then(|caps| hms_to_seconds(&caps))
        })
        .unwrap_or_else(|| merged.last().map(|s| s.end).unwrap_or(0.0));

    DetectorReport {
        segments: merged,
        duration_seconds,
    }
}

pub struct SilenceAnalyzer {
    store: Arc<dyn ChunkStore>,
    records: Arc<dyn RecordStore>,
    runner: FfmpegRunner,
    settings: SilenceSettings,
    scratch_root: Option<PathBuf>,
}

impl SilenceAnalyzer {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        records: Arc<dyn RecordStore>,
        runner: FfmpegRunner,
        settings: SilenceSettings,
        scratch_root: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            records,
            runner,
            settings,
            scratch_root,
        }
    }

    /// Return the cached analysis for `file_path`, scanning the file on a miss.
    ///
    /// Nothing is written when the scan fails.
    pub async fn analyze(
        &self,
        ctx: &RequestContext,
        file_path: &str,
    ) -> Result<SilenceAnalysis, SilenceError> {
        let file_path = file_path.trim();
        if file_path.is_empty() {
            return Err(SilenceError::InvalidInput("file_path is required".to_string()));
        }

        if let Some(cached) = self.records.get_silence_analysis(file_path).await? {
            info!("{} cache hit for {}", ctx, file_path);
            return Ok(cached);
        }

        let bytes = self.store.get(file_path).await.map_err(|source| {
            if source.is_not_found() {
                SilenceError::NotFound(file_path.to_string())
            } else {
                SilenceError::Fetch {
                    path: file_path.to_string(),
                    source,
                }
            }
        })?;

        let stderr = self.run_detector(ctx, file_path, &bytes).await?;
        let report = parse_detector_output(&stderr);
        if report.duration_seconds <= 0.0 {
            warn!("{} no duration reported for {}", ctx, file_path);
        }

        let analysis = SilenceAnalysis {
            file_path: file_path.to_string(),
            segments: report.segments,
            duration_seconds: report.duration_seconds,
            threshold_db: self.settings.noise_floor_db,
            min_silence_duration_seconds: self.settings.min_silence_secs,
            analyzed_at_ms: now_ms(),
        };
        self.records.upsert_silence_analysis(&analysis).await?;

        info!(
            "{} {}: {} silent segments over {:.2}s",
            ctx,
            file_path,
            analysis.segments.len(),
            analysis.duration_seconds
        );
        Ok(analysis)
    }

    async fn run_detector(
        &self,
        ctx: &RequestContext,
        file_path: &str,
        bytes: &[u8],
    ) -> Result<String, SilenceError> {
        let scratch = match &self.scratch_root {
            Some(root) => {
                tokio::fs::create_dir_all(root)
                    .await
                    .map_err(ExternalToolError::from)?;
                tempfile::Builder::new()
                    .prefix("silence-")
                    .tempdir_in(root)
                    .map_err(ExternalToolError::from)?
            }
            None => tempfile::Builder::new()
                .prefix("silence-")
                .tempdir()
                .map_err(ExternalToolError::from)?,
        };

        let extension = Path::new(file_path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let input = scratch.path().join(format!("input.{}", extension));
        tokio::fs::write(&input, bytes)
            .await
            .map_err(ExternalToolError::from)?;

        let filter = format!(
            "silencedetect=noise={}dB:d={}",
            self.settings.noise_floor_db, self.settings.min_silence_secs
        );
        let args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-i".into(),
            input.into_os_string(),
            "-af".into(),
            filter.into(),
            "-f".into(),
            "null".into(),
            "-".into(),
        ];
        Ok(self.runner.run(ctx, &args).await?)
    }
}
