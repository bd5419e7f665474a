//! Domain records shared by the record store, the combination pipeline and the HTTP layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Audio channel a chunk belongs to. Both channels share index numbering.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    #[default]
    Patient,
    Ai,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Patient => "patient",
            Speaker::Ai => "ai",
        }
    }
}

impl FromStr for Speaker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient" => Ok(Speaker::Patient),
            "ai" => Ok(Speaker::Ai),
            _ => Err(format!("Invalid speaker: '{}'", s)),
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Uploaded,
    Failed,
    Combined,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Uploaded => "uploaded",
            ChunkStatus::Failed => "failed",
            ChunkStatus::Combined => "combined",
        }
    }
}

impl FromStr for ChunkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(ChunkStatus::Uploaded),
            "failed" => Ok(ChunkStatus::Failed),
            "combined" => Ok(ChunkStatus::Combined),
            _ => Err(format!("Invalid chunk status: '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Invalid job status: '{}'", s)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a sequence of chunks has to be merged.
///
/// Resolved once when a chunk is ingested and stored alongside it, so reconstruction
/// never re-sniffs MIME strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    /// Independently decodable segments of one stream (WebM/Ogg from MediaRecorder).
    SelfFraming,
    /// Every chunk is a complete WAV file wrapping 16-bit PCM.
    RawPcmWav,
}

impl ContainerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::SelfFraming => "self_framing",
            ContainerKind::RawPcmWav => "raw_pcm_wav",
        }
    }

    /// Resolve from the declared MIME type, falling back to the payload's magic bytes.
    pub fn detect(mime_type: &str, payload: &[u8]) -> Self {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "audio/wav" | "audio/wave" | "audio/x-wav" | "audio/vnd.wave" | "audio/pcm"
            | "audio/l16" => ContainerKind::RawPcmWav,
            "audio/webm" | "video/webm" | "audio/ogg" | "audio/opus" => {
                ContainerKind::SelfFraming
            }
            _ if crate::wav::has_riff_wave_preamble(payload) => ContainerKind::RawPcmWav,
            _ => ContainerKind::SelfFraming,
        }
    }

    /// File extension of a combined recording of this kind.
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerKind::SelfFraming => "webm",
            ContainerKind::RawPcmWav => "wav",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ContainerKind::SelfFraming => "audio/webm",
            ContainerKind::RawPcmWav => "audio/wav",
        }
    }

    /// Extension and MIME type to store `bytes` of this kind under.
    ///
    /// Self-framing streams are WebM unless they open with an Ogg page.
    pub fn media_type(&self, bytes: &[u8]) -> MediaType {
        match self {
            ContainerKind::SelfFraming if bytes.starts_with(OGG_CAPTURE_PATTERN) => MediaType {
                extension: "ogg",
                content_type: "audio/ogg",
            },
            _ => MediaType {
                extension: self.extension(),
                content_type: self.content_type(),
            },
        }
    }
}

/// First four bytes of every Ogg page
const OGG_CAPTURE_PATTERN: &[u8] = b"OggS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaType {
    pub extension: &'static str,
    pub content_type: &'static str,
}

impl FromStr for ContainerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "self_framing" => Ok(ContainerKind::SelfFraming),
            "raw_pcm_wav" => Ok(ContainerKind::RawPcmWav),
            _ => Err(format!("Invalid container kind: '{}'", s)),
        }
    }
}

/// One uploaded audio fragment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub conversation_id: String,
    pub chunk_index: i64,
    pub speaker: Speaker,
    pub storage_path: String,
    pub byte_size: i64,
    pub mime_type: String,
    pub container: ContainerKind,
    pub status: ChunkStatus,
    pub uploaded_at_ms: i64,
}

/// One reconstruction attempt for a (conversation, speaker) key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinationJob {
    pub id: String,
    pub conversation_id: String,
    pub speaker: Speaker,
    pub status: JobStatus,
    pub container: Option<ContainerKind>,
    pub combined_file_path: Option<String>,
    pub total_chunks: Option<i64>,
    pub error_message: Option<String>,
    pub started_at_ms: i64,
    pub completed_at_ms: Option<i64>,
    pub heartbeat_at_ms: i64,
}

impl CombinationJob {
    /// A fresh job in `processing` state, owned by the caller that inserts it.
    pub fn new_processing(conversation_id: &str, speaker: Speaker, now_ms: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            speaker,
            status: JobStatus::Processing,
            container: None,
            combined_file_path: None,
            total_chunks: None,
            error_message: None,
            started_at_ms: now_ms,
            completed_at_ms: None,
            heartbeat_at_ms: now_ms,
        }
    }
}

/// A `[start, end]` interval, in seconds, where the signal stayed under the noise floor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SilenceSegment {
    pub start: f64,
    pub end: f64,
}

/// Cached result of a silence scan over one stored file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilenceAnalysis {
    pub file_path: String,
    pub segments: Vec<SilenceSegment>,
    pub duration_seconds: f64,
    pub threshold_db: f64,
    pub min_silence_duration_seconds: f64,
    pub analyzed_at_ms: i64,
}

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_prefers_declared_mime() {
        assert_eq!(
            ContainerKind::detect("audio/webm;codecs=opus", b"RIFF\0\0\0\0WAVE"),
            ContainerKind::SelfFraming
        );
        assert_eq!(
            ContainerKind::detect("audio/wav", &[0x1A, 0x45, 0xDF, 0xA3]),
            ContainerKind::RawPcmWav
        );
    }

    #[test]
    fn test_detect_falls_back_to_magic_bytes() {
        assert_eq!(
            ContainerKind::detect("application/octet-stream", b"RIFF\x24\0\0\0WAVEfmt "),
            ContainerKind::RawPcmWav
        );
        assert_eq!(
            ContainerKind::detect("", &[0x1A, 0x45, 0xDF, 0xA3]),
            ContainerKind::SelfFraming
        );
    }

    #[test]
    fn test_media_type_follows_stream_magic() {
        let ogg = ContainerKind::SelfFraming.media_type(b"OggS\0\x02rest");
        assert_eq!(ogg.extension, "ogg");
        assert_eq!(ogg.content_type, "audio/ogg");

        let webm = ContainerKind::SelfFraming.media_type(&[0x1A, 0x45, 0xDF, 0xA3, 0x9F]);
        assert_eq!(webm.extension, "webm");
        assert_eq!(webm.content_type, "audio/webm");

        let wav = ContainerKind::RawPcmWav.media_type(b"OggS");
        assert_eq!(wav.extension, "wav");
        assert_eq!(wav.content_type, "audio/wav");
    }

    #[test]
    fn test_status_strings_round_trip() {
        for status in [JobStatus::Processing, JobStatus::Completed, JobStatus::Failed] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("done".parse::<JobStatus>().is_err());
        assert_eq!("ai".parse::<Speaker>().unwrap(), Speaker::Ai);
        assert!("doctor".parse::<Speaker>().is_err());
        assert_eq!(Speaker::default(), Speaker::Patient);
    }
}
