use crate::chunk_store::StoreError;
use crate::ffmpeg::ExternalToolError;
use crate::models::ContainerKind;
use crate::records::RecordError;
use crate::wav::WavError;

/// Failures of one combination run.
///
/// Everything except `InvalidInput` and `Record` is recorded as the job's
/// `error_message`.
#[derive(Debug, thiserror::Error)]
pub enum CombineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no chunks uploaded")]
    NoChunks,
    #[error("chunk {0} is missing from the sequence")]
    MissingChunk(i64),
    #[error("chunk {chunk_index} is {found:?} but the recording is {expected:?}")]
    MixedContainers {
        chunk_index: i64,
        expected: ContainerKind,
        found: ContainerKind,
    },
    #[error("failed to download chunk {chunk_index} ({path}): {source}")]
    Download {
        chunk_index: i64,
        path: String,
        #[source]
        source: StoreError,
    },
    #[error("chunk {chunk_index} is malformed: {source}")]
    MalformedChunk {
        chunk_index: i64,
        #[source]
        source: WavError,
    },
    #[error("merged PCM is {0} bytes, too large for a WAV header")]
    PayloadTooLarge(usize),
    #[error("failed to write merged WAV: {0}")]
    WavWrite(#[from] hound::Error),
    #[error("re-encode failed: {0}")]
    ReEncode(#[from] ExternalToolError),
    #[error("failed to upload combined recording: {0}")]
    Upload(#[source] StoreError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("worker task failed: {0}")]
    Worker(String),
}
