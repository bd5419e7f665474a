//! Normalization of concatenated self-framing recordings through ffmpeg.

use log::info;
use serde::Deserialize;
use std::ffi::OsString;

use crate::context::RequestContext;
use crate::ffmpeg::{ExternalToolError, FfmpegRunner};
use crate::models::ContainerKind;
use crate::webm;

/// When a concatenated WebM/Ogg recording is passed through ffmpeg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReencodePolicy {
    /// Store the raw concatenation
    Never,
    /// Re-encode when more than one chunk carries its own container header
    #[default]
    WhenNeeded,
    Always,
}

impl ReencodePolicy {
    /// Decide from the individual chunk payloads, before they are concatenated.
    /// WAV recordings are never re-encoded; their header is rebuilt instead.
    pub fn applies<T: AsRef<[u8]>>(&self, container: ContainerKind, payloads: &[T]) -> bool {
        if container != ContainerKind::SelfFraming {
            return false;
        }
        match self {
            ReencodePolicy::Never => false,
            ReencodePolicy::Always => true,
            ReencodePolicy::WhenNeeded => webm::count_container_headers(payloads) > 1,
        }
    }
}

#[derive(Clone)]
pub struct ReEncoder {
    runner: FfmpegRunner,
    codec: String,
    bitrate: String,
    scratch_root: Option<std::path::PathBuf>,
}

impl ReEncoder {
    pub fn new(
        runner: FfmpegRunner,
        codec: &str,
        bitrate: &str,
        scratch_root: Option<std::path::PathBuf>,
    ) -> Self {
        Self {
            runner,
            codec: codec.to_string(),
            bitrate: bitrate.to_string(),
            scratch_root,
        }
    }

    /// Decode `buffer` and write it back as one well-formed Opus/WebM stream.
    ///
    /// Scratch files live in a temp dir that is removed on every exit path.
    pub async fn normalize(
        &self,
        ctx: &RequestContext,
        buffer: &[u8],
        input_extension: &str,
    ) -> Result<Vec<u8>, ExternalToolError> {
        let scratch = match &self.scratch_root {
            Some(root) => {
                tokio::fs::create_dir_all(root).await?;
                tempfile::Builder::new().prefix("reencode-").tempdir_in(root)?
            }
            None => tempfile::Builder::new().prefix("reencode-").tempdir()?,
        };
        let input = scratch.path().join(format!("input.{}", input_extension));
        let output = scratch.path().join("output.webm");
        tokio::fs::write(&input, buffer).await?;

        let args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-y".into(),
            "-i".into(),
            input.into_os_string(),
            "-vn".into(),
            "-c:a".into(),
            self.codec.as_str().into(),
            "-b:a".into(),
            self.bitrate.as_str().into(),
            output.clone().into_os_string(),
        ];
        self.runner.run(ctx, &args).await?;

        let normalized = tokio::fs::read(&output).await?;
        info!(
            "{} re-encoded {} bytes into {} bytes ({} @ {})",
            ctx,
            buffer.len(),
            normalized.len(),
            self.codec,
            self.bitrate
        );
        Ok(normalized)
    }
}
