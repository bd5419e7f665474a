//! Bounded invocation of the external ffmpeg binary.

use log::debug;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::context::RequestContext;

/// Lines of stderr kept for logs and error messages
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum ExternalToolError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} did not finish within {secs}s")]
    Timeout { program: String, secs: u64 },
    #[error("{program} exited with {status}: {stderr_tail}")]
    Failed {
        program: String,
        status: String,
        stderr_tail: String,
    },
    #[error("scratch file error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    program: PathBuf,
    timeout: Duration,
}

impl FfmpegRunner {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// Run ffmpeg with `args` and return its stderr on success.
    ///
    /// The child is killed if the timeout fires or the returned future is dropped.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        args: &[OsString],
    ) -> Result<String, ExternalToolError> {
        let program = self.program.display().to_string();
        debug!(
            "{} running {} {}",
            ctx,
            program,
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExternalToolError::Spawn {
                program: program.clone(),
                source,
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ExternalToolError::Timeout {
                    program,
                    secs: self.timeout.as_secs(),
                })
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let tail = stderr_tail(&stderr);
        debug!("{} {} stderr tail:\n{}", ctx, program, tail);

        if !output.status.success() {
            return Err(ExternalToolError::Failed {
                program,
                status: output.status.to_string(),
                stderr_tail: tail,
            });
        }
        Ok(stderr)
    }
}

/// Last few non-empty lines of ffmpeg's stderr. Progress updates are separated by
/// `\r`, so those count as line breaks too.
pub fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .split(['\n', '\r'])
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Whether an ffmpeg binary answers `-version`
pub async fn is_available(program: &std::path::Path) -> bool {
    Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}
