//! Fire-and-forget notification that a combined recording is ready for transcription.

use log::{info, warn};
use serde::Serialize;
use std::time::Duration;

use crate::context::RequestContext;

pub trait TranscriptionTrigger: Send + Sync {
    /// Schedule the notification and return immediately. Failures are logged only.
    fn trigger(&self, ctx: &RequestContext, conversation_id: &str, file_path: &str);
}

/// Used when no transcription endpoint is configured
pub struct NoopTranscriptionTrigger;

impl TranscriptionTrigger for NoopTranscriptionTrigger {
    fn trigger(&self, ctx: &RequestContext, conversation_id: &str, file_path: &str) {
        log::debug!(
            "{} transcription disabled, skipping {} ({})",
            ctx,
            conversation_id,
            file_path
        );
    }
}

#[derive(Debug, Serialize)]
struct TranscriptionRequest<'a> {
    conversation_id: &'a str,
    file_path: &'a str,
}

/// POSTs `{conversation_id, file_path}` as JSON to a transcription service
pub struct HttpTranscriptionTrigger {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpTranscriptionTrigger {
    pub fn new(url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            api_key,
        })
    }
}

impl TranscriptionTrigger for HttpTranscriptionTrigger {
    fn trigger(&self, ctx: &RequestContext, conversation_id: &str, file_path: &str) {
        let mut request = self.client.post(&self.url).json(&TranscriptionRequest {
            conversation_id,
            file_path,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let ctx = ctx.child("transcribe");
        let file_path = file_path.to_string();
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    info!("{} requested transcription of {}", ctx, file_path);
                }
                Ok(response) => {
                    warn!(
                        "{} transcription service responded {} for {}",
                        ctx,
                        response.status(),
                        file_path
                    );
                }
                Err(e) => {
                    warn!("{} transcription request for {} failed: {}", ctx, file_path, e);
                }
            }
        });
    }
}
