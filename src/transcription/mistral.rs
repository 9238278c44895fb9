//! Mistral audio transcription client.
//!
//! `POST {base_url}/audio/transcriptions` as multipart form data:
//! - `model`: e.g. `voxtral-mini-latest`
//! - `file`: the audio bytes
//! - `timestamp_granularities`: `segment`, only when timestamps are requested

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::{debug, warn};

use super::{AudioPayload, ProviderTranscript, SpeechToText, TranscribeOptions};
use crate::config::TranscriptionConfig;
use crate::error::{AppError, AppResult};

pub struct MistralClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl MistralClient {
    pub fn new(config: &TranscriptionConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url)
    }
}

#[async_trait]
impl SpeechToText for MistralClient {
    fn name(&self) -> &str {
        "mistral"
    }

    async fn transcribe(&self, audio: AudioPayload, options: TranscribeOptions) -> AppResult<ProviderTranscript> {
        if self.api_key.is_empty() {
            return Err(AppError::ConfigError("Transcription API key not configured".to_string()));
        }

        let mut part = Part::bytes(audio.bytes).file_name(audio.file_name.clone());
        if !audio.content_type.is_empty() {
            part = part
                .mime_str(&audio.content_type)
                .map_err(|e| AppError::BadRequest(format!("Invalid audio content type: {}", e)))?;
        }

        let mut form = Form::new().text("model", self.model.clone()).part("file", part);
        if options.with_timestamps {
            form = form.text("timestamp_granularities", "segment");
        }

        debug!(file = %audio.file_name, model = %self.model, "Sending audio to provider");
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);

        if !status.is_success() {
            let message = provider_error_message(&body).unwrap_or_else(|| status.to_string());
            warn!(status = %status, message = %message, "Transcription provider returned an error");
            return Err(AppError::Upstream(format!("Transcription provider error: {}", message)));
        }

        parse_transcript(body)
    }
}

/// Pull a human-readable message out of a provider error body.
fn provider_error_message(body: &serde_json::Value) -> Option<String> {
    body.get("message")
        .or_else(|| body.get("error").and_then(|e| e.get("message")))
        .or_else(|| body.get("detail"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

fn parse_transcript(body: serde_json::Value) -> AppResult<ProviderTranscript> {
    let text = body
        .get("text")
        .and_then(|t| t.as_str())
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    if text.is_empty() {
        return Err(AppError::Internal("No transcription text received".to_string()));
    }
    Ok(ProviderTranscript { text, raw: body })
}
