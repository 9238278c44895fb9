//! # Transcription Module
//!
//! Speech-to-text is delegated to an external provider. This module defines the
//! provider seam and the engine that calls it.
//!
//! ## Key Components:
//! - **SpeechToText**: trait implemented by provider clients (and test stubs)
//! - **MistralClient**: the production provider (Voxtral over HTTPS)
//! - **TranscriptionEngine**: bounds concurrent provider calls and tracks stats
//!
//! ## Timestamps:
//! When a caller asks for timestamps, the provider is asked for segment-level
//! granularity and the full provider response is kept; otherwise only the text.

pub mod engine;
pub mod mistral;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

pub use engine::TranscriptionEngine;
pub use mistral::MistralClient;

/// Audio sent to the provider.
#[derive(Debug, Clone)]
pub struct AudioPayload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TranscribeOptions {
    pub with_timestamps: bool,
}

/// Provider result: the plain text plus the provider's full JSON response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTranscript {
    pub text: String,
    pub raw: serde_json::Value,
}

/// A speech-to-text backend.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn transcribe(&self, audio: AudioPayload, options: TranscribeOptions) -> AppResult<ProviderTranscript>;
}
