//! # Transcription Engine
//!
//! Coordinates calls to the configured [`SpeechToText`] provider.
//!
//! ## Key Responsibilities:
//! - **Concurrency limit**: at most `max_concurrent` provider calls in flight;
//!   further requests wait for a permit instead of piling onto the provider
//! - **Performance monitoring**: request counts, failures, bytes sent, latency

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::{AudioPayload, ProviderTranscript, SpeechToText, TranscribeOptions};
use crate::error::{AppError, AppResult};

/// Thread-safe engine shared through `AppState`. Cloning shares the provider,
/// the permits and the counters.
#[derive(Clone)]
pub struct TranscriptionEngine {
    provider: Arc<dyn SpeechToText>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    metrics: Arc<EngineMetrics>,
}

/// Counters updated lock-free from concurrent requests.
#[derive(Debug, Default)]
struct EngineMetrics {
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    in_flight: AtomicU64,
    total_audio_bytes: AtomicU64,
    total_processing_ms: AtomicU64,
}

/// Performance statistics for the transcription engine.
#[derive(Debug, Clone, Serialize)]
pub struct EnginePerformanceStats {
    pub provider: String,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub in_flight: u64,
    pub max_concurrent: usize,
    pub total_audio_bytes: u64,
    pub average_processing_time_ms: u64,
    pub success_rate: f64,
}

impl std::fmt::Debug for TranscriptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptionEngine")
            .field("provider", &self.provider.name())
            .field("max_concurrent", &self.max_concurrent)
            .finish()
    }
}

/// Decrements the in-flight counter however the call ends.
struct InFlightGuard<'a>(&'a AtomicU64);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TranscriptionEngine {
    pub fn new(provider: Arc<dyn SpeechToText>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            provider,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            metrics: Arc::new(EngineMetrics::default()),
        }
    }

    /// Send audio to the provider, waiting for a free slot first.
    pub async fn transcribe(&self, audio: AudioPayload, options: TranscribeOptions) -> AppResult<ProviderTranscript> {
        if audio.bytes.is_empty() {
            return Err(AppError::ValidationError("Audio data is empty".to_string()));
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AppError::Internal("Transcription engine is shutting down".to_string()))?;

        let audio_bytes = audio.bytes.len() as u64;
        let file_name = audio.file_name.clone();
        self.metrics.total_requests.fetch_add(1, Ordering::SeqCst);
        self.metrics.total_audio_bytes.fetch_add(audio_bytes, Ordering::SeqCst);
        self.metrics.in_flight.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlightGuard(&self.metrics.in_flight);

        let start_time = Instant::now();
        let result = self.provider.transcribe(audio, options).await;
        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        self.metrics.total_processing_ms.fetch_add(elapsed_ms, Ordering::SeqCst);

        match &result {
            Ok(transcript) => info!(
                provider = self.provider.name(),
                file = %file_name,
                audio_bytes,
                chars = transcript.text.len(),
                duration_ms = elapsed_ms,
                "Transcription completed"
            ),
            Err(e) => {
                self.metrics.failed_requests.fetch_add(1, Ordering::SeqCst);
                warn!(
                    provider = self.provider.name(),
                    file = %file_name,
                    duration_ms = elapsed_ms,
                    error = %e,
                    "Transcription failed"
                );
            }
        }

        result
    }

    /// Number of provider calls currently running.
    pub fn in_flight(&self) -> u64 {
        self.metrics.in_flight.load(Ordering::SeqCst)
    }

    pub fn get_performance_stats(&self) -> EnginePerformanceStats {
        let total = self.metrics.total_requests.load(Ordering::SeqCst);
        let failed = self.metrics.failed_requests.load(Ordering::SeqCst);
        let processing = self.metrics.total_processing_ms.load(Ordering::SeqCst);

        EnginePerformanceStats {
            provider: self.provider.name().to_string(),
            total_requests: total,
            failed_requests: failed,
            in_flight: self.in_flight(),
            max_concurrent: self.max_concurrent,
            total_audio_bytes: self.metrics.total_audio_bytes.load(Ordering::SeqCst),
            average_processing_time_ms: if total > 0 { processing / total } else { 0 },
            success_rate: if total > 0 {
                (total - failed) as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    /// Provider stub: echoes the file name, or fails when asked to.
    pub(crate) struct StubProvider {
        pub fail: bool,
    }

    #[async_trait]
    impl SpeechToText for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn transcribe(&self, audio: AudioPayload, options: TranscribeOptions) -> AppResult<ProviderTranscript> {
            if self.fail {
                return Err(AppError::Upstream("stub failure".to_string()));
            }
            let text = format!("transcript of {}", audio.file_name);
            let raw = if options.with_timestamps {
                json!({"text": text, "segments": [{"text": text, "start": 0.0, "end": 1.0}]})
            } else {
                json!({"text": text})
            };
            Ok(ProviderTranscript { text, raw })
        }
    }

    fn audio(bytes: Vec<u8>) -> AudioPayload {
        AudioPayload {
            file_name: "clip.mp3".to_string(),
            content_type: "audio/mpeg".to_string(),
            bytes,
        }
    }

    #[actix_web::test]
    async fn test_successful_transcription_updates_stats() {
        let engine = TranscriptionEngine::new(Arc::new(StubProvider { fail: false }), 2);
        let result = engine
            .transcribe(audio(vec![0; 16]), TranscribeOptions { with_timestamps: true })
            .await
            .unwrap();
        assert_eq!(result.text, "transcript of clip.mp3");
        assert!(result.raw.get("segments").is_some());

        let stats = engine.get_performance_stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.failed_requests, 0);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.total_audio_bytes, 16);
        assert_eq!(stats.success_rate, 1.0);
    }

    #[actix_web::test]
    async fn test_failure_is_counted() {
        let engine = TranscriptionEngine::new(Arc::new(StubProvider { fail: true }), 1);
        assert!(engine.transcribe(audio(vec![1]), TranscribeOptions::default()).await.is_err());

        let stats = engine.get_performance_stats();
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[actix_web::test]
    async fn test_empty_audio_rejected() {
        let engine = TranscriptionEngine::new(Arc::new(StubProvider { fail: false }), 1);
        let err = engine.transcribe(audio(Vec::new()), TranscribeOptions::default()).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        assert_eq!(engine.get_performance_stats().total_requests, 0);
    }
}
