//! # Application State Management
//!
//! Shared state handed to every request handler through `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: the loaded [`AppConfig`], read-mostly
//! - **db**: the SQLite handle (internally `Arc<Mutex<Connection>>`)
//! - **storage**: where uploaded tracks are written
//! - **sessions**: session lifecycle and cookie settings
//! - **engine**: the transcription engine with its concurrency limit
//! - **metrics**: request counters updated by `MetricsMiddleware`
//!
//! ## Arc<RwLock<T>> Pattern
//! Every clone of `AppState` points at the same config and metrics. Many
//! requests may read at once; a write (a metric increment) briefly blocks
//! the others. A poisoned lock only means some request panicked while
//! holding it; the counters inside are still usable, so we keep going.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use crate::auth::SessionManager;
use crate::config::AppConfig;
use crate::db::Database;
use crate::storage::Storage;
use crate::transcription::TranscriptionEngine;

/// The main application state that's shared across all HTTP request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub db: Database,
    pub storage: Storage,
    pub sessions: SessionManager,
    pub engine: TranscriptionEngine,
    pub metrics: Arc<RwLock<AppMetrics>>,
    /// When the server started (never changes, so no lock needed)
    pub start_time: Instant,
}

/// Performance metrics collected across all HTTP requests.
///
/// ## Why these metrics matter:
/// - **request_count**: Total requests processed (for load monitoring)
/// - **error_count**: Total 4xx/5xx responses (for reliability monitoring)
/// - **endpoint_metrics**: Per-endpoint statistics, keyed like `"GET /api/tracks"`
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    /// Cumulative processing time in milliseconds
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the state from already-opened resources.
    ///
    /// The session manager is derived from `db` and the auth settings in
    /// `config`, so both always agree on cookie name and lifetimes.
    pub fn new(config: AppConfig, db: Database, storage: Storage, engine: TranscriptionEngine) -> Self {
        let sessions = SessionManager::new(db.clone(), &config);
        Self {
            config: Arc::new(RwLock::new(config)),
            db,
            storage,
            sessions,
            engine,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
    }

    /// Increment the total error counter (any 4xx or 5xx response).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// The first time we see an endpoint, a zeroed [`EndpointMetric`] is created.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Provider calls currently running.
    pub fn active_transcriptions(&self) -> u64 {
        self.engine.in_flight()
    }

    /// Get a snapshot of current metrics (used for the metrics endpoints).
    ///
    /// Cloned so the lock isn't held while the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate from 0.0 (none failed) to 1.0 (all failed).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transcription::engine::tests::StubProvider;

    /// State over an in-memory database and the given storage root.
    pub(crate) fn test_state(storage_root: &std::path::Path) -> AppState {
        let config = AppConfig::default();
        let db = Database::open_in_memory().unwrap();
        let engine = TranscriptionEngine::new(Arc::new(StubProvider { fail: false }), 2);
        AppState::new(config, db, Storage::new(storage_root), engine)
    }

    #[test]
    fn test_endpoint_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        state.increment_request_count();
        state.record_endpoint_request("GET /api/tracks", 10, false);
        state.record_endpoint_request("GET /api/tracks", 30, true);
        state.increment_error_count();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 1);
        assert_eq!(snapshot.error_count, 1);

        let metric = &snapshot.endpoint_metrics["GET /api/tracks"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
        assert_eq!(state.active_transcriptions(), 0);
    }

    #[test]
    fn test_empty_endpoint_metric() {
        let metric = EndpointMetric::default();
        assert_eq!(metric.average_duration_ms(), 0.0);
        assert_eq!(metric.error_rate(), 0.0);
    }
}
