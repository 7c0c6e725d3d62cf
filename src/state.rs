//! # Application State Management
//!
//! State shared by every HTTP request handler. The relay keeps no
//! conversation data between requests; what lives here is read-only after
//! startup (configuration, provider handles, artifact store) plus counters.
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (every actix worker holds a clone of AppState)
//! - **RwLock**: Many readers or one writer for the metrics
//! - Provider handles are `Arc<dyn Trait>` and never locked: they are stateless
//!   from the relay's point of view

use crate::artifact::{ArtifactStore, CleanupOutcome};
use crate::config::AppConfig;
use crate::providers::{CompletionProvider, TranscriptionProvider};
use crate::relay::RelayOutcome;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub transcriber: Arc<dyn TranscriptionProvider>,
    pub completions: Arc<dyn CompletionProvider>,
    pub artifacts: ArtifactStore,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Responses with a 4xx/5xx status
    pub error_count: u64,

    /// Event streams currently being written
    pub active_streams: u32,

    /// Streams whose provider finished normally
    pub completed_streams: u64,

    /// Streams cut short by a provider failure after the first frame
    pub truncated_streams: u64,

    /// Streams abandoned by the client
    pub cancelled_streams: u64,

    /// Temporary artifacts that could not be removed
    pub cleanup_failures: u64,

    /// Key: endpoint name (e.g., "POST /groq")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds).
    /// For `/groq` this covers the time to first byte, not the whole stream.
    pub total_duration_ms: u64,

    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        transcriber: Arc<dyn TranscriptionProvider>,
        completions: Arc<dyn CompletionProvider>,
    ) -> Self {
        let artifacts = ArtifactStore::new(config.upload_dir());
        Self {
            config: Arc::new(config),
            transcriber,
            completions,
            artifacts,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Replace the artifact store (used to point uploads at a scratch directory).
    pub fn with_artifact_store(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// The first time we see an endpoint, we create a new EndpointMetric with default values.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Called when a relay starts writing frames.
    pub fn stream_started(&self) {
        self.metrics.write().active_streams += 1;
    }

    /// Called exactly once per started stream.
    pub fn stream_finished(&self, outcome: RelayOutcome) {
        let mut metrics = self.metrics.write();
        // saturating: a stream must never drive the gauge below zero
        metrics.active_streams = metrics.active_streams.saturating_sub(1);
        match outcome {
            RelayOutcome::Completed { .. } => metrics.completed_streams += 1,
            RelayOutcome::Truncated { .. } => metrics.truncated_streams += 1,
            RelayOutcome::Cancelled { .. } => metrics.cancelled_streams += 1,
        }
    }

    pub fn record_cleanup(&self, outcome: CleanupOutcome) {
        if outcome == CleanupOutcome::Failed {
            self.metrics.write().cleanup_failures += 1;
        }
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// Cloning releases the lock before the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate between 0.0 and 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
