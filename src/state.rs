//! # Application State Management
//!
//! This module manages state shared by every HTTP request handler: configuration,
//! request metrics, and the two long-lived services (diagnosis pipeline and chat
//! sessions).
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: every worker thread's copy of `AppState` points at the same data
//! - **RwLock**: many readers or one writer, for the metrics counters
//!
//! ## Why the services aren't locked:
//! `DiagnosisOrchestrator` holds no mutable state at all, and
//! `ConversationSessionManager` does its own per-session locking, so both are
//! shared with a plain `Arc`.

use crate::chat::ConversationSessionManager;
use crate::config::AppConfig;
use crate::diagnosis::DiagnosisOrchestrator;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Effective configuration, fixed at startup
    pub config: Arc<AppConfig>,

    /// Request and pipeline counters, updated by middleware and handlers
    pub metrics: Arc<RwLock<AppMetrics>>,

    pub orchestrator: Arc<DiagnosisOrchestrator>,

    pub sessions: Arc<ConversationSessionManager>,

    /// When the server started
    pub start_time: Instant,
}

/// Metrics collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of 4xx/5xx responses since server start
    pub error_count: u64,

    /// `/process_audio` requests that returned a report
    pub diagnoses_succeeded: u64,

    /// `/process_audio` requests that failed at any step
    pub diagnoses_failed: u64,

    /// Key: route pattern with method (e.g., "POST /process_audio")
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
    pub fn new(
        config: AppConfig,
        orchestrator: Arc<DiagnosisOrchestrator>,
        sessions: Arc<ConversationSessionManager>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            orchestrator,
            sessions,
            start_time: Instant::now(),
        }
    }

    /// Run a closure against the metrics under the write lock.
    ///
    /// ## Poisoning:
    /// A panic while holding the lock only ever leaves counters half-updated, so a
    /// poisoned lock is recovered instead of taking every later request down with it.
    fn with_metrics<R>(&self, f: impl FnOnce(&mut AppMetrics) -> R) -> R {
        let mut metrics = self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut metrics)
    }

    pub fn increment_request_count(&self) {
        self.with_metrics(|m| m.request_count += 1);
    }

    pub fn increment_error_count(&self) {
        self.with_metrics(|m| m.error_count += 1);
    }

    /// Count the outcome of one diagnosis request.
    pub fn record_diagnosis(&self, succeeded: bool) {
        self.with_metrics(|m| {
            if succeeded {
                m.diagnoses_succeeded += 1;
            } else {
                m.diagnoses_failed += 1;
            }
        });
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// The first time an endpoint is seen, its entry is created with zeroed counters.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        self.with_metrics(|m| {
            let endpoint_metric = m.endpoint_metrics.entry(endpoint.to_string()).or_default();
            endpoint_metric.request_count += 1;
            endpoint_metric.total_duration_ms += duration_ms;
            if is_error {
                endpoint_metric.error_count += 1;
            }
        });
    }

    /// Consistent copy of the metrics, taken under the read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
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

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
