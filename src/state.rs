//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data`.
//!
//! ## What lives here:
//! - **config**: The effective configuration, read-only after startup
//! - **metrics**: Request counters written by the metrics middleware
//! - **stream**: The streaming service (capture, relay and sessions)
//!
//! ### Arc<RwLock<T>> Pattern
//! Many requests run at once and all of them touch the metrics, so the
//! counters sit behind a reader-writer lock inside an `Arc`. `parking_lot`
//! locks cannot be poisoned, so no lock call here can fail.

use crate::config::AppConfig;
use crate::service::StreamService;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,

    /// Performance metrics (request counts, errors, timing)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (for calculating uptime)
    pub start_time: Instant,

    pub stream: Arc<StreamService>,
}

/// Application performance metrics.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Sessions currently registered, filled in when a snapshot is taken
    pub active_sessions: usize,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, stream: Arc<StreamService>) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            stream,
        }
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().error_count += 1;
    }

    /// Record metrics for a specific endpoint request.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// A copy of the current metrics, safe to read without holding locks.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let mut snapshot = self.metrics.read().clone();
        snapshot.active_sessions = self.stream.registry().active_count();
        snapshot
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

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeHost, FakeTransport};

    fn state() -> AppState {
        let config = AppConfig::default();
        let stream = StreamService::new(
            &config,
            Arc::new(FakeHost::new(&["pulse"])),
            Arc::new(FakeTransport::new()),
        );
        AppState::new(config, Arc::new(stream))
    }

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = state();
        state.record_endpoint_request("POST /offer", 10, false);
        state.record_endpoint_request("POST /offer", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["POST /offer"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
        assert_eq!(snapshot.active_sessions, 0);
    }
}
