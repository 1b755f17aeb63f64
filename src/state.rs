//! Application state management for the HTTP service.
//!
//! This module defines the shared application state that is passed
//! to HTTP handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::metrics::ExporterMetrics;
use crate::monitor::ProcessMonitor;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests.
pub struct AppState {
    pub monitor: Arc<ProcessMonitor>,
    pub metrics: ExporterMetrics,
    pub config: Arc<Config>,
    pub started_at: Instant,
    http_requests: AtomicU64,
}

impl AppState {
    pub fn new(monitor: Arc<ProcessMonitor>, metrics: ExporterMetrics, config: Config) -> Self {
        Self {
            monitor,
            metrics,
            config: Arc::new(config),
            started_at: Instant::now(),
            http_requests: AtomicU64::new(0),
        }
    }

    pub fn record_http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn http_requests(&self) -> u64 {
        self.http_requests.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
