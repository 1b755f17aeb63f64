//! Public entry point of the watch engine.
//!
//! `ProcessMonitor` owns the process list cache, the watch registry and the
//! background refresh task, and exposes the operations the HTTP layer uses:
//! listing processes, starting and stopping watches, and reading samples.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument, Span};

use crate::cache::{CacheStatus, ProcessListCache};
use crate::error::{SourceError, WatchError};
use crate::registry::WatchRegistry;
use crate::source::{ProcessRecord, ProcessSource};
use crate::watch::MetricSample;

/// Default interval between process list refreshes.
pub const DEFAULT_PROCESS_LIST_INTERVAL: Duration = Duration::from_secs(5);
/// Default interval between samples of a watched process.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    pub process_list_interval: Duration,
    pub sample_interval: Duration,
    /// Cap on retained samples per watch; `None` keeps everything.
    pub max_samples: Option<usize>,
}

/// Smallest interval either timer runs at.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

impl MonitorOptions {
    /// Raises zero intervals to `MIN_INTERVAL` and a zero sample cap to one.
    pub fn normalized(self) -> Self {
        Self {
            process_list_interval: self.process_list_interval.max(MIN_INTERVAL),
            sample_interval: self.sample_interval.max(MIN_INTERVAL),
            max_samples: self.max_samples.map(|max| max.max(1)),
        }
    }
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            process_list_interval: DEFAULT_PROCESS_LIST_INTERVAL,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            max_samples: None,
        }
    }
}

/// A cached process plus whether it is currently watched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessListing {
    pub pid: u32,
    pub name: String,
    pub cmd_line: String,
    pub watched: bool,
}

/// A watched process with (a suffix of) its sample history.
#[derive(Debug, Clone, Serialize)]
pub struct WatchedProcessView {
    pub pid: u32,
    pub name: String,
    pub cmd_line: String,
    pub watched: bool,
    #[serde(rename = "data")]
    pub samples: Vec<MetricSample>,
}

/// Summary of one running watch, used by /health and /metrics.
#[derive(Debug, Clone)]
pub struct WatchSummary {
    pub record: ProcessRecord,
    pub started_at: DateTime<Utc>,
    pub sample_count: usize,
    pub latest: Option<MetricSample>,
}

pub struct ProcessMonitor {
    cache: Arc<ProcessListCache>,
    registry: WatchRegistry,
    options: MonitorOptions,
    shutdown: CancellationToken,
    refresher: Mutex<Option<JoinHandle<()>>>,
    span: Span,
}

impl ProcessMonitor {
    /// Builds a monitor without starting any background task.
    pub fn new(source: Arc<dyn ProcessSource>, options: MonitorOptions, span: Span) -> Self {
        let normalized = options.normalized();
        if normalized != options {
            warn!(parent: &span, "Adjusted monitor options from {:?} to {:?}", options, normalized);
        }
        let options = normalized;

        let shutdown = CancellationToken::new();
        let cache = Arc::new(ProcessListCache::new(
            Arc::clone(&source),
            info_span!(parent: &span, "process_list"),
        ));
        let registry = WatchRegistry::new(
            Arc::clone(&cache),
            source,
            options.sample_interval,
            options.max_samples,
            shutdown.clone(),
            info_span!(parent: &span, "registry"),
        );

        Self {
            cache,
            registry,
            options,
            shutdown,
            refresher: Mutex::new(None),
            span,
        }
    }

    /// Builds a monitor, populates the process list once and starts the
    /// periodic refresh task.
    pub async fn start(
        source: Arc<dyn ProcessSource>,
        options: MonitorOptions,
        span: Span,
    ) -> Self {
        let monitor = Self::new(source, options, span);

        info!(parent: &monitor.span, "Performing initial process list refresh");
        if monitor.refresh_now().await.is_ok() {
            info!(parent: &monitor.span, "Initial process list refresh completed");
        }

        monitor.spawn_refresher();
        monitor
    }

    /// Starts the periodic refresh task if it is not running yet.
    pub fn spawn_refresher(&self) {
        let mut slot = self.refresher.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }

        let task = Arc::clone(&self.cache)
            .run(self.options.process_list_interval, self.shutdown.child_token())
            .instrument(self.span.clone());
        *slot = Some(tokio::spawn(task));
    }

    /// Refreshes the process list immediately. Errors are logged by the
    /// cache; the previous list stays in place.
    pub async fn refresh_now(&self) -> Result<usize, SourceError> {
        self.cache.refresh().await
    }

    /// Cached process list, each entry flagged with its watch state.
    pub async fn list_processes(&self) -> Vec<ProcessListing> {
        let processes = self.cache.snapshot().await;
        let watched = self.registry.watched_pids().await;

        processes
            .iter()
            .map(|p| ProcessListing {
                pid: p.pid,
                name: p.name.clone(),
                cmd_line: p.cmd_line.clone(),
                watched: watched.contains(&p.pid),
            })
            .collect()
    }

    pub async fn start_watch(&self, pid: u32) -> Result<(), WatchError> {
        self.registry.start_watch(pid).await
    }

    pub async fn stop_watch(&self, pid: u32) -> Result<(), WatchError> {
        self.registry.stop_watch(pid).await
    }

    /// Samples of a watched process from `offset` (default 0) onwards.
    pub async fn get_stats(
        &self,
        pid: u32,
        offset: Option<usize>,
    ) -> Result<WatchedProcessView, WatchError> {
        let entry = self.registry.get_entry(pid).await?;
        let samples = entry.samples_from(offset.unwrap_or(0))?;
        let record = entry.record();

        Ok(WatchedProcessView {
            pid: record.pid,
            name: record.name.clone(),
            cmd_line: record.cmd_line.clone(),
            watched: true,
            samples,
        })
    }

    pub async fn is_watched(&self, pid: u32) -> bool {
        self.registry.is_watched(pid).await
    }

    /// Running watches, ordered by pid.
    pub async fn watched(&self) -> Vec<WatchSummary> {
        self.registry
            .running_entries()
            .await
            .into_iter()
            .map(|e| WatchSummary {
                record: e.record().clone(),
                started_at: e.started_at(),
                sample_count: e.sample_count(),
                latest: e.latest_sample(),
            })
            .collect()
    }

    /// Number of registry slots, including failed watches not yet removed.
    pub async fn registry_len(&self) -> usize {
        self.registry.len().await
    }

    pub async fn cache_status(&self) -> CacheStatus {
        self.cache.status().await
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.options
    }

    /// Stops every watch and the refresh task.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.stop_all().await;

        let task = self
            .refresher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!(parent: &self.span, "Process monitor stopped");
    }
}

impl Drop for ProcessMonitor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
