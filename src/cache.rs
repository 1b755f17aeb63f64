//! Cache of the most recent process enumeration.
//!
//! The snapshot is an `Arc<Vec<ProcessRecord>>` that is swapped wholesale on
//! every successful refresh, so readers always get a complete list and never
//! hold the lock longer than an `Arc` clone. A failed refresh keeps the
//! previous snapshot.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task;
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, Span};

use crate::error::SourceError;
use crate::source::{ProcessRecord, ProcessSource};

/// Running min/max/avg over observed values.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStat {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub last: f64,
}

impl RunningStat {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

/// Refresh bookkeeping exposed to /health and /metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStatus {
    pub last_updated: Option<Instant>,
    pub update_duration_seconds: f64,
    pub update_success: bool,
    pub failed_updates: u64,
    pub process_count: usize,
    pub durations: RunningStat,
}

#[derive(Default)]
struct CacheState {
    processes: Arc<Vec<ProcessRecord>>,
    status: CacheStatus,
}

/// Latest full process list, refreshed from a `ProcessSource`.
pub struct ProcessListCache {
    source: Arc<dyn ProcessSource>,
    state: RwLock<CacheState>,
    span: Span,
}

impl ProcessListCache {
    pub fn new(source: Arc<dyn ProcessSource>, span: Span) -> Self {
        Self {
            source,
            state: RwLock::new(CacheState::default()),
            span,
        }
    }

    /// Enumerates processes and replaces the snapshot.
    ///
    /// On failure the error is logged, the previous snapshot stays in place,
    /// and the error is returned for callers that care.
    pub async fn refresh(&self) -> Result<usize, SourceError> {
        let start = Instant::now();
        let source = Arc::clone(&self.source);

        let result = task::spawn_blocking(move || source.enumerate())
            .await
            .unwrap_or_else(|e| Err(SourceError::Task(e.to_string())));
        let elapsed = start.elapsed().as_secs_f64();

        let mut state = self.state.write().await;
        match result {
            Ok(processes) => {
                let count = processes.len();
                state.processes = Arc::new(processes);
                state.status.last_updated = Some(start);
                state.status.update_duration_seconds = elapsed;
                state.status.update_success = true;
                state.status.process_count = count;
                state.status.durations.add(elapsed);
                drop(state);

                debug!(
                    parent: &self.span,
                    "Process list refreshed: {} processes in {:.2}ms",
                    count,
                    elapsed * 1000.0
                );
                Ok(count)
            }
            Err(e) => {
                state.status.update_success = false;
                state.status.failed_updates += 1;
                drop(state);

                error!(parent: &self.span, "Unable to fetch process list: {}", e);
                Err(e)
            }
        }
    }

    /// Current snapshot. Cheap: clones an `Arc`.
    pub async fn snapshot(&self) -> Arc<Vec<ProcessRecord>> {
        Arc::clone(&self.state.read().await.processes)
    }

    /// Finds a pid in the current snapshot.
    pub async fn lookup(&self, pid: u32) -> Option<ProcessRecord> {
        let processes = self.snapshot().await;
        processes.iter().find(|p| p.pid == pid).cloned()
    }

    pub async fn status(&self) -> CacheStatus {
        self.state.read().await.status
    }

    /// Refreshes every `period` until `shutdown` fires. The first refresh
    /// happens one period from now; callers populate the cache up front.
    pub async fn run(self: Arc<Self>, period: Duration, shutdown: CancellationToken) {
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(
            parent: &self.span,
            "Process list refresh task started with {:?} interval", period
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // failures are logged by refresh and the stale snapshot is kept
            let _ = self.refresh().await;
        }

        debug!(parent: &self.span, "Process list refresh task exiting");
    }
}
