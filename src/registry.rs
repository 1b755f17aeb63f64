//! Registry of active watches, keyed by pid.
//!
//! All inserts, removals and lookups go through one async mutex. `start_watch`
//! holds it across validation, the liveness probe and the insert so two
//! concurrent starts for the same pid cannot both succeed.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument, Span};

use crate::cache::ProcessListCache;
use crate::error::{SourceError, WatchError};
use crate::source::{ProcessHandle, ProcessSource};
use crate::watch::{run_sampler, Lifecycle, WatchEntry, WatchMap};

pub struct WatchRegistry {
    entries: WatchMap,
    cache: Arc<ProcessListCache>,
    source: Arc<dyn ProcessSource>,
    next_id: AtomicU64,
    sample_interval: Duration,
    max_samples: Option<usize>,
    shutdown: CancellationToken,
    span: Span,
}

impl WatchRegistry {
    pub fn new(
        cache: Arc<ProcessListCache>,
        source: Arc<dyn ProcessSource>,
        sample_interval: Duration,
        max_samples: Option<usize>,
        shutdown: CancellationToken,
        span: Span,
    ) -> Self {
        Self {
            entries: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            cache,
            source,
            next_id: AtomicU64::new(1),
            sample_interval,
            max_samples,
            shutdown,
            span,
        }
    }

    /// Starts sampling `pid`.
    ///
    /// Fails with `NotFound` if the pid is not in the cached process list,
    /// `AlreadyWatched` if a running watch exists, `ProcessUnavailable`
    /// if the process cannot be opened or probed, and `ShuttingDown` once
    /// the monitor has been shut down.
    pub async fn start_watch(&self, pid: u32) -> Result<(), WatchError> {
        let mut entries = self.entries.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(WatchError::ShuttingDown);
        }

        let record = self
            .cache
            .lookup(pid)
            .await
            .ok_or(WatchError::NotFound(pid))?;

        if let Some(existing) = entries.get(&pid) {
            if existing.is_running() {
                return Err(WatchError::AlreadyWatched(pid));
            }
            // failed watch that has not removed itself yet
            entries.remove(&pid);
        }

        let source = Arc::clone(&self.source);
        let handle = task::spawn_blocking(move || -> Result<Box<dyn ProcessHandle>, SourceError> {
            let handle = source.open(pid)?;
            handle.probe()?;
            Ok(handle)
        })
        .await
        .unwrap_or_else(|e| Err(SourceError::Task(e.to_string())))
        .map_err(|source| WatchError::ProcessUnavailable { pid, source })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = record.name.clone();
        let entry = Arc::new(WatchEntry::new(
            id,
            record,
            self.shutdown.child_token(),
            self.max_samples,
        ));
        entries.insert(pid, Arc::clone(&entry));

        let span = info_span!(parent: &self.span, "watch", pid = pid, id = id);
        tokio::spawn(
            run_sampler(
                entry,
                handle,
                self.sample_interval,
                Arc::clone(&self.entries),
            )
            .instrument(span),
        );

        info!(parent: &self.span, "Started watching pid {} ({})", pid, name);
        Ok(())
    }

    /// Stops the watch for `pid` and removes it.
    ///
    /// A watch whose sampler already failed counts as not watched; its task
    /// has exited, so nothing is signalled or awaited.
    pub async fn stop_watch(&self, pid: u32) -> Result<(), WatchError> {
        let entry = self
            .entries
            .lock()
            .await
            .remove(&pid)
            .ok_or(WatchError::NotWatched(pid))?;

        if !entry.finish(Lifecycle::Stopped) {
            debug!(parent: &self.span, "Watch for pid {} had already failed", pid);
            return Err(WatchError::NotWatched(pid));
        }

        entry.cancel();
        info!(
            parent: &self.span,
            "Stopped watching pid {} after {} samples",
            pid,
            entry.sample_count()
        );
        Ok(())
    }

    pub async fn is_watched(&self, pid: u32) -> bool {
        self.entries
            .lock()
            .await
            .get(&pid)
            .is_some_and(|e| e.is_running())
    }

    /// Running entry for `pid`.
    pub async fn get_entry(&self, pid: u32) -> Result<Arc<WatchEntry>, WatchError> {
        self.entries
            .lock()
            .await
            .get(&pid)
            .filter(|e| e.is_running())
            .cloned()
            .ok_or(WatchError::NotWatched(pid))
    }

    pub async fn watched_pids(&self) -> HashSet<u32> {
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.is_running())
            .map(|e| e.pid())
            .collect()
    }

    /// All running entries, ordered by pid.
    pub async fn running_entries(&self) -> Vec<Arc<WatchEntry>> {
        let mut out: Vec<Arc<WatchEntry>> = self
            .entries
            .lock()
            .await
            .values()
            .filter(|e| e.is_running())
            .cloned()
            .collect();
        out.sort_unstable_by_key(|e| e.pid());
        out
    }

    /// Number of map slots, including failed entries not yet removed.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stops every watch. Used on shutdown.
    pub async fn stop_all(&self) {
        let drained: Vec<Arc<WatchEntry>> = {
            let mut entries = self.entries.lock().await;
            entries.drain().map(|(_, e)| e).collect()
        };

        for entry in &drained {
            if entry.finish(Lifecycle::Stopped) {
                entry.cancel();
            }
        }
        debug!(parent: &self.span, "Stopped {} watches", drained.len());
    }
}
