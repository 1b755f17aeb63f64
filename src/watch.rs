//! Watch entries and their sampling tasks.
//!
//! A `WatchEntry` holds one watched process, its sample history and its
//! lifecycle. The lifecycle starts as `Running` and leaves it exactly once,
//! through a compare-and-swap: to `Stopped` when a caller stops the watch, or
//! to `Failed` when the sampler can no longer read the process. Whoever wins
//! that swap is responsible for removing the entry from the registry.

use ahash::AHashMap as HashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{SourceError, WatchError};
use crate::source::{ProcessHandle, ProcessRecord, Usage};

/// Registry map shared between the registry and the sampling tasks.
pub(crate) type WatchMap = Arc<tokio::sync::Mutex<HashMap<u32, Arc<WatchEntry>>>>;

/// One resource usage measurement of a watched process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    #[serde(rename = "rss")]
    pub resident_memory: u64,
    #[serde(rename = "vms")]
    pub virtual_memory: u64,
    pub swap: u64,
    #[serde(rename = "cpu")]
    pub cpu_percent: f64,
    pub threads: i32,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn from_usage(usage: Usage, timestamp: DateTime<Utc>) -> Self {
        Self {
            resident_memory: usage.resident_memory,
            virtual_memory: usage.virtual_memory,
            swap: usage.swap,
            cpu_percent: usage.cpu_percent,
            threads: usage.threads,
            timestamp,
        }
    }
}

/// Lifecycle of a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    Running = 0,
    Stopped = 1,
    Failed = 2,
}

impl Lifecycle {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Lifecycle::Running,
            1 => Lifecycle::Stopped,
            _ => Lifecycle::Failed,
        }
    }
}

/// A watched process and its sample history.
pub struct WatchEntry {
    id: u64,
    record: ProcessRecord,
    started_at: DateTime<Utc>,
    state: AtomicU8,
    samples: Mutex<VecDeque<MetricSample>>,
    max_samples: Option<usize>,
    cancel: CancellationToken,
}

impl WatchEntry {
    pub(crate) fn new(
        id: u64,
        record: ProcessRecord,
        cancel: CancellationToken,
        max_samples: Option<usize>,
    ) -> Self {
        Self {
            id,
            record,
            started_at: Utc::now(),
            state: AtomicU8::new(Lifecycle::Running as u8),
            samples: Mutex::new(VecDeque::new()),
            max_samples,
            cancel,
        }
    }

    /// Unique per watch, also across watches of a reused pid.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.record.pid
    }

    pub fn record(&self) -> &ProcessRecord {
        &self.record
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> Lifecycle {
        Lifecycle::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == Lifecycle::Running
    }

    /// Moves the entry out of `Running`. Only the first caller succeeds.
    pub(crate) fn finish(&self, to: Lifecycle) -> bool {
        debug_assert_ne!(to, Lifecycle::Running);
        self.state
            .compare_exchange(
                Lifecycle::Running as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Wakes the sampling task so it exits.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    fn lock_samples(&self) -> MutexGuard<'_, VecDeque<MetricSample>> {
        // a panic while holding the lock cannot leave the deque half-written
        self.samples.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends a sample unless the watch has already ended. Returns whether
    /// the sample was kept.
    pub(crate) fn push_sample(&self, mut sample: MetricSample) -> bool {
        let mut samples = self.lock_samples();
        if !self.is_running() {
            return false;
        }

        // histories never go back in time, even if the wall clock does
        if let Some(last) = samples.back() {
            if sample.timestamp < last.timestamp {
                sample.timestamp = last.timestamp;
            }
        }

        samples.push_back(sample);
        if let Some(max) = self.max_samples {
            while samples.len() > max {
                samples.pop_front();
            }
        }
        true
    }

    /// Copy of the samples from `offset` to the end.
    ///
    /// `offset == len` yields an empty list; anything larger is an error.
    pub fn samples_from(&self, offset: usize) -> Result<Vec<MetricSample>, WatchError> {
        let samples = self.lock_samples();
        let len = samples.len();
        if offset > len {
            return Err(WatchError::InvalidOffset { offset, len });
        }
        Ok(samples.iter().skip(offset).copied().collect())
    }

    pub fn sample_count(&self) -> usize {
        self.lock_samples().len()
    }

    pub fn latest_sample(&self) -> Option<MetricSample> {
        self.lock_samples().back().copied()
    }
}

/// Samples `handle` every `period` (first sample immediately) until the
/// entry is cancelled or the process can no longer be read.
pub(crate) async fn run_sampler(
    entry: Arc<WatchEntry>,
    mut handle: Box<dyn ProcessHandle>,
    period: Duration,
    entries: WatchMap,
) {
    let pid = entry.pid();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!("Sampling pid {} every {:?}", pid, period);

    loop {
        tokio::select! {
            biased;
            _ = entry.cancel.cancelled() => {
                debug!("Watch for pid {} cancelled", pid);
                // cancelled through the shutdown token rather than a stop
                if entry.finish(Lifecycle::Stopped) {
                    remove_own_slot(&entry, &entries).await;
                }
                return;
            }
            _ = ticker.tick() => {}
        }

        let joined = task::spawn_blocking(move || {
            let result = collect_sample(handle.as_mut());
            (handle, result)
        })
        .await;

        let (returned, result) = match joined {
            Ok(v) => v,
            Err(e) => {
                fail(&entry, &entries, SourceError::Task(e.to_string())).await;
                return;
            }
        };
        handle = returned;

        match result {
            Ok(sample) => {
                if !entry.push_sample(sample) {
                    debug!("Watch for pid {} ended during collection", pid);
                    return;
                }
                trace!(
                    "Sampled pid {}: rss={} cpu={:.2}% threads={}",
                    pid,
                    sample.resident_memory,
                    sample.cpu_percent,
                    sample.threads
                );
            }
            Err(e) => {
                fail(&entry, &entries, e).await;
                return;
            }
        }
    }
}

fn collect_sample(handle: &mut dyn ProcessHandle) -> Result<MetricSample, SourceError> {
    handle.probe()?;
    let usage = handle.sample()?;
    Ok(MetricSample::from_usage(usage, Utc::now()))
}

/// Marks the entry failed and removes it, unless a stop got there first.
async fn fail(entry: &Arc<WatchEntry>, entries: &WatchMap, err: SourceError) {
    if !entry.finish(Lifecycle::Failed) {
        // stopped externally; the stopper removes the entry
        return;
    }

    warn!("Stopped watching pid {}: {}", entry.pid(), err);
    remove_own_slot(entry, entries).await;
}

/// Removes the map slot for the entry's pid if it still holds this entry.
async fn remove_own_slot(entry: &Arc<WatchEntry>, entries: &WatchMap) {
    let mut map = entries.lock().await;
    if map
        .get(&entry.pid())
        .is_some_and(|current| current.id() == entry.id())
    {
        map.remove(&entry.pid());
    }
}
