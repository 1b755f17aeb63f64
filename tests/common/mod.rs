//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ahash::AHashMap as HashMap;
use pidstat::error::SourceError;
use pidstat::monitor::{MonitorOptions, ProcessMonitor};
use pidstat::source::{ProcessHandle, ProcessRecord, ProcessSource, Usage};
use tracing::Span;

/// In-memory process table. Processes can be killed while watched.
#[derive(Default)]
pub struct FakeSource {
    processes: Mutex<Vec<ProcessRecord>>,
    alive: Mutex<HashMap<u32, Arc<AtomicBool>>>,
    samples: Arc<AtomicU64>,
}

impl FakeSource {
    pub fn with(processes: &[(u32, &str)]) -> Arc<Self> {
        let source = Arc::new(Self::default());
        for (pid, name) in processes {
            source.spawn(*pid, name);
        }
        source
    }

    pub fn spawn(&self, pid: u32, name: &str) {
        self.processes.lock().unwrap().push(ProcessRecord {
            pid,
            name: name.to_string(),
            cmd_line: format!("{name} --id={pid}"),
        });
        self.alive
            .lock()
            .unwrap()
            .insert(pid, Arc::new(AtomicBool::new(true)));
    }

    /// Marks the process dead; it stays in the table until the next refresh.
    pub fn kill(&self, pid: u32) {
        if let Some(flag) = self.alive.lock().unwrap().get(&pid) {
            flag.store(false, Ordering::SeqCst);
        }
    }

    /// Removes the process from the table entirely.
    pub fn reap(&self, pid: u32) {
        self.kill(pid);
        self.processes.lock().unwrap().retain(|p| p.pid != pid);
    }

    pub fn total_samples(&self) -> u64 {
        self.samples.load(Ordering::SeqCst)
    }
}

impl ProcessSource for FakeSource {
    fn enumerate(&self) -> Result<Vec<ProcessRecord>, SourceError> {
        Ok(self.processes.lock().unwrap().clone())
    }

    fn open(&self, pid: u32) -> Result<Box<dyn ProcessHandle>, SourceError> {
        let alive = self
            .alive
            .lock()
            .unwrap()
            .get(&pid)
            .cloned()
            .ok_or(SourceError::NotFound(pid))?;
        Ok(Box::new(FakeHandle {
            pid,
            alive,
            taken: 0,
            samples: Arc::clone(&self.samples),
        }))
    }
}

struct FakeHandle {
    pid: u32,
    alive: Arc<AtomicBool>,
    taken: u64,
    samples: Arc<AtomicU64>,
}

impl ProcessHandle for FakeHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn probe(&self) -> Result<(), SourceError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SourceError::unavailable(self.pid, "no longer running"))
        }
    }

    fn sample(&mut self) -> Result<Usage, SourceError> {
        self.probe()?;
        self.taken += 1;
        self.samples.fetch_add(1, Ordering::SeqCst);
        Ok(Usage {
            resident_memory: 1024 * 1024 * self.taken,
            virtual_memory: 4 * 1024 * 1024 * self.taken,
            swap: 0,
            cpu_percent: 12.5,
            threads: 4,
        })
    }
}

pub fn fast_options() -> MonitorOptions {
    MonitorOptions {
        process_list_interval: Duration::from_millis(50),
        sample_interval: Duration::from_millis(20),
        max_samples: None,
    }
}

pub async fn start_monitor(source: Arc<FakeSource>, options: MonitorOptions) -> ProcessMonitor {
    ProcessMonitor::start(source, options, Span::none()).await
}

/// Waits until the watch on `pid` has at least `n` samples.
pub async fn wait_for_samples(monitor: &ProcessMonitor, pid: u32, n: usize) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Ok(view) = monitor.get_stats(pid, None).await {
            if view.samples.len() >= n {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Waits until `pid` is no longer reported as watched.
pub async fn wait_for_unwatched(monitor: &ProcessMonitor, pid: u32) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if !monitor.is_watched(pid).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
