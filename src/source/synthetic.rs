//! Process source serving synthetic processes from a JSON test data file.
//!
//! Lets the service run (and be demonstrated) without access to a real
//! procfs. Samples jitter around the baseline values stored in the file.

use ahash::AHashSet as HashSet;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::{ProcessHandle, ProcessRecord, ProcessSource, Usage};
use crate::error::SourceError;

/// Test process entry for JSON serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestProcess {
    pub pid: u32,
    pub name: String,
    pub cmd_line: String,
    pub rss: u64,
    pub vms: u64,
    pub swap: u64,
    pub cpu_percent: f64,
    pub threads: i32,
    /// Number of samples after which the process reports itself gone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exits_after: Option<u32>,
}

/// Root structure for test data JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestData {
    pub version: String,
    pub generated_at: String,
    pub processes: Vec<TestProcess>,
}

/// Load test data from JSON file.
pub fn load_test_data_from_file(path: &Path) -> Result<TestData, SourceError> {
    debug!("Loading test data from: {}", path.display());

    let content = fs::read_to_string(path)?;
    let test_data: TestData = serde_json::from_str(&content)
        .map_err(|e| SourceError::Parse(format!("failed to parse test data JSON: {}", e)))?;

    info!(
        "Loaded test data version {} from {} ({} processes)",
        test_data.version,
        test_data.generated_at,
        test_data.processes.len()
    );

    Ok(test_data)
}

/// Pids whose simulated exit has been observed, shared with handles.
type ExitedSet = Arc<Mutex<HashSet<u32>>>;

/// Process source backed by `TestData`.
///
/// Once a process reaches its `exits_after` limit it is gone for good: it
/// drops out of enumeration and can no longer be opened.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    processes: Arc<Vec<TestProcess>>,
    exited: ExitedSet,
}

impl SyntheticSource {
    pub fn new(data: TestData) -> Self {
        Self {
            processes: Arc::new(data.processes),
            exited: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn has_exited(&self, pid: u32) -> bool {
        lock_exited(&self.exited).contains(&pid)
    }

    pub fn from_file(path: &Path) -> Result<Self, SourceError> {
        Ok(Self::new(load_test_data_from_file(path)?))
    }
}

impl ProcessSource for SyntheticSource {
    fn enumerate(&self) -> Result<Vec<ProcessRecord>, SourceError> {
        Ok(self
            .processes
            .iter()
            .filter(|p| !self.has_exited(p.pid))
            .map(|p| ProcessRecord {
                pid: p.pid,
                name: p.name.clone(),
                cmd_line: p.cmd_line.clone(),
            })
            .collect())
    }

    fn open(&self, pid: u32) -> Result<Box<dyn ProcessHandle>, SourceError> {
        let process = self
            .processes
            .iter()
            .find(|p| p.pid == pid && !self.has_exited(pid))
            .cloned()
            .ok_or(SourceError::NotFound(pid))?;

        Ok(Box::new(SyntheticHandle {
            process,
            samples_taken: 0,
            exited: Arc::clone(&self.exited),
        }))
    }
}

fn lock_exited(exited: &ExitedSet) -> std::sync::MutexGuard<'_, HashSet<u32>> {
    exited.lock().unwrap_or_else(|e| e.into_inner())
}

struct SyntheticHandle {
    process: TestProcess,
    samples_taken: u32,
    exited: ExitedSet,
}

impl SyntheticHandle {
    /// Checks the exit limit and records the exit in the source.
    fn exited(&self) -> bool {
        let pid = self.process.pid;
        let mut exited = lock_exited(&self.exited);
        if exited.contains(&pid) {
            return true;
        }
        let reached = self
            .process
            .exits_after
            .is_some_and(|limit| self.samples_taken >= limit);
        if reached {
            exited.insert(pid);
        }
        reached
    }
}

impl ProcessHandle for SyntheticHandle {
    fn pid(&self) -> u32 {
        self.process.pid
    }

    fn probe(&self) -> Result<(), SourceError> {
        if self.exited() {
            return Err(SourceError::unavailable(self.process.pid, "no longer running"));
        }
        Ok(())
    }

    fn sample(&mut self) -> Result<Usage, SourceError> {
        self.probe()?;
        self.samples_taken += 1;

        let mut rng = rand::thread_rng();
        let p = &self.process;
        Ok(Usage {
            resident_memory: jitter(&mut rng, p.rss),
            virtual_memory: jitter(&mut rng, p.vms),
            swap: jitter(&mut rng, p.swap),
            cpu_percent: (p.cpu_percent * rng.gen_range(0.5..1.5)).max(0.0),
            threads: p.threads,
        })
    }
}

/// Scales a baseline value by a random factor within +/-10%.
fn jitter(rng: &mut impl Rng, value: u64) -> u64 {
    let factor: f64 = rng.gen_range(0.90..1.10);
    (value as f64 * factor) as u64
}
