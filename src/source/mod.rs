//! Process inspection collaborators.
//!
//! The watch engine never touches the operating system directly. It asks a
//! `ProcessSource` for the process list and for per-process handles, and it
//! samples through the `ProcessHandle` it was given. Two implementations ship
//! with the crate:
//! - `procfs`: reads the Linux /proc filesystem
//! - `synthetic`: serves processes from a JSON test data file

pub mod procfs;
pub mod synthetic;

use serde::{Deserialize, Serialize};

use crate::error::SourceError;

pub use procfs::ProcfsSource;
pub use synthetic::SyntheticSource;

/// One process as seen by an enumeration pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub name: String,
    pub cmd_line: String,
}

/// Raw resource usage of a process at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Usage {
    pub resident_memory: u64,
    pub virtual_memory: u64,
    pub swap: u64,
    pub cpu_percent: f64,
    pub threads: i32,
}

/// Enumerates processes and opens handles to individual processes.
///
/// Calls may block on I/O. Enumeration is best-effort: processes that cannot
/// be fully resolved are left out instead of failing the whole call.
pub trait ProcessSource: Send + Sync {
    fn enumerate(&self) -> Result<Vec<ProcessRecord>, SourceError>;

    fn open(&self, pid: u32) -> Result<Box<dyn ProcessHandle>, SourceError>;
}

/// Handle to a single process, owned by the watch that opened it.
pub trait ProcessHandle: Send {
    fn pid(&self) -> u32;

    /// Liveness check.
    fn probe(&self) -> Result<(), SourceError>;

    /// CPU percent is measured against the previous call on the same handle,
    /// so the first sample reports 0.0.
    fn sample(&mut self) -> Result<Usage, SourceError>;
}
