//! Error types for process inspection and the watch engine.
//!
//! `SourceError` is produced by the process collaborators, `WatchError` is what
//! callers of the monitor see.

use thiserror::Error;

/// Failure reported by a `ProcessSource` or `ProcessHandle`.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("process {0} does not exist")]
    NotFound(u32),

    #[error("process {pid} is unavailable: {reason}")]
    Unavailable { pid: u32, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("collector task failed: {0}")]
    Task(String),
}

impl SourceError {
    pub fn unavailable(pid: u32, reason: impl Into<String>) -> Self {
        SourceError::Unavailable {
            pid,
            reason: reason.into(),
        }
    }
}

/// Errors returned by the public monitor operations.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("pid '{0}' is not in process list")]
    NotFound(u32),

    #[error("pid '{0}' is already being watched")]
    AlreadyWatched(u32),

    #[error("pid '{0}' is not actively watched")]
    NotWatched(u32),

    #[error("pid '{pid}' is unavailable: {source}")]
    ProcessUnavailable {
        pid: u32,
        #[source]
        source: SourceError,
    },

    #[error("offset {offset} is out of range (history holds {len} samples)")]
    InvalidOffset { offset: usize, len: usize },

    #[error("monitor is shutting down")]
    ShuttingDown,
}

impl WatchError {
    /// True for errors caused by the request rather than by the system.
    pub fn is_validation(&self) -> bool {
        !matches!(self, WatchError::ProcessUnavailable { .. })
    }
}
