//! pidstat: watch processes and sample their resource usage over HTTP.
//!
//! A [`monitor::ProcessMonitor`] keeps a periodically refreshed process
//! list and a registry of watches. Each watch samples one process on a
//! fixed interval until it is stopped or the process becomes unavailable.

pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod monitor;
pub mod registry;
pub mod source;
pub mod state;
pub mod watch;

pub use error::{SourceError, WatchError};
pub use monitor::{MonitorOptions, ProcessMonitor};
