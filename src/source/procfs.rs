//! Process source backed by the Linux /proc filesystem.
//!
//! Enumeration reads `comm` and `cmdline` of every numeric /proc entry in
//! parallel. Handles read `stat` for liveness and CPU time and `status` for
//! memory and thread counts.

use once_cell::sync::Lazy;
use rayon::prelude::*;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::trace;

use super::{ProcessHandle, ProcessRecord, ProcessSource, Usage};
use crate::error::SourceError;

/// Default mount point of procfs.
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Clock ticks per second used by utime/stime in /proc/<pid>/stat.
static CLOCK_TICKS: Lazy<f64> = Lazy::new(clock_ticks);

#[cfg(unix)]
fn clock_ticks() -> f64 {
    // SAFETY: sysconf only reads a system constant.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as f64
    } else {
        100.0
    }
}

#[cfg(not(unix))]
fn clock_ticks() -> f64 {
    100.0
}

/// Process source reading from a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcfsSource {
    root: PathBuf,
}

impl ProcfsSource {
    pub fn new() -> Self {
        Self::with_root(DEFAULT_PROC_ROOT)
    }

    /// Uses a different procfs root (tests point this at a fake tree).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for ProcfsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for ProcfsSource {
    fn enumerate(&self) -> Result<Vec<ProcessRecord>, SourceError> {
        let pids = collect_pids(&self.root)?;

        let mut records: Vec<ProcessRecord> = pids
            .par_iter()
            .filter_map(|&pid| {
                let proc_path = self.root.join(pid.to_string());
                let record = read_record(&proc_path, pid);
                if record.is_none() {
                    trace!("Skipping process {}: name or cmdline unreadable", pid);
                }
                record
            })
            .collect();

        records.sort_unstable_by_key(|r| r.pid);
        Ok(records)
    }

    fn open(&self, pid: u32) -> Result<Box<dyn ProcessHandle>, SourceError> {
        let proc_path = self.root.join(pid.to_string());
        if !proc_path.is_dir() {
            return Err(SourceError::NotFound(pid));
        }
        Ok(Box::new(ProcfsHandle::new(pid, proc_path)))
    }
}

/// Scans the procfs root for numeric PID directories.
fn collect_pids(root: &Path) -> Result<Vec<u32>, SourceError> {
    let mut out = Vec::new();
    for entry in fs::read_dir(root)?.flatten() {
        let name = entry.file_name();
        let name = match name.to_str() {
            Some(v) => v,
            None => continue,
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if let Ok(pid) = name.parse::<u32>() {
            out.push(pid);
        }
    }
    Ok(out)
}

fn read_record(proc_path: &Path, pid: u32) -> Option<ProcessRecord> {
    let cmd_line = read_cmdline(proc_path)?;
    let name = read_process_name(proc_path)?;
    Some(ProcessRecord {
        pid,
        name,
        cmd_line,
    })
}

/// Reads process name from comm file or extracts it from cmdline.
fn read_process_name(proc_path: &Path) -> Option<String> {
    if let Ok(s) = fs::read_to_string(proc_path.join("comm")) {
        let t = s.trim();
        if !t.is_empty() {
            return Some(t.into());
        }
    }

    let content = fs::read(proc_path.join("cmdline")).ok()?;
    let first = content.split(|&b| b == 0u8).next()?;
    let first = std::str::from_utf8(first).ok()?;
    Path::new(first)
        .file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
}

/// Reads the NUL separated argument vector as a single space separated line.
/// Kernel threads have an empty cmdline, which is not an error.
fn read_cmdline(proc_path: &Path) -> Option<String> {
    let content = fs::read(proc_path.join("cmdline")).ok()?;
    let args: Vec<String> = content
        .split(|&b| b == 0u8)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect();
    Some(args.join(" "))
}

/// Fields of /proc/<pid>/stat the handle cares about.
#[derive(Debug, Clone, Copy, PartialEq)]
struct StatFields {
    state: char,
    utime: u64,
    stime: u64,
}

/// Parses /proc/<pid>/stat. The comm field may contain spaces and
/// parentheses, so fields are counted from the last ')'.
fn parse_stat(content: &str) -> Result<StatFields, SourceError> {
    let close = content
        .rfind(')')
        .ok_or_else(|| SourceError::Parse("missing ')' in stat".to_string()))?;
    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();

    // rest[0] is field 3 (state); utime and stime are fields 14 and 15
    if rest.len() < 13 {
        return Err(SourceError::Parse(format!(
            "invalid stat format: expected at least 15 fields, got {}",
            rest.len() + 2
        )));
    }

    let state = rest[0]
        .chars()
        .next()
        .ok_or_else(|| SourceError::Parse("empty state field".to_string()))?;
    let utime = rest[11]
        .parse::<u64>()
        .map_err(|e| SourceError::Parse(format!("failed to parse utime: {}", e)))?;
    let stime = rest[12]
        .parse::<u64>()
        .map_err(|e| SourceError::Parse(format!("failed to parse stime: {}", e)))?;

    Ok(StatFields {
        state,
        utime,
        stime,
    })
}

/// Memory and thread fields of /proc/<pid>/status, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct StatusFields {
    rss: u64,
    vms: u64,
    swap: u64,
    threads: i32,
}

/// Parses /proc/<pid>/status. Kernel threads have no Vm* lines; those
/// values stay zero. A missing Threads line is an error.
fn parse_status(content: &str) -> Result<StatusFields, SourceError> {
    let mut fields = StatusFields::default();
    let mut threads = None;

    for line in content.lines() {
        if let Some(v) = line.strip_prefix("VmRSS:") {
            fields.rss = parse_kb_value(v).unwrap_or(0) * 1024;
        } else if let Some(v) = line.strip_prefix("VmSize:") {
            fields.vms = parse_kb_value(v).unwrap_or(0) * 1024;
        } else if let Some(v) = line.strip_prefix("VmSwap:") {
            fields.swap = parse_kb_value(v).unwrap_or(0) * 1024;
        } else if let Some(v) = line.strip_prefix("Threads:") {
            threads = v.trim().parse::<i32>().ok();
        }
    }

    fields.threads =
        threads.ok_or_else(|| SourceError::Parse("missing Threads in status".to_string()))?;
    Ok(fields)
}

/// Parses kilobyte values from status lines ("   1234 kB").
fn parse_kb_value(v: &str) -> Option<u64> {
    v.split_whitespace().next()?.parse().ok()
}

/// CPU time observed at a given instant, used for percent deltas.
#[derive(Debug, Clone, Copy)]
struct CpuMark {
    cpu_seconds: f64,
    at: Instant,
}

/// Handle to one /proc/<pid> directory.
pub struct ProcfsHandle {
    pid: u32,
    proc_path: PathBuf,
    last_cpu: Option<CpuMark>,
}

impl ProcfsHandle {
    fn new(pid: u32, proc_path: PathBuf) -> Self {
        Self {
            pid,
            proc_path,
            last_cpu: None,
        }
    }

    fn read(&self, file: &str) -> Result<String, SourceError> {
        fs::read_to_string(self.proc_path.join(file)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SourceError::unavailable(self.pid, "no longer running"),
            _ => SourceError::Io(e),
        })
    }

    fn read_stat(&self) -> Result<StatFields, SourceError> {
        parse_stat(&self.read("stat")?)
    }

    /// Percent of one CPU used since the previous call.
    fn cpu_percent(&mut self, stat: &StatFields) -> f64 {
        let now = Instant::now();
        let cpu_seconds = (stat.utime + stat.stime) as f64 / *CLOCK_TICKS;

        let mut percent = 0.0;
        if let Some(prev) = self.last_cpu {
            let dt = now.duration_since(prev.at).as_secs_f64();
            let delta_cpu = cpu_seconds - prev.cpu_seconds;
            if dt > 0.0 && delta_cpu > 0.0 {
                percent = (delta_cpu / dt) * 100.0;
            }
        }

        self.last_cpu = Some(CpuMark {
            cpu_seconds,
            at: now,
        });
        percent
    }
}

impl ProcessHandle for ProcfsHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn probe(&self) -> Result<(), SourceError> {
        let stat = self.read_stat()?;
        match stat.state {
            'Z' => Err(SourceError::unavailable(self.pid, "zombie")),
            'X' | 'x' => Err(SourceError::unavailable(self.pid, "dead")),
            _ => Ok(()),
        }
    }

    fn sample(&mut self) -> Result<Usage, SourceError> {
        let status = parse_status(&self.read("status")?)?;
        let stat = self.read_stat()?;
        let cpu_percent = self.cpu_percent(&stat);

        Ok(Usage {
            resident_memory: status.rss,
            virtual_memory: status.vms,
            swap: status.swap,
            cpu_percent,
            threads: status.threads,
        })
    }
}
