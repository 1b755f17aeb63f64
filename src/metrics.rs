//! Prometheus metrics definitions for pidstat.
//!
//! Gauges are filled at scrape time from the monitor state: one set of
//! service-level gauges plus the latest sample of every watched process.

use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::cache::CacheStatus;
use crate::monitor::WatchSummary;

/// Collection of Prometheus metrics exported on /metrics.
#[derive(Clone)]
pub struct ExporterMetrics {
    pub registry: Registry,

    pub processes_total: Gauge,
    pub watched_processes: Gauge,
    pub cache_update_duration: Gauge,
    pub cache_update_success: Gauge,
    pub scrape_duration: Gauge,

    // Latest sample per watched process
    pub rss: GaugeVec,
    pub vms: GaugeVec,
    pub swap: GaugeVec,
    pub cpu_percent: GaugeVec,
    pub threads: GaugeVec,
    pub samples: GaugeVec,

    // Serializes update + encode across concurrent scrapes
    scrape_lock: Arc<Mutex<()>>,
}

impl ExporterMetrics {
    /// Creates and registers all Prometheus metrics with a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let labels = &["pid", "name"];

        let processes_total = Gauge::new(
            "pidstat_processes_total",
            "Number of processes in the cached process list",
        )?;
        let watched_processes = Gauge::new(
            "pidstat_watched_processes",
            "Number of processes currently watched",
        )?;
        let cache_update_duration = Gauge::new(
            "pidstat_cache_update_duration_seconds",
            "Time spent on the last process list refresh",
        )?;
        let cache_update_success = Gauge::new(
            "pidstat_cache_update_success",
            "Whether the last process list refresh was successful (1) or failed (0)",
        )?;
        let scrape_duration = Gauge::new(
            "pidstat_scrape_duration_seconds",
            "Time spent serving the /metrics request",
        )?;

        let rss = GaugeVec::new(
            Opts::new(
                "pidstat_watch_rss_bytes",
                "Resident Set Size of a watched process (latest sample)",
            ),
            labels,
        )?;
        let vms = GaugeVec::new(
            Opts::new(
                "pidstat_watch_vms_bytes",
                "Virtual memory size of a watched process (latest sample)",
            ),
            labels,
        )?;
        let swap = GaugeVec::new(
            Opts::new(
                "pidstat_watch_swap_bytes",
                "Swapped out memory of a watched process (latest sample)",
            ),
            labels,
        )?;
        let cpu_percent = GaugeVec::new(
            Opts::new(
                "pidstat_watch_cpu_percent",
                "CPU usage of a watched process in percent (latest sample)",
            ),
            labels,
        )?;
        let threads = GaugeVec::new(
            Opts::new(
                "pidstat_watch_threads",
                "Thread count of a watched process (latest sample)",
            ),
            labels,
        )?;
        let samples = GaugeVec::new(
            Opts::new(
                "pidstat_watch_samples",
                "Number of retained samples of a watched process",
            ),
            labels,
        )?;

        registry.register(Box::new(processes_total.clone()))?;
        registry.register(Box::new(watched_processes.clone()))?;
        registry.register(Box::new(cache_update_duration.clone()))?;
        registry.register(Box::new(cache_update_success.clone()))?;
        registry.register(Box::new(scrape_duration.clone()))?;
        registry.register(Box::new(rss.clone()))?;
        registry.register(Box::new(vms.clone()))?;
        registry.register(Box::new(swap.clone()))?;
        registry.register(Box::new(cpu_percent.clone()))?;
        registry.register(Box::new(threads.clone()))?;
        registry.register(Box::new(samples.clone()))?;

        Ok(Self {
            registry,
            processes_total,
            watched_processes,
            cache_update_duration,
            cache_update_success,
            scrape_duration,
            rss,
            vms,
            swap,
            cpu_percent,
            threads,
            samples,
            scrape_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Updates every gauge and encodes the registry as one step, so two
    /// scrapes never interleave a reset with the other's values.
    pub fn render(
        &self,
        cache: &CacheStatus,
        watches: &[WatchSummary],
        started: Instant,
    ) -> Result<String, prometheus::Error> {
        let _guard = self.scrape_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.update(cache, watches);
        self.scrape_duration.set(started.elapsed().as_secs_f64());
        self.encode()
    }

    /// Resets per-process metrics so stopped watches disappear.
    pub fn reset(&self) {
        self.rss.reset();
        self.vms.reset();
        self.swap.reset();
        self.cpu_percent.reset();
        self.threads.reset();
        self.samples.reset();
    }

    /// Replaces all gauge values with the given state.
    pub fn update(&self, cache: &CacheStatus, watches: &[WatchSummary]) {
        self.reset();

        self.processes_total.set(cache.process_count as f64);
        self.watched_processes.set(watches.len() as f64);
        self.cache_update_duration.set(cache.update_duration_seconds);
        self.cache_update_success
            .set(if cache.update_success { 1.0 } else { 0.0 });

        for watch in watches {
            let pid = watch.record.pid.to_string();
            let labels = &[pid.as_str(), watch.record.name.as_str()];

            self.samples
                .with_label_values(labels)
                .set(watch.sample_count as f64);

            if let Some(sample) = &watch.latest {
                self.rss
                    .with_label_values(labels)
                    .set(sample.resident_memory as f64);
                self.vms
                    .with_label_values(labels)
                    .set(sample.virtual_memory as f64);
                self.swap.with_label_values(labels).set(sample.swap as f64);
                self.cpu_percent
                    .with_label_values(labels)
                    .set(sample.cpu_percent);
                self.threads
                    .with_label_values(labels)
                    .set(sample.threads as f64);
            }
        }
    }

    /// Encodes the registry in Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
