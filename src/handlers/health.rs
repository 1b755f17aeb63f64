//! Health check endpoint handler.
//!
//! This module provides the `/health` endpoint handler that returns
//! process list refresh statistics and the active watches.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::cache::CacheStatus;
use crate::monitor::WatchSummary;
use crate::state::SharedState;

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");
    state.record_http_request();

    let cache = state.monitor.cache_status().await;
    let watches = state.monitor.watched().await;

    // Derive HTTP status from cache state
    let (status, message) = if cache.update_success && cache.last_updated.is_some() {
        (StatusCode::OK, "OK")
    } else if cache.last_updated.is_some() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "Process list refresh failed (serving stale data)",
        )
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Process list not available")
    };

    let body = format!(
        "{message}\n\n{}\n{}\nuptime: {}s, http requests: {}\n",
        render_refresh_table(&cache),
        render_watches(&watches),
        state.uptime_seconds(),
        state.http_requests()
    );

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        body,
    )
}

/// Renders refresh statistics as a plain-text table.
fn render_refresh_table(cache: &CacheStatus) -> String {
    let left_col = 26usize;
    let col_w = 12usize;
    let d = &cache.durations;

    let mut out = String::new();
    writeln!(
        out,
        "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
        "metric",
        "current",
        "average",
        "max",
        "min",
        left = left_col,
        col = col_w
    )
    .ok();
    writeln!(out, "{}", "-".repeat(left_col + 3 + (col_w + 3) * 4)).ok();
    writeln!(
        out,
        "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
        "refresh duration (s)",
        format!("{:.3}", d.last),
        format!("{:.3}", d.avg()),
        format!("{:.3}", d.max),
        format!("{:.3}", d.min),
        left = left_col,
        col = col_w
    )
    .ok();
    writeln!(out).ok();
    writeln!(out, "processes in list: {}", cache.process_count).ok();
    writeln!(out, "successful refreshes: {}", d.count).ok();
    writeln!(out, "failed refreshes: {}", cache.failed_updates).ok();
    out
}

/// Renders the active watches as a plain-text table.
fn render_watches(watches: &[WatchSummary]) -> String {
    let mut out = String::new();
    writeln!(out, "WATCHES ({})", watches.len()).ok();
    writeln!(out, "===========").ok();
    writeln!(
        out,
        "{:>8} | {:20} | {:>8} | {:>12} | {:>8}",
        "pid", "name", "samples", "rss (KB)", "cpu %"
    )
    .ok();
    writeln!(out, "{}", "-".repeat(68)).ok();

    for w in watches {
        let (rss_kb, cpu) = w
            .latest
            .map(|s| (s.resident_memory / 1024, s.cpu_percent))
            .unwrap_or((0, 0.0));
        writeln!(
            out,
            "{:>8} | {:20} | {:>8} | {:>12} | {:>8.2}",
            w.record.pid, w.record.name, w.sample_count, rss_kb, cpu
        )
        .ok();
    }
    out
}
