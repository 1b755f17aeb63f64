//! HTTP endpoint handlers for the service.
//!
//! This module provides handlers for all HTTP endpoints:
//! - `/api/...`: JSON process and watch API
//! - `/health`: Health check endpoint
//! - `/metrics`: Prometheus metrics endpoint
//! - `/doc`: Documentation endpoint

pub mod api;
pub mod doc;
pub mod health;
pub mod metrics;

use axum::{routing::get, Router};

use crate::state::SharedState;

// Re-export handlers
pub use api::{
    get_process_handler, list_processes_handler, start_watch_handler, stop_watch_handler,
    version_handler, ApiError,
};
pub use doc::doc_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;

/// Builds the HTTP router. /health and /metrics follow the config flags.
pub fn build_router(state: SharedState) -> Router {
    let mut app = Router::new()
        .route("/api/version", get(version_handler))
        .route("/api/process", get(list_processes_handler))
        .route(
            "/api/process/{id}",
            get(get_process_handler)
                .post(start_watch_handler)
                .delete(stop_watch_handler),
        )
        .route("/doc", get(doc_handler));

    if state.config.enable_health.unwrap_or(true) {
        app = app.route("/health", get(health_handler));
    }
    if state.config.enable_telemetry.unwrap_or(true) {
        app = app.route("/metrics", get(metrics_handler));
    }

    app.with_state(state)
}
