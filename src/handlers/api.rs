//! JSON API for listing processes and managing watches.
//!
//! - `GET /api/version`
//! - `GET /api/process`
//! - `GET /api/process/{id}?offset=N`
//! - `POST /api/process/{id}`
//! - `DELETE /api/process/{id}`

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, instrument};

use crate::error::WatchError;
use crate::monitor::{ProcessListing, WatchedProcessView};
use crate::state::SharedState;

/// Error response rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Maps a watch error to a response. `NotWatched` is a 404 on reads and
    /// a 400 when stopping.
    fn from_watch(err: WatchError, not_watched: StatusCode) -> Self {
        if err.is_validation() {
            debug!("Request rejected: {}", err);
        } else {
            error!("Request failed: {}", err);
        }

        let status = match &err {
            WatchError::NotFound(_) => StatusCode::NOT_FOUND,
            WatchError::AlreadyWatched(_) => StatusCode::BAD_REQUEST,
            WatchError::NotWatched(_) => not_watched,
            WatchError::InvalidOffset { .. } => StatusCode::BAD_REQUEST,
            WatchError::ProcessUnavailable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            WatchError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Query parameters of `GET /api/process/{id}`.
#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub offset: Option<String>,
}

fn parse_pid(id: &str) -> Result<u32, ApiError> {
    id.parse::<u32>().map_err(|e| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("unable to convert id to int: {}", e),
        )
    })
}

fn parse_offset(offset: Option<&str>) -> Result<Option<usize>, ApiError> {
    offset
        .map(|o| {
            o.parse::<usize>().map_err(|e| {
                ApiError::new(
                    StatusCode::BAD_REQUEST,
                    format!("offset must be a non-negative integer: {}", e),
                )
            })
        })
        .transpose()
}

/// Handler for `GET /api/version`.
pub async fn version_handler(State(state): State<SharedState>) -> Json<Value> {
    state.record_http_request();
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

/// Handler for `GET /api/process`: all cached processes with watch flags.
#[instrument(skip(state))]
pub async fn list_processes_handler(
    State(state): State<SharedState>,
) -> Json<Vec<ProcessListing>> {
    state.record_http_request();
    let processes = state.monitor.list_processes().await;
    debug!("Returning {} processes", processes.len());
    Json(processes)
}

/// Handler for `GET /api/process/{id}`: samples of a watched process.
#[instrument(skip(state, query))]
pub async fn get_process_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<WatchedProcessView>, ApiError> {
    state.record_http_request();
    let pid = parse_pid(&id)?;
    let offset = parse_offset(query.offset.as_deref())?;

    state
        .monitor
        .get_stats(pid, offset)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_watch(e, StatusCode::NOT_FOUND))
}

/// Handler for `POST /api/process/{id}`: starts a watch.
#[instrument(skip(state))]
pub async fn start_watch_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.record_http_request();
    let pid = parse_pid(&id)?;

    state
        .monitor
        .start_watch(pid)
        .await
        .map_err(|e| ApiError::from_watch(e, StatusCode::BAD_REQUEST))?;

    Ok(Json(json!({ "msg": format!("watch started for pid '{}'", pid) })))
}

/// Handler for `DELETE /api/process/{id}`: stops a watch.
#[instrument(skip(state))]
pub async fn stop_watch_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.record_http_request();
    let pid = parse_pid(&id)?;

    state
        .monitor
        .stop_watch(pid)
        .await
        .map_err(|e| ApiError::from_watch(e, StatusCode::BAD_REQUEST))?;

    Ok(Json(json!({ "msg": format!("watch stopped for pid '{}'", pid) })))
}
