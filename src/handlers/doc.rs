//! Documentation endpoint handler.
//!
//! This module provides the `/doc` endpoint handler that displays
//! usage documentation for the service.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the /doc endpoint.
#[instrument(skip(state))]
pub async fn doc_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /doc request");
    state.record_http_request();

    let version = env!("CARGO_PKG_VERSION");
    let port = state.config.listen_port();
    let doc = format!(
        r#"PIDSTAT - DOCUMENTATION
=======================

VERSION: {version}
DESCRIPTION: Watch processes and sample their memory, CPU and thread usage

HTTP ENDPOINTS
--------------
GET    /api/version               - Service version (JSON)
GET    /api/process               - Cached process list with watch flags (JSON)
GET    /api/process/{{pid}}         - Samples of a watched process (JSON)
                                    ?offset=N returns samples from index N on
POST   /api/process/{{pid}}         - Start watching a process
DELETE /api/process/{{pid}}         - Stop watching a process
GET    /health                    - Health check (plain text)
GET    /metrics                   - Prometheus metrics
GET    /doc                       - This documentation (plain text)

SAMPLE FIELDS
-------------
rss        - Resident Set Size in bytes
vms        - Virtual memory size in bytes
swap       - Swapped out memory in bytes
cpu        - CPU usage in percent of one core since the previous sample
threads    - Number of threads
timestamp  - Capture time (RFC 3339, UTC)

AVAILABLE METRICS
-----------------
pidstat_processes_total                 - Processes in the cached list
pidstat_watched_processes               - Processes currently watched
pidstat_cache_update_duration_seconds   - Duration of the last list refresh
pidstat_cache_update_success            - Last list refresh succeeded (1/0)
pidstat_watch_*                         - Latest sample per watched process

CONFIGURATION
-------------
Config file locations (in order):
1. CLI specified: -c /path/to/config.yaml
2. System config: /etc/pidstat/pidstat.yaml
3. Current directory: ./pidstat.yaml

Key configuration options:
- port: HTTP listen port (default: 8787)
- bind: Bind address (default: 0.0.0.0)
- process_list_interval_secs: Process list refresh interval (default: 5)
- sample_interval_secs: Sampling interval of watched processes (default: 5)
- max_samples: Samples kept per watch, oldest dropped first (default: unbounded)

CLI COMMANDS
------------
pidstat                          - Start the service
pidstat check --all              - Validate system requirements
pidstat config -o pidstat.yaml   - Generate config file
pidstat generate-testdata        - Generate synthetic process data
pidstat --help                   - Show all CLI options

EXAMPLE USAGE
-------------
# Watch a process
curl -X POST http://localhost:{port}/api/process/1234

# Read its samples, skipping the first ten
curl http://localhost:{port}/api/process/1234?offset=10

# Stop watching
curl -X DELETE http://localhost:{port}/api/process/1234
"#
    );

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        doc,
    )
}
