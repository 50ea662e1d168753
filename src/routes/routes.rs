//! Defines routes for log uploads and retrieval.
//!
//! ## Structure
//! - **Log endpoints**
//!   - `POST /logs`               — upload one or more log files as multipart
//!   - `GET  /logs/file/{id}`     — download a stored log file
//!   - `GET  /logs/bundle/{id}`   — list the files of a bundle
//!
//! - **Probes**
//!   - `GET /ping`, `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, ping, readyz},
        log_handlers::{get_bundle, get_file, upload_logs},
    },
    services::log_service::LogService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router carrying `LogService` as shared state.
///
/// The default body limit is raised to the largest request `POST /logs`
/// may accept; the handler enforces the precise limits.
pub fn routes(body_limit: u64) -> Router<LogService> {
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        .route("/ping", get(ping))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/logs",
            post(upload_logs).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/logs/file/{id}", get(get_file))
        .route("/logs/bundle/{id}", get(get_bundle))
}
