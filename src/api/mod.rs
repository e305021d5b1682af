//! HTTP handlers: webhook intake, job inspection and published results

pub mod jobs;
pub mod results;
pub mod stats;
pub mod webhook;

use axum::{Router, routing};

use crate::SharedState;

// Re-export handlers
pub use jobs::{cancel_job, get_job, get_jobs};
pub use results::serve_run_file;
pub use stats::status;
pub use webhook::handle_webhook;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/webhook", routing::post(handle_webhook))
        .route("/status", routing::get(status))
        .route("/api/jobs", routing::get(get_jobs))
        .route("/api/jobs/{id}", routing::get(get_job))
        .route("/api/jobs/{id}/cancel", routing::post(cancel_job))
        .route("/runs/{*path}", routing::get(serve_run_file))
        .with_state(state)
}
