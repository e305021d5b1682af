//! Server status endpoint

use axum::{Json, extract::State as AxumState, response::IntoResponse};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::warn;

use crate::SharedState;

/// GET /status - Server info and job counts per state
pub async fn status(AxumState(state): AxumState<SharedState>) -> impl IntoResponse {
    let by_state: BTreeMap<String, i64> = match state.job_store.count_by_state().await {
        Ok(counts) => counts.into_iter().collect(),
        Err(e) => {
            warn!("Failed to count jobs: {}", e);
            BTreeMap::new()
        }
    };

    Json(json!({
        "server": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at,
            "uptime_seconds": state.start_time.elapsed().as_secs(),
        },
        "jobs": {
            "pending": state.dispatcher.pending(),
            "by_state": by_state,
        }
    }))
}
