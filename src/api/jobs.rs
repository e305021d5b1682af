//! Jobs API endpoints

use axum::{
    Json,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::SharedState;
use crate::job::Job;

/// Query parameters for job listing
#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    /// Filter by PR head owner (requires `branch`)
    pub owner: Option<String>,
    /// Filter by PR branch (requires `owner`)
    pub branch: Option<String>,
    /// Number of items (default: 50, max: 100)
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<Job>,
    pub total: usize,
    pub limit: i64,
}

/// GET /api/jobs - Recent jobs, optionally for one owner/branch
pub async fn get_jobs(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<JobsQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(50).clamp(1, 100);

    let result = match (&params.owner, &params.branch) {
        (Some(owner), Some(branch)) => {
            state
                .job_store
                .get_jobs_by_identity(owner, branch, limit)
                .await
        }
        (None, None) => state.job_store.get_recent_jobs(limit).await,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "owner and branch must be given together"})),
            )
                .into_response();
        }
    };

    match result {
        Ok(jobs) => Json(JobsResponse {
            total: jobs.len(),
            jobs,
            limit,
        })
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

/// GET /api/jobs/{id} - Get a specific job by ID
pub async fn get_job(
    AxumState(state): AxumState<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.job_store.get_job(&id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Job not found"})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

/// POST /api/jobs/{id}/cancel - Stop a queued or running job
pub async fn cancel_job(
    AxumState(state): AxumState<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let job = match state.job_store.get_job(&id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "Job not found"})),
            )
                .into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };

    if job.state.is_terminal() {
        return (
            StatusCode::CONFLICT,
            Json(json!({"error": format!("Job already finished ({})", job.state)})),
        )
            .into_response();
    }

    if state.dispatcher.cancel(&id) {
        (
            StatusCode::ACCEPTED,
            Json(json!({"status": "cancelling", "job_id": id})),
        )
            .into_response()
    } else {
        (
            StatusCode::CONFLICT,
            Json(json!({"error": "Job is not running"})),
        )
            .into_response()
    }
}
