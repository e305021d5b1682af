//! Webhook handler for GitHub pull request events

use axum::{
    Json,
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::SharedState;
use crate::error::BenchError;
use crate::utils::verify_github_signature;
use crate::webhook::TRIGGER_ACTIONS;

/// Handles the GitHub webhook POST request.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.config.webhook_secret {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok());
        match signature {
            Some(signature) if verify_github_signature(secret, &body, signature) => {}
            Some(_) => {
                error!("Webhook signature verification failed");
                return StatusCode::UNAUTHORIZED.into_response();
            }
            None => {
                error!("Webhook secret configured, but no signature header supplied");
                return StatusCode::UNAUTHORIZED.into_response();
            }
        }
    }

    // Only handle "pull_request" events.
    let event_opt = headers.get("X-GitHub-Event").and_then(|v| v.to_str().ok());
    if event_opt != Some("pull_request") {
        info!("Not pull_request event; Received {:?} event", event_opt);
        return StatusCode::NO_CONTENT.into_response();
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            info!("Could not parse JSON body: {:?}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let action = payload.get("action").and_then(|a| a.as_str()).unwrap_or("");
    if !TRIGGER_ACTIONS.contains(&action) {
        debug!("Ignoring pull_request action {:?}", action);
        return StatusCode::NO_CONTENT.into_response();
    }

    match state.dispatcher.submit(payload).await {
        // The job runs in the background; answer GitHub right away
        Ok(submitted) => (
            StatusCode::ACCEPTED,
            Json(json!({ "job_id": submitted.job.id })),
        )
            .into_response(),
        Err(BenchError::MalformedEvent(msg)) => {
            warn!("Rejected pull_request event: {}", msg);
            (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
        }
        Err(e) => {
            error!("Failed to start job: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::orchestrator::tests::Harness;
    use crate::utils::sign;
    use crate::webhook::tests::sample_payload;
    use crate::{AppState, SharedState};
    use axum::http::HeaderValue;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Instant;

    fn state(h: &Harness, secret: Option<&str>) -> SharedState {
        let mut config = crate::test_support::config("bench.example.com", "8080", h.root.path());
        config.webhook_secret = secret.map(String::from);
        Arc::new(AppState {
            config: Arc::new(config),
            job_store: h.store.clone(),
            dispatcher: Dispatcher::new(h.orchestrator.clone(), h.store.clone(), 2),
            start_time: Instant::now(),
            started_at: Utc::now(),
        })
    }

    fn headers(event: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-github-event", HeaderValue::from_static(event));
        headers
    }

    #[tokio::test]
    async fn accepts_synchronize_and_records_job() {
        let h = Harness::new().await;
        h.accept_comments().await;
        let body = serde_json::to_vec(&sample_payload("alice", "feature-x", &h.comments_url())).unwrap();

        let response = handle_webhook(
            AxumState(state(&h, None)),
            headers("pull_request"),
            Bytes::from(body),
        )
        .await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(h.store.get_recent_jobs(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ignores_other_events_and_actions() {
        let h = Harness::new().await;
        let mut payload = sample_payload("alice", "feature-x", &h.comments_url());
        let push = handle_webhook(
            AxumState(state(&h, None)),
            headers("push"),
            Bytes::from(serde_json::to_vec(&payload).unwrap()),
        )
        .await;
        assert_eq!(push.status(), StatusCode::NO_CONTENT);

        payload["action"] = json!("closed");
        let closed = handle_webhook(
            AxumState(state(&h, None)),
            headers("pull_request"),
            Bytes::from(serde_json::to_vec(&payload).unwrap()),
        )
        .await;
        assert_eq!(closed.status(), StatusCode::NO_CONTENT);
        assert!(h.store.get_recent_jobs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_fields_are_a_bad_request() {
        let h = Harness::new().await;
        let body = json!({"action": "opened", "pull_request": {"head": {"ref": "x"}}});
        let response = handle_webhook(
            AxumState(state(&h, None)),
            headers("pull_request"),
            Bytes::from(serde_json::to_vec(&body).unwrap()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn signature_is_enforced_when_secret_is_set() {
        let h = Harness::new().await;
        h.accept_comments().await;
        let body = serde_json::to_vec(&sample_payload("alice", "feature-x", &h.comments_url())).unwrap();

        let unsigned = handle_webhook(
            AxumState(state(&h, Some("s3cret"))),
            headers("pull_request"),
            Bytes::from(body.clone()),
        )
        .await;
        assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);

        let mut signed_headers = headers("pull_request");
        signed_headers.insert(
            "x-hub-signature-256",
            HeaderValue::from_str(&sign("s3cret", &body)).unwrap(),
        );
        let signed = handle_webhook(
            AxumState(state(&h, Some("s3cret"))),
            signed_headers,
            Bytes::from(body),
        )
        .await;
        assert_eq!(signed.status(), StatusCode::ACCEPTED);
    }
}
