//! Serves published benchmark results from the runs directory

use axum::{
    body::Body,
    extract::{Path, State as AxumState},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::path::{Component, PathBuf};
use tracing::debug;

use crate::SharedState;

/// GET /runs/{*path}
pub async fn serve_run_file(
    AxumState(state): AxumState<SharedState>,
    Path(path): Path<String>,
) -> Response {
    let Some(relative) = sanitize(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut file = state.config.runs_dir().join(relative);
    if tokio::fs::metadata(&file).await.is_ok_and(|m| m.is_dir()) {
        file.push("index.html");
    }

    match tokio::fs::read(&file).await {
        Ok(content) => {
            let mime = mime_guess::from_path(&file).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                Body::from(content),
            )
                .into_response()
        }
        Err(e) => {
            debug!("No result file {}: {}", file.display(), e);
            (StatusCode::NOT_FOUND, "Not Found").into_response()
        }
    }
}

/// Only plain path segments; anything that could climb out is refused.
fn sanitize(path: &str) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in std::path::Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(segment) => clean.push(segment),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(clean)
}
