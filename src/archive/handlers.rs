use super::{ArchiveError, ArchiveStatus};
use crate::AppState;
use crate::library::handlers::{auth_failure, error_response};
use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::error;

#[derive(Deserialize)]
pub(crate) struct StartArchiveRequest {
    filenames: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartArchiveResponse {
    success: bool,
    job_id: String,
    url: String,
}

#[axum::debug_handler]
pub async fn start_archive_handler(
    State(app_state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(request): Json<StartArchiveRequest>,
) -> Response {
    let principal = match app_state.auth.authenticate(&headers) {
        Ok(principal) => principal,
        Err(e) => return auth_failure(e),
    };

    match app_state.archives.start(&principal, request.filenames).await {
        Ok(job_id) => {
            let url = format!("/api/archives/{}", job_id);
            Json(StartArchiveResponse {
                success: true,
                job_id,
                url,
            })
            .into_response()
        }
        Err(ArchiveError::EmptySelection) => {
            error_response(StatusCode::BAD_REQUEST, "No files selected")
        }
        Err(e) => {
            error!("Failed to start archive job for {}: {}", principal, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to start archive")
        }
    }
}

/// Polling and download share one endpoint: 404 while the job is unknown,
/// 202 while the marker says packing is underway, otherwise the finished ZIP
/// with range support for resumable downloads.
pub async fn fetch_archive_handler(
    State(app_state): State<AppState>,
    Path(job_id): Path<String>,
    request: Request,
) -> Response {
    let principal = match app_state.auth.authenticate(request.headers()) {
        Ok(principal) => principal,
        Err(e) => return auth_failure(e),
    };

    match app_state.archives.status(&principal, &job_id).await {
        ArchiveStatus::NotFound => error_response(StatusCode::NOT_FOUND, "Archive not found"),
        ArchiveStatus::InProgress => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "in-progress" })),
        )
            .into_response(),
        ArchiveStatus::Ready(path) => match ServeFile::new(&path).oneshot(request).await {
            Ok(response) => response.into_response(),
            Err(e) => {
                error!("Failed to serve archive {:?}: {}", path, e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to serve archive")
            }
        },
    }
}
