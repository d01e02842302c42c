use super::{AlbumError, AlbumSummary};
use crate::AppState;
use crate::library::handlers::{auth_failure, error_response};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Deserialize)]
pub(crate) struct CreateAlbumRequest {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MemberRequest {
    image_path: String,
}

#[derive(Serialize)]
struct AlbumListResponse {
    success: bool,
    albums: Vec<AlbumSummary>,
}

#[derive(Serialize)]
struct AlbumImagesResponse {
    success: bool,
    images: Vec<String>,
}

fn album_error_response(context: &str, e: AlbumError) -> Response {
    match e {
        AlbumError::NotFound => error_response(StatusCode::NOT_FOUND, "Album not found"),
        AlbumError::AlreadyExists => {
            error_response(StatusCode::CONFLICT, "Album already exists")
        }
        AlbumError::AlreadyMember => {
            error_response(StatusCode::CONFLICT, "Image is already in the album")
        }
        AlbumError::InvalidName => error_response(StatusCode::BAD_REQUEST, "Invalid album name"),
        e => {
            error!("{}: {}", context, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Album operation failed")
        }
    }
}

#[axum::debug_handler]
pub async fn list_albums_handler(State(app_state): State<AppState>, headers: HeaderMap) -> Response {
    let principal = match app_state.auth.authenticate(&headers) {
        Ok(principal) => principal,
        Err(e) => return auth_failure(e),
    };

    match app_state.albums.list_albums(&principal).await {
        Ok(albums) => Json(AlbumListResponse {
            success: true,
            albums,
        })
        .into_response(),
        Err(e) => album_error_response("Failed to list albums", e),
    }
}

#[axum::debug_handler]
pub async fn create_album_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateAlbumRequest>,
) -> Response {
    let principal = match app_state.auth.authenticate(&headers) {
        Ok(principal) => principal,
        Err(e) => return auth_failure(e),
    };

    match app_state.albums.create(&principal, &request.name).await {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(e) => album_error_response("Failed to create album", e),
    }
}

#[axum::debug_handler]
pub async fn delete_album_handler(
    State(app_state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let principal = match app_state.auth.authenticate(&headers) {
        Ok(principal) => principal,
        Err(e) => return auth_failure(e),
    };

    match app_state.albums.delete(&principal, &name).await {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(e) => album_error_response("Failed to delete album", e),
    }
}

#[axum::debug_handler]
pub async fn list_album_handler(
    State(app_state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    let principal = match app_state.auth.authenticate(&headers) {
        Ok(principal) => principal,
        Err(e) => return auth_failure(e),
    };

    match app_state.albums.list_members(&principal, &name).await {
        Ok(images) => Json(AlbumImagesResponse {
            success: true,
            images,
        })
        .into_response(),
        Err(e) => album_error_response("Failed to list album members", e),
    }
}

#[axum::debug_handler]
pub async fn add_album_member_handler(
    State(app_state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<MemberRequest>,
) -> Response {
    let principal = match app_state.auth.authenticate(&headers) {
        Ok(principal) => principal,
        Err(e) => return auth_failure(e),
    };

    match app_state
        .albums
        .add_member(&principal, &name, &request.image_path)
        .await
    {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(e) => album_error_response("Failed to add album member", e),
    }
}

#[axum::debug_handler]
pub async fn remove_album_member_handler(
    State(app_state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<MemberRequest>,
) -> Response {
    let principal = match app_state.auth.authenticate(&headers) {
        Ok(principal) => principal,
        Err(e) => return auth_failure(e),
    };

    match app_state
        .albums
        .remove_member(&principal, &name, &request.image_path)
        .await
    {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(e) => album_error_response("Failed to remove album member", e),
    }
}
