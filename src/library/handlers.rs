use super::{ImageRecord, Library, LibraryError, ListQuery};
use crate::AppState;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

pub(crate) fn auth_failure(e: crate::auth::AuthError) -> Response {
    error_response(StatusCode::UNAUTHORIZED, &e.to_string())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    name: String,
    path: String,
    thumbnail: String,
}

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    file: UploadedFile,
}

#[derive(Serialize)]
struct CheckResponse {
    exists: bool,
}

#[derive(Deserialize)]
pub(crate) struct DeleteRequest {
    filename: String,
}

#[axum::debug_handler]
pub async fn list_images_handler(
    State(app_state): State<AppState>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Response {
    let principal = match app_state.auth.authenticate(&headers) {
        Ok(principal) => principal,
        Err(e) => return auth_failure(e),
    };

    // First read for a principal opportunistically backfills a legacy store
    Library::ensure_migrated(&app_state.library, &principal);

    let page = query.page.unwrap_or(1);
    let page_size = query
        .page_size
        .unwrap_or(app_state.config.storage.days_per_page);

    match app_state.library.list_page(&principal, page, page_size).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => {
            error!("Failed to list images for {}: {}", principal, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list images")
        }
    }
}

#[axum::debug_handler]
pub async fn check_image_handler(
    State(app_state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> Response {
    let principal = match app_state.auth.authenticate(&headers) {
        Ok(principal) => principal,
        Err(e) => return auth_failure(e),
    };

    if !app_state.library.is_valid_filename(&filename) {
        return error_response(StatusCode::BAD_REQUEST, "Invalid filename");
    }

    let exists = app_state.library.original_exists(&principal, &filename).await;
    Json(CheckResponse { exists }).into_response()
}

#[axum::debug_handler]
pub async fn upload_image_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let principal = match app_state.auth.authenticate(&headers) {
        Ok(principal) => principal,
        Err(e) => return auth_failure(e),
    };

    let mut upload: Option<(String, axum::body::Bytes)> = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("file") {
                    continue;
                }
                let Some(filename) = field.file_name().map(|f| f.to_string()) else {
                    return error_response(StatusCode::BAD_REQUEST, "File field has no filename");
                };
                if !app_state.library.is_valid_filename(&filename)
                    || !app_state.library.is_image(&filename)
                {
                    return error_response(StatusCode::BAD_REQUEST, "Invalid filename");
                }
                // Existence is checked before the body is consumed; an upload
                // can never overwrite a stored original
                if app_state.library.original_exists(&principal, &filename).await {
                    return error_response(StatusCode::CONFLICT, "File already exists");
                }
                match field.bytes().await {
                    Ok(data) => {
                        upload = Some((filename, data));
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read upload body: {}", e);
                        return error_response(StatusCode::BAD_REQUEST, "Failed to read upload");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Malformed multipart upload: {}", e);
                return error_response(StatusCode::BAD_REQUEST, "Malformed upload");
            }
        }
    }

    let Some((filename, data)) = upload else {
        return error_response(StatusCode::BAD_REQUEST, "No file uploaded");
    };

    match app_state.library.save_original(&principal, &filename, &data).await {
        Ok(_) => {}
        Err(LibraryError::AlreadyExists) => {
            return error_response(StatusCode::CONFLICT, "File already exists");
        }
        Err(LibraryError::InvalidPath) => {
            return error_response(StatusCode::BAD_REQUEST, "Invalid filename");
        }
        Err(e) => {
            error!("Failed to store upload {} for {}: {}", filename, principal, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store upload");
        }
    }

    // A thumbnail that cannot be generated is not fatal; the sweep retries it
    if let Err(e) = app_state.library.generate_thumbnail(&principal, &filename).await {
        warn!(
            "Thumbnail generation failed for {}/{}: {}",
            principal, filename, e
        );
    }

    let original_path = app_state.library.original_path(&principal, &filename);
    let shot_date = match app_state.library.extract_shot_date(&original_path).await {
        Ok(date) => date,
        Err(e) => {
            error!("Failed to derive shot date for {}: {}", filename, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to index upload");
        }
    };

    let record = ImageRecord {
        filename: filename.clone(),
        shot_date,
        upload_date: chrono::Utc::now(),
        original_path: app_state.library.original_ref(&principal, &filename),
        thumbnail_path: app_state.library.thumbnail_ref(&principal, &filename),
    };
    let file = UploadedFile {
        name: record.filename.clone(),
        path: record.original_path.clone(),
        thumbnail: record.thumbnail_path.clone(),
    };

    if let Err(e) = app_state.library.append_record(&principal, record).await {
        error!("Failed to index upload {} for {}: {}", filename, principal, e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to index upload");
    }

    Json(UploadResponse {
        success: true,
        file,
    })
    .into_response()
}

/// Deleting an image is the cross-cutting operation: the artifacts go first,
/// then the index entry, then every album reference to the filename.
#[axum::debug_handler]
pub async fn delete_image_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DeleteRequest>,
) -> Response {
    let principal = match app_state.auth.authenticate(&headers) {
        Ok(principal) => principal,
        Err(e) => return auth_failure(e),
    };

    match app_state
        .library
        .remove_artifacts(&principal, &request.filename)
        .await
    {
        Ok(()) => {}
        Err(LibraryError::NotFound) => {
            return error_response(StatusCode::NOT_FOUND, "Image not found");
        }
        Err(LibraryError::InvalidPath) => {
            return error_response(StatusCode::BAD_REQUEST, "Invalid filename");
        }
        Err(e) => {
            error!(
                "Failed to delete {} for {}: {}",
                request.filename, principal, e
            );
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete image");
        }
    }

    if let Err(e) = app_state
        .library
        .remove_record(&principal, &request.filename, None)
        .await
    {
        error!(
            "Failed to unindex {} for {}: {}",
            request.filename, principal, e
        );
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete image");
    }

    if let Err(e) = app_state
        .albums
        .prune_image(&principal, &request.filename)
        .await
    {
        error!(
            "Failed to prune album references to {} for {}: {}",
            request.filename, principal, e
        );
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete image");
    }

    Json(serde_json::json!({ "success": true })).into_response()
}

#[axum::debug_handler]
pub async fn serve_image_handler(
    State(app_state): State<AppState>,
    Path((principal, filename)): Path<(String, String)>,
) -> Response {
    if !app_state.library.is_valid_principal(&principal)
        || !app_state.library.is_valid_filename(&filename)
    {
        return error_response(StatusCode::BAD_REQUEST, "Invalid path");
    }

    let path = app_state.library.original_path(&principal, &filename);
    let content_type = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .to_string();
    serve_file(&path, &content_type).await
}

#[axum::debug_handler]
pub async fn serve_thumbnail_handler(
    State(app_state): State<AppState>,
    Path((principal, filename)): Path<(String, String)>,
) -> Response {
    if !app_state.library.is_valid_principal(&principal)
        || !app_state.library.is_valid_filename(&filename)
    {
        return error_response(StatusCode::BAD_REQUEST, "Invalid path");
    }

    // Thumbnails keep the original's filename but are always encoded as JPEG
    let path = app_state.library.thumbnail_path(&principal, &filename);
    serve_file(&path, "image/jpeg").await
}

async fn serve_file(path: &std::path::Path, content_type: &str) -> Response {
    use axum::body::Body;
    use tokio_util::io::ReaderStream;

    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to open file: {:?}: {}", path, e);
            return (StatusCode::NOT_FOUND, "File not found").into_response();
        }
    };

    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "public, max-age=31536000")
        .body(body)
        .unwrap()
}
