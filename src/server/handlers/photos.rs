//! Photo upload, listing, serving and on-demand operations.

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use super::MessageResponse;
use crate::error::Error;
use crate::server::error::{ApiError, ApiResult};
use crate::server::state::AppState;

/// Multipart field carrying the upload.
const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub filename: String,
    pub id: i64,
}

/// One entry of the photo list.
#[derive(Debug, Serialize)]
pub struct PhotoEntry {
    pub filename: String,
    /// URL of the original.
    pub path: String,
    pub converted: bool,
    pub display_count: i64,
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::BadRequest(e.body_text())
    }
}

/// POST /upload
pub async fn upload_photo(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<UploadResponse>> {
    let mut multipart = multipart.map_err(|_| ApiError::BadRequest("No file part".to_string()))?;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(ApiError::BadRequest("No selected file".to_string()));
        }

        let bytes = field.bytes().await.map_err(multipart_error)?;
        let photo = state.library.ingest(&filename, &bytes).await?;

        return Ok(Json(UploadResponse {
            message: "File uploaded successfully".to_string(),
            filename: photo.filename,
            id: photo.id,
        }));
    }

    Err(ApiError::BadRequest("No file part".to_string()))
}

/// GET /photos/list
pub async fn list_photos(State(state): State<AppState>) -> ApiResult<Json<Vec<PhotoEntry>>> {
    let photos = state.library.db().list()?;
    tracing::debug!(count = photos.len(), "Listed photos");

    Ok(Json(
        photos
            .into_iter()
            .map(|photo| PhotoEntry {
                path: format!("/photos/originals/{}", photo.filename),
                filename: photo.filename,
                converted: photo.converted,
                display_count: photo.display_count,
            })
            .collect(),
    ))
}

/// DELETE /photos/delete/{filename}
pub async fn delete_photo(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    if state.library.delete(&filename).await? {
        Ok(Json(MessageResponse::new(format!("Deleted {}", filename))))
    } else {
        Err(ApiError::NotFound(filename))
    }
}

/// GET /photos/originals/{filename}
pub async fn serve_original(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let path = state.library.original_path(&filename)?;
    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ApiError::NotFound(filename.clone()),
        _ => ApiError::from(Error::Io(e)),
    })?;

    Ok(([(header::CONTENT_TYPE, content_type_for(&filename))], bytes))
}

/// POST /photos/convert/{filename}
pub async fn convert_photo(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let photo = state.library.convert(&filename).await?;
    Ok(Json(MessageResponse::new(format!("Converted {}", photo.filename))))
}

/// POST /photos/display/{filename}
pub async fn display_photo(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let photo = state.library.display(&filename).await?;
    Ok(Json(MessageResponse::new(format!("Displayed {}", photo.filename))))
}

fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "bmp" => "image/bmp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
