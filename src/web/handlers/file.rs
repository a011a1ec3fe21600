//! File handlers.

use std::sync::Arc;

use axum::{
    extract::{
        multipart::{Multipart, MultipartError, MultipartRejection},
        Query, State,
    },
    http::StatusCode,
    Json,
};

use crate::file::FileRecord;
use crate::web::dto::{IdQuery, UpdateFileRequest, ValidatedJson};
use crate::web::error::ApiError;
use crate::web::handlers::AppState;

/// Multipart field carrying the upload.
pub const FILE_FIELD: &str = "file";

/// Display name used when the upload has no filename.
pub const DEFAULT_UPLOAD_NAME: &str = "upload.bin";

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large(e.body_text())
    } else {
        tracing::warn!("Failed to read multipart data: {}", e);
        ApiError::bad_request(format!("invalid multipart data: {}", e.body_text()))
    }
}

/// POST /files - Upload a file.
///
/// Request body: multipart/form-data with a `file` field. Other fields are
/// ignored. Responds with the new id as plain text.
pub async fn create_file(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<String, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::bad_request(e.body_text()))?;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let name = field
            .file_name()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(DEFAULT_UPLOAD_NAME)
            .to_string();

        let mut staged = state.files.stage_upload().await?;
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            staged.write_chunk(&chunk).await?;
        }

        let id = state.files.insert(staged, &name).await?;
        return Ok(id.to_hex());
    }

    Err(ApiError::bad_request("missing file field"))
}

/// GET /files - List every file.
pub async fn list_files(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<FileRecord>>, ApiError> {
    Ok(Json(state.files.find_all().await?))
}

/// GET /files/down?id= - Fetch a file into the output directory.
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IdQuery>,
) -> Result<Json<FileRecord>, ApiError> {
    let record = state.files.find_one(query.require()?).await?;
    Ok(Json(record))
}

/// GET /files/info?id= - Get file metadata.
pub async fn file_info(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IdQuery>,
) -> Result<Json<FileRecord>, ApiError> {
    let record = state.files.find_info(query.require()?).await?;
    Ok(Json(record))
}

/// PUT /files/upd?id= - Rename a file.
pub async fn update_file(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IdQuery>,
    ValidatedJson(req): ValidatedJson<UpdateFileRequest>,
) -> Result<&'static str, ApiError> {
    state.files.update(&req.name, query.require()?).await?;
    Ok("file updated")
}

/// DELETE /files/del?id= - Delete a file.
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IdQuery>,
) -> Result<&'static str, ApiError> {
    state.files.delete(query.require()?).await?;
    Ok("file deleted")
}
