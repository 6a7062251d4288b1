use crate::api::error::AppError;
use crate::api::middleware::request_id::REQUEST_ID_HEADER;
use crate::models::{ProcessingRequest, UploadedAsset};
use crate::services::storage::describe_upload;
use crate::utils::validation::{
    as_validation_error, validate_file_size, validate_image_upload, validate_not_empty,
};
use axum::{
    Json,
    extract::{Multipart, State, multipart::Field},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use utoipa::ToSchema;

/// Multipart field carrying the image
pub const UPLOAD_FIELD: &str = "image";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    /// `/processed/<name>.png`, or absolute when a public base URL is configured
    pub image_url: String,
    /// Milliseconds spent in the pipeline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = Multipart, description = "Single image under the `image` field"),
    responses(
        (status = 200, description = "Background removed", body = UploadResponse),
        (status = 400, description = "No file or invalid file", body = ErrorResponse),
        (status = 413, description = "File too large", body = ErrorResponse),
        (status = 500, description = "Background removal failed", body = ErrorResponse),
        (status = 504, description = "Engine timed out", body = ErrorResponse)
    ),
    tag = "images"
)]
pub async fn upload_image(
    State(state): State<crate::AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let request = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ProcessingRequest::new)
        .unwrap_or_else(ProcessingRequest::generate);

    // The stored file stays guarded until the pipeline takes ownership of it
    let mut upload: Option<(UploadedAsset, TempPath)> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) || field.file_name().is_none() {
            continue;
        }
        if upload.is_some() {
            tracing::warn!("Ignoring extra '{}' part", UPLOAD_FIELD);
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(|c| c.to_string());
        let extension =
            validate_image_upload(&filename, content_type.as_deref()).map_err(rejection)?;

        let mime = content_type.unwrap_or_default();
        upload = Some(receive_file(&state, &mut field, &extension, &mime).await?);
    }

    let (upload, guard) = upload.ok_or_else(AppError::no_file)?;
    guard
        .keep()
        .map_err(|e| AppError::Internal(format!("Failed to keep upload: {}", e)))?;
    tracing::info!("Stored upload: {}", upload.path.display());

    let outcome = state.pipeline.process_upload(upload, request).await?;

    Ok(Json(UploadResponse {
        success: true,
        image_url: outcome.image_url,
        processing_time: Some(outcome.elapsed.as_millis() as u64),
    }))
}

/// Streams one multipart field into the upload directory, enforcing the size limit.
/// The returned guard removes the file unless it is explicitly kept.
async fn receive_file(
    state: &crate::AppState,
    field: &mut Field<'_>,
    extension: &str,
    mime: &str,
) -> Result<(UploadedAsset, TempPath), AppError> {
    let (path, mut file) = state.pipeline.storage().create_upload(extension).await?;
    let partial = TempPath::from_path(&path);

    let mut size = 0usize;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        size += chunk.len();
        validate_file_size(size, state.config.max_file_size).map_err(rejection)?;
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to write upload: {}", e)))?;
    }
    file.flush()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to write upload: {}", e)))?;
    drop(file);

    validate_not_empty(size).map_err(rejection)?;

    let asset = describe_upload(path, mime, extension, size as u64);
    Ok((asset, partial))
}

fn rejection(err: anyhow::Error) -> AppError {
    match as_validation_error(&err) {
        Some(v) if v.code == "FILE_TOO_LARGE" => AppError::PayloadTooLarge(v.message.clone()),
        Some(v) => AppError::BadRequest(v.message.clone()),
        None => AppError::Anyhow(err),
    }
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    let err_msg = e.to_string();
    if err_msg.contains("length limit exceeded") {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(err_msg)
    }
}
