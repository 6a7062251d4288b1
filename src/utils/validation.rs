use anyhow::{Result, anyhow};
use serde::Serialize;
use std::path::Path;
use utoipa::ToSchema;

/// Maximum file size: 20 MB
pub const MAX_FILE_SIZE: usize = 20 * 1024 * 1024; // 20 MB

/// Every accepted upload must declare a MIME type under this top-level type
pub const ALLOWED_MIME_PREFIX: &str = "image/";

/// Raster formats the engine accepts
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Limits published at /system/validation-rules so the upload page can check
/// files before sending them.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRules {
    pub max_file_size: usize,
    pub allowed_extensions: Vec<String>,
    pub allowed_mime_prefix: String,
}

impl ValidationRules {
    pub fn new(max_file_size: usize) -> Self {
        Self {
            max_file_size,
            allowed_extensions: ALLOWED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            allowed_mime_prefix: ALLOWED_MIME_PREFIX.to_string(),
        }
    }
}

/// Validates file size against maximum limit
pub fn validate_file_size(size: usize, max_size: usize) -> Result<()> {
    if size > max_size {
        return Err(anyhow!(ValidationError {
            code: "FILE_TOO_LARGE",
            message: format!(
                "File size {} bytes exceeds maximum allowed {} bytes ({} MB)",
                size,
                max_size,
                max_size / 1024 / 1024
            ),
        }));
    }
    Ok(())
}

/// Validates that the declared MIME type is an image
pub fn validate_mime_type(content_type: &str) -> Result<()> {
    let normalized = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    match normalized.parse::<mime::Mime>() {
        Ok(m) if m.type_() == mime::IMAGE => Ok(()),
        _ => Err(anyhow!(ValidationError {
            code: "INVALID_MIME_TYPE",
            message: format!(
                "Only image files may be uploaded (MIME type '{}' does not match)",
                content_type
            ),
        })),
    }
}

/// Returns the lower-cased extension if it is on the allow-list
pub fn validate_extension(filename: &str) -> Result<String> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Ok(ext);
    }

    Err(anyhow!(ValidationError {
        code: "UNSUPPORTED_EXTENSION",
        message: format!(
            "Only image files may be uploaded (extension '.{}' is not supported)",
            ext
        ),
    }))
}

/// Checks the declared MIME type and the extension of an incoming file part.
/// Returns the normalized extension the stored file should carry.
pub fn validate_image_upload(filename: &str, content_type: Option<&str>) -> Result<String> {
    tracing::info!(
        "Upload file info: {} ({})",
        filename,
        content_type.unwrap_or("unknown")
    );

    validate_mime_type(content_type.unwrap_or("application/octet-stream"))?;
    validate_extension(filename)
}

/// Rejects files that arrived without any bytes
pub fn validate_not_empty(size: usize) -> Result<()> {
    if size == 0 {
        return Err(anyhow!(ValidationError {
            code: "EMPTY_FILE",
            message: "File appears to be empty".to_string(),
        }));
    }
    Ok(())
}

/// Pulls the structured validation error back out of an `anyhow::Error`
pub fn as_validation_error(err: &anyhow::Error) -> Option<&ValidationError> {
    err.downcast_ref::<ValidationError>()
}
