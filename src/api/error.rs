use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::services::pipeline::PipelineError;

pub const NO_FILE_MESSAGE: &str = "No file uploaded";
pub const PROCESSING_FAILED_MESSAGE: &str = "Failed to process image";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    pub fn no_file() -> Self {
        AppError::Pipeline(PipelineError::NoInput)
    }

    fn parts(self) -> (StatusCode, String, Option<String>) {
        match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg, None),
            AppError::Pipeline(e) => match e {
                PipelineError::NoInput => (StatusCode::BAD_REQUEST, NO_FILE_MESSAGE.to_string(), None),
                PipelineError::EngineTimeout { .. } => (
                    StatusCode::GATEWAY_TIMEOUT,
                    "Background removal timed out".to_string(),
                    Some(e.to_string()),
                ),
                PipelineError::EngineFailure { .. } | PipelineError::OutputMissing { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    PROCESSING_FAILED_MESSAGE.to_string(),
                    Some(e.to_string()),
                ),
                PipelineError::Io(io) => {
                    tracing::error!("Storage error while processing: {:?}", io);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        PROCESSING_FAILED_MESSAGE.to_string(),
                        Some("storage error".to_string()),
                    )
                }
            },
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                    None,
                )
            }
            AppError::Anyhow(e) => {
                tracing::error!("Anyhow error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                    None,
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, details) = self.parts();

        let body = match details {
            Some(details) => Json(json!({ "error": message, "details": details })),
            None => Json(json!({ "error": message })),
        };

        (status, body).into_response()
    }
}
