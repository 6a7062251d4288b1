use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// An image written to the input holding directory, awaiting processing.
#[derive(Debug, Clone, Serialize)]
pub struct UploadedAsset {
    /// Generated name, e.g. `1718000000123.jpg`
    pub filename: String,
    /// `filename` without its extension
    pub base_name: String,
    pub path: PathBuf,
    pub mime_type: String,
    pub extension: String,
    pub size: u64,
}

/// The background-removed PNG produced for one upload.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedAsset {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Correlates one upload with its output for the duration of a single call.
#[derive(Debug, Clone)]
pub struct ProcessingRequest {
    pub id: String,
    started: Instant,
}

impl ProcessingRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            started: Instant::now(),
        }
    }

    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
