use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{NamedTempFile, TempPath};
use thiserror::Error;
use tracing::{Instrument, debug, error, info, warn};

use crate::config::RelayConfig;
use crate::models::{ProcessedAsset, ProcessingRequest, UploadedAsset};
use crate::services::cleanup::CleanupScheduler;
use crate::services::engine::{BackgroundRemover, EngineError, ImageSource, RemovalOptions};
use crate::services::storage::LocalStorage;
use crate::utils::filename::derive_output_name;

/// Terminal outcomes of a single upload.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no input provided")]
    NoInput,

    /// Both encoding strategies failed; only the first failure is carried.
    #[error("background removal failed: {primary}")]
    EngineFailure { primary: String },

    #[error("background removal timed out after {}s", .timeout.as_secs_f32())]
    EngineTimeout { timeout: Duration },

    #[error("processed file {} does not exist; background removal may have failed", .path.display())]
    OutputMissing { path: PathBuf },

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which hand-off produced the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingStrategy {
    FileReference,
    InlineData,
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub asset: ProcessedAsset,
    pub image_url: String,
    pub elapsed: Duration,
    pub strategy: EncodingStrategy,
}

/// Upload-process-deliver: one stored upload in, one PNG reference out.
pub struct Pipeline {
    storage: Arc<LocalStorage>,
    engine: Arc<dyn BackgroundRemover>,
    cleanup: CleanupScheduler,
    options: RemovalOptions,
    engine_timeout: Duration,
    public_base_url: Option<String>,
}

impl Pipeline {
    pub fn new(
        storage: Arc<LocalStorage>,
        engine: Arc<dyn BackgroundRemover>,
        cleanup: CleanupScheduler,
        config: &RelayConfig,
    ) -> Self {
        Self {
            storage,
            engine,
            cleanup,
            options: RemovalOptions::primary(config.engine_model.clone(), config.engine_debug)
                .with_quality(config.engine_quality),
            engine_timeout: config.engine_timeout(),
            public_base_url: config.public_base_url.clone(),
        }
    }

    pub fn with_engine_timeout(mut self, timeout: Duration) -> Self {
        self.engine_timeout = timeout;
        self
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    pub fn engine(&self) -> &dyn BackgroundRemover {
        self.engine.as_ref()
    }

    pub fn cleanup(&self) -> &CleanupScheduler {
        &self.cleanup
    }

    /// Public reference for a processed file: relative unless a base origin is configured.
    pub fn image_url(&self, filename: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/processed/{}", base.trim_end_matches('/'), filename),
            None => format!("/processed/{}", filename),
        }
    }

    /// Runs the engine over `upload` and returns a reference to the stored PNG.
    ///
    /// The input file is removed when this returns, whatever the outcome. The
    /// output is queued for deletion after the cleanup delay.
    pub async fn process_upload(
        &self,
        upload: UploadedAsset,
        request: ProcessingRequest,
    ) -> Result<ProcessOutcome, PipelineError> {
        let span = tracing::info_span!(
            "process_upload",
            request_id = %request.id,
            file = %upload.filename,
        );
        self.run(upload, request).instrument(span).await
    }

    async fn run(
        &self,
        upload: UploadedAsset,
        request: ProcessingRequest,
    ) -> Result<ProcessOutcome, PipelineError> {
        let _input = ScopedInput::acquire(&upload.path);

        if !tokio::fs::try_exists(&upload.path).await.unwrap_or(false) {
            warn!("Input {} is missing", upload.path.display());
            return Err(PipelineError::NoInput);
        }

        let output_path = self.storage.processed_path(&upload.base_name);
        info!("Input path: {}", upload.path.display());
        info!("Output path: {}", output_path.display());

        let strategy = self.remove_background(&upload, &output_path).await?;

        if !tokio::fs::try_exists(&output_path).await.unwrap_or(false) {
            error!("Engine reported success but {} was not written", output_path.display());
            return Err(PipelineError::OutputMissing { path: output_path });
        }
        let size = tokio::fs::metadata(&output_path).await?.len();

        let filename = derive_output_name(&upload.base_name);
        let asset = ProcessedAsset {
            filename: filename.clone(),
            path: output_path.clone(),
            size,
            created_at: Utc::now(),
        };
        self.cleanup.schedule(output_path);

        let elapsed = request.elapsed();
        info!("✅ Background removed ({:?}) in {:?}", strategy, elapsed);

        Ok(ProcessOutcome {
            image_url: self.image_url(&filename),
            asset,
            elapsed,
            strategy,
        })
    }

    /// File reference first; on any engine error, one retry with the bytes inline.
    async fn remove_background(
        &self,
        upload: &UploadedAsset,
        output: &Path,
    ) -> Result<EncodingStrategy, PipelineError> {
        let primary = match ImageSource::from_path(&upload.path) {
            Ok(source) => self.call_engine(&source, &self.options).await?,
            Err(e) => Err(e),
        };

        let primary_err = match primary {
            Ok(bytes) => {
                self.write_output(output, bytes).await?;
                info!("Background removed via file reference");
                return Ok(EncodingStrategy::FileReference);
            }
            Err(e) => e,
        };

        warn!("Background removal via file reference failed: {}", primary_err);
        info!("Retrying with inline base64 data...");

        let fallback = match tokio::fs::read(&upload.path).await {
            Ok(data) => {
                let mime = detect_mime(&data, &upload.mime_type);
                let source = ImageSource::inline(&mime, &data);
                self.call_engine(&source, &self.options.fallback()).await?
            }
            Err(e) => Err(EngineError::InvalidSource(format!(
                "failed to read input for inline retry: {}",
                e
            ))),
        };

        match fallback {
            Ok(bytes) => {
                self.write_output(output, bytes).await?;
                info!("Background removed via inline data");
                Ok(EncodingStrategy::InlineData)
            }
            Err(second) => {
                error!("Inline retry failed: {}", second);
                Err(PipelineError::EngineFailure {
                    primary: primary_err.to_string(),
                })
            }
        }
    }

    /// Writes into a temp file next to `output` and renames it into place, so a
    /// failed write never leaves a partial image in the processed directory.
    async fn write_output(&self, output: &Path, bytes: Bytes) -> Result<(), PipelineError> {
        let dir = self.storage.processed_dir().to_path_buf();
        let target = output.to_path_buf();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(())
    }

    /// One engine call bounded by the configured timeout. The outer error is the
    /// timeout; dropping the future abandons the in-flight call.
    async fn call_engine(
        &self,
        source: &ImageSource,
        options: &RemovalOptions,
    ) -> Result<Result<Bytes, EngineError>, PipelineError> {
        debug!(
            source = source.kind(),
            engine = self.engine.name(),
            "Calling background-removal engine"
        );
        match tokio::time::timeout(
            self.engine_timeout,
            self.engine.remove_background(source, options),
        )
        .await
        {
            Ok(result) => Ok(result),
            Err(_) => {
                error!(
                    "Engine call ({}) exceeded {:?}, abandoning",
                    source.kind(),
                    self.engine_timeout
                );
                Err(PipelineError::EngineTimeout {
                    timeout: self.engine_timeout,
                })
            }
        }
    }
}

/// True image type from magic bytes, falling back to what the client declared.
pub fn detect_mime(data: &[u8], declared: &str) -> String {
    infer::get(data)
        .map(|kind| kind.mime_type())
        .filter(|m| m.starts_with("image/"))
        .unwrap_or(declared)
        .to_string()
}

/// Deletes the stored upload when the pipeline finishes, on every exit path.
struct ScopedInput(Option<TempPath>);

impl ScopedInput {
    fn acquire(path: &Path) -> Self {
        Self(Some(TempPath::from_path(path)))
    }
}

impl Drop for ScopedInput {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let shown = path.to_path_buf();
            match path.close() {
                Ok(()) => debug!("Removed input {}", shown.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove input {}: {}", shown.display(), e),
            }
        }
    }
}
