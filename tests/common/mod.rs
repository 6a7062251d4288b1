#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use cutout_relay::config::RelayConfig;
use cutout_relay::services::cleanup::CleanupScheduler;
use cutout_relay::services::engine::{
    BackgroundRemover, EngineError, ImageSource, RemovalOptions,
};
use cutout_relay::services::pipeline::Pipeline;
use cutout_relay::services::storage::LocalStorage;
use cutout_relay::AppState;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

/// How the scripted engine answers each kind of source.
#[derive(Debug, Clone)]
pub enum Script {
    /// Both encodings succeed
    Succeed,
    /// `file://` locators are rejected with the message, inline data works
    RejectFile(String),
    /// Every call is rejected; the first message goes to file locators
    RejectAll { file: String, inline: String },
    /// Never answers, health checks included
    Hang,
}

#[derive(Debug, Clone)]
pub struct EngineCall {
    pub kind: &'static str,
    pub locator: String,
    pub options: RemovalOptions,
    /// Whether the source could be read back at call time
    pub readable: bool,
}

pub struct ScriptedEngine {
    script: Script,
    calls: Mutex<Vec<EngineCall>>,
}

impl ScriptedEngine {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackgroundRemover for ScriptedEngine {
    async fn remove_background(
        &self,
        source: &ImageSource,
        options: &RemovalOptions,
    ) -> Result<Bytes, EngineError> {
        let loaded = source.load().await;
        self.calls.lock().unwrap().push(EngineCall {
            kind: source.kind(),
            locator: source.locator(),
            options: options.clone(),
            readable: loaded.is_ok(),
        });

        let reject = |message: &str| EngineError::Rejected {
            status: 500,
            message: message.to_string(),
        };

        match (&self.script, source) {
            (Script::Hang, _) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(EngineError::EmptyResult)
            }
            (Script::RejectFile(msg), ImageSource::File(_)) => Err(reject(msg)),
            (Script::RejectAll { file, .. }, ImageSource::File(_)) => Err(reject(file)),
            (Script::RejectAll { inline, .. }, ImageSource::Inline { .. }) => Err(reject(inline)),
            _ => {
                loaded?;
                Ok(Bytes::from(png_bytes(2, 2)))
            }
        }
    }

    async fn health_check(&self) -> bool {
        if matches!(self.script, Script::Hang) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        true
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(
        image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([10, 20, 30, 0]),
        )),
        image::ImageFormat::Png,
    )
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(
        image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            width,
            height,
            image::Rgb([200, 120, 40]),
        )),
        image::ImageFormat::Jpeg,
    )
}

fn encode(img: image::DynamicImage, format: image::ImageFormat) -> Vec<u8> {
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), format)
        .unwrap();
    out
}

/// A relay wired to `engine`, rooted in a fresh temporary directory.
pub struct Harness {
    pub dir: TempDir,
    pub config: RelayConfig,
    pub pipeline: Arc<Pipeline>,
    pub shutdown: watch::Sender<bool>,
}

impl Harness {
    pub async fn new(engine: Arc<dyn BackgroundRemover>) -> Self {
        Self::with_timeout(engine, Duration::from_secs(10)).await
    }

    pub async fn with_timeout(engine: Arc<dyn BackgroundRemover>, timeout: Duration) -> Self {
        let config = RelayConfig {
            max_file_size: 1024 * 1024,
            ..RelayConfig::default()
        };
        Self::with_config(engine, config, timeout).await
    }

    /// Uses `base` as-is apart from the directories, which move into a temp dir.
    pub async fn with_config(
        engine: Arc<dyn BackgroundRemover>,
        base: RelayConfig,
        timeout: Duration,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig {
            upload_dir: dir.path().join("uploads"),
            processed_dir: dir.path().join("public/processed"),
            public_dir: dir.path().join("public"),
            ..base
        };

        let storage = Arc::new(
            LocalStorage::init(&config.upload_dir, &config.processed_dir, true)
                .await
                .unwrap(),
        );
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (cleanup, worker) = CleanupScheduler::new(config.cleanup_delay(), shutdown_rx);
        tokio::spawn(worker.run());

        let pipeline = Pipeline::new(storage, engine, cleanup, &config).with_engine_timeout(timeout);

        Self {
            dir,
            config,
            pipeline: Arc::new(pipeline),
            shutdown,
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            pipeline: self.pipeline.clone(),
            config: self.config.clone(),
        }
    }

    /// Number of files currently in the input holding directory
    pub fn pending_uploads(&self) -> usize {
        std::fs::read_dir(self.pipeline.storage().upload_dir())
            .unwrap()
            .count()
    }
}
