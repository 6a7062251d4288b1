use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// MIME type of every image the engine is asked to produce
pub const OUTPUT_MIME: &str = "image/png";

/// Upper bound for a reachability probe
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// Failure reported by a background-removal engine.
///
/// The `Display` text is what ends up in the `details` field of an error
/// response, so each variant renders a self-contained message.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine rejected the image ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("engine request failed: {0}")]
    Transport(String),

    #[error("engine returned an empty result")]
    EmptyResult,

    #[error("invalid image source: {0}")]
    InvalidSource(String),

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("unsupported output format '{0}'")]
    UnsupportedFormat(String),
}

/// How the image is handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// A `file://` locator the engine reads itself
    File(Url),
    /// The full image as a base64 data URL
    Inline { mime: String, data: String },
}

impl ImageSource {
    pub fn from_path(path: &Path) -> Result<Self, EngineError> {
        Url::from_file_path(path)
            .map(Self::File)
            .map_err(|_| EngineError::InvalidSource(format!("not an absolute path: {}", path.display())))
    }

    pub fn inline(mime: &str, bytes: &[u8]) -> Self {
        Self::Inline {
            mime: mime.to_string(),
            data: STANDARD.encode(bytes),
        }
    }

    /// The string form sent over the wire
    pub fn locator(&self) -> String {
        match self {
            Self::File(url) => url.to_string(),
            Self::Inline { mime, data } => format!("data:{};base64,{}", mime, data),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Inline { .. } => "inline",
        }
    }

    /// Resolves the source back into raw image bytes
    pub async fn load(&self) -> Result<Vec<u8>, EngineError> {
        match self {
            Self::File(url) => {
                let path = url
                    .to_file_path()
                    .map_err(|_| EngineError::InvalidSource(format!("not a file URL: {}", url)))?;
                tokio::fs::read(&path)
                    .await
                    .map_err(|e| EngineError::InvalidSource(format!("{}: {}", path.display(), e)))
            }
            Self::Inline { data, .. } => STANDARD
                .decode(data)
                .map_err(|e| EngineError::InvalidSource(format!("bad base64 payload: {}", e))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Foreground,
    Background,
}

/// Options record passed alongside every engine call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalOptions {
    pub output_format: String,
    /// 0.0 to 1.0
    pub quality: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<Purpose>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub debug: bool,
}

impl RemovalOptions {
    /// Options for the file-reference attempt: isolate the foreground, PNG, full quality.
    pub fn primary(model: Option<String>, debug: bool) -> Self {
        Self {
            output_format: OUTPUT_MIME.to_string(),
            quality: 1.0,
            purpose: Some(Purpose::Foreground),
            model,
            debug,
        }
    }

    /// Options for the inline retry. Format, quality, model and debug carry over;
    /// `purpose` is left to the engine's default.
    pub fn fallback(&self) -> Self {
        Self {
            purpose: None,
            ..self.clone()
        }
    }

    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = quality.clamp(0.0, 1.0);
        self
    }
}

/// Opaque background-removal engine
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    /// Returns the encoded output image
    async fn remove_background(
        &self,
        source: &ImageSource,
        options: &RemovalOptions,
    ) -> Result<Bytes, EngineError>;

    /// Check if the engine is reachable
    async fn health_check(&self) -> bool;

    fn name(&self) -> &'static str;
}

/// Engine reached over HTTP.
///
/// `POST <base>/remove-background` with `{ "image": <locator>, "options": {..} }`;
/// a 2xx body is the output image.
pub struct HttpRemover {
    client: reqwest::Client,
    endpoint: Url,
    health: Url,
}

#[derive(Serialize)]
struct RemovalRequest<'a> {
    image: String,
    options: &'a RemovalOptions,
}

impl HttpRemover {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: base.join("remove-background")?,
            health: base.join("health")?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl BackgroundRemover for HttpRemover {
    async fn remove_background(
        &self,
        source: &ImageSource,
        options: &RemovalOptions,
    ) -> Result<Bytes, EngineError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&RemovalRequest {
                image: source.locator(),
                options,
            })
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EngineError::Rejected {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        if body.is_empty() {
            return Err(EngineError::EmptyResult);
        }
        Ok(body)
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(self.health.clone())
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(res) => res.status().is_success(),
            Err(_) => false,
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Local stand-in for development: decodes the source and re-encodes it as PNG
/// without touching the background.
pub struct PassthroughRemover;

#[async_trait]
impl BackgroundRemover for PassthroughRemover {
    async fn remove_background(
        &self,
        source: &ImageSource,
        options: &RemovalOptions,
    ) -> Result<Bytes, EngineError> {
        if options.output_format != OUTPUT_MIME {
            return Err(EngineError::UnsupportedFormat(options.output_format.clone()));
        }
        tracing::warn!("PassthroughRemover: background kept as-is (development mode)");

        let data = source.load().await?;
        let encoded = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, EngineError> {
            let img =
                image::load_from_memory(&data).map_err(|e| EngineError::Decode(e.to_string()))?;
            let mut out = Vec::new();
            img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
                .map_err(|e| EngineError::Decode(e.to_string()))?;
            Ok(out)
        })
        .await
        .map_err(|e| EngineError::Decode(e.to_string()))??;

        Ok(Bytes::from(encoded))
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Factory function to create the engine adapter named in config
pub fn create_remover(engine_type: &str, engine_url: &str) -> anyhow::Result<Box<dyn BackgroundRemover>> {
    match engine_type.to_lowercase().as_str() {
        "http" => Ok(Box::new(HttpRemover::new(engine_url)?)),
        "noop" | "passthrough" | "none" => Ok(Box::new(PassthroughRemover)),
        _ => {
            tracing::warn!(
                "Unknown engine type '{}', using PassthroughRemover",
                engine_type
            );
            Ok(Box::new(PassthroughRemover))
        }
    }
}
