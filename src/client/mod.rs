//! Consumer side of the relay.
//!
//! Mirrors what the design-tool plugin does with a result: upload an image,
//! fetch the returned `imageUrl`, decode it to raw RGBA pixels and work out
//! how it sits inside the default 800×600 frame.

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::api::handlers::upload::{ErrorResponse, UPLOAD_FIELD, UploadResponse};

pub const DEFAULT_FRAME_WIDTH: u32 = 800;
pub const DEFAULT_FRAME_HEIGHT: u32 = 600;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload rejected ({status}): {message}")]
    Upload { status: u16, message: String },

    #[error("failed to fetch image: {0}")]
    Fetch(String),

    #[error("failed to decode image: {0}")]
    Decode(String),
}

impl ClientError {
    /// Short text suitable for a toast notification
    pub fn notice(&self) -> &'static str {
        match self {
            ClientError::Fetch(_) | ClientError::Decode(_) => {
                "Failed to paste the image onto the canvas"
            }
            _ => "Failed to upload the image",
        }
    }
}

fn fetch_error(e: reqwest::Error) -> ClientError {
    ClientError::Fetch(e.to_string())
}

/// A processed image ready to be turned into a canvas fill.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA8
    pub rgba: Vec<u8>,
    /// The bytes as served
    pub encoded: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    /// Whole image visible, letterboxed
    Fit,
    /// Frame fully covered, image cropped
    Fill,
}

/// Target rectangle on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub width: u32,
    pub height: u32,
    pub scale_mode: ScaleMode,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            scale_mode: ScaleMode::Fit,
        }
    }
}

impl Placement {
    /// Size the image is drawn at inside the frame
    pub fn fit(&self, width: u32, height: u32) -> (u32, u32) {
        if width == 0 || height == 0 {
            return (0, 0);
        }
        let sx = self.width as f64 / width as f64;
        let sy = self.height as f64 / height as f64;
        let scale = match self.scale_mode {
            ScaleMode::Fit => sx.min(sy),
            ScaleMode::Fill => sx.max(sy),
        };
        (
            (width as f64 * scale).round() as u32,
            (height as f64 * scale).round() as u32,
        )
    }
}

pub struct RelayClient {
    http: reqwest::Client,
    base: Url,
}

impl RelayClient {
    pub fn new(server: &str) -> Result<Self, ClientError> {
        let base = Url::parse(&format!("{}/", server.trim_end_matches('/')))
            .map_err(|_| ClientError::InvalidUrl(server.to_string()))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    /// Relative references resolve against the server; absolute ones pass through.
    pub fn resolve(&self, image_url: &str) -> Result<Url, ClientError> {
        self.base
            .join(image_url)
            .map_err(|_| ClientError::InvalidUrl(image_url.to_string()))
    }

    pub async fn upload(&self, path: &Path) -> Result<UploadResponse, ClientError> {
        let data = tokio::fs::read(path).await.map_err(|source| ClientError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let mime = infer::get(&data)
            .map(|kind| kind.mime_type())
            .unwrap_or("application/octet-stream");

        let part = Part::bytes(data)
            .file_name(filename)
            .mime_str(mime)
            .map_err(fetch_error)?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        let res = self
            .http
            .post(self.resolve("upload")?)
            .multipart(form)
            .send()
            .await
            .map_err(fetch_error)?;

        let status = res.status();
        if !status.is_success() {
            let message = match res.json::<ErrorResponse>().await {
                Ok(ErrorResponse {
                    error,
                    details: Some(details),
                }) => format!("{}: {}", error, details),
                Ok(ErrorResponse { error, .. }) => error,
                Err(_) => status.to_string(),
            };
            return Err(ClientError::Upload {
                status: status.as_u16(),
                message,
            });
        }

        res.json::<UploadResponse>().await.map_err(fetch_error)
    }

    pub async fn fetch_image(&self, image_url: &str) -> Result<FetchedImage, ClientError> {
        let url = self.resolve(image_url)?;
        let encoded = self
            .http
            .get(url)
            .send()
            .await
            .map_err(fetch_error)?
            .error_for_status()
            .map_err(fetch_error)?
            .bytes()
            .await
            .map_err(fetch_error)?;

        tokio::task::spawn_blocking(move || decode_image(encoded))
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?
    }
}

pub fn decode_image(encoded: Bytes) -> Result<FetchedImage, ClientError> {
    let img = image::load_from_memory(&encoded).map_err(|e| ClientError::Decode(e.to_string()))?;
    let rgba = img.to_rgba8();
    Ok(FetchedImage {
        width: rgba.width(),
        height: rgba.height(),
        rgba: rgba.into_raw(),
        encoded,
    })
}
