use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Longest deletion delay the cleanup queue accepts (one year)
pub const MAX_CLEANUP_DELAY_SECS: u64 = 365 * 24 * 60 * 60;

/// Runtime configuration for the relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Input holding directory (default: "uploads")
    pub upload_dir: PathBuf,

    /// Output directory served at /processed (default: "public/processed")
    pub processed_dir: PathBuf,

    /// Static site root for the upload page (default: "public")
    pub public_dir: PathBuf,

    /// Origin prefixed to image URLs; relative paths when unset
    pub public_base_url: Option<String>,

    /// Maximum upload size in bytes (default: 20 MB)
    pub max_file_size: usize,

    /// Delay before a processed image is deleted (default: 300 s)
    pub cleanup_delay_secs: u64,

    /// Engine adapter: "http" or "noop" (default: "http")
    pub engine_type: String,

    /// Base URL of the background-removal engine (default: "http://127.0.0.1:7000")
    pub engine_url: String,

    /// Bounded wait for a single engine call (default: 120 s)
    pub engine_timeout_secs: u64,

    /// Optional engine model size hint ("small", "medium", "large")
    pub engine_model: Option<String>,

    /// Output quality requested from the engine, 0.0 to 1.0 (default: 1.0)
    pub engine_quality: f32,

    /// Ask the engine for its debug instrumentation (default: true)
    pub engine_debug: bool,

    /// Wipe both holding directories at startup (default: true)
    pub clear_on_start: bool,

    /// Allowed CORS origins (comma separated); any origin when empty
    pub allowed_origins: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            processed_dir: PathBuf::from("public/processed"),
            public_dir: PathBuf::from("public"),
            public_base_url: None,
            max_file_size: 20 * 1024 * 1024, // 20 MB
            cleanup_delay_secs: 300,
            engine_type: "http".to_string(),
            engine_url: "http://127.0.0.1:7000".to_string(),
            engine_timeout_secs: 120,
            engine_model: None,
            engine_quality: 1.0,
            engine_debug: true,
            clear_on_start: true,
            allowed_origins: Vec::new(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.upload_dir),

            processed_dir: env::var("PROCESSED_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.processed_dir),

            public_dir: env::var("PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.public_dir),

            public_base_url: env::var("PUBLIC_BASE_URL")
                .ok()
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty()),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            cleanup_delay_secs: env::var("CLEANUP_DELAY_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|v| v.min(MAX_CLEANUP_DELAY_SECS))
                .unwrap_or(default.cleanup_delay_secs),

            engine_type: env::var("ENGINE_TYPE").unwrap_or(default.engine_type),

            engine_url: env::var("ENGINE_URL").unwrap_or(default.engine_url),

            engine_timeout_secs: env::var("ENGINE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &u64| *v > 0)
                .unwrap_or(default.engine_timeout_secs),

            engine_model: env::var("ENGINE_MODEL").ok().filter(|v| !v.is_empty()),

            engine_quality: env::var("ENGINE_QUALITY")
                .ok()
                .and_then(|v| v.parse::<f32>().ok())
                .filter(|v| v.is_finite())
                .map(|v| v.clamp(0.0, 1.0))
                .unwrap_or(default.engine_quality),

            engine_debug: env::var("ENGINE_DEBUG")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.engine_debug),

            clear_on_start: env::var("CLEAR_ON_START")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.clear_on_start),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Create config for development (local passthrough engine, short cleanup)
    pub fn development() -> Self {
        Self {
            engine_type: "noop".to_string(),
            cleanup_delay_secs: 60,
            engine_timeout_secs: 30,
            ..Self::default()
        }
    }

    /// Create config for production (remote engine, leftovers kept for inspection)
    pub fn production() -> Self {
        Self {
            engine_type: "http".to_string(),
            clear_on_start: false,
            ..Self::from_env()
        }
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.cleanup_delay_secs.min(MAX_CLEANUP_DELAY_SECS))
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }
}
