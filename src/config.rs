//! Server configuration module.
//!
//! Handles loading and validating `config.toml`. Every section and every key
//! is optional: stock defaults apply to anything the file leaves out.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [server]
//! bind = "127.0.0.1:8000"   # Address the HTTP server listens on
//! public_base_url = "https://cards.example.com"  # Optional origin for image URLs
//!
//! [media]
//! root = "media"            # Raw uploads land in root/cards, derivatives in root/cards/optimized
//!
//! [images]
//! max_width = 800           # Derivatives wider than this are scaled down
//! quality = 85              # JPEG quality (1-100)
//! max_upload_bytes = 20971520  # 20 MiB upload cap
//!
//! [pipeline]
//! timeout_secs = 30         # Upper bound for one background optimization
//!
//! [processing]
//! max_processes = 4         # Max parallel workers for batch optimization (omit for auto)
//!
//! [rate_limit]
//! capacity = 10             # Name-list requests allowed per window per caller
//! window_secs = 60
//!
//! [auth]
//! staff_tokens = []         # Bearer tokens granted staff privileges
//!
//! [store]
//! snapshot = "cards.json"   # Optional JSON snapshot of the card store (omit for memory-only)
//!
//! [autocomplete]
//! names_file = "card_names.txt"  # Optional newline-delimited card names loaded at startup
//!
//! [logging]
//! json = false              # Emit logs as JSON lines
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration loaded from `config.toml`.
///
/// All fields have sensible defaults. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub server: HttpConfig,
    pub media: MediaConfig,
    pub images: ImagesConfig,
    pub pipeline: PipelineConfig,
    pub processing: ProcessingConfig,
    pub rate_limit: RateLimitConfig,
    pub auth: AuthConfig,
    pub store: StoreConfig,
    pub autocomplete: AutocompleteConfig,
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.images.quality == 0 || self.images.quality > 100 {
            return Err(ConfigError::Validation(
                "images.quality must be 1-100".into(),
            ));
        }
        if self.images.max_width == 0 {
            return Err(ConfigError::Validation(
                "images.max_width must be non-zero".into(),
            ));
        }
        if self.images.max_upload_bytes == 0 {
            return Err(ConfigError::Validation(
                "images.max_upload_bytes must be non-zero".into(),
            ));
        }
        if self.pipeline.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "pipeline.timeout_secs must be non-zero".into(),
            ));
        }
        if self.rate_limit.capacity == 0 || self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Validation(
                "rate_limit.capacity and rate_limit.window_secs must be non-zero".into(),
            ));
        }
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "server.bind '{}' is not a socket address",
                self.server.bind
            )));
        }
        if self.auth.staff_tokens.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "auth.staff_tokens must not contain empty tokens".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    /// Socket address to bind, e.g. `"0.0.0.0:8000"`.
    pub bind: String,
    /// Origin used for absolute image URLs. When absent, the origin is taken
    /// from the request's forwarding headers.
    pub public_base_url: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            public_base_url: None,
        }
    }
}

/// Where uploaded and generated images are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MediaConfig {
    pub root: PathBuf,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("media"),
        }
    }
}

/// Upload limits and derivative encoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Derivatives wider than this are scaled down to exactly this width.
    pub max_width: u32,
    /// JPEG encoding quality (1 = worst, 100 = best).
    pub quality: u32,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: u64,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            max_width: 800,
            quality: 85,
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Background optimization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Seconds a single post-save optimization may run before it is abandoned.
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers for batch optimization.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Fixed-window limits for the bulk name-list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Bearer tokens that identify staff callers.
    pub staff_tokens: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// JSON file the card store is loaded from and written back to after each commit.
    pub snapshot: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutocompleteConfig {
    pub names_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub json: bool,
}

/// Load config from a TOML file, falling back to defaults if it doesn't exist.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    if !path.exists() {
        return Ok(ServerConfig::default());
    }
    let content = fs::read_to_string(path)?;
    let config: ServerConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// A documented stock `config.toml` with every option at its default.
pub fn stock_config_toml() -> &'static str {
    r#"# cardmart configuration
# All options are optional; the values below are the defaults.

[server]
# Address the HTTP server listens on.
bind = "127.0.0.1:8000"
# Origin for absolute image URLs. Omit to derive it from request headers.
# public_base_url = "https://cards.example.com"

[media]
# Raw uploads are stored in <root>/cards, derivatives in <root>/cards/optimized.
root = "media"

[images]
# Derivatives wider than this are scaled down, preserving aspect ratio.
max_width = 800
# JPEG quality for derivatives (1-100).
quality = 85
# Largest accepted upload in bytes (20 MiB).
max_upload_bytes = 20971520

[pipeline]
# Seconds one background optimization may run before it is abandoned.
timeout_secs = 30

[processing]
# Max parallel workers for `optimize-existing`. Omit to use all CPU cores.
# max_processes = 4

[rate_limit]
# Requests to /cards/get_all_card_names/ allowed per caller per window.
capacity = 10
window_secs = 60

[auth]
# Bearer tokens that grant staff privileges (create, update, delete, status changes).
staff_tokens = []

[store]
# JSON snapshot of the card store. Omit to keep cards in memory only.
# snapshot = "cards.json"

[autocomplete]
# Newline-delimited card names loaded at startup.
# names_file = "card_names.txt"

[logging]
# Emit logs as JSON lines instead of human-readable text.
json = false
"#
}
