//! Configuration for the triage service.
//!
//! Loaded once at startup from defaults, optional config files and
//! `TRIAGE__`-prefixed environment variables, then shared read-only.

use crate::video::SizeThresholds;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Largest file the public Bot API lets a bot download
pub const PUBLIC_API_DOWNLOAD_LIMIT_MB: u64 = 20;

/// Main configuration for the triage service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Chat service connection and chat identifiers
    pub telegram: TelegramConfig,
    /// Size thresholds for tier classification
    #[serde(default)]
    pub classification: ClassificationConfig,
    /// Local storage for long videos
    #[serde(default)]
    pub storage: StorageConfig,
    /// Trim pipeline configuration
    #[serde(default)]
    pub trim: TrimConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Prometheus exporter port; exporter disabled when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Chat service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token
    pub bot_token: String,
    /// Chat monitored for incoming videos
    pub input_chat_id: i64,
    /// Chat receiving approved and short videos
    pub destination_chat_id: i64,
    /// How many recently observed videos to remember per chat
    #[serde(default = "default_recent_videos_limit")]
    pub recent_videos_limit: usize,
    /// Bot API server base URL; the public server when unset.
    /// A local server in `--local` mode lifts the download limit.
    #[serde(default)]
    pub api_url: Option<String>,
}

/// Classification thresholds in megabytes
#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationConfig {
    /// Videos below this size are short
    #[serde(default = "default_short_max_mb")]
    pub short_max_mb: u64,
    /// Videos at or above this size are long
    #[serde(default = "default_medium_max_mb")]
    pub medium_max_mb: u64,
}

/// Long video storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory long videos are downloaded into
    #[serde(default = "default_videos_dir")]
    pub videos_dir: PathBuf,
}

/// Trim pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TrimConfig {
    /// Offer the trim action on medium videos
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Clip length in seconds
    #[serde(default = "default_clip_seconds")]
    pub clip_seconds: u32,
    /// Chats receiving the clip (empty = destination chat)
    #[serde(default)]
    pub destination_chat_ids: Vec<i64>,
    /// Delete the interactive message once the clip is sent
    #[serde(default)]
    pub delete_after_trim: bool,
    /// Transcoder executable
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Maximum transcoder run time in seconds
    #[serde(default = "default_trim_timeout_secs")]
    pub timeout_secs: u64,
    /// Directory for temporary files (OS temp dir when unset)
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

// Default value functions
fn default_service_name() -> String {
    "video-triage".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_recent_videos_limit() -> usize {
    10
}

fn default_short_max_mb() -> u64 {
    50
}

fn default_medium_max_mb() -> u64 {
    500
}

fn default_videos_dir() -> PathBuf {
    PathBuf::from("/app/videos")
}

fn default_true() -> bool {
    true
}

fn default_clip_seconds() -> u32 {
    10
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_trim_timeout_secs() -> u64 {
    120
}

impl Config {
    /// Load configuration from `.env`, config files and environment
    pub fn load() -> anyhow::Result<Self> {
        // A missing .env file is normal outside development
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .set_default("service.name", "video-triage")?
            .set_default("service.log_level", "info")?
            // Add config file if present
            .add_source(config::File::with_name("config/triage").required(false))
            .add_source(config::File::with_name("/etc/triage/triage").required(false))
            // Override with environment variables
            // TRIAGE__TELEGRAM__BOT_TOKEN -> telegram.bot_token
            .add_source(
                config::Environment::with_prefix("TRIAGE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("trim.destination_chat_ids")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "telegram.bot_token".to_string(),
            ));
        }

        if self.telegram.input_chat_id == 0 {
            return Err(ConfigValidationError::MissingField(
                "telegram.input_chat_id".to_string(),
            ));
        }

        if self.telegram.destination_chat_id == 0 {
            return Err(ConfigValidationError::MissingField(
                "telegram.destination_chat_id".to_string(),
            ));
        }

        self.telegram.api_url()?;

        if self.classification.short_max_mb > self.classification.medium_max_mb {
            return Err(ConfigValidationError::InvalidValue {
                field: "classification.short_max_mb".to_string(),
                message: format!(
                    "must not exceed medium_max_mb ({} > {})",
                    self.classification.short_max_mb, self.classification.medium_max_mb
                ),
            });
        }

        if self.trim.clip_seconds == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "trim.clip_seconds".to_string(),
                message: "Clip length must be greater than 0".to_string(),
            });
        }

        if self.trim.timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "trim.timeout_secs".to_string(),
                message: "Timeout must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Classification thresholds in bytes
    pub fn thresholds(&self) -> SizeThresholds {
        SizeThresholds::from_mb(
            self.classification.short_max_mb,
            self.classification.medium_max_mb,
        )
    }

    /// Every medium or long video needs a download, so on the public Bot API
    /// a short threshold above its limit means those downloads will fail
    pub fn downloads_exceed_api_limit(&self) -> bool {
        self.telegram.api_url.is_none()
            && self.classification.short_max_mb > PUBLIC_API_DOWNLOAD_LIMIT_MB
    }
}

impl TelegramConfig {
    /// Parsed Bot API server URL, if one is configured
    pub fn api_url(&self) -> Result<Option<Url>, ConfigValidationError> {
        let Some(raw) = self.api_url.as_deref() else {
            return Ok(None);
        };

        let url = Url::parse(raw).map_err(|e| ConfigValidationError::InvalidValue {
            field: "telegram.api_url".to_string(),
            message: e.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigValidationError::InvalidValue {
                field: "telegram.api_url".to_string(),
                message: format!("Unsupported scheme: {}", url.scheme()),
            });
        }

        Ok(Some(url))
    }
}

impl TrimConfig {
    /// Get transcoder timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Chats the clip goes to, falling back to `fallback` when none are configured
    pub fn destinations(&self, fallback: i64) -> Vec<i64> {
        if self.destination_chat_ids.is_empty() {
            vec![fallback]
        } else {
            self.destination_chat_ids.clone()
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            short_max_mb: default_short_max_mb(),
            medium_max_mb: default_medium_max_mb(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            videos_dir: default_videos_dir(),
        }
    }
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            clip_seconds: default_clip_seconds(),
            destination_chat_ids: Vec::new(),
            delete_after_trim: false,
            ffmpeg_path: default_ffmpeg_path(),
            timeout_secs: default_trim_timeout_secs(),
            work_dir: None,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        service: ServiceConfig::default(),
        telegram: TelegramConfig {
            bot_token: "123456:test-token".to_string(),
            input_chat_id: -100123,
            destination_chat_id: -100999,
            recent_videos_limit: 10,
            api_url: None,
        },
        classification: ClassificationConfig::default(),
        storage: StorageConfig::default(),
        trim: TrimConfig::default(),
    }
}
