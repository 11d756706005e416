//! Service settings
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! config file, then `PET_CLASSIFIER__SECTION__KEY` environment variables.

use config::{Config, ConfigError, Environment, File};
use image_decoder::DecodeLimits;
use inference_engine::{normalize_path, EngineConfig};
use serde::Deserialize;
use std::path::PathBuf;

use crate::rate_limit::RateLimitConfig;

/// Config file consulted when `PET_CLASSIFIER_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "config/pet-classifier";

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Request body limit for uploads
    pub max_upload_bytes: usize,
    /// Allowed CORS origins; empty disables CORS, `*` allows any
    pub cors_allow_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7860,
            max_upload_bytes: 10 * 1024 * 1024,
            cors_allow_origins: Vec::new(),
        }
    }
}

/// Model artifact settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Artifact path, in either `/` or `\` syntax
    pub path: String,
    /// Directory relative paths resolve against (working directory if unset)
    pub base_dir: Option<String>,
    pub serialize_inference: bool,
    pub max_image_width: u32,
    pub max_image_height: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        let limits = DecodeLimits::default();
        Self {
            path: "models/cat_dog_classifier_v1.pcla".to_string(),
            base_dir: None,
            serialize_inference: false,
            max_image_width: limits.max_width,
            max_image_height: limits.max_height,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `tracing-subscriber` env-filter directive
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
}

/// All service settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub model: ModelSettings,
    pub logging: LogSettings,
    pub rate_limit: RateLimitConfig,
    pub metrics: MetricsSettings,
}

impl Settings {
    /// Load from `PET_CLASSIFIER_CONFIG` (or the default file) and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var("PET_CLASSIFIER_CONFIG").ok();
        Self::load_from(Some(file.as_deref().unwrap_or(DEFAULT_CONFIG_FILE)))
    }

    /// Load from an optional config file and the environment
    pub fn load_from(file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::with_name(file).required(false));
        }

        builder
            .add_source(
                Environment::with_prefix("PET_CLASSIFIER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_allow_origins"),
            )
            .build()?
            .try_deserialize()
    }

    /// Socket address to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Artifact path for this host, resolved against `model.base_dir`
    pub fn artifact_path(&self) -> PathBuf {
        let path = normalize_path(&self.model.path);
        match &self.model.base_dir {
            Some(base) if path.is_relative() => normalize_path(base).join(path),
            _ => path,
        }
    }

    /// Engine configuration derived from the model section
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            serialize_inference: self.model.serialize_inference,
            decode_limits: DecodeLimits {
                max_width: self.model.max_image_width,
                max_height: self.model.max_image_height,
                ..Default::default()
            },
        }
    }
}
