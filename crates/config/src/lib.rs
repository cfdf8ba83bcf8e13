//! Configuration management for the retrieval platform
//!
//! Supports loading configuration from:
//! - TOML files (`config/default.toml`, `config/{env}.toml`)
//! - Environment variables (`SITEVOICE__` prefix, `__` separator)
//! - Runtime defaults
//!
//! Priority: env vars > config/{env}.toml > config/default.toml > defaults.

pub mod settings;

pub use settings::{
    load_settings, CrawlerConfig, DatabaseConfig, EmbeddingConfig, LocaleConfig,
    ObservabilityConfig, RateLimitConfig, RateLimitStrategyKind, RuntimeEnvironment, SearchConfig,
    ServerConfig, Settings, VoiceConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
