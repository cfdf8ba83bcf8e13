//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ConfigError;

/// Runtime environment enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    /// Check if this is a production environment
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if strict validation should be applied
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Runtime environment (development, staging, production)
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Hybrid search configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Crawl/indexing configuration
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Voice session configuration
    #[serde(default)]
    pub voice: VoiceConfig,

    /// Locale negotiation configuration
    #[serde(default)]
    pub locale: LocaleConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable CORS origin checks
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Overall per-request deadline in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Postgres connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum pool connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Warm connections to keep open
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Acquire timeout in seconds
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_database_url() -> String {
    std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/sitevoice".to_string())
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider HTTP endpoint
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    /// Model name
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector dimensionality for the model
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,

    /// Maximum texts per batch call
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    /// Per-call timeout in milliseconds
    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_embedding_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> usize {
    1536
}

fn default_embedding_batch_size() -> usize {
    100
}

fn default_embedding_timeout_ms() -> u64 {
    5_000
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            batch_size: default_embedding_batch_size(),
            timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

/// Hybrid search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default result count
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// RRF k constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,

    /// Fusion weight for the vector strategy (remainder goes to lexical)
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,

    /// Cache TTL in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Stale-while-revalidate window in seconds
    #[serde(default = "default_cache_swr_secs")]
    pub cache_swr_secs: u64,

    /// Per-strategy timeout in milliseconds
    #[serde(default = "default_strategy_timeout_ms")]
    pub strategy_timeout_ms: u64,
}

fn default_top_k() -> usize {
    10
}

fn default_rrf_k() -> f64 {
    60.0
}

fn default_vector_weight() -> f64 {
    0.6
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_swr_secs() -> u64 {
    60
}

fn default_strategy_timeout_ms() -> u64 {
    2_000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            rrf_k: default_rrf_k(),
            vector_weight: default_vector_weight(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_swr_secs: default_cache_swr_secs(),
            strategy_timeout_ms: default_strategy_timeout_ms(),
        }
    }
}

/// Rate limiter strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategyKind {
    /// Time-ordered request log per key (default for API traffic)
    #[default]
    SlidingWindow,
    /// Refilling token bucket allowing bursts
    TokenBucket,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Strategy to apply on the API surface
    #[serde(default)]
    pub strategy: RateLimitStrategyKind,

    /// Maximum requests per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Token bucket burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Token bucket refill rate (tokens per second)
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,

    /// Refund a unit after 2xx responses
    #[serde(default)]
    pub skip_successful_requests: bool,

    /// Refund a unit after >=400 responses
    #[serde(default)]
    pub skip_failed_requests: bool,
}

fn default_max_requests() -> u32 {
    120
}

fn default_window_secs() -> u64 {
    60
}

fn default_burst() -> u32 {
    20
}

fn default_refill_per_sec() -> f64 {
    2.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: RateLimitStrategyKind::default(),
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            burst: default_burst(),
            refill_per_sec: default_refill_per_sec(),
            skip_successful_requests: false,
            skip_failed_requests: false,
        }
    }
}

/// Crawl and indexing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Concurrent page tasks per session (hard cap 20)
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Per-URL retry attempts
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Chunk size in tokens (clamped to 200-2000)
    #[serde(default = "default_chunk_tokens")]
    pub chunk_tokens: usize,

    /// Overlap between adjacent chunks in tokens (clamped to 0-500)
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Texts per embedding batch (hard cap 100)
    #[serde(default = "default_embed_batch")]
    pub embed_batch: usize,

    /// External crawler service endpoint
    #[serde(default = "default_driver_endpoint")]
    pub driver_endpoint: String,
}

fn default_parallelism() -> usize {
    8
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_chunk_tokens() -> usize {
    512
}

fn default_chunk_overlap() -> usize {
    64
}

fn default_embed_batch() -> usize {
    50
}

fn default_driver_endpoint() -> String {
    "http://localhost:8091".to_string()
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            retry_attempts: default_retry_attempts(),
            chunk_tokens: default_chunk_tokens(),
            chunk_overlap: default_chunk_overlap(),
            embed_batch: default_embed_batch(),
            driver_endpoint: default_driver_endpoint(),
        }
    }
}

/// Voice session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Maximum concurrent sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Default session duration in seconds (clamped to 60-1800)
    #[serde(default = "default_session_secs")]
    pub default_duration_secs: u64,

    /// Expiry sweep interval in seconds
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,

    /// SSE heartbeat interval in seconds
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_max_sessions() -> usize {
    500
}

fn default_session_secs() -> u64 {
    300
}

fn default_sweep_secs() -> u64 {
    30
}

fn default_heartbeat_secs() -> u64 {
    30
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            default_duration_secs: default_session_secs(),
            sweep_interval_secs: default_sweep_secs(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

/// Locale negotiation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocaleConfig {
    /// Supported BCP-47 tags, first entry wins ties
    #[serde(default = "default_supported_locales")]
    pub supported: Vec<String>,

    /// Fallback when nothing matches
    #[serde(default = "default_locale")]
    pub default: String,
}

fn default_supported_locales() -> Vec<String> {
    vec![
        "en-US".to_string(),
        "en-GB".to_string(),
        "de-DE".to_string(),
        "fr-FR".to_string(),
        "es-ES".to_string(),
    ]
}

fn default_locale() -> String {
    "en-US".to_string()
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            supported: default_supported_locales(),
            default: default_locale(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Expose Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_search()?;
        self.validate_rate_limit()?;
        self.validate_crawler()?;
        self.validate_voice()?;
        self.validate_embedding()?;

        if self.environment.is_strict() && self.server.cors_enabled && self.server.cors_origins.is_empty()
        {
            return Err(ConfigError::InvalidValue {
                field: "server.cors_origins".to_string(),
                message: "at least one origin is required outside development".to_string(),
            });
        }

        Ok(())
    }

    fn validate_search(&self) -> Result<(), ConfigError> {
        if self.search.default_top_k == 0 || self.search.default_top_k > 100 {
            return Err(ConfigError::InvalidValue {
                field: "search.default_top_k".to_string(),
                message: "must be between 1 and 100".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.search.vector_weight) {
            return Err(ConfigError::InvalidValue {
                field: "search.vector_weight".to_string(),
                message: "must be between 0.0 and 1.0".to_string(),
            });
        }
        if self.search.rrf_k <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "search.rrf_k".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    fn validate_rate_limit(&self) -> Result<(), ConfigError> {
        if self.rate_limit.enabled {
            if self.rate_limit.max_requests == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "rate_limit.max_requests".to_string(),
                    message: "must be positive when rate limiting is enabled".to_string(),
                });
            }
            if self.rate_limit.window_secs == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "rate_limit.window_secs".to_string(),
                    message: "must be positive when rate limiting is enabled".to_string(),
                });
            }
            if self.rate_limit.refill_per_sec <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "rate_limit.refill_per_sec".to_string(),
                    message: "must be positive".to_string(),
                });
            }
        }
        Ok(())
    }

    fn validate_crawler(&self) -> Result<(), ConfigError> {
        if self.crawler.parallelism == 0 {
            return Err(ConfigError::InvalidValue {
                field: "crawler.parallelism".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.crawler.embed_batch == 0 {
            return Err(ConfigError::InvalidValue {
                field: "crawler.embed_batch".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    fn validate_voice(&self) -> Result<(), ConfigError> {
        if self.voice.max_sessions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "voice.max_sessions".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    fn validate_embedding(&self) -> Result<(), ConfigError> {
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.dimensions".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.embedding.batch_size == 0 || self.embedding.batch_size > 100 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.batch_size".to_string(),
                message: "must be between 1 and 100".to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings from files and environment
///
/// Priority: env vars > config/{env}.toml > config/default.toml > defaults.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    let default_path = Path::new("config/default.toml");
    if default_path.exists() {
        builder = builder.add_source(File::from(default_path));
    }

    if let Some(env_name) = env {
        let env_path_string = format!("config/{}.toml", env_name);
        let env_path = Path::new(&env_path_string);
        if env_path.exists() {
            builder = builder.add_source(File::from(env_path));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("SITEVOICE")
            .separator("__")
            .try_parsing(true),
    );

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.search.cache_ttl_secs, 300);
        assert_eq!(settings.search.cache_swr_secs, 60);
        assert_eq!(settings.rate_limit.strategy, RateLimitStrategyKind::SlidingWindow);
    }

    #[test]
    fn test_top_k_bounds() {
        let mut settings = Settings::default();
        settings.search.default_top_k = 0;
        assert!(settings.validate().is_err());
        settings.search.default_top_k = 101;
        assert!(settings.validate().is_err());
        settings.search.default_top_k = 100;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_strict_env_requires_cors_origins() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        assert!(settings.validate().is_err());
        settings.server.cors_origins = vec!["https://app.example.com".to_string()];
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_embedding_batch_cap() {
        let mut settings = Settings::default();
        settings.embedding.batch_size = 101;
        assert!(settings.validate().is_err());
    }
}
