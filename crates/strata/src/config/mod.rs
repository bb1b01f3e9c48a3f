use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, StrataError};

/// Embedding providers understood by [`EmbeddingConfig::provider`]
pub const EMBEDDING_PROVIDERS: [&str; 3] = ["hashed", "remote", "local"];

/// Longest accepted warm-tier TTL (one year)
pub const MAX_WARM_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Longest accepted summary TTL (one hundred years)
pub const MAX_SUMMARY_TTL_DAYS: u32 = 36_500;

/// Main configuration structure for Strata
///
/// Loaded once at process start and never mutated afterwards.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Hot/warm/cold tier sizing
    #[serde(default)]
    pub tiers: TierConfig,
    /// Cold-tier compression into summaries
    #[serde(default)]
    pub compression: CompressionConfig,
    /// Per-session accounting
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// External store behavior (timeouts, local backends)
    #[serde(default)]
    pub stores: StoreConfig,
    /// Embedding provider selection
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

/// Tier capacity configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TierConfig {
    /// Maximum interactions kept in the in-process hot buffer per session
    #[serde(default = "default_hot_max")]
    pub hot_max: usize,
    /// Maximum interactions kept in the warm cache value per session
    #[serde(default = "default_warm_max")]
    pub warm_max: usize,
    /// TTL applied to the warm cache key on every cascade
    #[serde(default = "default_warm_ttl_secs")]
    pub warm_ttl_secs: u64,
    /// Number of newest cold interactions sampled into a context view
    #[serde(default = "default_cold_sample_limit")]
    pub cold_sample_limit: usize,
    /// Number of recent interactions returned when semantic retrieval is unavailable
    #[serde(default = "default_recency_fallback_limit")]
    pub recency_fallback_limit: usize,
    /// Reject writes to sessions that were never initialized instead of auto-initializing
    #[serde(default)]
    pub strict_sessions: bool,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            hot_max: default_hot_max(),
            warm_max: default_warm_max(),
            warm_ttl_secs: default_warm_ttl_secs(),
            cold_sample_limit: default_cold_sample_limit(),
            recency_fallback_limit: default_recency_fallback_limit(),
            strict_sessions: false,
        }
    }
}

impl TierConfig {
    /// Cold-tier size above which compression kicks in
    pub fn compression_threshold(&self) -> usize {
        self.hot_max + self.warm_max
    }
}

fn default_hot_max() -> usize {
    5
}

fn default_warm_max() -> usize {
    50
}

fn default_warm_ttl_secs() -> u64 {
    86_400
}

fn default_cold_sample_limit() -> usize {
    100
}

fn default_recency_fallback_limit() -> usize {
    10
}

/// Compression configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CompressionConfig {
    /// Expected length of every embedding vector
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    /// Days a summary stays visible in the vector index
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,
    /// Upper bound on cold interactions read per compression pass
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
    /// Maximum characters of condensed text stored in a summary
    #[serde(default = "default_max_summary_chars")]
    pub max_summary_chars: usize,
    /// Leading sentences kept from each turn when condensing
    #[serde(default = "default_summary_sentences_per_turn")]
    pub summary_sentences_per_turn: usize,
    /// Maximum keywords appended to the condensed text
    #[serde(default = "default_keywords_max_count")]
    pub keywords_max_count: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: default_embedding_dimension(),
            ttl_days: default_ttl_days(),
            scan_limit: default_scan_limit(),
            max_summary_chars: default_max_summary_chars(),
            summary_sentences_per_turn: default_summary_sentences_per_turn(),
            keywords_max_count: default_keywords_max_count(),
        }
    }
}

fn default_embedding_dimension() -> usize {
    384
}

fn default_ttl_days() -> u32 {
    30
}

fn default_scan_limit() -> usize {
    10_000
}

fn default_max_summary_chars() -> usize {
    2000
}

fn default_summary_sentences_per_turn() -> usize {
    1
}

fn default_keywords_max_count() -> usize {
    20
}

/// Metrics and cost accounting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Accumulate an estimated cost from token counts
    #[serde(default)]
    pub cost_tracking_enabled: bool,
    /// Dollar cost per one million tokens
    #[serde(default = "default_cost_per_million_tokens")]
    pub cost_per_million_tokens: f64,
    /// Fixed per-interaction byte estimate used for memory footprint
    #[serde(default = "default_bytes_per_interaction")]
    pub bytes_per_interaction: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            cost_tracking_enabled: false,
            cost_per_million_tokens: default_cost_per_million_tokens(),
            bytes_per_interaction: default_bytes_per_interaction(),
        }
    }
}

fn default_cost_per_million_tokens() -> f64 {
    0.5
}

fn default_bytes_per_interaction() -> u64 {
    1024
}

/// External store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Timeout applied to every cache, durable store, embedding and index call
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum keys held by the in-process warm cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Base directory for the file-backed durable store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            cache_capacity: default_cache_capacity(),
            data_dir: default_data_dir(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".strata"))
        .unwrap_or_else(|| PathBuf::from(".strata"))
}

/// Embedding provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider type: hashed, remote, or local
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Base URL of an OpenAI-compatible embeddings API
    #[serde(default)]
    pub api_url: String,
    /// Environment variable name for API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Model identifier sent to the remote API
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    /// Number of summaries returned by relevance search
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_url: String::new(),
            api_key_env: default_api_key_env(),
            model: default_embedding_model(),
            timeout_secs: default_embedding_timeout_secs(),
            top_k: default_top_k(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hashed".to_string()
}

fn default_api_key_env() -> String {
    "EMBEDDING_API_KEY".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

fn default_top_k() -> usize {
    5
}

impl Config {
    /// Parse a TOML document and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| StrataError::Configuration(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StrataError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from an explicit path, else the first default location that exists,
    /// else built-in defaults
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".strata").join("config.toml")),
            dirs::config_dir().map(|c| c.join("strata").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(StrataError::Configuration(msg.to_string()));

        if self.tiers.hot_max == 0 {
            return invalid("tiers.hot_max must be at least 1");
        }
        if self.tiers.warm_max == 0 {
            return invalid("tiers.warm_max must be at least 1");
        }
        if self.tiers.warm_ttl_secs == 0 {
            return invalid("tiers.warm_ttl_secs must be positive");
        }
        if self.tiers.warm_ttl_secs > MAX_WARM_TTL_SECS {
            return Err(StrataError::Configuration(format!(
                "tiers.warm_ttl_secs must be at most {MAX_WARM_TTL_SECS}"
            )));
        }
        if self.compression.embedding_dimension == 0 {
            return invalid("compression.embedding_dimension must be at least 1");
        }
        if self.compression.ttl_days == 0 {
            return invalid("compression.ttl_days must be positive");
        }
        if self.compression.ttl_days > MAX_SUMMARY_TTL_DAYS {
            return Err(StrataError::Configuration(format!(
                "compression.ttl_days must be at most {MAX_SUMMARY_TTL_DAYS}"
            )));
        }
        if self.stores.timeout_ms == 0 {
            return invalid("stores.timeout_ms must be positive");
        }
        if self.metrics.cost_per_million_tokens < 0.0 {
            return invalid("metrics.cost_per_million_tokens cannot be negative");
        }
        if !EMBEDDING_PROVIDERS.contains(&self.embedding.provider.as_str()) {
            return Err(StrataError::Configuration(format!(
                "embedding.provider must be one of {:?}, got '{}'",
                EMBEDDING_PROVIDERS, self.embedding.provider
            )));
        }
        if self.embedding.provider == "remote" && self.embedding.api_url.trim().is_empty() {
            return invalid("embedding.api_url is required for the remote provider");
        }
        Ok(())
    }
}
