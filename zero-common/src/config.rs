//! Configuration management for Zero services.
//!
//! The screener service reads a single configuration file at
//! `~/.zero-screener/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (ZERO_* prefix, provider credentials)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `ZERO_SCREENER_PORT` → screener.port
//! - `ZERO_BIND_ADDRESS` → network.bind
//! - `ZERO_LOG_LEVEL` → observability.log_level
//! - `ZERO_SCREENER_PYTHON` → screener.execution.interpreter
//! - `ALPACA_API_KEY_ID` → secrets.external.alpaca_key_id
//! - `ALPACA_API_SECRET_KEY` → secrets.external.alpaca_secret_key
//! - `TIINGO_API_TOKEN` → secrets.external.tiingo_token

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result, ResultExt};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".zero-screener"),
        |dirs| dirs.home_dir().join(".zero-screener"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Network Configuration
// ============================================================================

/// Global network configuration.
///
/// Default bind address is `127.0.0.1` (local only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bind address for the HTTP surface.
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

// ============================================================================
// Secrets
// ============================================================================

/// Grouped secrets.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecretsConfig {
    /// Market data vendor credentials
    #[serde(default)]
    pub external: ExternalSecretsConfig,
}

/// Credentials for upstream market data vendors.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExternalSecretsConfig {
    /// Alpaca market data key id
    #[serde(default)]
    pub alpaca_key_id: Option<String>,
    /// Alpaca market data secret key
    #[serde(default)]
    pub alpaca_secret_key: Option<String>,
    /// Tiingo API token
    #[serde(default)]
    pub tiingo_token: Option<String>,
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// JSON Schema reference
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Global network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Grouped secrets
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Screener pipeline configuration
    #[serde(default)]
    pub screener: ScreenerConfig,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// A missing file is not an error: defaults are used.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .context(format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration and apply environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("ZERO_SCREENER_PORT") {
            match port.parse() {
                Ok(p) => self.screener.port = p,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid ZERO_SCREENER_PORT"),
            }
        }

        if let Ok(bind) = std::env::var("ZERO_BIND_ADDRESS") {
            self.network.bind = bind;
        }

        if let Ok(level) = std::env::var("ZERO_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        if let Ok(python) = std::env::var("ZERO_SCREENER_PYTHON") {
            self.screener.execution.interpreter = python;
        }

        if let Ok(key) = std::env::var("ALPACA_API_KEY_ID") {
            self.secrets.external.alpaca_key_id = Some(key);
        }
        if let Ok(secret) = std::env::var("ALPACA_API_SECRET_KEY") {
            self.secrets.external.alpaca_secret_key = Some(secret);
        }
        if let Ok(token) = std::env::var("TIINGO_API_TOKEN") {
            self.secrets.external.tiingo_token = Some(token);
        }
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        let dir = config_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .context(format!("Failed to create config directory {}", dir.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        let path = config_path();
        fs::write(&path, content).context(format!("Failed to write config to {}", path.display()))
    }

    /// Socket address string for the HTTP surface.
    pub fn screener_addr(&self) -> String {
        format!("{}:{}", self.network.bind, self.screener.port)
    }

    /// Alpaca credentials, present only when both halves are configured.
    pub fn alpaca_credentials(&self) -> Option<(String, String)> {
        let ext = &self.secrets.external;
        match (&ext.alpaca_key_id, &ext.alpaca_secret_key) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some((id.clone(), secret.clone()))
            }
            _ => None,
        }
    }

    /// Tiingo API token.
    pub fn tiingo_token(&self) -> Option<String> {
        self.secrets
            .external
            .tiingo_token
            .clone()
            .filter(|t| !t.is_empty())
    }

    /// Parse a config document held in memory (used by tests and tooling).
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(Error::from)
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to set to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Screener Configuration
// ============================================================================

/// Screener pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerConfig {
    /// HTTP port
    #[serde(default = "default_screener_port")]
    pub port: u16,

    /// Provider visitation order (names of registered providers)
    #[serde(default = "default_provider_order")]
    pub provider_order: Vec<String>,

    /// Cache TTL for fetched market data, in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Default history window in calendar days
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Symbols per upstream request batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delay between upstream batches, in milliseconds
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// HTTP timeout for upstream requests, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Universe used when a screener names no symbols
    #[serde(default = "default_universe")]
    pub default_universe: Vec<String>,

    /// Sandboxed execution settings
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            port: default_screener_port(),
            provider_order: default_provider_order(),
            cache_ttl_secs: default_cache_ttl_secs(),
            lookback_days: default_lookback_days(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            default_universe: default_universe(),
            execution: ExecutionConfig::default(),
        }
    }
}

fn default_screener_port() -> u16 {
    4440
}

fn default_provider_order() -> Vec<String> {
    vec!["alpaca".into(), "tiingo".into(), "yahoo".into()]
}

/// Longest history window a run may request, in calendar days.
pub const MAX_LOOKBACK_DAYS: u32 = 36_500;

/// Longest cache TTL accepted from configuration (one year).
pub const MAX_CACHE_TTL_SECS: u64 = 31_536_000;

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_lookback_days() -> u32 {
    90
}

fn default_batch_size() -> usize {
    5
}

fn default_batch_delay_ms() -> u64 {
    250
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_universe() -> Vec<String> {
    [
        "AAPL", "MSFT", "GOOGL", "AMZN", "META", "NVDA", "TSLA", "JPM", "V", "JNJ",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Settings for running user screeners in a child interpreter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Interpreter binary (resolved through PATH)
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Hard wall-clock deadline per run, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Cap on captured bytes per output stream
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Maximum child processes running at once
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Third-party packages screeners may import
    #[serde(default = "default_required_packages")]
    pub required_packages: Vec<String>,

    /// Install missing packages at startup
    #[serde(default = "default_true")]
    pub auto_install: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            timeout_ms: default_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
            max_concurrent_runs: default_max_concurrent_runs(),
            required_packages: default_required_packages(),
            auto_install: true,
        }
    }
}

fn default_interpreter() -> String {
    if cfg!(windows) {
        "python".into()
    } else {
        "python3".into()
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_output_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_max_concurrent_runs() -> usize {
    4
}

fn default_required_packages() -> Vec<String> {
    vec!["pandas".into(), "numpy".into()]
}

fn default_true() -> bool {
    true
}
