use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Management API server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_api_port(),
            log_level: default_log_level(),
        }
    }
}

/// Real-time push server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    #[serde(default = "default_stream_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_messages_per_second")]
    pub max_messages_per_second: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            port: default_stream_port(),
            max_connections: default_max_connections(),
            heartbeat_interval_secs: default_heartbeat_secs(),
            max_messages_per_second: default_messages_per_second(),
        }
    }
}

/// Per-subsystem logging defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Root directory for per-subsystem log directories
    #[serde(default = "default_log_root")]
    pub log_root: String,

    /// Buffered entries before an asynchronous flush is triggered
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Max time before flushing a partial buffer
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Files older than this are compressed or removed
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Gzip aged files instead of deleting them outright
    #[serde(default = "default_true")]
    pub compress: bool,

    /// Emit entry events for real-time streaming
    #[serde(default = "default_true")]
    pub realtime: bool,

    /// Bounded in-memory search index size per subsystem
    #[serde(default = "default_max_index_entries")]
    pub max_index_entries: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_root: default_log_root(),
            buffer_size: default_buffer_size(),
            flush_interval_secs: default_flush_interval_secs(),
            retention_days: default_retention_days(),
            compress: true,
            realtime: true,
            max_index_entries: default_max_index_entries(),
        }
    }
}

/// Management API limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            max_search_results: default_max_search_results(),
            max_download_bytes: default_max_download_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stream_port() -> u16 {
    8081
}

fn default_max_connections() -> usize {
    1000
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_messages_per_second() -> u32 {
    100
}

fn default_log_root() -> String {
    "./logs".to_string()
}

fn default_buffer_size() -> usize {
    50
}

fn default_flush_interval_secs() -> u64 {
    5
}

fn default_retention_days() -> u32 {
    14
}

fn default_max_index_entries() -> usize {
    5000
}

fn default_requests_per_minute() -> u32 {
    300
}

fn default_max_search_results() -> usize {
    1000
}

fn default_max_download_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

/// Load configuration from a TOML file, falling back to defaults when
/// the file does not exist.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "Config file not found, using defaults");
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;

    Ok(config)
}
