//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Worker pool configuration for the job runner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerConfig {
    /// Number of worker tasks (0 = auto-derive from core count)
    #[serde(default)]
    pub limit: u32,
    /// Exit workers once the queue drains instead of polling
    #[serde(default)]
    pub auto_stop: bool,
    /// Seconds to sleep between empty polls when auto_stop is false
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            limit: 0,
            auto_stop: false,
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// KV-cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KvCacheConfig {
    /// Directory holding one JSON file per cache key
    #[serde(default = "default_kvcache_dir")]
    pub dir: PathBuf,
}

fn default_kvcache_dir() -> PathBuf {
    PathBuf::from("./reeltide-state")
}

impl Default for KvCacheConfig {
    fn default() -> Self {
        Self {
            dir: default_kvcache_dir(),
        }
    }
}

/// Content-addressed storage node configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// "single", "cluster", or "dummy"
    #[serde(default = "default_storage_kind")]
    pub kind: String,
    /// HTTP API base address for single/cluster nodes
    #[serde(default)]
    pub address: Option<String>,
}

fn default_storage_kind() -> String {
    "dummy".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: default_storage_kind(),
            address: None,
        }
    }
}

/// Relational catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogConfig {
    /// sqlx connection string, e.g. "sqlite://catalog.db"
    #[serde(default = "default_catalog_dsn")]
    pub dsn: String,
}

fn default_catalog_dsn() -> String {
    "sqlite://reeltide-catalog.db".to_string()
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            dsn: default_catalog_dsn(),
        }
    }
}

/// Transcoder (ffmpeg/ffprobe) configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscoderConfig {
    /// Path to the ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Path to the ffprobe binary
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

/// Metrics HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsConfig {
    /// Bind address for the metrics server, e.g. "127.0.0.1:7878"
    #[serde(default = "default_metrics_addr")]
    pub bind_addr: String,
}

fn default_metrics_addr() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_metrics_addr(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub kvcache: KvCacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - RUNNER_LIMIT -> runner.limit
    /// - RUNNER_AUTO_STOP -> runner.auto_stop
    /// - RUNNER_POLL_INTERVAL_SECS -> runner.poll_interval_secs
    /// - KVCACHE_DIR -> kvcache.dir
    /// - STORAGE_KIND -> storage.kind
    /// - STORAGE_ADDRESS -> storage.address
    /// - CATALOG_DSN -> catalog.dsn
    /// - METRICS_BIND_ADDR -> metrics.bind_addr
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("RUNNER_LIMIT") {
            if let Ok(limit) = val.parse::<u32>() {
                self.runner.limit = limit;
            }
        }

        if let Ok(val) = env::var("RUNNER_AUTO_STOP") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.runner.auto_stop = true,
                "false" | "0" | "no" => self.runner.auto_stop = false,
                _ => {}
            }
        }

        if let Ok(val) = env::var("RUNNER_POLL_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.runner.poll_interval_secs = secs;
            }
        }

        if let Ok(val) = env::var("KVCACHE_DIR") {
            self.kvcache.dir = PathBuf::from(val);
        }

        if let Ok(val) = env::var("STORAGE_KIND") {
            self.storage.kind = val;
        }

        if let Ok(val) = env::var("STORAGE_ADDRESS") {
            self.storage.address = Some(val);
        }

        if let Ok(val) = env::var("CATALOG_DSN") {
            self.catalog.dsn = val;
        }

        if let Ok(val) = env::var("METRICS_BIND_ADDR") {
            self.metrics.bind_addr = val;
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}
