//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::bus::BusConfig;
use crate::parser::{BuiltinParser, ParserSpec};
use crate::series::{FileHistoryStore, HistoryResult, HistoryStore};
use crate::transport::ConnectOptions;
use crate::widgets::WidgetSpec;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-topic parsers
    #[serde(default)]
    pub parsers: Vec<ParserSpec>,

    /// Widget instances feeding series
    #[serde(default)]
    pub widgets: Vec<WidgetSpec>,
}

/// Broker connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_url")]
    pub url: String,

    /// Generated per session when absent
    pub client_id: Option<String>,

    pub username: Option<String>,

    pub password: Option<String>,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_reconnect_period")]
    pub reconnect_period_ms: u64,

    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

fn default_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_reconnect_period() -> u64 {
    1000 // fixed 1 second retry
}

fn default_command_capacity() -> usize {
    100
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            reconnect_period_ms: default_reconnect_period(),
            command_capacity: default_command_capacity(),
        }
    }
}

/// Message cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Parser for topics without an entry in `[[parsers]]`
    #[serde(default)]
    pub default_parser: BuiltinParser,

    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
}

fn default_events_capacity() -> usize {
    1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_parser: BuiltinParser::default(),
            events_capacity: default_events_capacity(),
        }
    }
}

/// Series history configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_history_dir")]
    pub dir: String,

    #[serde(default = "default_series_capacity")]
    pub default_capacity: usize,

    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,
}

fn default_history_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("mqttdeck").join("history").to_string_lossy().to_string())
        .unwrap_or_else(|| "./mqttdeck_history".to_string())
}

fn default_series_capacity() -> usize {
    20
}

fn default_flush_interval() -> u64 {
    5000 // 5 seconds
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_history_dir(),
            default_capacity: default_series_capacity(),
            flush_interval_ms: default_flush_interval(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("mqttdeck").join("config.toml")),
            Some(PathBuf::from("./mqttdeck.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Reject parser and widget entries that could never work
    pub fn validate(&self) -> Result<(), ConfigError> {
        for spec in &self.parsers {
            spec.build()
                .map_err(|e| ConfigError::Invalid(format!("parser for '{}': {}", spec.topic, e)))?;
        }
        for widget in &self.widgets {
            widget
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("widget '{}': {}", widget.title, e)))?;
        }
        Ok(())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Broker overrides
        if let Some(url) = lookup("MQTTDECK_BROKER_URL") {
            self.broker.url = url;
        }
        if let Some(client_id) = lookup("MQTTDECK_CLIENT_ID") {
            self.broker.client_id = Some(client_id);
        }
        if let Some(username) = lookup("MQTTDECK_USERNAME") {
            self.broker.username = Some(username);
        }
        if let Some(password) = lookup("MQTTDECK_PASSWORD") {
            self.broker.password = Some(password);
        }

        // History overrides
        if let Some(dir) = lookup("MQTTDECK_HISTORY_DIR") {
            self.history.dir = dir;
            self.history.enabled = true;
        }

        // Logging overrides
        if let Some(level) = lookup("MQTTDECK_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("MQTTDECK_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Session options for the configured broker
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            client_id: self.broker.client_id.clone(),
            username: self.broker.username.clone(),
            password: self.broker.password.clone(),
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs),
            reconnect_period: Duration::from_millis(self.broker.reconnect_period_ms),
        }
    }

    /// Bus tunables
    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            cache_events_capacity: self.cache.events_capacity,
            series_capacity: self.history.default_capacity,
            history_flush_interval: Duration::from_millis(self.history.flush_interval_ms.max(100)),
            default_parser: self.cache.default_parser,
        }
    }

    /// File-backed history store, when history is enabled
    pub fn history_store(&self) -> HistoryResult<Option<Arc<dyn HistoryStore>>> {
        if !self.history.enabled {
            return Ok(None);
        }
        let store: Arc<dyn HistoryStore> = Arc::new(FileHistoryStore::open(&self.history.dir)?);
        Ok(Some(store))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# mqttdeck Configuration
#
# Environment variables override these settings:
# - MQTTDECK_BROKER_URL
# - MQTTDECK_CLIENT_ID
# - MQTTDECK_USERNAME
# - MQTTDECK_PASSWORD
# - MQTTDECK_HISTORY_DIR (also enables history)
# - MQTTDECK_LOG_LEVEL
# - MQTTDECK_LOG_FORMAT

[broker]
# mqtt://, mqtts://, ws:// or wss:// URL
url = "mqtt://localhost:1883"

# Client id presented to the broker (generated when unset)
# client_id = "mqttdeck-dashboard"

# Broker credentials
# username = ""
# password = ""

# MQTT keep-alive (seconds)
keep_alive_secs = 30

# Delay between reconnect attempts (ms)
reconnect_period_ms = 1000

# Queued outbound commands before subscribe/publish are rejected
command_capacity = 100

[cache]
# Parser for topics without an explicit one: json, text, number, bool
default_parser = "json"

# Buffered change notifications per slow watcher
events_capacity = 1024

[history]
# Persist series samples across restarts
enabled = false

# Directory for series snapshots
dir = "~/.local/share/mqttdeck/history"

# Capacity of series without an explicit one
default_capacity = 20

# How often to snapshot series (ms)
flush_interval_ms = 5000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/mqttdeck/mqttdeck.log"

# Per-topic parsers: either an expression or a builtin name
# [[parsers]]
# topic = "sensors/t2"
# expression = "v * 2"
#
# [[parsers]]
# topic = "sensors/raw"
# builtin = "number"

# Widgets: each one feeds its own series
# [[widgets]]
# id = "living-room"
# kind = "chart"
# title = "Living room"
# topic = "home/living/temp"
# path = "sensor.value"
# unit = "°C"
"#
    .to_string()
}
