//! Configuration management for the Tandem session host
//!
//! Settings come from a TOML file, then `TD_*` environment overrides, then
//! validation. Every section has defaults so a partial file is enough.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Default configuration file looked up by [`Config::load`]
pub const CONFIG_FILE: &str = "tandem.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session limits and persistence
    pub sessions: SessionConfig,

    /// Client engine tuning
    pub engine: EngineConfig,

    /// Metrics and monitoring
    pub metrics: MetricsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of open sessions
    pub max_sessions: usize,

    /// Maximum size of one client message (bytes)
    pub max_message_size: usize,

    /// Write the snapshot to the store and close the session when its last port leaves
    pub persist_on_disconnect: bool,
}

/// Client engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pending transaction count above which engines log a warning
    pub max_pending: usize,
}

/// Metrics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics
    pub enable_prometheus: bool,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

/// Output format of the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event
    Json,
    /// Multi-line human readable output
    Pretty,
    /// Single-line human readable output
    Compact,
}

impl LoggingConfig {
    /// Parse the configured `format`
    pub fn output_format(&self) -> Result<LogFormat> {
        match self.format.as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(Error::config(format!("Invalid log format '{}'", other))),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            max_message_size: 16 * 1024 * 1024, // 16MB
            persist_on_disconnect: true,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_pending: 256 }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enable_prometheus: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default file and environment variables
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        // Try to load from config file first
        if Path::new(CONFIG_FILE).exists() {
            config = Self::from_file(CONFIG_FILE)?;
        }

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup, `TD_*` names
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            value
                .parse()
                .map_err(|e| Error::config(format!("Invalid {}: {}", key, e)))
        }

        if let Some(v) = lookup("TD_MAX_SESSIONS") {
            self.sessions.max_sessions = parse("TD_MAX_SESSIONS", &v)?;
        }
        if let Some(v) = lookup("TD_MAX_MESSAGE_SIZE") {
            self.sessions.max_message_size = parse("TD_MAX_MESSAGE_SIZE", &v)?;
        }
        if let Some(v) = lookup("TD_PERSIST_ON_DISCONNECT") {
            self.sessions.persist_on_disconnect = parse("TD_PERSIST_ON_DISCONNECT", &v)?;
        }
        if let Some(v) = lookup("TD_MAX_PENDING") {
            self.engine.max_pending = parse("TD_MAX_PENDING", &v)?;
        }
        if let Some(v) = lookup("TD_ENABLE_PROMETHEUS") {
            self.metrics.enable_prometheus = parse("TD_ENABLE_PROMETHEUS", &v)?;
        }
        if let Some(level) = lookup("TD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("TD_LOG_FORMAT") {
            self.logging.format = format;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.sessions.max_sessions == 0 {
            return Err(Error::config("max_sessions must be at least 1"));
        }

        // A snapshot of the default document must fit
        if self.sessions.max_message_size < 1024 {
            return Err(Error::config("Max message size too small (minimum 1KB)"));
        }

        if self.engine.max_pending == 0 {
            return Err(Error::config("max_pending must be at least 1"));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(Error::config("Invalid log level")),
        }

        self.logging.output_format()?;

        Ok(())
    }
}

/// Load configuration from file or use defaults
pub fn load_config_or_default(path: Option<&str>) -> Config {
    match path {
        Some(path) => match Config::from_file(path).and_then(|config| config.validate().map(|()| config)) {
            Ok(config) => {
                info!("Loaded configuration from: {}", path);
                config
            }
            Err(e) => {
                warn!("Failed to load config from {}: {}. Using defaults.", path, e);
                Config::default()
            }
        },
        None => {
            info!("No config file specified, using defaults");
            Config::default()
        }
    }
}
