//! Configuration for the Corsair exporter.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::registry::is_valid_metric_name;

/// Path checked for a configuration file when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "/config/corsairexporter.json";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExporterConfig {
    /// Device identifier handed to the monitor binary. Required.
    #[serde(default)]
    pub device: Option<String>,

    /// Monitor executable (default: "/app/cpsumoncli").
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Address to listen on (default: "0.0.0.0").
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on (default: 9123).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between process metric samples (default: 15).
    #[serde(default = "default_scrape_interval")]
    pub scrape_interval: u64,

    /// Metric name prefix (default: "corsair").
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_binary() -> String {
    "/app/cpsumoncli".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9123
}

fn default_scrape_interval() -> u64 {
    15
}

fn default_prefix() -> String {
    "corsair".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 (or plain JSON) file.
    ///
    /// The result is not validated, so command line overrides can be
    /// applied before [`ExporterConfig::validate`] runs.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(json5::from_str(&content)?)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.device.as_deref() {
            Some(device) if !device.trim().is_empty() => {}
            _ => {
                return Err(ConfigError::Validation(
                    "device is required".to_string(),
                ));
            }
        }

        if self.binary.trim().is_empty() {
            return Err(ConfigError::Validation(
                "binary must not be empty".to_string(),
            ));
        }

        if self.scrape_interval == 0 {
            return Err(ConfigError::Validation(
                "scrapeInterval must be > 0".to_string(),
            ));
        }

        if !is_valid_metric_name(&self.prefix) {
            return Err(ConfigError::Validation(format!(
                "Invalid metric prefix: {}",
                self.prefix
            )));
        }

        self.listen_addr()?;

        Ok(())
    }

    /// The socket address the HTTP server binds to.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        format!("{}:{}", host, self.port)
            .parse()
            .map_err(|_| ConfigError::Validation(format!("Invalid listen address: {}", self.host)))
    }

    /// Interval between process metric samples.
    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval)
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            device: None,
            binary: default_binary(),
            host: default_host(),
            port: default_port(),
            scrape_interval: default_scrape_interval(),
            prefix: default_prefix(),
            logging: LoggingConfig::default(),
        }
    }
}
