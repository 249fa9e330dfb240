//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! across all serie applications, plus the flush-protocol timing settings
//! and their environment override.
//!
//! # Usage
//!
//! ```rust,no_run
//! use serie_common::config::{ConfigError, ConfigLoader, FlushConfig, SharedConfig};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct MyAppConfig {
//!     shared: SharedConfig,
//!     #[serde(default)]
//!     flush: FlushConfig,
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = MyAppConfig::load(Path::new("serie.toml"))?;
//!     let flush = config.flush.with_env_override()?;
//!     println!("{} waits {:?}", config.shared.service_name, flush.refresh_wait());
//!     Ok(())
//! }
//! ```

use crate::consts::{DEFAULT_REFRESH_WAIT_MS, DEFAULT_SERVE_INTERVAL_MS, REFRESH_WAIT_ENV};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML or environment value parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Common configuration fields shared across all serie applications.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "serie-writer"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Timing of the writer/reader flush protocol.
///
/// # TOML Example
///
/// ```toml
/// [flush]
/// refresh_wait_ms = 40
/// serve_interval_ms = 20
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlushConfig {
    /// How long a reader waits for the writer after posting a request.
    pub refresh_wait_ms: u64,

    /// How often a writer process serves pending flush requests.
    pub serve_interval_ms: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            refresh_wait_ms: DEFAULT_REFRESH_WAIT_MS,
            serve_interval_ms: DEFAULT_SERVE_INTERVAL_MS,
        }
    }
}

impl FlushConfig {
    /// Defaults with the `SERIE_REFRESHWAITTIME` override applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Apply the `SERIE_REFRESHWAITTIME` environment override, if set.
    ///
    /// # Errors
    ///
    /// An override that is not an unsigned integer count of milliseconds is
    /// rejected with `ConfigError::ParseError` instead of being ignored.
    pub fn with_env_override(self) -> Result<Self, ConfigError> {
        match std::env::var(REFRESH_WAIT_ENV) {
            Ok(raw) => self.with_refresh_wait_override(&raw),
            Err(std::env::VarError::NotPresent) => Ok(self),
            Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::ParseError(format!(
                "{REFRESH_WAIT_ENV} is not valid unicode"
            ))),
        }
    }

    /// Replace the refresh wait with a raw millisecond string.
    pub fn with_refresh_wait_override(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.refresh_wait_ms = raw.trim().parse::<u64>().map_err(|e| {
            ConfigError::ParseError(format!("{REFRESH_WAIT_ENV}={raw:?}: {e}"))
        })?;
        Ok(self)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `serve_interval_ms` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serve_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "serve_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Reader wait interval as a `Duration`.
    pub fn refresh_wait(&self) -> Duration {
        Duration::from_millis(self.refresh_wait_ms)
    }

    /// Writer serve period as a `Duration`.
    pub fn serve_interval(&self) -> Duration {
        Duration::from_millis(self.serve_interval_ms)
    }
}

/// Trait for loading configuration from TOML files.
///
/// This trait provides a default implementation that works with any type
/// implementing `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
