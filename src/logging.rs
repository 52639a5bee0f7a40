//! Logging setup for binaries embedding the engine
//!
//! The engine itself only emits `tracing` events. Whoever owns the process
//! installs a subscriber once, here.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::config::ConfigError;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human readable output
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `catalog_core=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl LoggingConfig {
    /// Applies `CATALOG_LOG_LEVEL` and `CATALOG_LOG_FORMAT`.
    pub fn merge_with_env(&mut self) {
        if let Ok(level) = std::env::var("CATALOG_LOG_LEVEL") {
            self.level = level;
        }

        if let Ok(format) = std::env::var("CATALOG_LOG_FORMAT") {
            match format.to_lowercase().as_str() {
                "compact" => self.format = LogFormat::Compact,
                "json" => self.format = LogFormat::Json,
                _ => tracing::warn!("Invalid log format: {}, using {:?}", format, self.format),
            }
        }
    }
}

/// `RUST_LOG` takes precedence over the configured level.
fn create_env_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::try_from_default_env()
            .map_err(|e| ConfigError::Logging(format!("invalid RUST_LOG: {}", e)));
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| ConfigError::Logging(format!("invalid log level {:?}: {}", config.level, e)))
}

/// Installs the global subscriber. Logs go to stderr so stdout stays machine readable.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let env_filter = create_env_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let installed = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| ConfigError::Logging(format!("failed to initialize logging: {}", e)))
}
