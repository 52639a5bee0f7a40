//! Engine Configuration
//!
//! Loaded from an optional JSON file; every field has a default so the
//! engine runs without one. Environment variables override logging only.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::logging::LoggingConfig;
use crate::rules::DEFAULT_IMMUTABLE_KEYS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Logging: {0}")]
    Logging(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Keys left out of every entity hash, on top of the built-in ignore set.
    pub hash_ignored_keys: Vec<String>,
    /// Keys the persisted version keeps on update.
    pub immutable_keys: Vec<String>,
    /// Number templates generate identifiers above this value.
    pub number_seed: u64,
    /// Strip failing optional values instead of reporting them.
    pub ignore_invalid_properties: bool,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hash_ignored_keys: vec![],
            immutable_keys: DEFAULT_IMMUTABLE_KEYS.iter().map(|k| k.to_string()).collect(),
            number_seed: 0,
            ignore_invalid_properties: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.logging.merge_with_env();
        Ok(config)
    }

    /// `load` when a path is given, defaults plus environment otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let mut config = Self::default();
                config.logging.merge_with_env();
                Ok(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{"numberSeed": 1000, "hashIgnoredKeys": ["urn:note"]}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.number_seed, 1000);
        assert_eq!(config.hash_ignored_keys, vec!["urn:note".to_string()]);
        assert!(config.immutable_keys.iter().any(|k| k == vocab::HAS_PID));
        assert!(!config.ignore_invalid_properties);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, "{ not json").unwrap();
        let err = EngineConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
