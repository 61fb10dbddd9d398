//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Settings for a [`ViewEngine`](crate::ViewEngine)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Prefix of every store the engine provisions for views
    #[serde(default = "default_store_prefix")]
    pub store_prefix: String,

    /// Upper bound on documents indexed concurrently within one update pass
    #[serde(default = "default_max_concurrent_docs")]
    pub max_concurrent_docs: usize,
}

fn default_store_prefix() -> String {
    String::from("_mapview_")
}

fn default_max_concurrent_docs() -> usize {
    16
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            store_prefix: default_store_prefix(),
            max_concurrent_docs: default_max_concurrent_docs(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from YAML text
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_docs == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_docs must be at least 1".to_string(),
            ));
        }
        if self.store_prefix.is_empty() {
            return Err(ConfigError::Invalid("store_prefix must not be empty".to_string()));
        }
        Ok(())
    }
}
