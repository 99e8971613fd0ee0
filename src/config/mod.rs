//! Configuration loading and parsing.
//!
//! This module provides the YAML-based gateway configuration.

mod error;
mod types;

pub use error::ConfigError;
pub use types::{GatewayConfig, LimitsConfig, ServerConfig};

use std::path::Path;

impl GatewayConfig {
    /// Load configuration from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: GatewayConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate a configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.program.executable.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "program.executable cannot be empty".into(),
            ));
        }
        if self.limits.max_concurrent_jobs == 0 {
            return Err(ConfigError::InvalidConfig(
                "limits.max_concurrent_jobs cannot be zero".into(),
            ));
        }
        Ok(())
    }
}
