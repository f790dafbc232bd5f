//! Configuration parsing and management.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Runtime options applied to every context of a [`ContextTree`]
///
/// [`ContextTree`]: crate::context::ContextTree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// When false, cache entry values are created with caching disabled and
    /// every evaluation recomputes
    #[serde(default = "default_true")]
    pub caching_enabled: bool,

    /// When false, evaluating a deprecated port no longer reports it.
    /// `SystemBase::warn_port_deprecation` still reports when called directly.
    #[serde(default = "default_true")]
    pub deprecation_warnings: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        FrameworkConfig {
            caching_enabled: true,
            deprecation_warnings: true,
        }
    }
}

impl FrameworkConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }
}
