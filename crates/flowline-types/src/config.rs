//! Resolver configuration.
//!
//! `ResolverConfig` controls the knobs of definition-time resolution. It is
//! loaded from a TOML file (usually `flowline.toml`); every field has a
//! default so an empty file is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pipeline::RetryStrategy;

/// Top-level resolver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Also classify diagnostics by their detail text
    /// (`There is no variable named "X".`) when they carry no typed kind.
    ///
    /// Turning this off restricts recoverability to typed unknown-variable
    /// diagnostics only.
    #[serde(default = "default_match_diagnostic_text")]
    pub match_diagnostic_text: bool,

    /// File name recorded in source ranges produced by the decoder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Values a `retry` block falls back to for omitted attributes.
    #[serde(default)]
    pub retry_defaults: RetryDefaults,
}

fn default_match_diagnostic_text() -> bool {
    true
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            match_diagnostic_text: default_match_diagnostic_text(),
            filename: None,
            retry_defaults: RetryDefaults::default(),
        }
    }
}

impl ResolverConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load a configuration file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Defaults for `retry` block attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryDefaults {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    #[serde(default = "default_strategy")]
    pub strategy: RetryStrategy,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: i64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: i64,
}

fn default_max_attempts() -> i64 {
    3
}

fn default_strategy() -> RetryStrategy {
    RetryStrategy::Constant
}

fn default_min_interval_ms() -> i64 {
    1000
}

fn default_max_interval_ms() -> i64 {
    10_000
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: default_strategy(),
            min_interval_ms: default_min_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}
