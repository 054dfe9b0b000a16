//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.histea.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::api::backoff::DEFAULT_RAMP_SECONDS;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// API connection settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
}

/// Connection settings for the histogram computation server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the API.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bearer token for authenticated access.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Polling backoff ramp in seconds. The last value repeats forever.
    #[serde(default = "default_ramp")]
    pub ramp_seconds: Vec<u64>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            auth_token: None,
            timeout_seconds: default_timeout(),
            ramp_seconds: default_ramp(),
        }
    }
}

fn default_endpoint() -> String {
    "https://histea.hepforge.org/api/".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_ramp() -> Vec<u64> {
    DEFAULT_RAMP_SECONDS.to_vec()
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory where job files and fetched plots are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            verbose: false,
        }
    }
}

fn default_output_dir() -> String {
    ".".to_string()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(".histea.toml");

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref endpoint) = args.endpoint {
            self.api.endpoint = endpoint.clone();
        }
        if let Some(ref token) = args.auth_token {
            self.api.auth_token = Some(token.clone());
        }
        if let Some(timeout) = args.timeout {
            self.api.timeout_seconds = timeout;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.endpoint, "https://histea.hepforge.org/api/");
        assert_eq!(config.api.timeout_seconds, 30);
        assert_eq!(config.api.ramp_seconds, DEFAULT_RAMP_SECONDS.to_vec());
        assert!(config.api.auth_token.is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[api]
endpoint = "http://localhost:8000/api/"
auth_token = "secret"
ramp_seconds = [1, 5, 30]

[general]
output_dir = "results"
verbose = true
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.api.endpoint, "http://localhost:8000/api/");
        assert_eq!(config.api.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.api.ramp_seconds, vec![1, 5, 30]);
        assert_eq!(config.general.output_dir, "results");
        assert!(config.general.verbose);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = toml::from_str("[api]\nauth_token = \"t\"\n").unwrap();
        assert_eq!(config.api.endpoint, "https://histea.hepforge.org/api/");
        assert_eq!(config.api.timeout_seconds, 30);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[api]"));
        assert!(toml_str.contains("[general]"));
    }
}
