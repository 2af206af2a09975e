//! Configuration management for mcphub
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{McpHubError, Result};
use crate::mcp::config::McpConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for mcphub
///
/// ```yaml
/// mcp:
///   retry_attempts: 3
///   servers:
///     - id: demo
///       fallback_allowed: true
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Connection manager configuration
    #[serde(default)]
    pub mcp: McpConfig,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| McpHubError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| McpHubError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(raw) = std::env::var("MCPHUB_RETRY_ATTEMPTS") {
            if let Ok(value) = raw.parse() {
                self.mcp.retry_attempts = value;
            } else {
                tracing::warn!("Invalid MCPHUB_RETRY_ATTEMPTS: {}", raw);
            }
        }

        if let Ok(raw) = std::env::var("MCPHUB_RETRY_DELAY_MS") {
            if let Ok(value) = raw.parse() {
                self.mcp.retry_delay_ms = value;
            } else {
                tracing::warn!("Invalid MCPHUB_RETRY_DELAY_MS: {}", raw);
            }
        }

        if let Ok(raw) = std::env::var("MCPHUB_CONNECTION_TIMEOUT_MS") {
            if let Ok(value) = raw.parse() {
                self.mcp.connection_timeout_ms = value;
            } else {
                tracing::warn!("Invalid MCPHUB_CONNECTION_TIMEOUT_MS: {}", raw);
            }
        }

        if let Ok(raw) = std::env::var("MCPHUB_REQUEST_TIMEOUT_MS") {
            if let Ok(value) = raw.parse() {
                self.mcp.request_timeout_ms = value;
            } else {
                tracing::warn!("Invalid MCPHUB_REQUEST_TIMEOUT_MS: {}", raw);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(retry_attempts) = cli.retry_attempts {
            tracing::debug!("retry_attempts overridden from CLI: {}", retry_attempts);
            self.mcp.retry_attempts = retry_attempts;
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::Config`] if any check fails
    pub fn validate(&self) -> Result<()> {
        self.mcp.validate()
    }
}
