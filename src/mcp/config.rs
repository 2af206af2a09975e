//! MCP connection manager configuration
//!
//! Lives under the `mcp:` key of the main configuration file:
//!
//! ```yaml
//! mcp:
//!   retry_attempts: 3
//!   retry_delay_ms: 1000
//!   servers:
//!     - id: search
//!       name: Web search
//!       endpoint: https://search.example.com/mcp
//!       transport: [streamable_http, sse]
//!       headers:
//!         Authorization: Bearer abc
//!     - id: demo
//!       fallback_allowed: true
//! ```

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{McpHubError, Result};
use crate::mcp::connection::ConnectionSettings;
use crate::mcp::registry::ServerDescriptor;
use crate::mcp::schema::DEFAULT_CACHE_CAPACITY;
use crate::mcp::supervisor::RetryPolicy;
use crate::mcp::transport::TransportKind;

/// Allowed characters in server ids.
pub const SERVER_ID_PATTERN: &str = r"^[A-Za-z0-9_.-]+$";

/// Upper bound on `retry_attempts`.
pub const MAX_RETRY_ATTEMPTS: u32 = 100;

/// Connection manager settings.
///
/// # Examples
///
/// ```
/// use mcphub::mcp::config::McpConfig;
///
/// let cfg = McpConfig::default();
/// assert!(cfg.servers.is_empty());
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpConfig {
    /// Servers in registration order.
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,

    /// Failed connection cycles before automatic retries stop.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Linear backoff unit in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Bound on one connection attempt (transport open plus handshake).
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Bound on each `tools/list` or `tools/call` request.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// TCP keep-alive interval for HTTP connections.
    #[serde(default = "default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,

    /// Translated schemas kept in memory.
    #[serde(default = "default_schema_cache_capacity")]
    pub schema_cache_capacity: usize,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_keep_alive_interval_ms() -> u64 {
    30_000
}

fn default_schema_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            keep_alive_interval_ms: default_keep_alive_interval_ms(),
            schema_cache_capacity: default_schema_cache_capacity(),
        }
    }
}

/// One configured server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpServerConfig {
    /// Unique id matching [`SERVER_ID_PATTERN`].
    pub id: String,

    /// Display name; defaults to the id.
    #[serde(default)]
    pub name: Option<String>,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// `http://` or `https://` endpoint. Omit to run offline.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Transports to try, in order.
    #[serde(default = "TransportKind::default_preference")]
    pub transport: Vec<TransportKind>,

    /// Run on placeholder tools when no endpoint is set.
    #[serde(default)]
    pub fallback_allowed: bool,

    /// Static headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl McpServerConfig {
    /// Build the registry descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::Config`] if the endpoint is not a valid URL.
    pub fn to_descriptor(&self) -> Result<ServerDescriptor> {
        let endpoint = match &self.endpoint {
            Some(raw) => Some(url::Url::parse(raw).map_err(|e| {
                McpHubError::Config(format!("server '{}': invalid endpoint '{raw}': {e}", self.id))
            })?),
            None => None,
        };

        Ok(ServerDescriptor {
            id: self.id.clone(),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            description: self.description.clone(),
            endpoint,
            transport_preference: self.transport.clone(),
            fallback_allowed: self.fallback_allowed,
            headers: self.headers.clone(),
        })
    }

    fn validate(&self, id_pattern: &Regex) -> Result<()> {
        if self.id.is_empty() {
            return Err(McpHubError::Config("server id cannot be empty".to_string()).into());
        }
        if !id_pattern.is_match(&self.id) {
            return Err(McpHubError::Config(format!(
                "server id '{}' may only contain letters, digits, '_', '.' and '-'",
                self.id
            ))
            .into());
        }

        if let Some(raw) = &self.endpoint {
            let url = self.to_descriptor()?.endpoint;
            let scheme = url.as_ref().map(|u| u.scheme().to_string()).unwrap_or_default();
            if scheme != "http" && scheme != "https" {
                return Err(McpHubError::Config(format!(
                    "server '{}': endpoint '{raw}' must use http or https",
                    self.id
                ))
                .into());
            }
            if self.transport.is_empty() {
                return Err(McpHubError::Config(format!(
                    "server '{}': transport list cannot be empty",
                    self.id
                ))
                .into());
            }
            if self.transport.iter().any(|k| !k.is_network()) {
                return Err(McpHubError::Config(format!(
                    "server '{}': 'offline' is not a dialable transport",
                    self.id
                ))
                .into());
            }
        }

        Ok(())
    }
}

impl McpConfig {
    /// Validate every setting and server entry.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.retry_attempts > MAX_RETRY_ATTEMPTS {
            return Err(McpHubError::Config(format!(
                "retry_attempts must be less than or equal to {MAX_RETRY_ATTEMPTS}"
            ))
            .into());
        }

        for (name, value) in [
            ("retry_delay_ms", self.retry_delay_ms),
            ("connection_timeout_ms", self.connection_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("keep_alive_interval_ms", self.keep_alive_interval_ms),
        ] {
            if value == 0 {
                return Err(McpHubError::Config(format!("{name} must be greater than 0")).into());
            }
        }

        if self.schema_cache_capacity == 0 {
            return Err(McpHubError::Config(
                "schema_cache_capacity must be greater than 0".to_string(),
            )
            .into());
        }

        let id_pattern = Regex::new(SERVER_ID_PATTERN)
            .map_err(|e| McpHubError::Config(format!("invalid server id pattern: {e}")))?;
        let mut seen = HashSet::new();
        for server in &self.servers {
            server.validate(&id_pattern)?;
            if !seen.insert(server.id.as_str()) {
                return Err(McpHubError::Config(format!("duplicate server id '{}'", server.id)).into());
            }
        }

        Ok(())
    }

    /// Registry descriptors for every configured server, in order.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::Config`] for invalid endpoints.
    pub fn descriptors(&self) -> Result<Vec<ServerDescriptor>> {
        self.servers.iter().map(McpServerConfig::to_descriptor).collect()
    }

    /// Backoff policy derived from `retry_attempts` and `retry_delay_ms`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    /// Deadlines applied to network connections.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            connect_timeout: Duration::from_millis(self.connection_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            keep_alive: Duration::from_millis(self.keep_alive_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: &str, endpoint: Option<&str>) -> McpServerConfig {
        McpServerConfig {
            id: id.to_string(),
            name: None,
            description: String::new(),
            endpoint: endpoint.map(str::to_string),
            transport: TransportKind::default_preference(),
            fallback_allowed: false,
            headers: HashMap::new(),
        }
    }

    #[test]
    fn test_defaults_from_empty_yaml() {
        let cfg: McpConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg, McpConfig::default());
        assert_eq!(cfg.retry_attempts, 3);
        assert_eq!(cfg.retry_policy().base_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_server_yaml_defaults() {
        let cfg: McpConfig = serde_yaml::from_str(
            r#"
servers:
  - id: search
    endpoint: https://example.com/mcp
  - id: demo
    fallback_allowed: true
"#,
        )
        .unwrap();
        assert!(cfg.validate().is_ok());

        let descriptors = cfg.descriptors().unwrap();
        assert_eq!(descriptors[0].name, "search");
        assert_eq!(
            descriptors[0].transport_preference,
            vec![TransportKind::StreamableHttp, TransportKind::Sse]
        );
        assert!(descriptors[1].endpoint.is_none());
        assert!(descriptors[1].fallback_allowed);
    }

    #[test]
    fn test_validation_rejects_bad_ids() {
        let mut cfg = McpConfig::default();
        cfg.servers.push(server("", None));
        assert!(cfg.validate().is_err());

        cfg.servers = vec![server("has space", None)];
        assert!(cfg.validate().is_err());

        cfg.servers = vec![server("a", None), server("a", None)];
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate server id"));
    }

    #[test]
    fn test_validation_rejects_bad_endpoints() {
        let mut cfg = McpConfig::default();
        cfg.servers = vec![server("a", Some("ftp://example.com"))];
        assert!(cfg.validate().is_err());

        cfg.servers = vec![server("a", Some("not a url"))];
        assert!(cfg.validate().is_err());

        let mut offline = server("a", Some("http://example.com"));
        offline.transport = vec![TransportKind::Offline];
        cfg.servers = vec![offline];
        assert!(cfg.validate().is_err());

        let mut empty = server("a", Some("http://example.com"));
        empty.transport.clear();
        cfg.servers = vec![empty];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_and_excessive_values() {
        let mut cfg = McpConfig {
            retry_attempts: MAX_RETRY_ATTEMPTS + 1,
            ..McpConfig::default()
        };
        assert!(cfg.validate().is_err());

        cfg.retry_attempts = 0;
        assert!(cfg.validate().is_ok());

        cfg.request_timeout_ms = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("request_timeout_ms"));

        cfg.request_timeout_ms = 1;
        cfg.schema_cache_capacity = 0;
        assert!(cfg.validate().is_err());
    }
}
