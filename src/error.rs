//! Error types for mcphub
//!
//! This module defines all error types used throughout the crate, using
//! `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for mcphub operations
///
/// Variants map onto the failure taxonomy of the connection manager:
/// transport failures (retried by the supervisor), tool execution failures
/// (surfaced to the caller), usage errors (never retried) and tool list
/// refresh failures (logged, never change connection status).
#[derive(Error, Debug)]
pub enum McpHubError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network or protocol failure while connecting, listing or sending
    #[error("Transport error: {0}")]
    Transport(String),

    /// A connected server's tool call failed
    #[error("Tool execution failed on server '{server_id}': {message}")]
    ToolExecution {
        /// Server that executed the call
        server_id: String,
        /// Failure description
        message: String,
    },

    /// No server is registered under the given id
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// The server exists but is not currently connected
    #[error("Server not connected: {0}")]
    ServerNotConnected(String),

    /// The tool is not advertised by the given server
    #[error("Tool '{tool}' not found on server '{server_id}'")]
    ToolNotFound {
        /// Server that was searched
        server_id: String,
        /// Requested tool name
        tool: String,
    },

    /// A server with the same id is already registered
    #[error("Duplicate server id: {0}")]
    DuplicateServer(String),

    /// Removal or lookup target does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Refreshing a server's tool list failed
    #[error("Tool list refresh failed for server '{server_id}': {message}")]
    ToolList {
        /// Server whose tools were being listed
        server_id: String,
        /// Failure description
        message: String,
    },

    /// The remote peer answered with a JSON-RPC error object
    #[error("MCP protocol error: {0}")]
    Protocol(String),

    /// No response arrived before the request deadline
    #[error("MCP request timed out: server={server}, method={method}")]
    Timeout {
        /// Server (or endpoint) the request was sent to
        server: String,
        /// JSON-RPC method that timed out
        method: String,
    },

    /// The server rejected our credentials (HTTP 401)
    #[error("MCP authentication required: {0}")]
    Auth(String),

    /// The server dropped our HTTP session (HTTP 404 with an active session)
    #[error("MCP session expired")]
    SessionExpired,

    /// The server negotiated a protocol version we do not speak
    #[error("Unsupported MCP protocol version: got {got}, expected one of {expected:?}")]
    ProtocolVersion {
        /// Versions this client accepts
        expected: Vec<String>,
        /// Version chosen by the server
        got: String,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl McpHubError {
    /// Whether the supervisor should retry after this error.
    ///
    /// Only transport-level failures are transient; usage errors and tool
    /// failures are returned to the caller as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Timeout { .. }
                | Self::SessionExpired
                | Self::Http(_)
                | Self::Io(_)
        )
    }
}

/// Result type alias for mcphub operations
///
/// Uses `anyhow::Error` as the error type; typed failures are carried as
/// [`McpHubError`] values and recovered with `downcast_ref`.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = McpHubError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_server_not_found_mentions_not_found() {
        let error = McpHubError::ServerNotFound("weather".to_string());
        assert!(error.to_string().to_lowercase().contains("not found"));
        assert!(error.to_string().contains("weather"));
    }

    #[test]
    fn test_server_not_connected_mentions_not_connected() {
        let error = McpHubError::ServerNotConnected("b".to_string());
        assert!(error.to_string().to_lowercase().contains("not connected"));
    }

    #[test]
    fn test_tool_not_found_display() {
        let error = McpHubError::ToolNotFound {
            server_id: "a".to_string(),
            tool: "search".to_string(),
        };
        assert_eq!(error.to_string(), "Tool 'search' not found on server 'a'");
    }

    #[test]
    fn test_tool_execution_display_carries_server() {
        let error = McpHubError::ToolExecution {
            server_id: "files".to_string(),
            message: "boom".to_string(),
        };
        let s = error.to_string();
        assert!(s.contains("files"));
        assert!(s.contains("boom"));
    }

    #[test]
    fn test_protocol_version_display() {
        let error = McpHubError::ProtocolVersion {
            expected: vec!["2025-11-25".to_string()],
            got: "1999-01-01".to_string(),
        };
        assert!(error.to_string().contains("1999-01-01"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(McpHubError::Transport("refused".into()).is_retryable());
        assert!(McpHubError::SessionExpired.is_retryable());
        assert!(McpHubError::Timeout {
            server: "s".into(),
            method: "initialize".into()
        }
        .is_retryable());
        assert!(!McpHubError::ServerNotFound("s".into()).is_retryable());
        assert!(!McpHubError::DuplicateServer("s".into()).is_retryable());
        assert!(!McpHubError::ToolExecution {
            server_id: "s".into(),
            message: "m".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: McpHubError = io_error.into();
        assert!(matches!(error, McpHubError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: McpHubError = json_error.into();
        assert!(matches!(error, McpHubError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: McpHubError = yaml_error.into();
        assert!(matches!(error, McpHubError::Yaml(_)));
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = McpHubError::NotFound("x".into()).into();
        assert!(matches!(
            err.downcast_ref::<McpHubError>(),
            Some(McpHubError::NotFound(_))
        ));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<McpHubError>();
    }
}
