//! Placeholder tools for servers without an endpoint
//!
//! An endpoint-less server with fallback allowed is connected to an
//! [`OfflineConnection`], which answers `list_tools` and `call_tool` from an
//! injected [`OfflineProvider`] instead of the network. The default
//! [`BuiltinOfflineProvider`] offers the same small tool set for every
//! server id, enough to exercise the catalog and gateway during local
//! development.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{McpHubError, Result};
use crate::mcp::connection::McpConnection;
use crate::mcp::transport::TransportKind;
use crate::mcp::types::McpTool;

/// Source of placeholder tools, keyed by server id.
#[async_trait]
pub trait OfflineProvider: Send + Sync + std::fmt::Debug {
    /// Tools advertised for `server_id`.
    fn tools_for(&self, server_id: &str) -> Vec<McpTool>;

    /// Run `tool` for `server_id`.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::ToolExecution`] for unknown tools or invalid
    /// arguments.
    async fn invoke(&self, server_id: &str, tool: &str, arguments: Value) -> Result<Value>;
}

/// Default provider: `echo` and `server_info` on every server.
#[derive(Debug, Clone, Default)]
pub struct BuiltinOfflineProvider;

fn text_result(text: impl Into<String>) -> Value {
    json!({
        "content": [{ "type": "text", "text": text.into() }],
        "isError": false
    })
}

#[async_trait]
impl OfflineProvider for BuiltinOfflineProvider {
    fn tools_for(&self, server_id: &str) -> Vec<McpTool> {
        vec![
            McpTool {
                name: "echo".to_string(),
                description: Some(format!("Echo a message back from offline server '{server_id}'")),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "message": { "type": "string", "description": "Text to echo" }
                    },
                    "required": ["message"]
                }),
            },
            McpTool {
                name: "server_info".to_string(),
                description: Some("Describe this placeholder server".to_string()),
                input_schema: json!({ "type": "object", "properties": {} }),
            },
        ]
    }

    async fn invoke(&self, server_id: &str, tool: &str, arguments: Value) -> Result<Value> {
        match tool {
            "echo" => {
                let message = arguments
                    .get("message")
                    .and_then(Value::as_str)
                    .ok_or_else(|| McpHubError::ToolExecution {
                        server_id: server_id.to_string(),
                        message: "echo requires a string 'message' argument".to_string(),
                    })?;
                Ok(text_result(message))
            }
            "server_info" => Ok(text_result(format!(
                "Server '{server_id}' is running offline with placeholder tools"
            ))),
            other => Err(McpHubError::ToolExecution {
                server_id: server_id.to_string(),
                message: format!("unknown offline tool '{other}'"),
            }
            .into()),
        }
    }
}

/// In-process connection backed by an [`OfflineProvider`].
#[derive(Debug)]
pub struct OfflineConnection {
    server_id: String,
    provider: Arc<dyn OfflineProvider>,
    closed: AtomicBool,
}

impl OfflineConnection {
    /// Create a connection serving `server_id` from `provider`.
    pub fn new(server_id: impl Into<String>, provider: Arc<dyn OfflineProvider>) -> Self {
        Self {
            server_id: server_id.into(),
            provider,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpHubError::Transport(format!(
                "offline connection to '{}' is closed",
                self.server_id
            ))
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl McpConnection for OfflineConnection {
    fn kind(&self) -> TransportKind {
        TransportKind::Offline
    }

    async fn list_tools(&self) -> Result<Vec<McpTool>> {
        self.ensure_open()?;
        Ok(self.provider.tools_for(&self.server_id))
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.ensure_open()?;
        self.provider.invoke(&self.server_id, name, arguments).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> OfflineConnection {
        OfflineConnection::new("demo", Arc::new(BuiltinOfflineProvider))
    }

    #[tokio::test]
    async fn test_builtin_tools_listed() {
        let names: Vec<String> = connection()
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["echo", "server_info"]);
    }

    #[tokio::test]
    async fn test_echo_returns_message() {
        let result = connection()
            .call_tool("echo", json!({ "message": "hi" }))
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], "hi");
        assert_eq!(result["isError"], false);
    }

    #[tokio::test]
    async fn test_echo_without_message_fails() {
        let err = connection().call_tool("echo", json!({})).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<McpHubError>(),
            Some(McpHubError::ToolExecution { server_id, .. }) if server_id == "demo"
        ));
    }

    #[tokio::test]
    async fn test_closed_connection_refuses_calls() {
        let conn = connection();
        conn.close().await;
        conn.close().await;
        assert!(conn.list_tools().await.is_err());
    }
}
