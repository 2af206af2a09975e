//! Invocation gateway: the single entry point for tool calls
//!
//! Every call resolves to a [`ToolCallOutcome`]; no error escapes. The
//! checks run in a fixed order and the first failure wins:
//!
//! 1. the server exists;
//! 2. the server is connected (no transport call is made otherwise);
//! 3. the server advertises the tool;
//! 4. the call itself succeeds.
//!
//! Successful payloads are returned verbatim, including results whose
//! `isError` flag is set by the server.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::McpHubError;
use crate::mcp::catalog::ToolCatalog;
use crate::mcp::registry::ServerRegistry;

/// Why a call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallErrorKind {
    /// No server with that id.
    ServerNotFound,
    /// The server exists but is not connected.
    ServerNotConnected,
    /// The server does not advertise the tool (or no server does).
    ToolNotFound,
    /// The server was reached and the call failed.
    ToolExecution,
}

/// Result of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolCallOutcome {
    /// The server returned a result.
    Success {
        /// Server that ran the tool.
        server_id: String,
        /// Result payload, unmodified.
        data: Value,
    },
    /// The call did not produce a result.
    Failure {
        /// Failure category.
        kind: ToolCallErrorKind,
        /// Human-readable message.
        message: String,
        /// Server the call was addressed to, when known.
        #[serde(skip_serializing_if = "Option::is_none")]
        server_id: Option<String>,
    },
}

impl ToolCallOutcome {
    fn failure(kind: ToolCallErrorKind, error: McpHubError, server_id: Option<&str>) -> Self {
        Self::Failure {
            kind,
            message: error.to_string(),
            server_id: server_id.map(str::to_string),
        }
    }

    /// Whether the call succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Flatten into the `{success, data?, error?}` wire shape.
    pub fn into_response(self) -> ToolCallResponse {
        match self {
            Self::Success { data, .. } => ToolCallResponse {
                success: true,
                data: Some(data),
                error: None,
            },
            Self::Failure { message, .. } => ToolCallResponse {
                success: false,
                data: None,
                error: Some(message),
            },
        }
    }
}

/// Response handed to the LLM tool-calling loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallResponse {
    /// Whether the call produced a result.
    pub success: bool,
    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure message otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Routes tool calls to live connections.
#[derive(Debug, Clone)]
pub struct InvocationGateway {
    registry: Arc<ServerRegistry>,
    catalog: Arc<ToolCatalog>,
}

impl InvocationGateway {
    /// Create a gateway over `registry` and `catalog`.
    pub fn new(registry: Arc<ServerRegistry>, catalog: Arc<ToolCatalog>) -> Self {
        Self { registry, catalog }
    }

    /// Call `tool_name` on `server_id`.
    pub async fn invoke(&self, server_id: &str, tool_name: &str, args: Value) -> ToolCallOutcome {
        let Some(slot) = self.registry.slot(server_id).await else {
            return ToolCallOutcome::failure(
                ToolCallErrorKind::ServerNotFound,
                McpHubError::ServerNotFound(server_id.to_string()),
                None,
            );
        };

        let connection = {
            let st = slot.lock().await;
            match (&st.connection, st.state.is_connected()) {
                (Some(conn), true) => Arc::clone(conn),
                _ => {
                    return ToolCallOutcome::failure(
                        ToolCallErrorKind::ServerNotConnected,
                        McpHubError::ServerNotConnected(server_id.to_string()),
                        Some(server_id),
                    )
                }
            }
        };

        if !self.catalog.has_tool(server_id, tool_name).await {
            return ToolCallOutcome::failure(
                ToolCallErrorKind::ToolNotFound,
                McpHubError::ToolNotFound {
                    server_id: server_id.to_string(),
                    tool: tool_name.to_string(),
                },
                Some(server_id),
            );
        }

        tracing::debug!(server = %server_id, tool = %tool_name, "invoking tool");
        match connection.call_tool(tool_name, args).await {
            Ok(data) => ToolCallOutcome::Success {
                server_id: server_id.to_string(),
                data,
            },
            Err(e) => {
                tracing::warn!(server = %server_id, tool = %tool_name, "tool call failed: {e:#}");
                ToolCallOutcome::failure(
                    ToolCallErrorKind::ToolExecution,
                    McpHubError::ToolExecution {
                        server_id: server_id.to_string(),
                        message: format!("{e:#}"),
                    },
                    Some(server_id),
                )
            }
        }
    }

    /// Call `tool_name` on whichever connected server wins name lookups.
    pub async fn invoke_by_name(&self, tool_name: &str, args: Value) -> ToolCallOutcome {
        match self.catalog.resolve(tool_name).await {
            Some(tool) => self.invoke(&tool.owner_server_id, tool_name, args).await,
            None => ToolCallOutcome::Failure {
                kind: ToolCallErrorKind::ToolNotFound,
                message: format!("Tool '{tool_name}' not found on any connected server"),
                server_id: None,
            },
        }
    }
}
