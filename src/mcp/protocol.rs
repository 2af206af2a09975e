//! Typed MCP lifecycle wrapper over [`JsonRpcClient`]
//!
//! - [`McpProtocol`] -- an uninitialized session. [`McpProtocol::initialize`]
//!   performs the `initialize` / `notifications/initialized` handshake.
//! - [`InitializedMcpProtocol`] -- a negotiated session exposing the tool
//!   methods the connection manager needs.
//!
//! Neither type owns a transport; the connection layer wires channels and
//! hands the resulting client in.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{McpHubError, Result};
use crate::mcp::client::JsonRpcClient;
use crate::mcp::types::{
    CallToolParams, ClientCapabilities, Implementation, InitializeParams, InitializeResponse,
    ListToolsResponse, McpTool, PaginatedParams, LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_PING, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
    SUPPORTED_PROTOCOL_VERSIONS,
};

/// Upper bound on `tools/list` pages followed for one listing.
const MAX_TOOL_PAGES: usize = 64;

/// An uninitialized MCP client session.
#[derive(Debug)]
pub struct McpProtocol {
    client: Arc<JsonRpcClient>,
}

impl McpProtocol {
    /// Wrap a channel-wired client whose read loop is already running.
    pub fn new(client: Arc<JsonRpcClient>) -> Self {
        Self { client }
    }

    /// Perform the MCP handshake.
    ///
    /// `timeout` bounds the `initialize` round trip; it is normally the
    /// deployment's connection timeout rather than the request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::ProtocolVersion`] if the server picks a version
    /// outside [`SUPPORTED_PROTOCOL_VERSIONS`], or whatever the underlying
    /// request fails with.
    pub async fn initialize(
        self,
        client_info: Implementation,
        capabilities: ClientCapabilities,
        timeout: Option<Duration>,
    ) -> Result<InitializedMcpProtocol> {
        let response: InitializeResponse = self
            .client
            .request(
                METHOD_INITIALIZE,
                InitializeParams {
                    protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                    capabilities,
                    client_info,
                },
                timeout,
            )
            .await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&response.protocol_version.as_str()) {
            return Err(McpHubError::ProtocolVersion {
                expected: SUPPORTED_PROTOCOL_VERSIONS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                got: response.protocol_version,
            }
            .into());
        }

        // The server does not answer this one; a failure here surfaces on
        // the next request anyway.
        let _ = self.client.notify(METHOD_INITIALIZED, serde_json::json!({}));

        tracing::debug!(
            server_name = %response.server_info.name,
            server_version = %response.server_info.version,
            protocol = %response.protocol_version,
            "MCP session initialized"
        );

        Ok(InitializedMcpProtocol {
            client: self.client,
            initialize_response: response,
        })
    }
}

/// A fully negotiated MCP client session.
#[derive(Debug)]
pub struct InitializedMcpProtocol {
    client: Arc<JsonRpcClient>,
    initialize_response: InitializeResponse,
}

impl InitializedMcpProtocol {
    /// The server's answer to `initialize`.
    pub fn initialize_response(&self) -> &InitializeResponse {
        &self.initialize_response
    }

    /// The shared JSON-RPC client backing this session.
    pub fn client(&self) -> &Arc<JsonRpcClient> {
        &self.client
    }

    /// Whether the server promised `notifications/tools/list_changed`.
    pub fn announces_tool_changes(&self) -> bool {
        self.initialize_response
            .capabilities
            .tools
            .as_ref()
            .and_then(|t| t.list_changed)
            .unwrap_or(false)
    }

    /// List every tool the server advertises, following `nextCursor`.
    ///
    /// # Errors
    ///
    /// Returns an error if any page request fails.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let resp: ListToolsResponse = self
                .client
                .request(METHOD_TOOLS_LIST, PaginatedParams { cursor }, None)
                .await?;

            tools.extend(resp.tools);

            match resp.next_cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => return Ok(tools),
            }
        }

        tracing::warn!(
            pages = MAX_TOOL_PAGES,
            "tools/list pagination did not terminate; using tools collected so far"
        );
        Ok(tools)
    }

    /// Invoke a named tool and return the raw `result` object.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server answers with a
    /// JSON-RPC error.
    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let arguments = match arguments {
            serde_json::Value::Null => None,
            other => Some(other),
        };
        self.client
            .request(
                METHOD_TOOLS_CALL,
                CallToolParams {
                    name: name.to_string(),
                    arguments,
                },
                None,
            )
            .await
    }

    /// Round-trip a `ping`.
    pub async fn ping(&self) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .request(METHOD_PING, serde_json::json!({}), None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::client::start_read_loop;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    /// Wire a client to an in-process responder closure that plays the server.
    fn scripted_server(
        respond: impl Fn(&serde_json::Value) -> Option<serde_json::Value> + Send + 'static,
    ) -> Arc<JsonRpcClient> {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let client = Arc::new(JsonRpcClient::new(out_tx).with_timeout(Duration::from_secs(5)));
        start_read_loop(in_rx, CancellationToken::new(), Arc::clone(&client));

        tokio::spawn(async move {
            while let Some(raw) = out_rx.recv().await {
                let req: serde_json::Value = serde_json::from_str(&raw).unwrap();
                if let Some(result) = respond(&req) {
                    let resp = serde_json::json!({ "jsonrpc": "2.0", "id": req["id"], "result": result });
                    let _ = in_tx.send(resp.to_string());
                }
            }
        });

        client
    }

    fn init_result(version: &str) -> serde_json::Value {
        serde_json::json!({
            "protocolVersion": version,
            "capabilities": { "tools": { "listChanged": true } },
            "serverInfo": { "name": "scripted", "version": "0.0.1" }
        })
    }

    #[tokio::test]
    async fn test_initialize_accepts_supported_version() {
        let client = scripted_server(|req| match req["method"].as_str() {
            Some("initialize") => Some(init_result("2025-03-26")),
            _ => None,
        });

        let session = McpProtocol::new(client)
            .initialize(Implementation::this_client(), ClientCapabilities::default(), None)
            .await
            .unwrap();
        assert_eq!(session.initialize_response().server_info.name, "scripted");
        assert!(session.announces_tool_changes());
    }

    #[tokio::test]
    async fn test_initialize_rejects_unknown_version() {
        let client = scripted_server(|req| match req["method"].as_str() {
            Some("initialize") => Some(init_result("1999-12-31")),
            _ => None,
        });

        let err = McpProtocol::new(client)
            .initialize(Implementation::this_client(), ClientCapabilities::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<McpHubError>(),
            Some(McpHubError::ProtocolVersion { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_tools_follows_cursor() {
        let client = scripted_server(|req| match req["method"].as_str() {
            Some("initialize") => Some(init_result(LATEST_PROTOCOL_VERSION)),
            Some("tools/list") => {
                if req["params"]["cursor"].is_null() {
                    Some(serde_json::json!({
                        "tools": [{ "name": "first", "inputSchema": { "type": "object" } }],
                        "nextCursor": "2"
                    }))
                } else {
                    Some(serde_json::json!({
                        "tools": [{ "name": "second", "inputSchema": { "type": "object" } }]
                    }))
                }
            }
            _ => None,
        });

        let session = McpProtocol::new(client)
            .initialize(Implementation::this_client(), ClientCapabilities::default(), None)
            .await
            .unwrap();
        let names: Vec<String> = session
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_call_tool_returns_raw_result() {
        let client = scripted_server(|req| match req["method"].as_str() {
            Some("initialize") => Some(init_result(LATEST_PROTOCOL_VERSION)),
            Some("tools/call") => Some(serde_json::json!({
                "content": [{ "type": "text", "text": req["params"]["arguments"]["q"] }],
                "isError": false
            })),
            _ => None,
        });

        let session = McpProtocol::new(client)
            .initialize(Implementation::this_client(), ClientCapabilities::default(), None)
            .await
            .unwrap();
        let result = session
            .call_tool("search", serde_json::json!({ "q": "rust" }))
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], "rust");
    }
}
