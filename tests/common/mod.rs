use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use mcphub::mcp::config::{McpConfig, McpServerConfig};
use mcphub::mcp::transport::TransportKind;

/// Session id handed out by [`McpResponder`].
#[allow(dead_code)]
pub const SESSION_ID: &str = "test-session";

/// Minimal Streamable HTTP MCP server.
///
/// Answers `initialize`, `ping`, `tools/list` and `tools/call` with JSON
/// bodies. Notifications get `202 Accepted`. Supported tools:
///
/// - `echo` returns its `message` argument as text
/// - `explode` answers with a JSON-RPC error
/// - `soft_fail` returns a result with `isError: true`
#[derive(Debug, Clone)]
pub struct McpResponder {
    pub tools: Vec<Value>,
}

#[allow(dead_code)]
impl McpResponder {
    pub fn new(tool_names: &[&str]) -> Self {
        Self {
            tools: tool_names
                .iter()
                .map(|name| {
                    json!({
                        "name": name,
                        "description": format!("{name} tool"),
                        "inputSchema": {
                            "type": "object",
                            "properties": { "message": { "type": "string" } },
                            "required": ["message"]
                        }
                    })
                })
                .collect(),
        }
    }

    fn result_for(&self, method: &str, params: &Value) -> Result<Value, Value> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": "2025-03-26",
                "capabilities": { "tools": { "listChanged": true } },
                "serverInfo": { "name": "wiremock-mcp", "version": "1.0.0" }
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.tools })),
            "tools/call" => {
                let message = params["arguments"]["message"].as_str().unwrap_or_default();
                match params["name"].as_str().unwrap_or_default() {
                    "explode" => Err(json!({ "code": -32603, "message": "tool exploded" })),
                    "soft_fail" => Ok(json!({
                        "content": [{ "type": "text", "text": "bad input" }],
                        "isError": true
                    })),
                    _ => Ok(json!({
                        "content": [{ "type": "text", "text": message }],
                        "isError": false
                    })),
                }
            }
            other => Err(json!({ "code": -32601, "message": format!("unknown method {other}") })),
        }
    }
}

impl Respond for McpResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };

        let Some(id) = body.get("id").cloned() else {
            return ResponseTemplate::new(202);
        };

        let method = body["method"].as_str().unwrap_or_default();
        let reply = match self.result_for(method, &body["params"]) {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(error) => json!({ "jsonrpc": "2.0", "id": id, "error": error }),
        };

        ResponseTemplate::new(200)
            .insert_header("MCP-Session-Id", SESSION_ID)
            .set_body_json(reply)
    }
}

/// Start a wiremock MCP server advertising `tool_names`.
#[allow(dead_code)]
pub async fn start_mcp_server(tool_names: &[&str]) -> MockServer {
    let server = MockServer::start().await;
    mount_mcp(&server, tool_names).await;
    server
}

/// Mount the MCP responder plus a `DELETE` handler on `server`.
#[allow(dead_code)]
pub async fn mount_mcp(server: &MockServer, tool_names: &[&str]) {
    Mock::given(method("POST"))
        .respond_with(McpResponder::new(tool_names))
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

/// A networked server entry using only Streamable HTTP.
#[allow(dead_code)]
pub fn remote_server(id: &str, endpoint: &str) -> McpServerConfig {
    McpServerConfig {
        id: id.to_string(),
        name: None,
        description: String::new(),
        endpoint: Some(endpoint.to_string()),
        transport: vec![TransportKind::StreamableHttp],
        fallback_allowed: false,
        headers: HashMap::new(),
    }
}

/// An endpoint-less server entry.
#[allow(dead_code)]
pub fn offline_server(id: &str, fallback_allowed: bool) -> McpServerConfig {
    McpServerConfig {
        id: id.to_string(),
        name: None,
        description: String::new(),
        endpoint: None,
        transport: TransportKind::default_preference(),
        fallback_allowed,
        headers: HashMap::new(),
    }
}

/// Manager config with short deadlines.
#[allow(dead_code)]
pub fn fast_config(servers: Vec<McpServerConfig>, retry_attempts: u32, retry_delay_ms: u64) -> McpConfig {
    McpConfig {
        servers,
        retry_attempts,
        retry_delay_ms,
        connection_timeout_ms: 2_000,
        request_timeout_ms: 2_000,
        ..McpConfig::default()
    }
}

/// Poll `check` every 10ms until it holds or `deadline` elapses.
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
