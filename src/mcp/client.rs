//! Transport-agnostic async JSON-RPC 2.0 client
//!
//! [`JsonRpcClient`] is decoupled from the wire: outbound messages are
//! written to an [`mpsc`] channel that a transport pump drains, and inbound
//! messages are fed to [`start_read_loop`], which resolves pending requests
//! and dispatches server notifications.
//!
//! In-flight requests are tracked in a `pending` map keyed by the numeric
//! request id. Each entry is a `oneshot::Sender` that receives the `result`
//! or `error` value when the matching response arrives, or a synthetic
//! error when the transport reports that the message never left
//! ([`JsonRpcClient::reject`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{McpHubError, Result};
use crate::mcp::types::{JsonRpcError, JsonRpcRequest, LOCAL_TRANSPORT_ERROR_CODE, METHOD_PING};

/// Default timeout applied to every request when the client was not given one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A notification handler: called with the raw `params` value.
type NotificationHandler = Box<dyn Fn(serde_json::Value) + Send + Sync + 'static>;

type PendingMap =
    HashMap<u64, oneshot::Sender<std::result::Result<serde_json::Value, JsonRpcError>>>;

/// Transport-agnostic async JSON-RPC 2.0 client.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
/// use mcphub::mcp::client::{start_read_loop, JsonRpcClient};
///
/// #[tokio::main]
/// async fn main() {
///     let (out_tx, _out_rx) = mpsc::unbounded_channel::<String>();
///     let (_in_tx, in_rx) = mpsc::unbounded_channel::<String>();
///     let client = Arc::new(JsonRpcClient::new(out_tx).with_label("demo"));
///     let _loop = start_read_loop(in_rx, CancellationToken::new(), Arc::clone(&client));
/// }
/// ```
pub struct JsonRpcClient {
    next_id: AtomicU64,
    pending: Mutex<PendingMap>,
    outbound_tx: mpsc::UnboundedSender<String>,
    notification_handlers: Mutex<HashMap<String, NotificationHandler>>,
    default_timeout: Duration,
    label: String,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("label", &self.label)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Create a new client writing serialized messages to `outbound_tx`.
    ///
    /// The caller wires the receiving end of `outbound_tx` to a transport
    /// and feeds inbound messages to [`start_read_loop`].
    pub fn new(outbound_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outbound_tx,
            notification_handlers: Mutex::new(HashMap::new()),
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            label: "(unknown)".to_string(),
        }
    }

    /// Set the timeout used by requests that do not pass their own.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Name the peer in timeout errors and log lines.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Send a JSON-RPC request and await the typed response.
    ///
    /// # Errors
    ///
    /// - [`McpHubError::Transport`] if the outbound channel is closed, the
    ///   read loop exited, or the transport rejected the message.
    /// - [`McpHubError::Timeout`] if no response arrives in time.
    /// - [`McpHubError::Protocol`] if the server returns an error response.
    /// - [`McpHubError::Serialization`] if (de)serialization fails.
    pub async fn request<P, R>(&self, method: &str, params: P, timeout: Option<Duration>) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Register before sending so the response can never beat us here.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let message = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(id)),
            method: method.to_string(),
            params: Some(serde_json::to_value(params)?),
        })?;

        if self.outbound_tx.send(message).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(McpHubError::Transport("outbound channel closed".to_string()).into());
        }

        let deadline = timeout.unwrap_or(self.default_timeout);
        let outcome = match tokio::time::timeout(deadline, rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(McpHubError::Timeout {
                    server: self.label.clone(),
                    method: method.to_string(),
                }
                .into());
            }
        };

        let rpc_result = outcome.map_err(|_| {
            McpHubError::Transport("read loop exited before response arrived".to_string())
        })?;

        let value = rpc_result.map_err(|e| {
            if e.code == LOCAL_TRANSPORT_ERROR_CODE {
                McpHubError::Transport(e.message)
            } else {
                McpHubError::Protocol(e.to_string())
            }
        })?;

        serde_json::from_value(value).map_err(|e| McpHubError::Serialization(e).into())
    }

    /// Send a JSON-RPC notification (no response expected).
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::Transport`] if the outbound channel is closed.
    pub fn notify<P: serde::Serialize + Send>(&self, method: &str, params: P) -> Result<()> {
        let message = serde_json::to_string(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": serde_json::to_value(params)?
        }))?;

        self.outbound_tx
            .send(message)
            .map_err(|_| McpHubError::Transport("outbound channel closed".to_string()))?;

        Ok(())
    }

    /// Register a handler for a server-sent notification.
    ///
    /// Registering a second handler for the same method replaces the first.
    pub async fn on_notification(
        &self,
        method: impl Into<String>,
        f: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) {
        self.notification_handlers
            .lock()
            .await
            .insert(method.into(), Box::new(f));
    }

    /// Fail the pending request `id` with a local transport error.
    ///
    /// Transports call this when a message could not be delivered, so the
    /// caller sees the failure immediately instead of waiting for its
    /// timeout. Unknown ids are ignored.
    pub async fn reject(&self, id: u64, message: impl Into<String>) {
        let tx = self.pending.lock().await.remove(&id);
        if let Some(tx) = tx {
            let _ = tx.send(Err(JsonRpcError {
                code: LOCAL_TRANSPORT_ERROR_CODE,
                message: message.into(),
                data: None,
            }));
        }
    }

    /// Number of requests still waiting for a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Extract the numeric request id from a serialized outbound message.
///
/// Returns `None` for notifications and responses without a numeric id.
pub fn outbound_request_id(raw: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value.get("method")?;
    value.get("id").and_then(|id| id.as_u64())
}

/// Start the JSON-RPC read loop as a background Tokio task.
///
/// - **Response** (`id` plus `result`/`error`): resolves the pending sender.
/// - **Server request** (`id` plus `method`): `ping` is answered with an
///   empty result, anything else with `-32601 Method not found`.
/// - **Notification** (`method` without `id`): calls the registered handler.
///
/// On cancellation or when the inbound channel closes, all pending senders
/// are dropped so in-flight `request()` calls fail instead of hanging.
pub fn start_read_loop(
    mut inbound_rx: mpsc::UnboundedReceiver<String>,
    cancellation: CancellationToken,
    client: Arc<JsonRpcClient>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => break,

                maybe_msg = inbound_rx.recv() => match maybe_msg {
                    Some(raw) => dispatch_message(&raw, &client).await,
                    None => break,
                },
            }
        }
        client.pending.lock().await.clear();
        tracing::debug!(peer = %client.label, "MCP read loop stopped");
    })
}

async fn dispatch_message(raw: &str, client: &Arc<JsonRpcClient>) {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(peer = %client.label, "MCP read loop: failed to parse inbound JSON: {e}");
            return;
        }
    };

    // Batched messages are legal JSON-RPC; handle each element.
    if let serde_json::Value::Array(items) = value {
        for item in items {
            dispatch_value(item, client).await;
        }
        return;
    }

    dispatch_value(value, client).await;
}

async fn dispatch_value(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let has_id = value.get("id").map_or(false, |id| !id.is_null());
    let has_method = value.get("method").is_some();
    let has_result = value.get("result").is_some();
    let has_error = value.get("error").is_some();

    if has_id && (has_result || has_error) && !has_method {
        handle_response(value, client).await;
    } else if has_id && has_method {
        handle_server_request(value, client);
    } else if has_method {
        handle_notification(value, client).await;
    } else {
        tracing::debug!(
            peer = %client.label,
            "MCP read loop: unclassifiable message ignored (has_id={has_id} has_result={has_result} has_error={has_error})"
        );
    }
}

async fn handle_response(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let id_val = &value["id"];
    let id = match id_val
        .as_u64()
        .or_else(|| id_val.as_str().and_then(|s| s.parse().ok()))
    {
        Some(id) => id,
        None => {
            tracing::warn!(peer = %client.label, "MCP read loop: response has non-integer id: {id_val}");
            return;
        }
    };

    let Some(tx) = client.pending.lock().await.remove(&id) else {
        tracing::debug!(peer = %client.label, "MCP read loop: response for unknown id {id}");
        return;
    };

    let outcome = match value.get("error") {
        Some(error_val) => Err(serde_json::from_value::<JsonRpcError>(error_val.clone())
            .unwrap_or_else(|_| JsonRpcError {
                code: -32603,
                message: format!("malformed error object: {error_val}"),
                data: None,
            })),
        None => Ok(value.get("result").cloned().unwrap_or(serde_json::Value::Null)),
    };

    // The caller may already have timed out.
    let _ = tx.send(outcome);
}

fn handle_server_request(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let id = value.get("id").cloned().unwrap_or(serde_json::Value::Null);
    let method = value.get("method").and_then(|m| m.as_str()).unwrap_or_default();

    let response = if method == METHOD_PING {
        serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": {} })
    } else {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": format!("Method not found: {method}") }
        })
    };

    if let Ok(serialized) = serde_json::to_string(&response) {
        let _ = client.outbound_tx.send(serialized);
    }
}

async fn handle_notification(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let Some(method) = value.get("method").and_then(|m| m.as_str()) else {
        return;
    };
    let params = value.get("params").cloned().unwrap_or(serde_json::Value::Null);

    let handlers = client.notification_handlers.lock().await;
    match handlers.get(method) {
        Some(handler) => handler(params),
        None => tracing::debug!(peer = %client.label, "MCP read loop: no handler for notification '{method}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn make_client(
        timeout: Duration,
    ) -> (
        Arc<JsonRpcClient>,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<String>,
        CancellationToken,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let token = CancellationToken::new();
        let client = Arc::new(
            JsonRpcClient::new(out_tx)
                .with_timeout(timeout)
                .with_label("test-server"),
        );
        start_read_loop(in_rx, token.clone(), Arc::clone(&client));
        (client, out_rx, in_tx, token)
    }

    async fn next_request(rx: &mut mpsc::UnboundedReceiver<String>) -> serde_json::Value {
        let raw = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for outbound message")
            .expect("outbound channel closed");
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_request_resolves_with_result() {
        let (client, mut out_rx, in_tx, _token) = make_client(Duration::from_secs(5));

        tokio::spawn(async move {
            let req = next_request(&mut out_rx).await;
            let resp = serde_json::json!({ "jsonrpc": "2.0", "id": req["id"], "result": { "ok": true } });
            in_tx.send(resp.to_string()).unwrap();
        });

        let result: serde_json::Value = client
            .request("tools/list", serde_json::json!({}), None)
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(client.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_error_response_becomes_protocol_error() {
        let (client, mut out_rx, in_tx, _token) = make_client(Duration::from_secs(5));

        tokio::spawn(async move {
            let req = next_request(&mut out_rx).await;
            let resp = serde_json::json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": { "code": -32602, "message": "bad params" }
            });
            in_tx.send(resp.to_string()).unwrap();
        });

        let err = client
            .request::<_, serde_json::Value>("tools/call", serde_json::json!({}), None)
            .await
            .unwrap_err();
        match err.downcast_ref::<McpHubError>() {
            Some(McpHubError::Protocol(msg)) => assert!(msg.contains("bad params")),
            other => panic!("expected Protocol error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_timeout_names_peer_and_method() {
        let (client, _out_rx, _in_tx, _token) = make_client(Duration::from_millis(20));

        let err = client
            .request::<_, serde_json::Value>("initialize", serde_json::json!({}), None)
            .await
            .unwrap_err();
        match err.downcast_ref::<McpHubError>() {
            Some(McpHubError::Timeout { server, method }) => {
                assert_eq!(server, "test-server");
                assert_eq!(method, "initialize");
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
        assert_eq!(client.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_reject_fails_pending_request_immediately() {
        let (client, mut out_rx, _in_tx, _token) = make_client(Duration::from_secs(30));

        let rejecter = Arc::clone(&client);
        tokio::spawn(async move {
            let raw = out_rx.recv().await.unwrap();
            let id = outbound_request_id(&raw).unwrap();
            rejecter.reject(id, "connection refused").await;
        });

        let err = client
            .request::<_, serde_json::Value>("initialize", serde_json::json!({}), None)
            .await
            .unwrap_err();
        match err.downcast_ref::<McpHubError>() {
            Some(McpHubError::Transport(msg)) => assert_eq!(msg, "connection refused"),
            other => panic!("expected Transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_fails_in_flight_requests() {
        let (client, _out_rx, _in_tx, token) = make_client(Duration::from_secs(30));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = client
            .request::<_, serde_json::Value>("ping", serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("read loop exited"));
    }

    #[tokio::test]
    async fn test_notification_dispatched_to_handler() {
        let (client, _out_rx, in_tx, _token) = make_client(Duration::from_secs(5));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        client
            .on_notification("notifications/tools/list_changed", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        in_tx
            .send(r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#.to_string())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_ping_is_answered() {
        let (_client, mut out_rx, in_tx, _token) = make_client(Duration::from_secs(5));

        in_tx
            .send(r#"{"jsonrpc":"2.0","id":"srv-1","method":"ping"}"#.to_string())
            .unwrap();
        let reply = next_request(&mut out_rx).await;
        assert_eq!(reply["id"], "srv-1");
        assert_eq!(reply["result"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_unknown_server_request_gets_method_not_found() {
        let (_client, mut out_rx, in_tx, _token) = make_client(Duration::from_secs(5));

        in_tx
            .send(r#"{"jsonrpc":"2.0","id":7,"method":"sampling/createMessage"}"#.to_string())
            .unwrap();
        let reply = next_request(&mut out_rx).await;
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[test]
    fn test_outbound_request_id_skips_notifications() {
        assert_eq!(
            outbound_request_id(r#"{"jsonrpc":"2.0","id":4,"method":"tools/list"}"#),
            Some(4)
        );
        assert_eq!(
            outbound_request_id(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#),
            None
        );
        assert_eq!(outbound_request_id("not json"), None);
    }
}
