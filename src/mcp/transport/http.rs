//! Streamable HTTP transport for MCP (`2025-11-25` revision)
//!
//! Every outbound JSON-RPC message is sent as an HTTP POST. The server may
//! reply with:
//!
//! - `application/json` -- a direct JSON response body
//! - `text/event-stream` -- an SSE stream carrying one or more messages
//! - `202 Accepted` -- an acknowledgement with no body (notifications)
//!
//! # Session management
//!
//! The first successful response may carry an `MCP-Session-Id` header. It is
//! stored and attached to every later request. A `404` while a session is
//! active means the server dropped it: the session is cleared and
//! [`McpHubError::SessionExpired`] returned. [`Transport::close`] issues a
//! `DELETE` to end an active session.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::error::{McpHubError, Result};
use crate::mcp::transport::event_stream::{pump_events, SseEvent};
use crate::mcp::transport::Transport;
use crate::mcp::types::LATEST_PROTOCOL_VERSION;

/// Per-deployment HTTP client settings shared by both HTTP transports.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Bound on establishing a TCP/TLS connection.
    pub connect_timeout: std::time::Duration,
    /// TCP keep-alive probe interval.
    pub keep_alive: std::time::Duration,
}

impl HttpSettings {
    /// Build a reqwest client honouring these settings.
    ///
    /// No overall request timeout is set: SSE bodies are long-lived and the
    /// JSON-RPC layer enforces per-request deadlines.
    pub fn build_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .tcp_keepalive(self.keep_alive)
            .build()
            .map_err(|e| McpHubError::Transport(format!("failed to build HTTP client: {e}")).into())
    }
}

/// Streamable HTTP transport.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use mcphub::mcp::transport::http::{HttpSettings, HttpTransport};
///
/// let settings = HttpSettings {
///     connect_timeout: Duration::from_secs(10),
///     keep_alive: Duration::from_secs(30),
/// };
/// let transport = HttpTransport::new(
///     url::Url::parse("http://localhost:3000/mcp").unwrap(),
///     HashMap::new(),
///     &settings,
/// )
/// .unwrap();
/// ```
#[derive(Debug)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: url::Url,
    session_id: Arc<RwLock<Option<String>>>,
    /// Static extra headers merged into every request (e.g. Authorization).
    headers: HashMap<String, String>,
    response_tx: mpsc::UnboundedSender<String>,
    response_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    closed: AtomicBool,
}

impl HttpTransport {
    /// Construct a transport targeting `endpoint`. No network I/O happens
    /// until the first `send`.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        endpoint: url::Url,
        headers: HashMap<String, String>,
        settings: &HttpSettings,
    ) -> Result<Self> {
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        Ok(Self {
            http_client: settings.build_client()?,
            endpoint,
            session_id: Arc::new(RwLock::new(None)),
            headers,
            response_tx,
            response_rx: Arc::new(Mutex::new(response_rx)),
            closed: AtomicBool::new(false),
        })
    }

    /// The session id assigned by the server, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    async fn decorate(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req = req.header("MCP-Protocol-Version", LATEST_PROTOCOL_VERSION);
        if let Some(id) = self.session_id.read().await.as_deref() {
            req = req.header("MCP-Session-Id", id);
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, message: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpHubError::Transport("transport closed".into()).into());
        }

        let req = self
            .http_client
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(message);
        let response = self
            .decorate(req)
            .await
            .send()
            .await
            .map_err(|e| McpHubError::Transport(format!("HTTP POST failed: {e}")))?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            let www_auth = response
                .headers()
                .get("WWW-Authenticate")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(McpHubError::Auth(www_auth).into());
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            let mut sid = self.session_id.write().await;
            if sid.take().is_some() {
                return Err(McpHubError::SessionExpired.into());
            }
            return Err(McpHubError::Transport("HTTP 404 Not Found".into()).into());
        }

        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        if !status.is_success() {
            return Err(
                McpHubError::Transport(format!("HTTP POST returned status {status}")).into(),
            );
        }

        if let Some(new_session_id) = response
            .headers()
            .get("MCP-Session-Id")
            .and_then(|v| v.to_str().ok())
        {
            let mut sid = self.session_id.write().await;
            if sid.is_none() {
                *sid = Some(new_session_id.to_string());
            }
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SseEvent>();
            let response_tx = self.response_tx.clone();
            tokio::spawn(pump_events(response.bytes_stream(), event_tx));
            tokio::spawn(async move {
                while let Some(event) = event_rx.recv().await {
                    if event.is_message() && !event.data.is_empty() {
                        let _ = response_tx.send(event.data);
                    }
                }
            });
        } else {
            let body = response.text().await.map_err(|e| {
                McpHubError::Transport(format!("failed to read response body: {e}"))
            })?;
            if !body.trim().is_empty() {
                let _ = self.response_tx.send(body);
            }
        }

        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.response_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let item = rx.lock().await.recv().await?;
            Some((item, rx))
        }))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let session = self.session_id.write().await.take();
        if let Some(sid) = session {
            let mut req = self
                .http_client
                .delete(self.endpoint.as_str())
                .header("MCP-Session-Id", sid.as_str());
            for (k, v) in &self.headers {
                req = req.header(k.as_str(), v.as_str());
            }
            // Best effort: the server may already be gone.
            if let Err(e) = req.send().await {
                tracing::debug!(endpoint = %self.endpoint, "session DELETE failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_stream::StreamExt as _;

    fn settings() -> HttpSettings {
        HttpSettings {
            connect_timeout: Duration::from_secs(1),
            keep_alive: Duration::from_secs(30),
        }
    }

    fn make_transport(endpoint: &str) -> HttpTransport {
        HttpTransport::new(url::Url::parse(endpoint).unwrap(), HashMap::new(), &settings()).unwrap()
    }

    #[tokio::test]
    async fn test_receive_initially_empty() {
        let t = make_transport("http://localhost:9999/mcp");
        let mut stream = t.receive();
        let result = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(result.is_err(), "expected timeout on empty receive stream");
    }

    #[tokio::test]
    async fn test_session_id_initially_none() {
        let t = make_transport("http://localhost:9999/mcp");
        assert!(t.session_id().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_fails_without_network() {
        let t = make_transport("http://localhost:9999/mcp");
        t.close().await;
        t.close().await;
        let err = t.send("{}".to_string()).await.unwrap_err();
        assert!(err.to_string().contains("transport closed"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let t = make_transport("http://127.0.0.1:9/mcp");
        let err = t.send("{}".to_string()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<McpHubError>(),
            Some(McpHubError::Transport(_))
        ));
    }
}
