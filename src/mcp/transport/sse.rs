//! Legacy HTTP+SSE transport for MCP (`2024-11-05` revision)
//!
//! The session is a long-lived `GET` returning `text/event-stream`. The
//! server's first event is `endpoint`, whose data is the URL (often
//! relative) that client messages must be POSTed to. Every response and
//! notification then arrives on the GET stream as a `message` event.
//!
//! The inbound stream ends when the server closes the GET body, which the
//! connection layer treats as a lost session.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{McpHubError, Result};
use crate::mcp::transport::event_stream::{pump_events, SseEvent};
use crate::mcp::transport::http::HttpSettings;
use crate::mcp::transport::Transport;

/// Name of the event announcing the POST URL.
const ENDPOINT_EVENT: &str = "endpoint";

/// Legacy HTTP+SSE transport.
#[derive(Debug)]
pub struct SseTransport {
    http_client: reqwest::Client,
    stream_url: url::Url,
    post_url: url::Url,
    headers: HashMap<String, String>,
    response_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl SseTransport {
    /// Open the event stream and wait for the server to announce its
    /// message endpoint.
    ///
    /// # Errors
    ///
    /// - [`McpHubError::Auth`] if the GET is answered with `401`.
    /// - [`McpHubError::Transport`] if the GET fails, returns a non-success
    ///   status, the stream ends or `connect_timeout` elapses before an
    ///   `endpoint` event arrives, or the announced URL is invalid.
    pub async fn connect(
        stream_url: url::Url,
        headers: HashMap<String, String>,
        settings: &HttpSettings,
    ) -> Result<Self> {
        let http_client = settings.build_client()?;

        let mut req = http_client
            .get(stream_url.as_str())
            .header("Accept", "text/event-stream");
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req
            .send()
            .await
            .map_err(|e| McpHubError::Transport(format!("SSE GET failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(McpHubError::Auth(format!("SSE stream at {stream_url} requires authorization")).into());
        }
        if !status.is_success() {
            return Err(McpHubError::Transport(format!("SSE GET returned status {status}")).into());
        }

        let shutdown = CancellationToken::new();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SseEvent>();

        let pump_token = shutdown.clone();
        let body = response.bytes_stream();
        tokio::spawn(async move {
            tokio::select! {
                _ = pump_token.cancelled() => {}
                _ = pump_events(body, event_tx) => {}
            }
        });

        let announced = tokio::time::timeout(settings.connect_timeout, async {
            while let Some(event) = event_rx.recv().await {
                if event.event.as_deref() == Some(ENDPOINT_EVENT) {
                    return Some(event.data);
                }
                tracing::debug!(url = %stream_url, "SSE event before endpoint ignored");
            }
            None
        })
        .await;

        let endpoint = match announced {
            Ok(Some(data)) => data,
            Ok(None) => {
                shutdown.cancel();
                return Err(McpHubError::Transport(
                    "SSE stream ended before endpoint event".into(),
                )
                .into());
            }
            Err(_) => {
                shutdown.cancel();
                return Err(McpHubError::Transport(
                    "timed out waiting for SSE endpoint event".into(),
                )
                .into());
            }
        };

        let post_url = match stream_url.join(endpoint.trim()) {
            Ok(url) => url,
            Err(e) => {
                shutdown.cancel();
                return Err(e.into());
            }
        };

        tracing::debug!(stream = %stream_url, post = %post_url, "SSE session established");

        let (response_tx, response_rx) = mpsc::unbounded_channel::<String>();
        let forward_token = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = forward_token.cancelled() => break,
                    event = event_rx.recv() => match event {
                        Some(event) if event.is_message() && !event.data.is_empty() => {
                            if response_tx.send(event.data).is_err() {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        });

        Ok(Self {
            http_client,
            stream_url,
            post_url,
            headers,
            response_rx: Arc::new(Mutex::new(response_rx)),
            shutdown,
            closed: AtomicBool::new(false),
        })
    }

    /// URL the server asked client messages to be POSTed to.
    pub fn post_url(&self) -> &url::Url {
        &self.post_url
    }
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    async fn send(&self, message: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpHubError::Transport("transport closed".into()).into());
        }

        let mut req = self
            .http_client
            .post(self.post_url.as_str())
            .header("Content-Type", "application/json")
            .body(message);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req
            .send()
            .await
            .map_err(|e| McpHubError::Transport(format!("SSE POST failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(McpHubError::Auth(format!("POST to {} requires authorization", self.post_url)).into());
        }
        if !status.is_success() {
            return Err(McpHubError::Transport(format!("SSE POST returned status {status}")).into());
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
        self.shutdown.cancel();
        tracing::debug!(stream = %self.stream_url, "SSE session closed");
    }
}
