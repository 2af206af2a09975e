//! Live MCP connections and the connector seam
//!
//! A [`Connector`] turns a server target plus a [`TransportKind`] into a
//! ready-to-use [`McpConnection`]: transport opened, `initialize` handshake
//! done. The supervisor only ever talks to these two traits, which is what
//! lets tests substitute mocks for the network.
//!
//! [`RpcConnection`] is the network-backed implementation. It owns three
//! background tasks, all stopped by one cancellation token:
//!
//! - a writer pump draining the JSON-RPC client's outbound channel into
//!   [`Transport::send`], failing the matching pending request at once when
//!   a send fails and raising [`ConnectionSignal::Closed`] when the server
//!   reports the session expired;
//! - a reader pump forwarding [`Transport::receive`] into the read loop;
//! - the JSON-RPC read loop itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{McpHubError, Result};
use crate::mcp::client::{outbound_request_id, start_read_loop, JsonRpcClient};
use crate::mcp::protocol::{InitializedMcpProtocol, McpProtocol};
use crate::mcp::transport::http::{HttpSettings, HttpTransport};
use crate::mcp::transport::sse::SseTransport;
use crate::mcp::transport::{Transport, TransportKind};
use crate::mcp::types::{ClientCapabilities, Implementation, McpTool, NOTIF_TOOLS_LIST_CHANGED};

/// Where and how to reach one server.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectTarget {
    /// Registry id, used to label log lines and timeouts.
    pub server_id: String,
    /// Base endpoint URL.
    pub endpoint: url::Url,
    /// Static headers sent on every request.
    pub headers: HashMap<String, String>,
}

/// Out-of-band notice from a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSignal {
    /// The server sent `notifications/tools/list_changed`.
    ToolsChanged,
    /// The session ended without a local close: the inbound stream
    /// finished or the server expired the session.
    Closed,
}

/// Opens connections. The supervisor never retries inside a connector call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `target` over `kind` and complete the MCP
    /// handshake.
    async fn connect(
        &self,
        target: &ConnectTarget,
        kind: TransportKind,
    ) -> Result<Arc<dyn McpConnection>>;
}

/// A negotiated session able to list and call tools.
#[async_trait]
pub trait McpConnection: Send + Sync + std::fmt::Debug {
    /// The wire mechanism this connection runs over.
    fn kind(&self) -> TransportKind;

    /// Every tool the server currently advertises, in server order.
    async fn list_tools(&self) -> Result<Vec<McpTool>>;

    /// Call `name` with `arguments` and return the raw result payload.
    async fn call_tool(&self, name: &str, arguments: serde_json::Value)
        -> Result<serde_json::Value>;

    /// Take the signal stream. Only the first call returns `Some`.
    fn take_signals(&self) -> Option<mpsc::UnboundedReceiver<ConnectionSignal>> {
        None
    }

    /// Tear the connection down. Idempotent and infallible.
    async fn close(&self);
}

/// Deadlines applied to every network connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Bound on opening the transport and completing `initialize`.
    pub connect_timeout: Duration,
    /// Bound on each later request (`tools/list`, `tools/call`).
    pub request_timeout: Duration,
    /// TCP keep-alive interval.
    pub keep_alive: Duration,
}

impl ConnectionSettings {
    fn http(&self) -> HttpSettings {
        HttpSettings {
            connect_timeout: self.connect_timeout,
            keep_alive: self.keep_alive,
        }
    }
}

/// [`Connector`] dialling real servers over HTTP.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    settings: ConnectionSettings,
}

impl HttpConnector {
    /// Create a connector using `settings` for every connection.
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(
        &self,
        target: &ConnectTarget,
        kind: TransportKind,
    ) -> Result<Arc<dyn McpConnection>> {
        let http = self.settings.http();
        let transport: Arc<dyn Transport> = match kind {
            TransportKind::StreamableHttp => Arc::new(HttpTransport::new(
                target.endpoint.clone(),
                target.headers.clone(),
                &http,
            )?),
            TransportKind::Sse => Arc::new(
                SseTransport::connect(target.endpoint.clone(), target.headers.clone(), &http)
                    .await?,
            ),
            TransportKind::Offline => {
                return Err(McpHubError::Transport(format!(
                    "server '{}' cannot be dialled over the offline transport",
                    target.server_id
                ))
                .into())
            }
        };

        let connection =
            RpcConnection::establish(transport, kind, &target.server_id, &self.settings).await?;
        Ok(Arc::new(connection))
    }
}

/// Network-backed [`McpConnection`].
#[derive(Debug)]
pub struct RpcConnection {
    kind: TransportKind,
    session: InitializedMcpProtocol,
    transport: Arc<dyn Transport>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    signals: std::sync::Mutex<Option<mpsc::UnboundedReceiver<ConnectionSignal>>>,
}

impl RpcConnection {
    /// Wire `transport` to a JSON-RPC client and perform the handshake.
    ///
    /// # Errors
    ///
    /// Returns the handshake failure. The transport is closed and every
    /// background task stopped before returning.
    pub async fn establish(
        transport: Arc<dyn Transport>,
        kind: TransportKind,
        server_id: &str,
        settings: &ConnectionSettings,
    ) -> Result<Self> {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel::<ConnectionSignal>();
        let shutdown = CancellationToken::new();

        // Cancels every task below if this future is dropped or fails.
        let guard = shutdown.clone().drop_guard();

        let client = Arc::new(
            JsonRpcClient::new(out_tx)
                .with_timeout(settings.request_timeout)
                .with_label(server_id),
        );

        let changed_tx = signal_tx.clone();
        client
            .on_notification(NOTIF_TOOLS_LIST_CHANGED, move |_| {
                let _ = changed_tx.send(ConnectionSignal::ToolsChanged);
            })
            .await;

        spawn_writer(
            out_rx,
            Arc::clone(&transport),
            Arc::downgrade(&client),
            signal_tx.clone(),
            shutdown.clone(),
        );
        spawn_reader(Arc::clone(&transport), in_tx, signal_tx, shutdown.clone());
        start_read_loop(in_rx, shutdown.clone(), Arc::clone(&client));

        let handshake = McpProtocol::new(client)
            .initialize(
                Implementation::this_client(),
                ClientCapabilities::default(),
                Some(settings.connect_timeout),
            )
            .await;

        let session = match handshake {
            Ok(session) => session,
            Err(e) => {
                drop(guard);
                transport.close().await;
                return Err(e);
            }
        };

        guard.disarm();
        tracing::debug!(
            server = %server_id,
            transport = %kind,
            peer = %session.initialize_response().server_info.name,
            "MCP connection established"
        );

        Ok(Self {
            kind,
            session,
            transport,
            shutdown,
            closed: AtomicBool::new(false),
            signals: std::sync::Mutex::new(Some(signal_rx)),
        })
    }

    /// The negotiated session.
    pub fn session(&self) -> &InitializedMcpProtocol {
        &self.session
    }
}

fn spawn_writer(
    mut out_rx: mpsc::UnboundedReceiver<String>,
    transport: Arc<dyn Transport>,
    client: Weak<JsonRpcClient>,
    signal_tx: mpsc::UnboundedSender<ConnectionSignal>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let raw = tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = out_rx.recv() => match msg {
                    Some(raw) => raw,
                    None => break,
                },
            };

            // Sends run concurrently so one slow call never blocks another.
            let transport = Arc::clone(&transport);
            let client = client.clone();
            let signal_tx = signal_tx.clone();
            tokio::spawn(async move {
                let id = outbound_request_id(&raw);
                if let Err(e) = transport.send(raw).await {
                    tracing::debug!("MCP send failed: {e}");
                    let expired = matches!(
                        e.downcast_ref::<McpHubError>(),
                        Some(McpHubError::SessionExpired)
                    );
                    if let (Some(id), Some(client)) = (id, client.upgrade()) {
                        client.reject(id, e.to_string()).await;
                    }
                    if expired {
                        let _ = signal_tx.send(ConnectionSignal::Closed);
                    }
                }
            });
        }
    });
}

fn spawn_reader(
    transport: Arc<dyn Transport>,
    in_tx: mpsc::UnboundedSender<String>,
    signal_tx: mpsc::UnboundedSender<ConnectionSignal>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut inbound = transport.receive();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                msg = inbound.next() => match msg {
                    Some(raw) => {
                        if in_tx.send(raw).is_err() {
                            return;
                        }
                    }
                    None => break,
                },
            }
        }
        let _ = signal_tx.send(ConnectionSignal::Closed);
    });
}

#[async_trait]
impl McpConnection for RpcConnection {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn list_tools(&self) -> Result<Vec<McpTool>> {
        self.session.list_tools().await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.session.call_tool(name, arguments).await
    }

    fn take_signals(&self) -> Option<mpsc::UnboundedReceiver<ConnectionSignal>> {
        self.signals.lock().ok().and_then(|mut s| s.take())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        self.transport.close().await;
    }
}
