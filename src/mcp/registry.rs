//! Server registry: descriptors and live connection state
//!
//! The registry owns one [`ServerSlot`] per configured server, in
//! configuration order. A slot pairs the immutable [`ServerDescriptor`] with
//! a per-server async mutex guarding everything that changes: the
//! [`ConnectionState`], the live connection, the connection-cycle
//! generation and the pending retry timer.
//!
//! The slot mutex is never held across network I/O. Connection attempts and
//! tool listings run unlocked and re-check the generation before committing,
//! so a result that arrives after a disconnect is discarded.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{McpHubError, Result};
use crate::mcp::connection::{ConnectTarget, McpConnection};
use crate::mcp::transport::TransportKind;

/// Static description of one server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerDescriptor {
    /// Unique key.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-form description shown to users and LLM prompts.
    pub description: String,
    /// Remote endpoint; `None` runs the server offline.
    pub endpoint: Option<url::Url>,
    /// Transports to try, in order.
    pub transport_preference: Vec<TransportKind>,
    /// Whether an endpoint-less server may run on placeholder tools.
    pub fallback_allowed: bool,
    /// Static headers sent with every request.
    #[serde(skip)]
    pub headers: HashMap<String, String>,
}

impl ServerDescriptor {
    /// A descriptor for a networked server using the default transports.
    pub fn remote(id: impl Into<String>, endpoint: url::Url) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            endpoint: Some(endpoint),
            transport_preference: TransportKind::default_preference(),
            fallback_allowed: false,
            headers: HashMap::new(),
        }
    }

    /// A descriptor for an endpoint-less server running on placeholder tools.
    pub fn offline(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            endpoint: None,
            transport_preference: TransportKind::default_preference(),
            fallback_allowed: true,
            headers: HashMap::new(),
        }
    }

    /// Connection target for networked servers.
    pub fn target(&self) -> Option<ConnectTarget> {
        self.endpoint.as_ref().map(|endpoint| ConnectTarget {
            server_id: self.id.clone(),
            endpoint: endpoint.clone(),
            headers: self.headers.clone(),
        })
    }
}

/// Lifecycle status of one server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Not connected and not trying.
    #[default]
    Disconnected,
    /// An attempt is in flight.
    Connecting,
    /// A live session exists.
    Connected,
    /// The last attempt failed.
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Observable connection state of one server.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionState {
    /// Current status.
    pub status: ConnectionStatus,
    /// Most recent failure; only set while `status` is `Error`.
    pub last_error: Option<String>,
    /// Failed attempts in the current cycle.
    pub retry_count: u32,
    /// Transport of the live session.
    pub active_transport: Option<TransportKind>,
    /// An automatic retry timer is pending.
    pub retry_scheduled: bool,
    /// When the live session was established.
    pub connected_since: Option<DateTime<Utc>>,
}

impl ConnectionState {
    /// State of a freshly started connection cycle.
    pub fn connecting() -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            ..Self::default()
        }
    }

    /// State right after a successful connection over `kind`.
    pub fn connected(kind: TransportKind) -> Self {
        Self {
            status: ConnectionStatus::Connected,
            active_transport: Some(kind),
            connected_since: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Whether the server currently has a live session.
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Mutable part of a slot, guarded by the slot mutex.
#[derive(Debug, Default)]
pub struct SlotState {
    /// Observable state.
    pub state: ConnectionState,
    /// Live session, present only while connected.
    pub connection: Option<Arc<dyn McpConnection>>,
    /// Connection-cycle number. Bumped by every connect, disconnect and
    /// removal; work started under an older value is discarded.
    pub generation: u64,
    /// Cancels the pending automatic retry timer.
    pub retry_token: Option<CancellationToken>,
    /// Set once the slot is unregistered; no cycle may start afterwards.
    pub removed: bool,
}

/// One registry entry.
#[derive(Debug)]
pub struct ServerSlot {
    descriptor: ServerDescriptor,
    inner: Mutex<SlotState>,
    dial: Mutex<()>,
}

impl ServerSlot {
    fn new(descriptor: ServerDescriptor) -> Self {
        Self {
            descriptor,
            inner: Mutex::new(SlotState::default()),
            dial: Mutex::new(()),
        }
    }

    /// The immutable descriptor.
    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    /// Server id.
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Lock the mutable state. Take this before the catalog lock, never after.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, SlotState> {
        self.inner.lock().await
    }

    /// Serialize connection attempts. Held for a whole attempt, so a new
    /// cycle waits until a superseded dial has resolved. Never take it while
    /// holding [`ServerSlot::lock`].
    pub async fn dial_gate(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.dial.lock().await
    }

    /// Copy of the current state.
    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state.clone()
    }

    /// Current generation.
    pub async fn generation(&self) -> u64 {
        self.inner.lock().await.generation
    }
}

/// Ordered set of server slots.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    slots: RwLock<Vec<Arc<ServerSlot>>>,
}

impl ServerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding `descriptors` in order.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::DuplicateServer`] on the first repeated id.
    pub fn with_servers(descriptors: Vec<ServerDescriptor>) -> Result<Self> {
        let mut slots: Vec<Arc<ServerSlot>> = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if slots.iter().any(|s| s.id() == descriptor.id) {
                return Err(McpHubError::DuplicateServer(descriptor.id).into());
            }
            slots.push(Arc::new(ServerSlot::new(descriptor)));
        }
        Ok(Self {
            slots: RwLock::new(slots),
        })
    }

    /// Register `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::DuplicateServer`] if the id is taken. An
    /// existing entry is never replaced.
    pub async fn add(&self, descriptor: ServerDescriptor) -> Result<Arc<ServerSlot>> {
        let mut slots = self.slots.write().await;
        if slots.iter().any(|s| s.id() == descriptor.id) {
            return Err(McpHubError::DuplicateServer(descriptor.id).into());
        }
        let slot = Arc::new(ServerSlot::new(descriptor));
        slots.push(Arc::clone(&slot));
        Ok(slot)
    }

    /// Drop the entry for `id` and return it.
    ///
    /// The caller disconnects the slot first.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::NotFound`] if no such server exists.
    pub async fn remove(&self, id: &str) -> Result<Arc<ServerSlot>> {
        let mut slots = self.slots.write().await;
        match slots.iter().position(|s| s.id() == id) {
            Some(pos) => Ok(slots.remove(pos)),
            None => Err(McpHubError::NotFound(format!("server '{id}'")).into()),
        }
    }

    /// The slot for `id`.
    pub async fn slot(&self, id: &str) -> Option<Arc<ServerSlot>> {
        self.slots
            .read()
            .await
            .iter()
            .find(|s| s.id() == id)
            .cloned()
    }

    /// Every slot, in registration order.
    pub async fn slots(&self) -> Vec<Arc<ServerSlot>> {
        self.slots.read().await.clone()
    }

    /// Every server with its state, in registration order.
    pub async fn list_all(&self) -> Vec<(ServerDescriptor, ConnectionState)> {
        let mut out = Vec::new();
        for slot in self.slots().await {
            let state = slot.state().await;
            out.push((slot.descriptor().clone(), state));
        }
        out
    }

    /// Connected servers only, in registration order.
    pub async fn list_connected(&self) -> Vec<(ServerDescriptor, ConnectionState)> {
        self.list_all()
            .await
            .into_iter()
            .filter(|(_, state)| state.is_connected())
            .collect()
    }

    /// One server with its state.
    pub async fn get(&self, id: &str) -> Option<(ServerDescriptor, ConnectionState)> {
        let slot = self.slot(id).await?;
        let state = slot.state().await;
        Some((slot.descriptor().clone(), state))
    }

    /// Whether `id` is registered and connected.
    pub async fn is_connected(&self, id: &str) -> bool {
        match self.slot(id).await {
            Some(slot) => slot.state().await.is_connected(),
            None => false,
        }
    }
}
