//! Connection supervisor: drives every server through its lifecycle
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected --disconnect--> Disconnected
//!                               |                  |
//!                               +--fail--> Error   +--stream lost--> Connecting
//!                                          |  ^
//!                               retry timer|  |fail (retry_count < max)
//!                                          v  |
//!                                       Connecting
//! ```
//!
//! One connection cycle tries each preferred transport in order. When all
//! fail, `retry_count` is incremented and, while it is below the maximum,
//! another cycle is scheduled after `base_delay * retry_count`. Once the
//! maximum is reached the server stays in `Error` until an explicit connect.
//! A cycle whose failures are all non-transient (see
//! [`McpHubError::is_retryable`]) is not retried.
//!
//! Only the first cycle runs inline; retries run on a background task whose
//! timer is cancelled by disconnect. Every cycle is tagged with the slot's
//! generation: disconnect, reconnect and removal bump it, and a cycle that
//! finds the generation changed discards its result.
//!
//! Disconnect does not abort a dial already in flight. Each attempt holds
//! the slot's dial gate, so a cycle started after a disconnect waits for the
//! superseded dial to resolve and be discarded before it dials itself.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{McpHubError, Result};
use crate::mcp::catalog::ToolCatalog;
use crate::mcp::connection::{ConnectionSignal, Connector, McpConnection};
use crate::mcp::events::{EventBus, ServerEvent};
use crate::mcp::offline::{OfflineConnection, OfflineProvider};
use crate::mcp::registry::{
    ConnectionState, ConnectionStatus, ServerDescriptor, ServerRegistry, ServerSlot,
};
use crate::mcp::transport::TransportKind;

/// Linear backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed cycles after which automatic retries stop.
    pub max_retries: u32,
    /// Delay unit; the Nth retry waits `base_delay * N`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the retry following failure number `retry_count`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        self.base_delay.saturating_mul(retry_count)
    }

    /// Whether another cycle follows failure number `retry_count`.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptOutcome {
    Connected,
    RetryAfter(Duration),
    GaveUp,
    Stale,
}

/// Owns every state transition of every server.
#[derive(Clone)]
pub struct Supervisor {
    registry: Arc<ServerRegistry>,
    catalog: Arc<ToolCatalog>,
    connector: Arc<dyn Connector>,
    offline: Arc<dyn OfflineProvider>,
    policy: RetryPolicy,
    connection_timeout: Duration,
    events: EventBus,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("policy", &self.policy)
            .field("connection_timeout", &self.connection_timeout)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Wire a supervisor over shared registry and catalog.
    pub fn new(
        registry: Arc<ServerRegistry>,
        catalog: Arc<ToolCatalog>,
        connector: Arc<dyn Connector>,
        offline: Arc<dyn OfflineProvider>,
        policy: RetryPolicy,
        connection_timeout: Duration,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            catalog,
            connector,
            offline,
            policy,
            connection_timeout,
            events,
        }
    }

    /// The active retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn slot(&self, server_id: &str) -> Result<Arc<ServerSlot>> {
        self.registry
            .slot(server_id)
            .await
            .ok_or_else(|| McpHubError::ServerNotFound(server_id.to_string()).into())
    }

    fn emit_status(&self, server_id: &str, status: ConnectionStatus, error: Option<String>) {
        self.events.emit(ServerEvent::StatusChanged {
            server_id: server_id.to_string(),
            status,
            error,
        });
    }

    /// Start a connection cycle for every registered server and wait for
    /// each one's first attempt. Retries continue in the background.
    pub async fn initialize_all(&self) {
        let slots = self.registry.slots().await;
        join_all(slots.into_iter().map(|slot| self.start_cycle(slot))).await;
    }

    /// Connect `server_id`.
    ///
    /// A connected or connecting server is left alone. A disconnected or
    /// failed one starts a fresh cycle with `retry_count` reset; any pending
    /// retry timer is cancelled. Returns after the first attempt.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::ServerNotFound`] for unknown ids. Connection
    /// failures are recorded in the server's state, not returned.
    pub async fn connect(&self, server_id: &str) -> Result<()> {
        let slot = self.slot(server_id).await?;
        self.start_cycle(slot).await;
        Ok(())
    }

    /// Disconnect `server_id`: close its connection, purge its tools and
    /// cancel any pending retry. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::ServerNotFound`] for unknown ids.
    pub async fn disconnect(&self, server_id: &str) -> Result<()> {
        let slot = self.slot(server_id).await?;
        self.force_disconnect(&slot, false).await;
        Ok(())
    }

    /// Disconnect then connect `server_id`.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::ServerNotFound`] for unknown ids.
    pub async fn reconnect(&self, server_id: &str) -> Result<()> {
        let slot = self.slot(server_id).await?;
        self.force_disconnect(&slot, false).await;
        self.start_cycle(slot).await;
        Ok(())
    }

    /// Register a new server. It starts `Disconnected`.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::DuplicateServer`] if the id is taken.
    pub async fn add(&self, descriptor: ServerDescriptor) -> Result<ServerDescriptor> {
        let slot = self.registry.add(descriptor).await?;
        tracing::info!(server = %slot.id(), "server added");
        self.events.emit(ServerEvent::ServerAdded {
            server_id: slot.id().to_string(),
        });
        Ok(slot.descriptor().clone())
    }

    /// Disconnect and unregister `server_id`.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::NotFound`] if no such server exists.
    pub async fn remove(&self, server_id: &str) -> Result<ServerDescriptor> {
        let slot = self.registry.remove(server_id).await?;
        self.force_disconnect(&slot, true).await;
        tracing::info!(server = %server_id, "server removed");
        self.events.emit(ServerEvent::ServerRemoved {
            server_id: server_id.to_string(),
        });
        Ok(slot.descriptor().clone())
    }

    async fn start_cycle(&self, slot: Arc<ServerSlot>) {
        if slot.descriptor().endpoint.is_none() {
            self.connect_offline(&slot).await;
            return;
        }

        let (generation, token) = {
            let mut st = slot.lock().await;
            if st.removed {
                tracing::debug!(server = %slot.id(), "connect ignored, server removed");
                return;
            }
            if matches!(
                st.state.status,
                ConnectionStatus::Connected | ConnectionStatus::Connecting
            ) {
                tracing::debug!(server = %slot.id(), status = %st.state.status, "connect ignored");
                return;
            }
            if let Some(previous) = st.retry_token.take() {
                previous.cancel();
            }
            st.generation += 1;
            let token = CancellationToken::new();
            st.retry_token = Some(token.clone());
            st.state = ConnectionState::connecting();
            (st.generation, token)
        };

        tracing::info!(server = %slot.id(), "connecting");
        self.emit_status(slot.id(), ConnectionStatus::Connecting, None);
        self.drive(slot, generation, token).await;
    }

    /// Run one attempt inline and hand any retries to a background task.
    async fn drive(&self, slot: Arc<ServerSlot>, generation: u64, token: CancellationToken) {
        if let AttemptOutcome::RetryAfter(delay) = self.attempt(&slot, generation).await {
            let supervisor = self.clone();
            tokio::spawn(async move {
                supervisor.retry_loop(slot, generation, token, delay).await;
            });
        }
    }

    async fn retry_loop(
        self,
        slot: Arc<ServerSlot>,
        generation: u64,
        token: CancellationToken,
        mut delay: Duration,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(server = %slot.id(), "retry timer cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            {
                let mut st = slot.lock().await;
                if st.generation != generation {
                    return;
                }
                st.state.status = ConnectionStatus::Connecting;
                st.state.retry_scheduled = false;
                st.state.last_error = None;
            }
            self.emit_status(slot.id(), ConnectionStatus::Connecting, None);

            match self.attempt(&slot, generation).await {
                AttemptOutcome::RetryAfter(next) => delay = next,
                _ => return,
            }
        }
    }

    /// Try each preferred transport once.
    async fn attempt(&self, slot: &Arc<ServerSlot>, generation: u64) -> AttemptOutcome {
        let descriptor = slot.descriptor();
        let Some(target) = descriptor.target() else {
            return AttemptOutcome::GaveUp;
        };

        let _dial = slot.dial_gate().await;
        if slot.generation().await != generation {
            return AttemptOutcome::Stale;
        }

        let mut last_error = "no transport configured".to_string();
        let mut retryable = false;
        for &kind in &descriptor.transport_preference {
            tracing::debug!(server = %descriptor.id, transport = %kind, "connection attempt");
            match tokio::time::timeout(self.connection_timeout, self.connector.connect(&target, kind))
                .await
            {
                Ok(Ok(connection)) => {
                    return self.commit_connected(slot, generation, kind, connection).await
                }
                Ok(Err(e)) => {
                    tracing::debug!(server = %descriptor.id, transport = %kind, "transport failed: {e:#}");
                    retryable |= e
                        .downcast_ref::<McpHubError>()
                        .map_or(true, McpHubError::is_retryable);
                    last_error = format!("{e:#}");
                }
                Err(_) => {
                    retryable = true;
                    tracing::debug!(server = %descriptor.id, transport = %kind, "transport timed out");
                    last_error = format!(
                        "connecting over {kind} timed out after {}ms",
                        self.connection_timeout.as_millis()
                    );
                }
            }

            if slot.generation().await != generation {
                return AttemptOutcome::Stale;
            }
        }

        self.commit_failure(slot, generation, last_error, retryable).await
    }

    async fn commit_connected(
        &self,
        slot: &Arc<ServerSlot>,
        generation: u64,
        kind: TransportKind,
        connection: Arc<dyn McpConnection>,
    ) -> AttemptOutcome {
        {
            let mut st = slot.lock().await;
            if st.generation != generation {
                drop(st);
                tracing::debug!(server = %slot.id(), "discarding connection completed after disconnect");
                connection.close().await;
                return AttemptOutcome::Stale;
            }
            st.state = ConnectionState::connected(kind);
            st.connection = Some(Arc::clone(&connection));
            st.retry_token = None;
        }

        tracing::info!(server = %slot.id(), transport = %kind, "connected");
        self.emit_status(slot.id(), ConnectionStatus::Connected, None);

        if let Some(signals) = connection.take_signals() {
            self.watch_connection(Arc::clone(slot), generation, signals);
        }
        if let Err(e) = self.catalog.refresh_slot(slot).await {
            tracing::warn!(server = %slot.id(), "initial tool refresh failed: {e:#}");
        }
        AttemptOutcome::Connected
    }

    async fn commit_failure(
        &self,
        slot: &Arc<ServerSlot>,
        generation: u64,
        message: String,
        retryable: bool,
    ) -> AttemptOutcome {
        let (outcome, retry_count) = {
            let mut st = slot.lock().await;
            if st.generation != generation {
                return AttemptOutcome::Stale;
            }
            st.state.retry_count += 1;
            st.state.status = ConnectionStatus::Error;
            st.state.last_error = Some(message.clone());
            st.state.active_transport = None;
            st.state.connected_since = None;

            let retry_count = st.state.retry_count;
            if retryable && self.policy.should_retry(retry_count) {
                st.state.retry_scheduled = true;
                (
                    AttemptOutcome::RetryAfter(self.policy.delay_for(retry_count)),
                    retry_count,
                )
            } else {
                st.state.retry_scheduled = false;
                st.retry_token = None;
                (AttemptOutcome::GaveUp, retry_count)
            }
        };

        match outcome {
            AttemptOutcome::RetryAfter(delay) => tracing::warn!(
                server = %slot.id(),
                attempt = retry_count,
                delay_ms = delay.as_millis() as u64,
                "connection failed, retry scheduled: {message}"
            ),
            _ if !retryable => tracing::error!(
                server = %slot.id(),
                attempts = retry_count,
                "connection failed, not retrying: {message}"
            ),
            _ => tracing::error!(
                server = %slot.id(),
                attempts = retry_count,
                "connection failed, automatic retries exhausted: {message}"
            ),
        }
        self.emit_status(slot.id(), ConnectionStatus::Error, Some(message));
        outcome
    }

    async fn connect_offline(&self, slot: &Arc<ServerSlot>) {
        let descriptor = slot.descriptor();
        if !descriptor.fallback_allowed {
            tracing::debug!(server = %descriptor.id, "no endpoint and fallback disabled, staying disconnected");
            return;
        }

        {
            let mut st = slot.lock().await;
            if st.removed || st.state.is_connected() {
                return;
            }
            if let Some(previous) = st.retry_token.take() {
                previous.cancel();
            }
            st.generation += 1;
            st.state = ConnectionState::connected(TransportKind::Offline);
            let connection: Arc<dyn McpConnection> = Arc::new(OfflineConnection::new(
                descriptor.id.clone(),
                Arc::clone(&self.offline),
            ));
            st.connection = Some(connection);
        }

        tracing::info!(server = %descriptor.id, "running offline with placeholder tools");
        self.emit_status(&descriptor.id, ConnectionStatus::Connected, None);
        if let Err(e) = self.catalog.refresh_slot(slot).await {
            tracing::warn!(server = %descriptor.id, "offline tool listing failed: {e:#}");
        }
    }

    async fn force_disconnect(&self, slot: &ServerSlot, removing: bool) {
        let (connection, previous) = {
            let mut st = slot.lock().await;
            st.generation += 1;
            st.removed |= removing;
            if let Some(token) = st.retry_token.take() {
                token.cancel();
            }
            let previous = std::mem::take(&mut st.state).status;
            let connection = st.connection.take();
            self.catalog.purge(slot.id()).await;
            (connection, previous)
        };

        if let Some(connection) = connection {
            connection.close().await;
        }
        if previous != ConnectionStatus::Disconnected {
            tracing::info!(server = %slot.id(), "disconnected");
            self.emit_status(slot.id(), ConnectionStatus::Disconnected, None);
        }
    }

    fn watch_connection(
        &self,
        slot: Arc<ServerSlot>,
        generation: u64,
        mut signals: mpsc::UnboundedReceiver<ConnectionSignal>,
    ) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                if slot.generation().await != generation {
                    return;
                }
                match signal {
                    ConnectionSignal::ToolsChanged => {
                        tracing::debug!(server = %slot.id(), "server reported tool list change");
                        if let Err(e) = supervisor.catalog.refresh_slot(&slot).await {
                            tracing::warn!(server = %slot.id(), "tool refresh failed: {e:#}");
                        }
                    }
                    ConnectionSignal::Closed => {
                        supervisor.connection_lost(slot, generation).await;
                        return;
                    }
                }
            }
        });
    }

    async fn connection_lost(&self, slot: Arc<ServerSlot>, generation: u64) {
        let (connection, next_generation, token) = {
            let mut st = slot.lock().await;
            if st.generation != generation || !st.state.is_connected() {
                return;
            }
            st.generation += 1;
            let token = CancellationToken::new();
            st.retry_token = Some(token.clone());
            st.state = ConnectionState::connecting();
            let connection = st.connection.take();
            self.catalog.purge(slot.id()).await;
            (connection, st.generation, token)
        };

        tracing::warn!(server = %slot.id(), "connection lost, reconnecting");
        if let Some(connection) = connection {
            connection.close().await;
        }
        self.emit_status(slot.id(), ConnectionStatus::Connecting, None);
        self.drive(slot, next_generation, token).await;
    }
}
