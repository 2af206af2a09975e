//! Connection manager facade
//!
//! [`McpManager`] is an explicitly constructed service object owning the
//! registry, catalog, supervisor, gateway, schema translator and event bus.
//! Nothing connects until [`McpManager::initialize`] is called.
//!
//! # Examples
//!
//! ```no_run
//! use mcphub::mcp::config::McpConfig;
//! use mcphub::mcp::manager::McpManager;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = McpManager::new(&McpConfig::default())?;
//!     manager.initialize().await;
//!
//!     for tool in manager.tool_definitions().await {
//!         println!("{}: {}", tool.name, tool.description);
//!     }
//!
//!     let response = manager.invoke("demo", "echo", json!({ "message": "hi" })).await;
//!     println!("{}", serde_json::to_string(&response)?);
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{McpHubError, Result};
use crate::mcp::catalog::{ToolCatalog, ToolDescriptor};
use crate::mcp::config::McpConfig;
use crate::mcp::connection::{Connector, HttpConnector};
use crate::mcp::events::{EventBus, ServerEvent};
use crate::mcp::gateway::{InvocationGateway, ToolCallOutcome, ToolCallResponse};
use crate::mcp::offline::{BuiltinOfflineProvider, OfflineProvider};
use crate::mcp::registry::{ConnectionState, ConnectionStatus, ServerDescriptor, ServerRegistry};
use crate::mcp::schema::{CacheStats, SchemaTranslator, ValidatorSchema};
use crate::mcp::supervisor::Supervisor;
use crate::mcp::transport::TransportKind;

/// Tool definition handed to an LLM function-calling layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON Schema of the arguments, normalized by the schema translator.
    pub parameters: Value,
    /// Server the call is routed to.
    pub server_id: String,
}

/// Status of one server for administrative surfaces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatus {
    /// Server id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Endpoint, when the server is networked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Lifecycle status.
    pub status: ConnectionStatus,
    /// Transport of the live session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_transport: Option<TransportKind>,
    /// Failed attempts in the current cycle.
    pub retry_count: u32,
    /// Automatic retry pending.
    pub retry_scheduled: bool,
    /// Most recent failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Tools currently advertised.
    pub tool_count: usize,
    /// When the live session was established.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_since: Option<DateTime<Utc>>,
}

/// Read-only view of the whole manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Whether `initialize` has completed.
    pub ready: bool,
    /// Servers in registration order.
    pub servers: Vec<ServerStatus>,
    /// Tools across connected servers.
    pub total_tools: usize,
    /// Schema cache counters.
    pub schema_cache: CacheStats,
}

impl StatusSnapshot {
    /// Number of servers with a live session.
    pub fn connected_count(&self) -> usize {
        self.servers
            .iter()
            .filter(|s| s.status == ConnectionStatus::Connected)
            .count()
    }
}

/// MCP connection manager.
#[derive(Debug)]
pub struct McpManager {
    registry: Arc<ServerRegistry>,
    catalog: Arc<ToolCatalog>,
    supervisor: Supervisor,
    gateway: InvocationGateway,
    translator: SchemaTranslator,
    events: EventBus,
    ready: AtomicBool,
}

impl McpManager {
    /// Build a manager dialling real HTTP endpoints and serving the
    /// built-in offline tools.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::Config`] if the configuration is invalid.
    pub fn new(config: &McpConfig) -> Result<Self> {
        let connector = Arc::new(HttpConnector::new(config.connection_settings()));
        Self::with_parts(config, connector, Arc::new(BuiltinOfflineProvider))
    }

    /// Build a manager with an injected connector and offline provider.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::Config`] if the configuration is invalid.
    pub fn with_parts(
        config: &McpConfig,
        connector: Arc<dyn Connector>,
        offline: Arc<dyn OfflineProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ServerRegistry::with_servers(config.descriptors()?)?);

        let events = EventBus::new();
        let catalog = Arc::new(ToolCatalog::new(Arc::clone(&registry), events.clone()));
        let supervisor = Supervisor::new(
            Arc::clone(&registry),
            Arc::clone(&catalog),
            connector,
            offline,
            config.retry_policy(),
            config.connection_settings().connect_timeout,
            events.clone(),
        );
        let gateway = InvocationGateway::new(Arc::clone(&registry), Arc::clone(&catalog));

        tracing::debug!(servers = config.servers.len(), "MCP manager created");

        Ok(Self {
            registry,
            catalog,
            supervisor,
            gateway,
            translator: SchemaTranslator::new(config.schema_cache_capacity),
            events,
            ready: AtomicBool::new(false),
        })
    }

    /// Connect every registered server concurrently.
    ///
    /// Returns once each server's first attempt has settled; failed servers
    /// keep retrying in the background.
    pub async fn initialize(&self) {
        self.supervisor.initialize_all().await;
        self.ready.store(true, Ordering::SeqCst);

        let connected = self.registry.list_connected().await.len();
        let total = self.registry.list_all().await.len();
        tracing::info!(connected, total, "MCP manager initialized");
    }

    /// Whether [`initialize`](Self::initialize) has completed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Every registered server with its state.
    pub async fn list_available_servers(&self) -> Vec<(ServerDescriptor, ConnectionState)> {
        self.registry.list_all().await
    }

    /// Connected servers only.
    pub async fn list_connected_servers(&self) -> Vec<(ServerDescriptor, ConnectionState)> {
        self.registry.list_connected().await
    }

    /// One server's descriptor and state.
    pub async fn server(&self, server_id: &str) -> Option<(ServerDescriptor, ConnectionState)> {
        self.registry.get(server_id).await
    }

    /// Tools across every connected server.
    pub async fn list_all_tools(&self) -> Vec<ToolDescriptor> {
        self.catalog.all_tools().await
    }

    /// Tools of one server; empty unless it is connected.
    pub async fn tools_for_server(&self, server_id: &str) -> Vec<ToolDescriptor> {
        self.catalog.tools_for_server(server_id).await
    }

    /// Definitions for an LLM function-calling layer, one per tool name.
    ///
    /// Shadowed duplicates are left out; calls by name reach the same tool
    /// [`invoke_by_name`](Self::invoke_by_name) resolves.
    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.catalog
            .unique_tools()
            .await
            .into_iter()
            .map(|tool| ToolDefinition {
                parameters: self.translator.translate(&tool.input_schema).to_json_schema(),
                name: tool.name,
                description: tool.description,
                server_id: tool.owner_server_id,
            })
            .collect()
    }

    /// Translated parameter schema of `tool` on `server_id`.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::ServerNotFound`] for unknown servers and
    /// [`McpHubError::ToolNotFound`] if the server does not advertise the
    /// tool.
    pub async fn tool_schema(&self, server_id: &str, tool: &str) -> Result<Arc<ValidatorSchema>> {
        if self.registry.slot(server_id).await.is_none() {
            return Err(McpHubError::ServerNotFound(server_id.to_string()).into());
        }
        let descriptor = self
            .catalog
            .tools_for_server(server_id)
            .await
            .into_iter()
            .find(|t| t.name == tool)
            .ok_or_else(|| McpHubError::ToolNotFound {
                server_id: server_id.to_string(),
                tool: tool.to_string(),
            })?;
        Ok(self.translator.translate(&descriptor.input_schema))
    }

    /// Translate an arbitrary input schema through the shared cache.
    pub fn translate_schema(&self, schema: &Value) -> Arc<ValidatorSchema> {
        self.translator.translate(schema)
    }

    /// Call `tool` on `server_id`.
    pub async fn invoke(&self, server_id: &str, tool: &str, args: Value) -> ToolCallResponse {
        self.invoke_outcome(server_id, tool, args).await.into_response()
    }

    /// Call `tool` on `server_id`, keeping the failure category.
    pub async fn invoke_outcome(&self, server_id: &str, tool: &str, args: Value) -> ToolCallOutcome {
        self.gateway.invoke(server_id, tool, args).await
    }

    /// Call `tool` on whichever connected server wins name lookups.
    pub async fn invoke_by_name(&self, tool: &str, args: Value) -> ToolCallResponse {
        self.gateway.invoke_by_name(tool, args).await.into_response()
    }

    /// Snapshot of servers, tool counts and errors.
    pub async fn status(&self) -> StatusSnapshot {
        let mut servers = Vec::new();
        let mut total_tools = 0;
        for (descriptor, state) in self.registry.list_all().await {
            let tool_count = self.catalog.tools_for_server(&descriptor.id).await.len();
            total_tools += tool_count;
            servers.push(ServerStatus {
                endpoint: descriptor.endpoint.as_ref().map(|u| u.to_string()),
                id: descriptor.id,
                name: descriptor.name,
                description: descriptor.description,
                status: state.status,
                active_transport: state.active_transport,
                retry_count: state.retry_count,
                retry_scheduled: state.retry_scheduled,
                last_error: state.last_error,
                tool_count,
                connected_since: state.connected_since,
            });
        }

        StatusSnapshot {
            ready: self.is_ready(),
            servers,
            total_tools,
            schema_cache: self.translator.stats(),
        }
    }

    /// Connect `server_id`; a connected server is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::ServerNotFound`] for unknown ids.
    pub async fn connect(&self, server_id: &str) -> Result<()> {
        self.supervisor.connect(server_id).await
    }

    /// Disconnect `server_id`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::ServerNotFound`] for unknown ids.
    pub async fn disconnect(&self, server_id: &str) -> Result<()> {
        self.supervisor.disconnect(server_id).await
    }

    /// Tear down and re-establish `server_id`.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::ServerNotFound`] for unknown ids.
    pub async fn reconnect(&self, server_id: &str) -> Result<()> {
        self.supervisor.reconnect(server_id).await
    }

    /// Register a server. It stays disconnected until [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::DuplicateServer`] if the id is taken.
    pub async fn add_server(&self, descriptor: ServerDescriptor) -> Result<ServerDescriptor> {
        self.supervisor.add(descriptor).await
    }

    /// Disconnect and unregister `server_id`.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::NotFound`] if no such server exists.
    pub async fn remove_server(&self, server_id: &str) -> Result<ServerDescriptor> {
        self.supervisor.remove(server_id).await
    }

    /// Re-list `server_id`'s tools. Returns the new tool count.
    ///
    /// # Errors
    ///
    /// Returns [`McpHubError::ServerNotFound`] for unknown ids and
    /// [`McpHubError::ToolList`] if the server is not connected or listing
    /// fails. A failed refresh leaves the connection status unchanged.
    pub async fn refresh_tools(&self, server_id: &str) -> Result<usize> {
        self.catalog.refresh(server_id).await
    }

    /// Subscribe to state-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Disconnect every server.
    pub async fn shutdown(&self) {
        for (descriptor, _) in self.registry.list_all().await {
            if let Err(e) = self.supervisor.disconnect(&descriptor.id).await {
                tracing::debug!(server = %descriptor.id, "shutdown skipped: {e}");
            }
        }
        self.ready.store(false, Ordering::SeqCst);
    }
}
