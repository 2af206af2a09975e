//! Tool catalog aggregated across connected servers
//!
//! Tools are stored per owning server as `Arc<Vec<ToolDescriptor>>`
//! snapshots. A refresh builds the new list off-lock and swaps it in under
//! the owning slot's mutex, so readers see either the old list or the new
//! one, never a mix.
//!
//! Liveness is checked at read time: a server's tools are only returned
//! while its registry status is `Connected`, whether or not they have been
//! purged yet.
//!
//! Name-only lookups ([`ToolCatalog::resolve`], [`ToolCatalog::unique_tools`])
//! resolve collisions in favour of the server whose tools were committed
//! first since its latest connection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{McpHubError, Result};
use crate::mcp::events::{EventBus, ServerEvent};
use crate::mcp::registry::{ServerRegistry, ServerSlot};
use crate::mcp::types::McpTool;

/// One tool offered by one server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within its server.
    pub name: String,
    /// Human-readable description (empty when the server gave none).
    pub description: String,
    /// Id of the server advertising the tool.
    pub owner_server_id: String,
    /// JSON Schema of the tool's arguments.
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    /// Build a descriptor owned by `server_id`.
    pub fn from_mcp(server_id: &str, tool: McpTool) -> Self {
        Self {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            owner_server_id: server_id.to_string(),
            input_schema: tool.input_schema,
        }
    }
}

#[derive(Debug, Default)]
struct CatalogInner {
    by_server: HashMap<String, Arc<Vec<ToolDescriptor>>>,
    commit_order: Vec<String>,
}

/// A name shared by two servers' tool lists.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Collision {
    tool: String,
    winner: String,
    shadowed: String,
}

/// Aggregated tool catalog.
#[derive(Debug)]
pub struct ToolCatalog {
    registry: Arc<ServerRegistry>,
    inner: RwLock<CatalogInner>,
    events: EventBus,
}

impl ToolCatalog {
    /// Create an empty catalog reading liveness from `registry`.
    pub fn new(registry: Arc<ServerRegistry>, events: EventBus) -> Self {
        Self {
            registry,
            inner: RwLock::new(CatalogInner::default()),
            events,
        }
    }

    /// Re-list `server_id`'s tools and replace its entries.
    ///
    /// Returns the number of tools now advertised.
    ///
    /// # Errors
    ///
    /// - [`McpHubError::ServerNotFound`] if the id is unknown.
    /// - [`McpHubError::ToolList`] if the server is not connected, the
    ///   listing fails, or the server disconnected while it was running.
    ///   Connection status is never changed by a failed refresh.
    pub async fn refresh(&self, server_id: &str) -> Result<usize> {
        let slot = self
            .registry
            .slot(server_id)
            .await
            .ok_or_else(|| McpHubError::ServerNotFound(server_id.to_string()))?;
        self.refresh_slot(&slot).await
    }

    pub(crate) async fn refresh_slot(&self, slot: &ServerSlot) -> Result<usize> {
        let server_id = slot.id();
        let list_error = |message: String| McpHubError::ToolList {
            server_id: server_id.to_string(),
            message,
        };

        let (connection, generation) = {
            let st = slot.lock().await;
            match (&st.connection, st.state.is_connected()) {
                (Some(conn), true) => (Arc::clone(conn), st.generation),
                _ => return Err(list_error("server is not connected".to_string()).into()),
            }
        };

        let tools: Vec<ToolDescriptor> = connection
            .list_tools()
            .await
            .map_err(|e| list_error(e.to_string()))?
            .into_iter()
            .map(|t| ToolDescriptor::from_mcp(server_id, t))
            .collect();
        let count = tools.len();

        let collisions = {
            let st = slot.lock().await;
            if st.generation != generation || !st.state.is_connected() {
                tracing::debug!(server = %server_id, "discarding tool list from a stale connection");
                return Err(
                    list_error("server disconnected while tools were being listed".to_string())
                        .into(),
                );
            }
            self.replace(server_id, tools).await
        };

        for c in collisions {
            tracing::warn!(
                tool = %c.tool,
                winner = %c.winner,
                shadowed = %c.shadowed,
                "tool name advertised by more than one server; name lookups use the winner"
            );
            self.events.emit(ServerEvent::ToolCollision {
                tool: c.tool,
                winner: c.winner,
                shadowed: c.shadowed,
            });
        }

        tracing::info!(server = %server_id, tools = count, "tool catalog refreshed");
        self.events.emit(ServerEvent::ToolsRefreshed {
            server_id: server_id.to_string(),
            tool_count: count,
        });
        Ok(count)
    }

    /// Swap in `tools` for `server_id`. Call with the owning slot locked.
    async fn replace(&self, server_id: &str, tools: Vec<ToolDescriptor>) -> Vec<Collision> {
        let mut inner = self.inner.write().await;

        if !inner.commit_order.iter().any(|id| id == server_id) {
            inner.commit_order.push(server_id.to_string());
        }

        let names: HashSet<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        let mut collisions = Vec::new();
        let mut earlier = true;
        for other in &inner.commit_order {
            if other == server_id {
                earlier = false;
                continue;
            }
            let Some(other_tools) = inner.by_server.get(other) else {
                continue;
            };
            for tool in other_tools.iter().filter(|t| names.contains(t.name.as_str())) {
                let (winner, shadowed) = if earlier {
                    (other.clone(), server_id.to_string())
                } else {
                    (server_id.to_string(), other.clone())
                };
                collisions.push(Collision {
                    tool: tool.name.clone(),
                    winner,
                    shadowed,
                });
            }
        }

        inner
            .by_server
            .insert(server_id.to_string(), Arc::new(tools));
        collisions
    }

    /// Drop every tool owned by `server_id`.
    pub async fn purge(&self, server_id: &str) {
        let mut inner = self.inner.write().await;
        inner.by_server.remove(server_id);
        inner.commit_order.retain(|id| id != server_id);
    }

    /// Per-server lists in commit order, restricted to connected servers.
    ///
    /// The catalog lock is released before liveness is checked.
    async fn live_snapshot(&self) -> Vec<(String, Arc<Vec<ToolDescriptor>>)> {
        let snapshot: Vec<(String, Arc<Vec<ToolDescriptor>>)> = {
            let inner = self.inner.read().await;
            inner
                .commit_order
                .iter()
                .filter_map(|id| {
                    inner
                        .by_server
                        .get(id)
                        .map(|tools| (id.clone(), Arc::clone(tools)))
                })
                .collect()
        };

        let mut live = Vec::with_capacity(snapshot.len());
        for (id, tools) in snapshot {
            if self.registry.is_connected(&id).await {
                live.push((id, tools));
            }
        }
        live
    }

    /// Every tool of every connected server, in registry order.
    pub async fn all_tools(&self) -> Vec<ToolDescriptor> {
        let mut by_server: HashMap<String, Arc<Vec<ToolDescriptor>>> =
            self.live_snapshot().await.into_iter().collect();

        let mut out = Vec::new();
        for slot in self.registry.slots().await {
            if let Some(tools) = by_server.remove(slot.id()) {
                out.extend(tools.iter().cloned());
            }
        }
        out
    }

    /// Tools of `server_id`; empty unless it is connected.
    pub async fn tools_for_server(&self, server_id: &str) -> Vec<ToolDescriptor> {
        let tools = self.inner.read().await.by_server.get(server_id).cloned();
        match tools {
            Some(tools) if self.registry.is_connected(server_id).await => tools.to_vec(),
            _ => Vec::new(),
        }
    }

    /// Whether connected server `server_id` advertises `tool`.
    pub async fn has_tool(&self, server_id: &str, tool: &str) -> bool {
        self.tools_for_server(server_id)
            .await
            .iter()
            .any(|t| t.name == tool)
    }

    /// Name-only lookup; the first-committed connected server wins.
    pub async fn resolve(&self, name: &str) -> Option<ToolDescriptor> {
        self.live_snapshot()
            .await
            .into_iter()
            .find_map(|(_, tools)| tools.iter().find(|t| t.name == name).cloned())
    }

    /// Connected tools with shadowed duplicates removed, in commit order.
    pub async fn unique_tools(&self) -> Vec<ToolDescriptor> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (_, tools) in self.live_snapshot().await {
            for tool in tools.iter() {
                if seen.insert(tool.name.clone()) {
                    out.push(tool.clone());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::connection::McpConnection;
    use crate::mcp::offline::{BuiltinOfflineProvider, OfflineConnection};
    use crate::mcp::registry::{ConnectionState, ServerDescriptor};
    use crate::mcp::transport::TransportKind;

    fn descriptor(server: &str, name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: String::new(),
            owner_server_id: server.to_string(),
            input_schema: serde_json::json!({ "type": "object" }),
        }
    }

    async fn setup(ids: &[&str]) -> (Arc<ServerRegistry>, ToolCatalog) {
        let registry = Arc::new(ServerRegistry::new());
        for id in ids {
            registry.add(ServerDescriptor::offline(*id)).await.unwrap();
        }
        let catalog = ToolCatalog::new(Arc::clone(&registry), EventBus::new());
        (registry, catalog)
    }

    async fn connect_offline(registry: &ServerRegistry, id: &str) {
        let slot = registry.slot(id).await.unwrap();
        let mut st = slot.lock().await;
        st.generation += 1;
        st.state = ConnectionState::connected(TransportKind::Offline);
        st.connection = Some(Arc::new(OfflineConnection::new(
            id,
            Arc::new(BuiltinOfflineProvider),
        )) as Arc<dyn McpConnection>);
    }

    async fn set_disconnected(registry: &ServerRegistry, id: &str) {
        let slot = registry.slot(id).await.unwrap();
        let mut st = slot.lock().await;
        st.state = ConnectionState::default();
        st.connection = None;
    }

    #[tokio::test]
    async fn test_refresh_requires_connection() {
        let (_registry, catalog) = setup(&["a"]).await;
        let err = catalog.refresh("a").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<McpHubError>(),
            Some(McpHubError::ToolList { .. })
        ));
    }

    #[tokio::test]
    async fn test_refresh_unknown_server() {
        let (_registry, catalog) = setup(&[]).await;
        let err = catalog.refresh("ghost").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<McpHubError>(),
            Some(McpHubError::ServerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_replaces_tools() {
        let (registry, catalog) = setup(&["a"]).await;
        connect_offline(&registry, "a").await;

        assert_eq!(catalog.refresh("a").await.unwrap(), 2);
        let names: Vec<String> = catalog
            .tools_for_server("a")
            .await
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["echo", "server_info"]);
        assert!(catalog.has_tool("a", "echo").await);
    }

    #[tokio::test]
    async fn test_all_tools_filters_disconnected_servers_at_read_time() {
        let (registry, catalog) = setup(&["a", "b"]).await;
        connect_offline(&registry, "a").await;
        connect_offline(&registry, "b").await;
        catalog.refresh("a").await.unwrap();
        catalog.refresh("b").await.unwrap();
        assert_eq!(catalog.all_tools().await.len(), 4);

        // No purge: the read-time filter alone must hide b's tools.
        set_disconnected(&registry, "b").await;
        let tools = catalog.all_tools().await;
        assert_eq!(tools.len(), 2);
        assert!(tools.iter().all(|t| t.owner_server_id == "a"));
        assert!(catalog.tools_for_server("b").await.is_empty());
    }

    #[tokio::test]
    async fn test_purge_removes_server_tools() {
        let (registry, catalog) = setup(&["a"]).await;
        connect_offline(&registry, "a").await;
        catalog.refresh("a").await.unwrap();

        catalog.purge("a").await;
        assert!(catalog.all_tools().await.is_empty());
    }

    #[tokio::test]
    async fn test_first_committed_server_wins_name_lookup() {
        let (registry, catalog) = setup(&["late", "early"]).await;
        let mut events = catalog.events.subscribe();
        connect_offline(&registry, "late").await;
        connect_offline(&registry, "early").await;

        catalog.refresh("early").await.unwrap();
        catalog.refresh("late").await.unwrap();

        let echo = catalog.resolve("echo").await.unwrap();
        assert_eq!(echo.owner_server_id, "early");

        let unique = catalog.unique_tools().await;
        assert_eq!(unique.len(), 2);
        assert!(unique.iter().all(|t| t.owner_server_id == "early"));

        let mut collisions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ServerEvent::ToolCollision { winner, shadowed, .. } = event {
                collisions.push((winner, shadowed));
            }
        }
        assert_eq!(collisions.len(), 2);
        assert!(collisions
            .iter()
            .all(|(w, s)| w == "early" && s == "late"));
    }

    #[tokio::test]
    async fn test_shadowed_tool_resolves_once_winner_disconnects() {
        let (registry, catalog) = setup(&["a", "b"]).await;
        connect_offline(&registry, "a").await;
        connect_offline(&registry, "b").await;
        catalog.refresh("a").await.unwrap();
        catalog.refresh("b").await.unwrap();

        set_disconnected(&registry, "a").await;
        catalog.purge("a").await;
        assert_eq!(catalog.resolve("echo").await.unwrap().owner_server_id, "b");
    }

    #[tokio::test]
    async fn test_replace_reports_collision_with_earlier_server() {
        let (registry, catalog) = setup(&["a", "b"]).await;
        connect_offline(&registry, "a").await;
        connect_offline(&registry, "b").await;
        let collisions_a = catalog.replace("a", vec![descriptor("a", "x")]).await;
        assert!(collisions_a.is_empty());

        let collisions = catalog.replace("b", vec![descriptor("b", "x")]).await;
        assert_eq!(
            collisions,
            vec![Collision {
                tool: "x".into(),
                winner: "a".into(),
                shadowed: "b".into()
            }]
        );
    }
}
