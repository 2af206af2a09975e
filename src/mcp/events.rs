//! Push notifications for connection-manager state changes
//!
//! Every status transition, catalog refresh and registry change is published
//! on a [`tokio::sync::broadcast`] channel. Subscribers that fall behind
//! miss the oldest events (`RecvError::Lagged`); the current state is always
//! available from the manager's status snapshot.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::mcp::registry::ConnectionStatus;

/// Events kept for slow subscribers before they start lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A server's connection status changed.
    StatusChanged {
        /// Server id.
        server_id: String,
        /// New status.
        status: ConnectionStatus,
        /// Failure message when `status` is `Error`.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A server's tool list was replaced.
    ToolsRefreshed {
        /// Server id.
        server_id: String,
        /// Number of tools now advertised.
        tool_count: usize,
    },
    /// Two connected servers advertise the same tool name.
    ToolCollision {
        /// Shared tool name.
        tool: String,
        /// Server whose tool wins name-only lookups.
        winner: String,
        /// Server whose tool is shadowed.
        shadowed: String,
    },
    /// A server was added to the registry.
    ServerAdded {
        /// Server id.
        server_id: String,
    },
    /// A server was removed from the registry.
    ServerRemoved {
        /// Server id.
        server_id: String,
    },
}

/// Cloneable publisher handle.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with [`EVENT_CHANNEL_CAPACITY`] buffered events.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish `event`. Having no subscribers is not an error.
    pub fn emit(&self, event: ServerEvent) {
        tracing::trace!(?event, "server event");
        let _ = self.tx.send(event);
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(ServerEvent::ServerAdded {
            server_id: "a".into(),
        });
        bus.emit(ServerEvent::ServerRemoved {
            server_id: "a".into(),
        });

        assert!(matches!(rx.recv().await.unwrap(), ServerEvent::ServerAdded { .. }));
        assert!(matches!(rx.recv().await.unwrap(), ServerEvent::ServerRemoved { .. }));
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        EventBus::new().emit(ServerEvent::ToolsRefreshed {
            server_id: "a".into(),
            tool_count: 0,
        });
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(ServerEvent::StatusChanged {
            server_id: "a".into(),
            status: ConnectionStatus::Error,
            error: Some("refused".into()),
        })
        .unwrap();
        assert_eq!(json["event"], "status_changed");
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "refused");
    }
}
