//! MCP transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that every wire protocol
//! satisfies. Concrete implementations live in submodules:
//!
//! - [`http::HttpTransport`] -- Streamable HTTP (`2025-11-25`): one POST
//!   per message, responses as JSON bodies or SSE streams.
//! - [`sse::SseTransport`] -- legacy HTTP+SSE (`2024-11-05`): a long-lived
//!   GET event stream carries responses, messages are POSTed to the URL the
//!   server announces in its `endpoint` event.
//! - [`fake::FakeTransport`] -- in-process fake used in tests.
//!
//! # Design
//!
//! The trait is intentionally minimal: callers `send` a serialized JSON-RPC
//! string and `receive` a stream of serialized JSON-RPC strings. Framing and
//! session management are the responsibility of each implementation.
//! Retrying is not: a failed `send` is reported once and the supervisor
//! decides what happens next.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod event_stream;
pub mod http;
pub mod sse;

#[cfg(test)]
pub mod fake;

/// Wire mechanism used to reach a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Streamable HTTP session (POST per message, optional SSE responses).
    StreamableHttp,
    /// Legacy HTTP+SSE session (GET event stream plus POST endpoint).
    Sse,
    /// Never dialled: the server runs on built-in placeholder tools.
    Offline,
}

impl TransportKind {
    /// Preference order used when configuration does not name one.
    pub fn default_preference() -> Vec<TransportKind> {
        vec![TransportKind::StreamableHttp, TransportKind::Sse]
    }

    /// Whether this kind opens a network connection.
    pub fn is_network(self) -> bool {
        !matches!(self, TransportKind::Offline)
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportKind::StreamableHttp => "streamable_http",
            TransportKind::Sse => "sse",
            TransportKind::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Abstraction over MCP transport implementations.
///
/// Used polymorphically through `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send one complete JSON-RPC message to the remote peer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::McpHubError::Transport`] (or `Auth` /
    /// `SessionExpired` for HTTP status codes with that meaning) if the
    /// message could not be delivered.
    async fn send(&self, message: String) -> Result<()>;

    /// Stream of inbound JSON-RPC message strings.
    ///
    /// The stream ends when the transport is closed or the peer goes away.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Tear down the session.
    ///
    /// Idempotent: closing an already-closed transport is a no-op and never
    /// fails.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_serde_names() {
        let kinds: Vec<TransportKind> =
            serde_yaml::from_str("[streamable_http, sse, offline]").unwrap();
        assert_eq!(
            kinds,
            vec![
                TransportKind::StreamableHttp,
                TransportKind::Sse,
                TransportKind::Offline
            ]
        );
    }

    #[test]
    fn test_default_preference_tries_streamable_first() {
        let prefs = TransportKind::default_preference();
        assert_eq!(prefs[0], TransportKind::StreamableHttp);
        assert!(prefs.iter().all(|k| k.is_network()));
    }

    #[test]
    fn test_display_matches_serde_name() {
        assert_eq!(TransportKind::Sse.to_string(), "sse");
        assert_eq!(TransportKind::StreamableHttp.to_string(), "streamable_http");
    }
}
