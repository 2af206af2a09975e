//! In-process fake transport for MCP unit tests
//!
//! [`FakeTransport::new`] returns a `(FakeTransport, FakeTransportHandle)`
//! pair. The transport is wired into the code under test; the handle plays
//! the server:
//!
//! ```text
//! client send() -----> outbound_tx -----> outbound_rx (handle reads)
//! handle inbound_tx -> inbound_tx  -----> inbound_rx  (client receive())
//! ```
//!
//! Dropping the handle's `inbound_tx` ends the receive stream, which is how
//! tests simulate a server going away.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};

use crate::error::{McpHubError, Result};
use crate::mcp::transport::Transport;

/// In-process fake transport.
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    closed: AtomicBool,
    close_calls: Arc<AtomicUsize>,
}

/// The test-side handle for a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Messages the client sent via [`Transport::send`].
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Messages the client will receive from [`Transport::receive`].
    pub inbound_tx: mpsc::UnboundedSender<String>,
    /// Number of times [`Transport::close`] ran its teardown.
    pub close_calls: Arc<AtomicUsize>,
}

impl FakeTransport {
    /// Create a connected `(transport, handle)` pair.
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let close_calls = Arc::new(AtomicUsize::new(0));

        let transport = Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            closed: AtomicBool::new(false),
            close_calls: Arc::clone(&close_calls),
        };
        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
            close_calls,
        };
        (transport, handle)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, message: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpHubError::Transport("transport closed".into()).into());
        }
        self.outbound_tx.send(message).map_err(|e| {
            McpHubError::Transport(format!("FakeTransport outbound channel closed: {e}")).into()
        })
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.inbound_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let item = rx.lock().await.recv().await?;
            Some((item, rx))
        }))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;

    /// `send()` delivers the message to `handle.outbound_rx`.
    #[tokio::test]
    async fn test_send_delivers_to_handle_outbound_rx() {
        let (transport, mut handle) = FakeTransport::new();

        transport
            .send(r#"{"jsonrpc":"2.0","method":"ping"}"#.to_string())
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), handle.outbound_rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(received, r#"{"jsonrpc":"2.0","method":"ping"}"#);
    }

    /// Injected messages arrive on `receive()` in order.
    #[tokio::test]
    async fn test_receive_multiple_messages_ordered() {
        let (transport, handle) = FakeTransport::new();

        for i in 0u32..3 {
            handle.inbound_tx.send(format!("resp-{i}")).unwrap();
        }

        let mut stream = transport.receive();
        for i in 0u32..3 {
            let msg = tokio::time::timeout(Duration::from_secs(2), stream.next())
                .await
                .expect("timed out")
                .expect("stream ended");
            assert_eq!(msg, format!("resp-{i}"));
        }
    }

    /// Dropping the inbound sender ends the receive stream.
    #[tokio::test]
    async fn test_receive_ends_when_server_side_dropped() {
        let (transport, handle) = FakeTransport::new();
        drop(handle.inbound_tx);
        assert!(transport.receive().next().await.is_none());
    }

    /// `close()` is idempotent and blocks further sends.
    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (transport, handle) = FakeTransport::new();
        transport.close().await;
        transport.close().await;
        assert_eq!(handle.close_calls.load(Ordering::SeqCst), 1);
        assert!(transport.send("x".into()).await.is_err());
    }
}
