//! Server-sent events decoding shared by both HTTP transports
//!
//! [`SseDecoder`] turns arbitrary byte chunks into complete [`SseEvent`]s;
//! [`pump_events`] drives a decoder over a response body stream and forwards
//! events to a channel until the body ends.
//!
//! Field handling follows the SSE format: `data:` lines are joined with
//! `\n`, `event:` and `id:` are kept, `retry:` and `:` comments are ignored.
//! Keepalive pings (`event: ping` or `data: [PING]`) never leave the pump.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

/// One complete server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// Joined `data:` lines.
    pub data: String,
    /// Value of the `id:` field, if any.
    pub id: Option<String>,
}

impl SseEvent {
    /// Keepalive events carry no protocol payload.
    pub fn is_ping(&self) -> bool {
        self.event
            .as_deref()
            .map_or(false, |e| e.eq_ignore_ascii_case("ping"))
            || self.data.eq_ignore_ascii_case("[ping]")
    }

    /// Whether this event carries a JSON-RPC message (`message` or unnamed).
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

/// Incremental SSE decoder.
///
/// Bytes are buffered until a blank line closes an event, so multi-byte
/// characters split across chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = find_blank_line(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block[..pos])) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let block = std::mem::take(&mut self.buffer);
        parse_block(&String::from_utf8_lossy(&block))
    }
}

fn find_blank_line(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event = None;
    let mut id = None;

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => event = Some(value.to_string()),
            "id" => id = Some(value.to_string()),
            _ => {}
        }
    }

    if data_lines.is_empty() && event.is_none() {
        return None;
    }

    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
        id,
    })
}

/// Decode `byte_stream` and forward non-ping events to `tx`.
///
/// Returns when the body ends, a chunk errors, or the receiver is dropped.
pub async fn pump_events<S, E>(byte_stream: S, tx: mpsc::UnboundedSender<SseEvent>)
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut decoder = SseDecoder::new();
    tokio::pin!(byte_stream);

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!("SSE body ended with error: {e}");
                break;
            }
        };
        for event in decoder.feed(&chunk) {
            if event.is_ping() {
                continue;
            }
            if tx.send(event).is_err() {
                return;
            }
        }
    }

    if let Some(event) = decoder.finish() {
        if !event.is_ping() {
            let _ = tx.send(event);
        }
    }
}
