//! Transport seam between the connection manager and the wire
//!
//! The manager only ever sees a [`FrameSink`] for writes and an
//! [`InboundStream`] for reads, so the websocket server and the tests plug in
//! the same way.

use futures::stream::BoxStream;

use crate::Result;

/// Frame written to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// One JSON message
    Text(String),
    /// Protocol-level keep-alive
    Ping,
}

/// Frame read from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(usize),
    Ping,
    Pong,
    /// Peer-initiated close, with its description if any
    Close(Option<String>),
}

/// Inbound half of a transport. Ending the stream means the transport is gone.
pub type InboundStream = BoxStream<'static, Result<InboundFrame>>;

/// Outbound half of a transport
///
/// Only ever driven by one writer at a time; the connection manager holds it
/// behind a mutex.
#[async_trait::async_trait]
pub trait FrameSink: Send + 'static {
    /// Write one frame. An `Err` means the transport is unusable.
    async fn send(&mut self, frame: OutboundFrame) -> Result<()>;

    /// Start a graceful close with the given description.
    async fn close(&mut self, reason: &str) -> Result<()>;
}

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseKind {
    /// The client sent a close frame
    Peer,
    /// A read or write failed underneath us
    Aborted,
    /// A newer connection took the active slot
    Superseded,
    /// The relay is shutting down
    Shutdown,
}

/// Close notification payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub kind: CloseKind,
    pub description: String,
}

impl CloseReason {
    pub fn new(kind: CloseKind, description: impl Into<String>) -> Self {
        Self { kind, description: description.into() }
    }

    pub fn peer(description: Option<String>) -> Self {
        let description = match description {
            Some(text) if !text.is_empty() => format!("Connection closed: {text}"),
            _ => "Connection closed".to_string(),
        };
        Self::new(CloseKind::Peer, description)
    }

    pub fn aborted(description: impl Into<String>) -> Self {
        Self::new(CloseKind::Aborted, description)
    }

    pub fn superseded() -> Self {
        Self::new(CloseKind::Superseded, "Replaced by a new connection")
    }

    pub fn shutdown(description: impl Into<String>) -> Self {
        Self::new(CloseKind::Shutdown, description)
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description)
    }
}
