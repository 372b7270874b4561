//! Error types for the telemetry relay.
//!
//! Every failure in the relay degrades to "no active connection" or "no
//! active telemetry source". Nothing here is fatal to the process, so errors
//! carry enough context to decide whether retrying makes sense.
//!
//! ## Error Categories
//!
//! - **Transport Errors**: websocket writes or reads that failed mid-flight
//! - **Connection State**: sends with no client attached, or against a
//!   connection generation that has already been closed
//! - **File Errors**: preference files and session recordings
//! - **Parse Errors**: malformed recordings or preference data
//! - **Source Errors**: the upstream telemetry source gave up
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use pitwall_relay::RelayError;
//!
//! let error = RelayError::transport("connection reset by peer");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// Main error type for relay operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    #[error("Transport failure: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("No UI client is connected")]
    NotConnected,

    #[error("Connection generation {generation} is closed")]
    ConnectionClosed { generation: u64 },

    #[error("File error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Failed to serialize message")]
    Serialization(#[from] serde_json::Error),

    #[error("Telemetry source failed: {reason}")]
    Source { reason: String },

    #[error("Failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl RelayError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Transport { .. } => true,
            RelayError::NotConnected => true,
            RelayError::ConnectionClosed { .. } => true,
            RelayError::Source { .. } => true,
            RelayError::File { .. } => false,
            RelayError::Parse { .. } => false,
            RelayError::Serialization(_) => false,
            RelayError::Bind { .. } => false,
        }
    }

    /// Returns whether the error means the transport underneath a connection
    /// is gone, so the connection has to be torn down.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, RelayError::Transport { .. })
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            RelayError::Transport { .. } => vec![
                "Reload the UI client to open a new connection",
                "Check that nothing else is bound to the relay port",
            ],
            RelayError::NotConnected => vec![
                "Open the UI client so it connects to the relay",
                "Queued lifecycle messages will be delivered once it does",
            ],
            RelayError::ConnectionClosed { .. } => {
                vec!["Wait for the next client connection", "Messages are kept in the queue"]
            }
            RelayError::File { .. } => vec![
                "Check the file exists and is readable",
                "Check permissions on the containing directory",
            ],
            RelayError::Parse { .. } => vec![
                "Check the file is valid JSON",
                "Delete the preferences file to regenerate defaults",
            ],
            RelayError::Serialization(_) => vec!["Check message values are JSON-representable"],
            RelayError::Source { .. } => vec![
                "Ensure the simulator is running",
                "Restart the relay to reattach to the simulator",
            ],
            RelayError::Bind { .. } => vec![
                "Choose another PortNumber in the preferences file",
                "Stop the other process listening on this port",
            ],
        }
    }

    /// Helper constructor for transport errors.
    pub fn transport(reason: impl Into<String>) -> Self {
        RelayError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn transport_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        RelayError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        RelayError::File { path, source }
    }

    /// Helper constructor for parse errors.
    pub fn parse_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        RelayError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for source failures.
    pub fn source_failed(reason: impl Into<String>) -> Self {
        RelayError::Source { reason: reason.into() }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}
