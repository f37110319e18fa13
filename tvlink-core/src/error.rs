//! Domain-specific error types for the inner protocol.
//!
//! All fallible operations return `Result<T, InnerError>`.
//! No panics on invalid input; every error is typed and recoverable.

use std::time::Duration;
use thiserror::Error;

use crate::command::Operation;

/// The canonical error type for the inner protocol.
#[derive(Debug, Error)]
pub enum InnerError {
    // ── Framing / Parsing ────────────────────────────────────────
    /// A frame's declared length exceeds the configured maximum.
    ///
    /// Fatal to the connection: the byte stream cannot be resynchronized.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A frame parsed fine but its payload is not a valid command.
    #[error("malformed command: {0}")]
    MalformedCommand(String),

    // ── Request lifecycle ────────────────────────────────────────
    /// A public operation was invoked while the handler is not connected.
    #[error("not connected")]
    NotConnected,

    /// A pending request exceeded its deadline without resolution.
    #[error("{operation} timed out after {elapsed:?}")]
    RequestTimeout {
        operation: Operation,
        elapsed: Duration,
    },

    /// The server answered with a failure status.
    #[error("{operation} rejected by server: {reason}")]
    Rejected { operation: Operation, reason: String },

    /// The caller cancelled the request before it resolved.
    #[error("request cancelled")]
    Cancelled,

    // ── Connection ───────────────────────────────────────────────
    /// The inner connection closed while the request was outstanding.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// A bandwidth probe could not reach its host.
    #[error("bandwidth probe to {host} failed: {source}")]
    ProbeConnect {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// A state-machine transition was attempted from the wrong state.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    /// The TCP/IO layer reported an error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // ── Serialization ────────────────────────────────────────────
    /// A JSON body could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be loaded or is inconsistent.
    #[error("config error: {0}")]
    Config(String),
}
