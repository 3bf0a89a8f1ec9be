//! Error taxonomy for the network layer.
//!
//! Protocol errors are scoped to a single message, transport errors feed the
//! reconnect state machine, and worker failures are reported only to the job
//! that failed.

use thiserror::Error;

/// A single inbound or outbound message could not be converted.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Zero-length frame.
    #[error("empty frame")]
    Empty,
    /// The postcard body did not match the envelope layout.
    #[error("malformed envelope: {0}")]
    Envelope(#[from] postcard::Error),
    /// The frame carried the zlib prefix but did not inflate.
    #[error("failed to decompress frame: {0}")]
    Decompress(#[source] std::io::Error),
    /// A JSON sub-field did not parse (or serialize).
    #[error("invalid json in `{field}`: {source}")]
    Json {
        /// Envelope field the JSON belonged to.
        field: &'static str,
        /// Underlying parser error.
        #[source]
        source: serde_json::Error,
    },
    /// Outbound tag in the zlib header range, which decoders would misread
    /// as a compressed frame.
    #[error("message tag {0:#04x} is reserved for compressed frames")]
    ReservedTag(u8),
    /// Entity record with an operation code outside the known set.
    #[error("unknown entity operation {0}")]
    UnknownEntityOperation(u8),
}

/// Socket-level failures. These drive reconnection and are never fatal.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// `send` was called while no socket is open.
    #[error("not connected")]
    NotConnected,
    /// The websocket handshake failed.
    #[error("connect failed: {0}")]
    Connect(String),
    /// The socket closed or errored after opening.
    #[error("connection closed: {0}")]
    Closed(String),
    /// The configured server URL cannot be turned into a websocket endpoint.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// A job failed inside the worker pool.
#[derive(Debug, Clone, Error)]
pub enum WorkerFailure {
    /// The job panicked; the worker slot has been returned to the pool.
    #[error("worker panicked: {0}")]
    Panicked(String),
    /// The job was dropped before producing a result (runtime shutdown).
    #[error("worker job cancelled")]
    Cancelled,
}

/// Errors surfaced by [`crate::ConnectionManager::send`].
#[derive(Debug, Error)]
pub enum NetError {
    /// Encoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// No usable socket.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
