//! Gateway error types.

use thiserror::Error;

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Wire codec failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// History backend failure.
    #[error("history error: {0}")]
    History(#[from] history::HistoryError),

    /// Session lookup failure.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Handshake rejected before the connection was accepted.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Outbound channel to a client went away.
    #[error("channel send error")]
    ChannelSend,

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
