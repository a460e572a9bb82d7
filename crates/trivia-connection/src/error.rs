//! Error types for the connection registry.

/// Errors that can occur while looking up or mutating connection metadata.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// No metadata is registered for this connection (it was never
    /// registered, or has already disconnected).
    #[error("unknown connection {0}")]
    NotFound(trivia_protocol::ConnectionId),
}
