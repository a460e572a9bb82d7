//! Error taxonomy for the room layer.
//!
//! Every variant maps to one of the ack-level error classes the protocol
//! promises: `Validation`, `NotFound`, `AuthZ`, `Conflict`, `Precondition`,
//! `ServiceUnavailable`. Messages are short and never embed a stack trace
//! or an internal identifier.

use trivia_protocol::RoomCode;

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// A payload failed validation before any state was touched. Carries
    /// the concatenated violation message `Validator` produces.
    #[error("{0}")]
    Validation(String),

    /// `code` does not resolve to a live room.
    #[error("room not found")]
    NotFound(RoomCode),

    /// The initiating connection's role failed a host-only check.
    #[error("only host can {0}")]
    AuthZ(String),

    /// The operation is inconsistent with the room's current state
    /// (name collision, full room, game already running, duplicate
    /// answer, ...).
    #[error("{0}")]
    Conflict(String),

    /// A start-time invariant is unmet (too few players, no questions
    /// loaded).
    #[error("{0}")]
    Precondition(String),

    /// `RoomCodeIssuer` exhausted its retry budget.
    #[error("could not allocate a room code")]
    CodeExhausted,

    /// The cache (or another I/O-backed dependency) failed.
    #[error("failed to {0}")]
    ServiceUnavailable(String),
}
