//! Unified error type the connection handler converts every failure into
//! before turning it into an [`Ack::err`](trivia_protocol::Ack::err) or a
//! log line.

use trivia_protocol::ProtocolError;
use trivia_room::RoomError;
use trivia_transport::TransportError;

/// Aggregates every sub-crate's error type via `#[from]`, plus the two
/// engine-specific failure modes that don't originate in a sub-crate.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Room(#[from] RoomError),

    /// A `Catalog`, `QuestionProvider`, or `SessionArchive` call failed
    /// outside `trivia-room`'s own `RoomError::ServiceUnavailable`.
    #[error("failed to {0}")]
    ServiceUnavailable(String),

    /// `QuestionPipeline::produce` returned no questions at all; the room
    /// stays in `lobby`.
    #[error("could not generate any questions for this category")]
    QuizGenerationFailed,
}
