//! Session archival: a durable-ish record of each game session's shape,
//! kept separate from the live `Room` so history survives room teardown.
//! Shaped like `trivia_room::store::Cache`'s trait-plus-in-memory-impl
//! split, generalized to an archive's narrower write-only surface.

use trivia_protocol::{Difficulty, PlayerId, RoomCode};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to {0}")]
    Io(String),
}

#[derive(Debug, Clone)]
pub struct SessionStartRecord {
    pub room_code: RoomCode,
    pub host_name: Option<String>,
    pub category: String,
    pub difficulty: Difficulty,
    pub question_count: u32,
    pub player_count: u32,
    pub started_at: u64,
}

#[derive(Debug, Clone)]
pub struct SessionEndRecord {
    pub room_code: RoomCode,
    pub ended_at: u64,
}

#[derive(Debug, Clone)]
pub struct PlayerOutcome {
    pub player_id: PlayerId,
    pub player_name: String,
    pub final_rank: u32,
    pub final_score: u32,
    pub total_questions: u32,
}

/// Recorded once a game leaves `lobby` and once more when it reaches
/// `final`. Implementations may fan these out to a database, a log
/// sink, or both; nothing downstream of the engine reads them back, so
/// the trait is write-only.
pub trait SessionArchive: Send + Sync + 'static {
    async fn record_start(&self, record: SessionStartRecord) -> Result<(), ArchiveError>;
    async fn record_end(&self, record: SessionEndRecord, outcomes: Vec<PlayerOutcome>) -> Result<(), ArchiveError>;
}

/// Structured-log-only archive: satisfies the trait without a database
/// dependency, using `tracing` as the default sink for anything that
/// doesn't need to be queried back.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSessionArchive;

impl SessionArchive for LoggingSessionArchive {
    async fn record_start(&self, record: SessionStartRecord) -> Result<(), ArchiveError> {
        tracing::info!(
            room_code = %record.room_code,
            host_name = ?record.host_name,
            category = %record.category,
            difficulty = ?record.difficulty,
            question_count = record.question_count,
            player_count = record.player_count,
            started_at = record.started_at,
            "session started"
        );
        Ok(())
    }

    async fn record_end(&self, record: SessionEndRecord, outcomes: Vec<PlayerOutcome>) -> Result<(), ArchiveError> {
        tracing::info!(room_code = %record.room_code, ended_at = record.ended_at, player_count = outcomes.len(), "session ended");
        for outcome in &outcomes {
            tracing::info!(
                room_code = %record.room_code,
                player_id = %outcome.player_id,
                player_name = %outcome.player_name,
                final_rank = outcome.final_rank,
                final_score = outcome.final_score,
                total_questions = outcome.total_questions,
                "player outcome"
            );
        }
        Ok(())
    }
}
