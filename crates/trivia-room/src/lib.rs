//! Room store, code issuer, avatar pool, scorer, validator, and the
//! lobby-shape `RoomManager` for the trivia engine.
//!
//! The phase state machine that drives a game once it starts lives one
//! layer up, in the game engine crate; this crate only owns a room's
//! existence, its cache-backed record, and the player-roster operations
//! that don't depend on which phase the game is in.

mod avatar;
mod codes;
mod config;
mod error;
mod manager;
mod scorer;
mod store;
mod validator;

pub use avatar::AvatarPool;
pub use codes::RoomCodeIssuer;
pub use config::{CODE_ISSUE_RETRIES, PLAYER_NAME_LEN_RANGE, QUESTION_COUNT_RANGE, ROOM_TTL, TIME_LIMIT_RANGE};
pub use error::RoomError;
pub use manager::{JoinKind, JoinOutcome, RoomManager};
pub use scorer::{LeaderboardEntry, QuestionResult, Scorer};
pub use store::{Cache, InMemoryCache, RoomStore};
pub use validator::Validator;
