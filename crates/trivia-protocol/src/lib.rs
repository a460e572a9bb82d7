//! Wire protocol for the trivia engine.
//!
//! This crate defines the "language" the TV and player clients and the
//! server speak:
//!
//! - **Types** ([`Room`], [`Player`], [`Question`], [`Phase`], etc.) — the
//!   room/player/question data model.
//! - **Events** ([`ClientEvent`], [`ServerEvent`]) — the tagged event
//!   envelopes that travel over the transport.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — how those events are
//!   converted to/from bytes.
//! - **Errors** ([`ProtocolError`]) — what can go wrong during
//!   encoding/decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and the room/engine
//! layers (game state). It doesn't know about connections or rooms as live
//! objects — it only knows the shapes those things serialize to.
//!
//! ```text
//! Transport (bytes) → Protocol (events, Room/Player/Question) → Room/Engine
//! ```

mod codec;
mod error;
mod events;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use events::{
    Ack, ClientEnvelope, ClientEvent, JoinKind, JoinPlayer, LeaderboardEntryPayload,
    QuestionResultPayload, ServerEvent, ServerFrame,
};
pub use types::{
    Answer, AnswerOption, ConnectionId, Difficulty, Phase, Player, PlayerId, Question,
    QuestionOptions, QuestionPublic, Role, Room, RoomCode, RoomPublic, RoomSettings,
    RoomSettingsPatch, AVATAR_SET, ROOM_CODE_ALPHABET, ROOM_CODE_LEN,
};
