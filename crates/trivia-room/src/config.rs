//! Constants for the room store and the lobby-shape operations.
//!
//! The room's own lifecycle position is `trivia_protocol::Phase`, not a
//! separate state enum — there is only one state machine per room, and it
//! is the one `GameEngine` drives.

use std::time::Duration;

/// `RoomStore` TTL, refreshed on every `Create`/`Update`.
pub const ROOM_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// `RoomCodeIssuer` retry budget before `CodeExhausted`.
pub const CODE_ISSUE_RETRIES: u32 = 10;

/// Inclusive bounds `Validator` enforces on `RoomSettings::question_count`.
pub const QUESTION_COUNT_RANGE: std::ops::RangeInclusive<u32> = 5..=30;

/// Inclusive bounds `Validator` enforces on `RoomSettings::time_limit`.
pub const TIME_LIMIT_RANGE: std::ops::RangeInclusive<u32> = 5..=60;

/// Inclusive bounds on player display names.
pub const PLAYER_NAME_LEN_RANGE: std::ops::RangeInclusive<usize> = 1..=20;

/// Inclusive bounds `Validator` enforces on `RoomSettings::max_players`.
pub const MAX_PLAYERS_RANGE: std::ops::RangeInclusive<u32> = 1..=50;

/// Inclusive bounds `Validator` enforces on `RoomSettings::min_players`.
pub const MIN_PLAYERS_RANGE: std::ops::RangeInclusive<u32> = 2..=50;
