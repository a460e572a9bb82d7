//! Rejects malformed payloads before any state mutation. All checks run
//! eagerly and concatenate into one message so a caller sees every
//! violation at once, not just the first.

use trivia_protocol::{AnswerOption, RoomCode, RoomSettingsPatch, AVATAR_SET};

use crate::config::{
    MAX_PLAYERS_RANGE, MIN_PLAYERS_RANGE, PLAYER_NAME_LEN_RANGE, QUESTION_COUNT_RANGE, TIME_LIMIT_RANGE,
};
use crate::error::RoomError;

pub struct Validator;

impl Validator {
    pub fn validate_room_code(raw: &str) -> Result<RoomCode, RoomError> {
        RoomCode::parse(raw).map_err(RoomError::Validation)
    }

    pub fn validate_player_name(name: &str) -> Result<(), RoomError> {
        let mut violations = Vec::new();
        if !PLAYER_NAME_LEN_RANGE.contains(&name.chars().count()) {
            violations.push("Invalid name: must be 1-20 characters".to_string());
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ') {
            violations.push("Invalid name: only letters, digits, and spaces are allowed".to_string());
        }
        Self::finish(violations)
    }

    pub fn validate_avatar(avatar: &str) -> Result<(), RoomError> {
        if AVATAR_SET.contains(&avatar) {
            Ok(())
        } else {
            Err(RoomError::Validation("Invalid avatar".to_string()))
        }
    }

    pub fn validate_answer(_answer: AnswerOption) -> Result<(), RoomError> {
        // `AnswerOption` only has the four valid variants; any value that
        // parsed into one is already valid by construction.
        Ok(())
    }

    /// Validates only the fields present in `patch`; unset fields are left
    /// for the existing settings to supply.
    pub fn validate_settings(patch: &RoomSettingsPatch) -> Result<(), RoomError> {
        let mut violations = Vec::new();
        if let Some(count) = patch.question_count {
            if !QUESTION_COUNT_RANGE.contains(&count) {
                violations.push("Invalid questionCount: must be between 5 and 30".to_string());
            }
        }
        if let Some(limit) = patch.time_limit {
            if !TIME_LIMIT_RANGE.contains(&limit) {
                violations.push("Invalid timeLimit: must be between 5 and 60".to_string());
            }
        }
        if let Some(max_players) = patch.max_players {
            if !MAX_PLAYERS_RANGE.contains(&max_players) {
                violations.push("Invalid maxPlayers: must be between 1 and 50".to_string());
            }
        }
        if let Some(min_players) = patch.min_players {
            if !MIN_PLAYERS_RANGE.contains(&min_players) {
                violations.push("Invalid minPlayers: must be at least 2".to_string());
            }
        }
        if let (Some(max_players), Some(min_players)) = (patch.max_players, patch.min_players) {
            if min_players > max_players {
                violations.push("Invalid minPlayers: must not exceed maxPlayers".to_string());
            }
        }
        // difficulty is a closed enum (trivia_protocol::Difficulty); an
        // invalid wire value fails to deserialize before reaching here.
        Self::finish(violations)
    }

    fn finish(violations: Vec<String>) -> Result<(), RoomError> {
        if violations.is_empty() {
            Ok(())
        } else {
            Err(RoomError::Validation(violations.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_name_rejects_punctuation_and_bad_length() {
        assert!(Validator::validate_player_name("Alice").is_ok());
        assert!(Validator::validate_player_name("").is_err());
        assert!(Validator::validate_player_name(&"a".repeat(21)).is_err());
        assert!(Validator::validate_player_name("Alice!").is_err());
    }

    #[test]
    fn avatar_must_be_in_the_fixed_set() {
        assert!(Validator::validate_avatar("🦊").is_ok());
        assert!(Validator::validate_avatar("🍕").is_err());
    }

    #[test]
    fn settings_patch_checks_only_present_fields() {
        assert!(Validator::validate_settings(&RoomSettingsPatch::default()).is_ok());
        let bad = RoomSettingsPatch { question_count: Some(1), ..Default::default() };
        assert!(Validator::validate_settings(&bad).is_err());
        let bad_time = RoomSettingsPatch { time_limit: Some(100), ..Default::default() };
        assert!(Validator::validate_settings(&bad_time).is_err());
    }

    #[test]
    fn settings_patch_rejects_a_max_players_of_zero() {
        let bad = RoomSettingsPatch { max_players: Some(0), ..Default::default() };
        assert!(Validator::validate_settings(&bad).is_err(), "max_players=0 would permanently lock the room");
    }

    #[test]
    fn settings_patch_rejects_a_min_players_below_two() {
        let bad = RoomSettingsPatch { min_players: Some(1), ..Default::default() };
        assert!(Validator::validate_settings(&bad).is_err());
        let ok = RoomSettingsPatch { min_players: Some(2), ..Default::default() };
        assert!(Validator::validate_settings(&ok).is_ok());
    }

    #[test]
    fn settings_patch_rejects_min_players_above_max_players() {
        let bad = RoomSettingsPatch { max_players: Some(3), min_players: Some(5), ..Default::default() };
        assert!(Validator::validate_settings(&bad).is_err());
    }

    #[test]
    fn room_code_validation_rejects_bad_alphabet() {
        assert!(Validator::validate_room_code("K7MN2P").is_ok());
        assert!(Validator::validate_room_code("k7mn2p").is_ok(), "case-insensitive");
        assert!(Validator::validate_room_code("K7MN0P").is_err());
    }
}
