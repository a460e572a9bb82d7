//! Room/player/question data model and the small value types that travel
//! on the wire or get stored verbatim in the room record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Alphabet room codes are drawn from: omits `0`, `O`, `I`, `1`, `L` so codes
/// read unambiguously off a TV screen.
pub const ROOM_CODE_ALPHABET: &str = "ABCDEFGHJKMNPQRSTUVWXYZ23456789";
pub const ROOM_CODE_LEN: usize = 6;

/// The 16-emoji avatar set players choose (or are assigned) from.
pub const AVATAR_SET: [&str; 16] = [
    "🦊", "🐼", "🐸", "🦁", "🐙", "🦄", "🐵", "🐨", "🐯", "🐺", "🐶", "🐱",
    "🐰", "🐻", "🦉", "🐷",
];

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque identity of a connection, assigned by the transport layer.
///
/// `Player::id` and `Room::host_id` both carry one of these: the spec
/// defines player identity as "the connection identity at join time", and
/// says it may be rebound on rejoin — plain `Copy` integers make rebinding
/// a one-line assignment rather than a lookup-and-replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A player's identity within a room. Currently an alias of [`ConnectionId`]
/// since the spec rebinds a player's id to whatever connection most
/// recently joined/rejoined as them.
pub type PlayerId = ConnectionId;

/// A room's 6-character code, validated to the alphabet in
/// [`ROOM_CODE_ALPHABET`] at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Builds a `RoomCode`, checking length and alphabet. Used for codes
    /// arriving in client payloads.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let upper = raw.to_ascii_uppercase();
        if upper.chars().count() != ROOM_CODE_LEN {
            return Err(format!("room code must be {ROOM_CODE_LEN} characters"));
        }
        if !upper.chars().all(|c| ROOM_CODE_ALPHABET.contains(c)) {
            return Err("room code contains invalid characters".to_string());
        }
        Ok(Self(upper))
    }

    /// Builds a `RoomCode` from an issuer draw without re-validating the
    /// alphabet; callers are trusted to have drawn from it.
    pub fn from_issued(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// One of the four multiple-choice options a question can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnswerOption {
    A,
    B,
    C,
    D,
}

impl AnswerOption {
    pub const ALL: [AnswerOption; 4] =
        [AnswerOption::A, AnswerOption::B, AnswerOption::C, AnswerOption::D];
}

impl fmt::Display for AnswerOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            AnswerOption::A => 'A',
            AnswerOption::B => 'B',
            AnswerOption::C => 'C',
            AnswerOption::D => 'D',
        };
        write!(f, "{c}")
    }
}

impl FromStr for AnswerOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" | "a" => Ok(AnswerOption::A),
            "B" | "b" => Ok(AnswerOption::B),
            "C" | "c" => Ok(AnswerOption::C),
            "D" | "d" => Ok(AnswerOption::D),
            other => Err(format!("'{other}' is not one of A, B, C, D")),
        }
    }
}

/// Question difficulty. `Mixed` only appears in [`RoomSettings`] (a room can
/// ask for a mixed-difficulty set); individual questions never carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Mixed,
}

/// The room's game state machine position.
///
/// `Paused` is a dedicated phase that remembers the in-flight question
/// rather than collapsing to `Lobby` (see `DESIGN.md`). `Leaderboard` is
/// likewise an explicit interstitial rather than folded into `Reveal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lobby,
    Starting,
    Question,
    Reveal,
    Leaderboard,
    Paused,
    Final,
}

impl Phase {
    /// Whether new players may join (`joinRoom` rejects outside this).
    pub fn is_joinable(&self) -> bool {
        matches!(self, Phase::Lobby)
    }

    /// Whether the room is mid-game, for `rejoinRoom`'s "no existing player
    /// and phase==lobby: treat as join" rule.
    pub fn is_in_progress(&self) -> bool {
        !matches!(self, Phase::Lobby)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Lobby => "lobby",
            Phase::Starting => "starting",
            Phase::Question => "question",
            Phase::Reveal => "reveal",
            Phase::Leaderboard => "leaderboard",
            Phase::Paused => "paused",
            Phase::Final => "final",
        };
        f.write_str(s)
    }
}

/// The role a connection authenticates as. Host-only operations check
/// `role == Tv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tv,
    Player,
}

// ---------------------------------------------------------------------------
// Question / options
// ---------------------------------------------------------------------------

/// The four option texts for a question, keyed by [`AnswerOption`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOptions {
    pub a: String,
    pub b: String,
    pub c: String,
    pub d: String,
}

impl QuestionOptions {
    pub fn get(&self, option: AnswerOption) -> &str {
        match option {
            AnswerOption::A => &self.a,
            AnswerOption::B => &self.b,
            AnswerOption::C => &self.c,
            AnswerOption::D => &self.d,
        }
    }

    /// All four must be non-empty.
    pub fn all_non_empty(&self) -> bool {
        !self.a.trim().is_empty()
            && !self.b.trim().is_empty()
            && !self.c.trim().is_empty()
            && !self.d.trim().is_empty()
    }
}

/// A single trivia question, including the answer key.
///
/// This struct is the domain/storage representation and is never itself
/// serialized onto a `game:question` broadcast — see [`QuestionPublic`],
/// which structurally omits `correct_answer` so invariant I3 holds by
/// construction rather than by remembering a `#[serde(skip)]` at every
/// call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub options: QuestionOptions,
    pub correct_answer: AnswerOption,
    pub time_limit: u32,
    pub image_url: Option<String>,
    /// Per-question difficulty tag, used by the catalog's times-asked
    /// bucketing. Absent for AI-generated questions that didn't tag one.
    pub difficulty: Option<Difficulty>,
}

/// The player-safe projection of a [`Question`] broadcast on `game:question`.
/// Has no field capable of carrying the correct answer.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionPublic {
    pub text: String,
    pub options: QuestionOptions,
    pub time_limit: u32,
    pub image_url: Option<String>,
}

impl From<&Question> for QuestionPublic {
    fn from(q: &Question) -> Self {
        QuestionPublic {
            text: q.text.clone(),
            options: q.options.clone(),
            time_limit: q.time_limit,
            image_url: q.image_url.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Player / Answer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub avatar: String,
    pub score: u32,
    pub streak: u32,
    pub jingle_id: Option<String>,
    pub is_connected: bool,
    pub is_host: bool,
    pub is_ready: bool,
}

impl Player {
    pub fn names_match_ci(a: &str, b: &str) -> bool {
        a.to_ascii_lowercase() == b.to_ascii_lowercase()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Answer {
    pub player_id: PlayerId,
    pub question_index: usize,
    pub answer: AnswerOption,
    /// Client-reported submission timestamp (milliseconds, informational).
    pub timestamp: u64,
    /// Server-computed `now() - questionStartTime` in milliseconds.
    pub time_elapsed: u64,
}

// ---------------------------------------------------------------------------
// RoomSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSettings {
    pub question_count: u32,
    pub time_limit: u32,
    pub difficulty: Difficulty,
    pub category: String,
    pub max_players: u32,
    pub min_players: u32,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            question_count: 10,
            time_limit: 20,
            difficulty: Difficulty::Medium,
            category: "general".to_string(),
            max_players: 50,
            min_players: 2,
        }
    }
}

/// A partial settings update, as sent by `room:update-settings` and
/// `quiz:set-options`. `None` fields are left unchanged by the merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomSettingsPatch {
    pub question_count: Option<u32>,
    pub time_limit: Option<u32>,
    pub difficulty: Option<Difficulty>,
    pub category: Option<String>,
    pub max_players: Option<u32>,
    pub min_players: Option<u32>,
}

impl RoomSettings {
    /// Shallow-merges a patch in place, per `updateSettings`'s contract.
    pub fn apply_patch(&mut self, patch: RoomSettingsPatch) {
        if let Some(v) = patch.question_count {
            self.question_count = v;
        }
        if let Some(v) = patch.time_limit {
            self.time_limit = v;
        }
        if let Some(v) = patch.difficulty {
            self.difficulty = v;
        }
        if let Some(v) = patch.category {
            self.category = v;
        }
        if let Some(v) = patch.max_players {
            self.max_players = v;
        }
        if let Some(v) = patch.min_players {
            self.min_players = v;
        }
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// The top-level aggregate for one game instance; the record stored under
/// `room:{CODE}` in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub code: RoomCode,
    pub host_id: ConnectionId,
    /// Display name for the TV, carried from `room:create`'s optional
    /// `hostName` payload field.
    pub host_name: Option<String>,
    pub phase: Phase,
    pub players: Vec<Player>,
    pub questions: Vec<Question>,
    pub current_question_index: usize,
    pub current_answers: Vec<Answer>,
    pub question_start_time: Option<u64>,
    pub settings: RoomSettings,
    pub created_at: u64,
    /// Ids of every question ever loaded into this room, across restarts.
    /// Threaded back into the catalog fetch as its exclude set so a
    /// `quiz:generate` after a `game:restart` doesn't hand the same
    /// question back out.
    pub used_question_ids: Vec<String>,
}

impl Room {
    pub fn new(code: RoomCode, host_id: ConnectionId, host_name: Option<String>, created_at: u64) -> Self {
        Self {
            code,
            host_id,
            host_name,
            phase: Phase::Lobby,
            players: Vec::new(),
            questions: Vec::new(),
            current_question_index: 0,
            current_answers: Vec::new(),
            question_start_time: None,
            settings: RoomSettings::default(),
            created_at,
            used_question_ids: Vec::new(),
        }
    }

    pub fn connected_player_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_connected).count()
    }

    pub fn player_index_by_name_ci(&self, name: &str) -> Option<usize> {
        self.players.iter().position(|p| Player::names_match_ci(&p.name, name))
    }

    pub fn player_index_by_id(&self, id: PlayerId) -> Option<usize> {
        self.players.iter().position(|p| p.id == id)
    }

    pub fn answer_for(&self, player_id: PlayerId, question_index: usize) -> Option<&Answer> {
        self.current_answers
            .iter()
            .find(|a| a.player_id == player_id && a.question_index == question_index)
    }
}

/// The player-safe projection of a [`Room`], for any ack or event delivered
/// to a `Role::Player` connection. Identical to `Room` except `questions`,
/// which is projected through [`QuestionPublic`] so a player-facing payload
/// can never carry a `correct_answer` — join and rejoin acks hand a raw
/// `Room` to TV connections but must go through this for players.
#[derive(Debug, Clone, Serialize)]
pub struct RoomPublic {
    pub code: RoomCode,
    pub host_id: ConnectionId,
    pub host_name: Option<String>,
    pub phase: Phase,
    pub players: Vec<Player>,
    pub questions: Vec<QuestionPublic>,
    pub current_question_index: usize,
    pub current_answers: Vec<Answer>,
    pub question_start_time: Option<u64>,
    pub settings: RoomSettings,
    pub created_at: u64,
}

impl From<&Room> for RoomPublic {
    fn from(room: &Room) -> Self {
        RoomPublic {
            code: room.code.clone(),
            host_id: room.host_id,
            host_name: room.host_name.clone(),
            phase: room.phase,
            players: room.players.clone(),
            questions: room.questions.iter().map(QuestionPublic::from).collect(),
            current_question_index: room.current_question_index,
            current_answers: room.current_answers.clone(),
            question_start_time: room.question_start_time,
            settings: room.settings.clone(),
            created_at: room.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_code_rejects_ambiguous_characters() {
        assert!(RoomCode::parse("K7MN2P").is_ok());
        assert!(RoomCode::parse("K7MN0P").is_err(), "0 is not in the alphabet");
        assert!(RoomCode::parse("K7MN2").is_err(), "too short");
    }

    #[test]
    fn answer_option_roundtrips_through_display_and_fromstr() {
        for opt in AnswerOption::ALL {
            let parsed: AnswerOption = opt.to_string().parse().unwrap();
            assert_eq!(parsed, opt, "{opt} should round-trip");
        }
    }

    #[test]
    fn phase_joinability_matches_lobby_only() {
        assert!(Phase::Lobby.is_joinable());
        assert!(!Phase::Question.is_joinable());
        assert!(!Phase::Final.is_joinable());
    }

    #[test]
    fn question_public_never_carries_correct_answer() {
        let q = Question {
            id: "q1".into(),
            text: "2+2?".into(),
            options: QuestionOptions { a: "3".into(), b: "4".into(), c: "5".into(), d: "6".into() },
            correct_answer: AnswerOption::B,
            time_limit: 20,
            image_url: None,
            difficulty: None,
        };
        let public = QuestionPublic::from(&q);
        let json = serde_json::to_string(&public).unwrap();
        assert!(!json.contains("correct"), "public question leaked an answer field: {json}");
    }

    #[test]
    fn room_public_never_carries_correct_answer() {
        let mut room = Room::new(RoomCode::from_issued("K7MN23".into()), ConnectionId(1), None, 0);
        room.questions.push(Question {
            id: "q1".into(),
            text: "2+2?".into(),
            options: QuestionOptions { a: "3".into(), b: "4".into(), c: "5".into(), d: "6".into() },
            correct_answer: AnswerOption::B,
            time_limit: 20,
            image_url: None,
            difficulty: None,
        });
        let public = RoomPublic::from(&room);
        let json = serde_json::to_string(&public).unwrap();
        assert!(!json.contains("correct"), "public room leaked an answer field: {json}");
    }

    #[test]
    fn settings_patch_leaves_unset_fields_unchanged() {
        let mut settings = RoomSettings::default();
        settings.apply_patch(RoomSettingsPatch { time_limit: Some(30), ..Default::default() });
        assert_eq!(settings.time_limit, 30);
        assert_eq!(settings.question_count, 10);
    }
}
