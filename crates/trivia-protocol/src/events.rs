//! Client→server and server→client event envelopes.
//!
//! Both directions use an adjacently-tagged shape
//! (`#[serde(tag = "event", content = "payload")]`), keyed on the event's
//! wire name rather than a Rust-style variant name.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    AnswerOption, ConnectionId, Difficulty, PlayerId, QuestionOptions, QuestionPublic,
    RoomSettings, RoomSettingsPatch,
};
use crate::{Player, Room};

// ---------------------------------------------------------------------------
// Envelope / acknowledgement
// ---------------------------------------------------------------------------

/// One inbound frame: a client event plus the id it expects an [`Ack`] to be
/// correlated against. `id == 0` means the client expects no ack (fire and
/// forget events like `room:leave`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEnvelope {
    pub id: u64,
    #[serde(flatten)]
    pub event: ClientEvent,
}

/// Acknowledgement payload returned through `EventBus::reply`:
/// `{success:true, ...}` on success, `{success:false, error:"message"}` on
/// failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: serde_json::Map<String, Value>,
}

impl Ack {
    pub fn ok() -> Self {
        Self { success: true, error: None, data: Default::default() }
    }

    pub fn ok_with(data: serde_json::Map<String, Value>) -> Self {
        Self { success: true, error: None, data }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, error: Some(message.into()), data: Default::default() }
    }
}

/// What an [`crate::Codec`] actually puts on the wire going server→client:
/// either a fire-and-forget/broadcast [`ServerEvent`], or an [`Ack`] tied to
/// a specific request id.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum ServerFrame {
    Event(ServerEvent),
    Ack { id: u64, ack: Ack },
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ClientEvent {
    #[serde(rename = "room:create")]
    RoomCreate { host_name: Option<String>, device_id: Option<String> },

    #[serde(rename = "room:join")]
    RoomJoin { room_code: String, kind: JoinKind, player: Option<JoinPlayer> },

    #[serde(rename = "room:rejoin")]
    RoomRejoin {
        room_code: String,
        player_name: String,
        player_avatar: Option<String>,
        player_jingle_id: Option<String>,
    },

    #[serde(rename = "room:leave")]
    RoomLeave { room_code: Option<String> },

    #[serde(rename = "room:kick")]
    RoomKick { room_code: String, player_id: ConnectionId },

    #[serde(rename = "room:update-settings")]
    RoomUpdateSettings { room_code: String, settings: RoomSettingsPatch },

    #[serde(rename = "player:update")]
    PlayerUpdate {
        room_code: Option<String>,
        jingle_id: Option<String>,
        is_ready: Option<bool>,
    },

    #[serde(rename = "game:start")]
    GameStart { room_code: String },

    #[serde(rename = "game:next-question")]
    GameNextQuestion { room_code: String },

    #[serde(rename = "game:pause")]
    GamePause { room_code: String },

    #[serde(rename = "game:resume")]
    GameResume { room_code: String },

    #[serde(rename = "game:end")]
    GameEnd { room_code: String },

    #[serde(rename = "game:restart")]
    GameRestart { room_code: String },

    #[serde(rename = "answer:submit")]
    AnswerSubmit { room_code: String, answer: AnswerOption, timestamp: u64 },

    #[serde(rename = "answer:timeout")]
    AnswerTimeout { room_code: String },

    #[serde(rename = "quiz:generate")]
    QuizGenerate {
        room_code: String,
        category: String,
        question_count: u32,
        difficulty: Option<Difficulty>,
        is_custom_topic: Option<bool>,
        topic_id: Option<String>,
    },

    #[serde(rename = "quiz:select-category")]
    QuizSelectCategory { room_code: String, category_id: String, category_name: String },

    #[serde(rename = "quiz:set-options")]
    QuizSetOptions {
        room_code: String,
        question_count: Option<u32>,
        difficulty: Option<Difficulty>,
        time_limit: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    Tv,
    Player,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinPlayer {
    pub name: String,
    pub avatar: String,
    pub jingle_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "room:created")]
    RoomCreated { room_code: String, room: Room },

    #[serde(rename = "room:player-joined")]
    RoomPlayerJoined { player: Player, player_count: usize },

    #[serde(rename = "room:player-rejoined")]
    RoomPlayerRejoined { old_player_id: ConnectionId, player: Player },

    #[serde(rename = "room:player-left")]
    RoomPlayerLeft { player_id: ConnectionId, player_count: usize },

    #[serde(rename = "room:player-disconnected")]
    RoomPlayerDisconnected { player_id: ConnectionId },

    #[serde(rename = "room:tv-disconnected")]
    RoomTvDisconnected,

    #[serde(rename = "room:kicked")]
    RoomKicked,

    #[serde(rename = "room:settings-updated")]
    RoomSettingsUpdated { settings: RoomSettings },

    #[serde(rename = "room:player-updated")]
    RoomPlayerUpdated { player: Player },

    #[serde(rename = "room:all-players-ready")]
    RoomAllPlayersReady,

    #[serde(rename = "game:starting")]
    GameStarting { countdown: u32 },

    #[serde(rename = "game:countdown")]
    GameCountdown { count: u32 },

    #[serde(rename = "game:started")]
    GameStarted { phase: &'static str, question_count: usize, current_question: usize },

    #[serde(rename = "game:question")]
    GameQuestion {
        question_index: usize,
        total_questions: usize,
        question: QuestionPublic,
        time_limit: u32,
    },

    #[serde(rename = "timer:tick")]
    TimerTick { time_remaining: u32 },

    #[serde(rename = "timer:end")]
    TimerEnd,

    #[serde(rename = "answer:received")]
    AnswerReceived { player_id: PlayerId, answer_count: usize, total_players: usize },

    #[serde(rename = "player:answered")]
    PlayerAnswered { player_id: PlayerId, answer_count: usize, total_players: usize },

    #[serde(rename = "answer:all-received")]
    AnswerAllReceived,

    #[serde(rename = "game:reveal")]
    GameReveal {
        correct_answer: AnswerOption,
        results: Vec<QuestionResultPayload>,
        standings: Vec<LeaderboardEntryPayload>,
        question_winner: Option<QuestionResultPayload>,
    },

    #[serde(rename = "game:leaderboard")]
    GameLeaderboard { standings: Vec<LeaderboardEntryPayload> },

    #[serde(rename = "game:finished")]
    GameFinished {
        standings: Vec<LeaderboardEntryPayload>,
        winner: Option<LeaderboardEntryPayload>,
    },

    #[serde(rename = "game:paused")]
    GamePaused,

    #[serde(rename = "game:resumed")]
    GameResumed,

    #[serde(rename = "game:restarted")]
    GameRestarted { phase: &'static str },

    #[serde(rename = "quiz:generating")]
    QuizGenerating,

    #[serde(rename = "quiz:generated")]
    QuizGenerated { question_count: usize },

    #[serde(rename = "quiz:category-selected")]
    QuizCategorySelected { category_id: String, category_name: String },

    #[serde(rename = "quiz:error")]
    QuizError { error: String },
}

/// Wire shape of one player's outcome for a resolved question, mirroring
/// `Scorer::compute_results`'s return shape.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionResultPayload {
    pub player_id: PlayerId,
    pub answer: Option<AnswerOption>,
    pub is_correct: bool,
    pub points_earned: u32,
    pub new_score: u32,
    pub streak: u32,
    pub time_elapsed: u64,
}

/// Wire shape of one leaderboard row, mirroring `Scorer::rankLeaderboard`.
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntryPayload {
    pub player_id: PlayerId,
    pub name: String,
    pub avatar: String,
    pub score: u32,
    pub rank: u32,
}
