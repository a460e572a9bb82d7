//! The game engine: one actor per in-progress room, driving the phase
//! state machine (`lobby` → `starting` → `question` → `reveal` →
//! `leaderboard` → `question`/`final`, with `paused` as a detour from any
//! in-progress phase).
//!
//! One actor per room: a `tokio::spawn`ed task draining an `mpsc` mailbox
//! is itself the room's critical section. Built on `RoomStore::update`'s
//! synchronous-mutator contract: every `Catalog`, `QuestionProvider`,
//! `SessionArchive`, and `TimerRegistry` call in this file happens
//! *outside* a `store.update` closure, with results merged back in a
//! following call, so the lock is never held across an await.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};

use trivia_protocol::{
    AnswerOption, Difficulty, Phase, PlayerId, QuestionPublic, Role, RoomCode, RoomSettings,
    RoomSettingsPatch, ServerEvent,
};
use trivia_protocol::{Answer, LeaderboardEntryPayload, QuestionResultPayload};
use trivia_room::{Cache, LeaderboardEntry, QuestionResult, RoomError, RoomManager, Scorer, Validator};
use trivia_timer::TimerRegistry;
use trivia_transport::EventBus;

use crate::archive::{PlayerOutcome, SessionArchive, SessionEndRecord, SessionStartRecord};
use crate::catalog::{Catalog, QuestionProvider};
use crate::config::AppConfig;
use crate::error::EngineError;
use crate::pipeline::QuestionPipeline;

/// Fraction of `reveal_duration` spent in `leaderboard` once `reveal`'s own
/// share has elapsed: an explicit `leaderboard` interstitial, folded into
/// the existing reveal budget rather than adding a new one (see
/// `DESIGN.md`). A winner's jingle is tacked onto the `reveal` share,
/// since the celebration belongs with the reveal, not the standings.
const LEADERBOARD_SHARE: f64 = 0.4;

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn require_host(requester: Role, action: &str) -> Result<(), EngineError> {
    if requester != Role::Tv {
        Err(EngineError::Room(RoomError::AuthZ(action.to_string())))
    } else {
        Ok(())
    }
}

fn to_result_payload(result: &QuestionResult) -> QuestionResultPayload {
    QuestionResultPayload {
        player_id: result.player_id,
        answer: result.answer,
        is_correct: result.is_correct,
        points_earned: result.points_earned,
        new_score: result.new_score,
        streak: result.streak,
        time_elapsed: result.time_elapsed,
    }
}

fn to_leaderboard_payload(entry: LeaderboardEntry) -> LeaderboardEntryPayload {
    LeaderboardEntryPayload { player_id: entry.player_id, name: entry.name, avatar: entry.avatar, score: entry.score, rank: entry.rank }
}

/// One command a room's engine actor can be asked to run. Mutating
/// commands carry a `oneshot` reply so the handler that dispatched them
/// can build an `Ack`; timer and TV-presence events are internal and
/// carry none.
pub enum EngineCommand {
    StartGame { requester: Role, reply: oneshot::Sender<Result<(), EngineError>> },
    SubmitAnswer { player_id: PlayerId, answer: AnswerOption, timestamp: u64, reply: oneshot::Sender<Result<(), EngineError>> },
    AnswerTimeout { requester: Role, reply: oneshot::Sender<Result<(), EngineError>> },
    Pause { requester: Role, reply: oneshot::Sender<Result<(), EngineError>> },
    Resume { requester: Role, reply: oneshot::Sender<Result<(), EngineError>> },
    End { requester: Role, reply: oneshot::Sender<Result<(), EngineError>> },
    Restart { requester: Role, reply: oneshot::Sender<Result<(), EngineError>> },
    NextQuestion { requester: Role, reply: oneshot::Sender<Result<(), EngineError>> },
    GenerateQuiz {
        requester: Role,
        category: String,
        question_count: u32,
        difficulty: Option<Difficulty>,
        is_custom_topic: bool,
        topic_id: Option<String>,
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    SelectCategory { requester: Role, category_id: String, category_name: String, reply: oneshot::Sender<Result<(), EngineError>> },
    SetOptions {
        requester: Role,
        question_count: Option<u32>,
        difficulty: Option<Difficulty>,
        time_limit: Option<u32>,
        reply: oneshot::Sender<Result<RoomSettings, EngineError>>,
    },
    TimerDeadlineFired { generation: u64 },
    TimerTick { generation: u64, remaining: u32 },
    TimerTicksEnded { generation: u64 },
    TvDisconnected,
    TvReconnected,
    TvGraceExpired { generation: u64 },
    Shutdown,
}

/// One room's phase state machine, running as its own `tokio::spawn`ed
/// task. The mailbox is the room's lock: every command is handled to
/// completion before the next is read, so nothing here needs its own
/// synchronization beyond what `RoomStore` already provides for the
/// underlying `Room` record.
pub struct GameEngine<C, B, Cat, Prov, Arch>
where
    C: Cache,
    B: EventBus,
    Cat: Catalog,
    Prov: QuestionProvider,
    Arch: SessionArchive,
{
    code: RoomCode,
    manager: Arc<RoomManager<C>>,
    bus: Arc<B>,
    pipeline: Arc<QuestionPipeline<Cat, Prov>>,
    archive: Arc<Arch>,
    timers: Arc<TimerRegistry<EngineCommand>>,
    config: Arc<AppConfig>,
    receiver: mpsc::Receiver<EngineCommand>,
    self_tx: mpsc::Sender<EngineCommand>,
    /// Locally tracked "last scheduled" generation per timer slot. The
    /// registry shares one counter across both slots, so a fired event's
    /// generation is checked against whichever of these two fields it
    /// belongs to, not against the registry's live value (which a
    /// sibling slot may have already bumped again).
    deadline_generation: u64,
    tick_generation: u64,
    /// Which phase `pause` interrupted, and how much of the in-flight
    /// question's time limit was left, so `resume` can pick back up.
    paused_from: Option<Phase>,
    pause_remaining: Option<Duration>,
    /// Staleness counter for the TV-reconnect grace window (see
    /// `DESIGN.md`), scheduled with a plain `tokio::spawn` +
    /// `tokio::time::sleep` rather than through `TimerRegistry`, since it
    /// runs across a connection event, not a game-phase transition.
    tv_grace_generation: u64,
}

impl<C, B, Cat, Prov, Arch> GameEngine<C, B, Cat, Prov, Arch>
where
    C: Cache,
    B: EventBus,
    Cat: Catalog,
    Prov: QuestionProvider,
    Arch: SessionArchive,
{
    pub async fn run(mut self) {
        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                EngineCommand::StartGame { requester, reply } => {
                    let _ = reply.send(self.start_game(requester).await);
                }
                EngineCommand::SubmitAnswer { player_id, answer, timestamp, reply } => {
                    let _ = reply.send(self.submit_answer(player_id, answer, timestamp).await);
                }
                EngineCommand::AnswerTimeout { requester, reply } => {
                    let _ = reply.send(self.answer_timeout(requester).await);
                }
                EngineCommand::Pause { requester, reply } => {
                    let _ = reply.send(self.pause(requester).await);
                }
                EngineCommand::Resume { requester, reply } => {
                    let _ = reply.send(self.resume(requester).await);
                }
                EngineCommand::End { requester, reply } => {
                    let _ = reply.send(self.end(requester).await);
                }
                EngineCommand::Restart { requester, reply } => {
                    let _ = reply.send(self.restart(requester).await);
                }
                EngineCommand::NextQuestion { requester, reply } => {
                    let _ = reply.send(self.next_question(requester).await);
                }
                EngineCommand::GenerateQuiz { requester, category, question_count, difficulty, is_custom_topic, topic_id, reply } => {
                    let result = self.generate_quiz(requester, category, question_count, difficulty, is_custom_topic, topic_id).await;
                    let _ = reply.send(result);
                }
                EngineCommand::SelectCategory { requester, category_id, category_name, reply } => {
                    let _ = reply.send(self.select_category(requester, category_id, category_name).await);
                }
                EngineCommand::SetOptions { requester, question_count, difficulty, time_limit, reply } => {
                    let _ = reply.send(self.set_options(requester, question_count, difficulty, time_limit).await);
                }
                EngineCommand::TimerDeadlineFired { generation } => self.on_deadline_fired(generation).await,
                EngineCommand::TimerTick { generation, remaining } => self.on_tick(generation, remaining).await,
                EngineCommand::TimerTicksEnded { generation } => self.on_ticks_ended(generation).await,
                EngineCommand::TvDisconnected => self.on_tv_disconnected().await,
                EngineCommand::TvReconnected => self.tv_grace_generation += 1,
                EngineCommand::TvGraceExpired { generation } => self.on_tv_grace_expired(generation).await,
                EngineCommand::Shutdown => {
                    self.timers.remove_room(&self.code).await;
                    break;
                }
            }
        }
    }

    async fn broadcast(&self, event: &ServerEvent) -> Result<(), EngineError> {
        self.bus.broadcast(&self.code, event).await.map_err(|e| EngineError::ServiceUnavailable(format!("broadcast: {e}")))
    }

    // -- host-issued commands ------------------------------------------

    async fn start_game(&mut self, requester: Role) -> Result<(), EngineError> {
        require_host(requester, "start the game")?;
        let room = self.manager.store().get(&self.code).await?;
        if room.phase != Phase::Lobby {
            return Err(EngineError::Room(RoomError::Conflict("Game already in progress".to_string())));
        }
        if (room.players.len() as u32) < room.settings.min_players {
            return Err(EngineError::Room(RoomError::Precondition(format!("Need at least {} players", room.settings.min_players))));
        }
        if room.questions.is_empty() {
            return Err(EngineError::Room(RoomError::Precondition("No questions loaded".to_string())));
        }

        if let Err(e) = self
            .archive
            .record_start(SessionStartRecord {
                room_code: self.code.clone(),
                host_name: room.host_name.clone(),
                category: room.settings.category.clone(),
                difficulty: room.settings.difficulty,
                question_count: room.questions.len() as u32,
                player_count: room.players.len() as u32,
                started_at: now_ms(),
            })
            .await
        {
            tracing::warn!(room_code = %self.code, error = %e, "failed to archive session start");
        }

        self.manager.store().update(&self.code, |room| {
            room.phase = Phase::Starting;
            Ok(())
        }).await?;

        let countdown_secs = self.config.countdown_duration.as_secs() as u32;
        self.broadcast(&ServerEvent::GameStarting { countdown: countdown_secs }).await?;

        let tick_count = countdown_secs.saturating_sub(1);
        let generation = self
            .timers
            .start_ticks(
                self.code.clone(),
                tick_count,
                self.self_tx.clone(),
                |generation, remaining| EngineCommand::TimerTick { generation, remaining },
                |generation| EngineCommand::TimerTicksEnded { generation },
            )
            .await;
        self.tick_generation = generation;
        Ok(())
    }

    async fn submit_answer(&mut self, player_id: PlayerId, answer: AnswerOption, timestamp: u64) -> Result<(), EngineError> {
        let (room, (answer_count, total_players, all_answered)) = self
            .manager
            .store()
            .update(&self.code, |room| {
                if room.phase != Phase::Question {
                    return Err(RoomError::Conflict("Not accepting answers".to_string()));
                }
                let index = room.current_question_index;
                if room.answer_for(player_id, index).is_some() {
                    return Err(RoomError::Conflict("Already answered".to_string()));
                }
                if room.player_index_by_id(player_id).is_none() {
                    return Err(RoomError::NotFound(room.code.clone()));
                }
                let start = room.question_start_time.unwrap_or_else(now_ms);
                let time_elapsed = now_ms().saturating_sub(start);
                room.current_answers.push(Answer { player_id, question_index: index, answer, timestamp, time_elapsed });

                let total_players = room.connected_player_count();
                let answer_count = room.current_answers.iter().filter(|a| a.question_index == index).count();
                let all_answered = total_players > 0 && answer_count >= total_players;
                Ok((answer_count, total_players, all_answered))
            })
            .await?;

        let index = room.current_question_index;
        self.broadcast(&ServerEvent::AnswerReceived { player_id, answer_count, total_players }).await?;
        self.broadcast(&ServerEvent::PlayerAnswered { player_id, answer_count, total_players }).await?;

        if all_answered {
            self.timers.cancel(&self.code).await;
            self.broadcast(&ServerEvent::AnswerAllReceived).await?;
            self.resolve_question(index).await?;
        }
        Ok(())
    }

    async fn answer_timeout(&mut self, requester: Role) -> Result<(), EngineError> {
        require_host(requester, "force the question to resolve")?;
        let room = self.manager.store().get(&self.code).await?;
        if room.phase != Phase::Question {
            return Err(EngineError::Room(RoomError::Conflict("Not accepting answers".to_string())));
        }
        self.timers.cancel(&self.code).await;
        self.resolve_question(room.current_question_index).await
    }

    async fn pause(&mut self, requester: Role) -> Result<(), EngineError> {
        require_host(requester, "pause the game")?;
        let room = self.manager.store().get(&self.code).await?;
        if !room.phase.is_in_progress() || matches!(room.phase, Phase::Paused) {
            return Err(EngineError::Room(RoomError::Conflict("Game is not in progress".to_string())));
        }

        let remaining = if room.phase == Phase::Question {
            room.question_start_time.and_then(|start| {
                room.questions.get(room.current_question_index).map(|question| {
                    let limit_ms = (question.time_limit as u64 + 1) * 1000;
                    let elapsed = now_ms().saturating_sub(start);
                    Duration::from_millis(limit_ms.saturating_sub(elapsed)).max(Duration::from_secs(1))
                })
            })
        } else {
            None
        };

        self.timers.cancel(&self.code).await;
        self.paused_from = Some(room.phase);
        self.pause_remaining = remaining;
        self.manager.store().update(&self.code, |room| {
            room.phase = Phase::Paused;
            Ok(())
        }).await?;
        self.broadcast(&ServerEvent::GamePaused).await
    }

    async fn resume(&mut self, requester: Role) -> Result<(), EngineError> {
        require_host(requester, "resume the game")?;
        let room = self.manager.store().get(&self.code).await?;
        if room.phase != Phase::Paused {
            return Err(EngineError::Room(RoomError::Conflict("Game is not paused".to_string())));
        }
        let resumed_phase = self.paused_from.take().unwrap_or(Phase::Question);
        self.manager.store().update(&self.code, |room| {
            room.phase = resumed_phase;
            Ok(())
        }).await?;
        self.broadcast(&ServerEvent::GameResumed).await?;

        match resumed_phase {
            Phase::Question => {
                let remaining = self.pause_remaining.take().unwrap_or(Duration::from_secs(1));
                let generation = self
                    .timers
                    .set_deadline(self.code.clone(), remaining, self.self_tx.clone(), |generation| EngineCommand::TimerDeadlineFired { generation })
                    .await;
                self.deadline_generation = generation;

                let tick_count = remaining.as_secs().saturating_sub(1) as u32;
                let tick_generation = self
                    .timers
                    .start_ticks(
                        self.code.clone(),
                        tick_count,
                        self.self_tx.clone(),
                        |generation, remaining| EngineCommand::TimerTick { generation, remaining },
                        |generation| EngineCommand::TimerTicksEnded { generation },
                    )
                    .await;
                self.tick_generation = tick_generation;
            }
            Phase::Reveal | Phase::Leaderboard => {
                let generation = self
                    .timers
                    .set_deadline(self.code.clone(), self.config.reveal_duration, self.self_tx.clone(), |generation| EngineCommand::TimerDeadlineFired { generation })
                    .await;
                self.deadline_generation = generation;
            }
            _ => {}
        }
        Ok(())
    }

    async fn end(&mut self, requester: Role) -> Result<(), EngineError> {
        require_host(requester, "end the game")?;
        self.end_game().await
    }

    async fn restart(&mut self, requester: Role) -> Result<(), EngineError> {
        require_host(requester, "restart the game")?;
        self.timers.cancel(&self.code).await;
        self.manager.store().update(&self.code, |room| {
            for player in &mut room.players {
                player.score = 0;
                player.streak = 0;
            }
            room.questions.clear();
            room.current_answers.clear();
            room.current_question_index = 0;
            room.question_start_time = None;
            room.phase = Phase::Lobby;
            Ok(())
        }).await?;
        self.broadcast(&ServerEvent::GameRestarted { phase: "lobby" }).await
    }

    async fn next_question(&mut self, requester: Role) -> Result<(), EngineError> {
        require_host(requester, "skip to the next question")?;
        let room = self.manager.store().get(&self.code).await?;
        if !matches!(room.phase, Phase::Reveal | Phase::Leaderboard) {
            return Err(EngineError::Room(RoomError::Conflict("Not between questions".to_string())));
        }
        self.timers.cancel(&self.code).await;
        self.advance().await
    }

    async fn generate_quiz(
        &mut self,
        requester: Role,
        category: String,
        question_count: u32,
        difficulty: Option<Difficulty>,
        is_custom_topic: bool,
        topic_id: Option<String>,
    ) -> Result<usize, EngineError> {
        require_host(requester, "generate the quiz")?;
        let room = self.manager.store().get(&self.code).await?;
        if room.phase != Phase::Lobby {
            return Err(EngineError::Room(RoomError::Conflict("Game already in progress".to_string())));
        }
        let difficulty = difficulty.unwrap_or(room.settings.difficulty);

        self.broadcast(&ServerEvent::QuizGenerating).await?;

        let questions = self
            .pipeline
            .produce(&category, difficulty, question_count, is_custom_topic, topic_id, &room.used_question_ids)
            .await;
        if questions.is_empty() {
            let _ = self.broadcast(&ServerEvent::QuizError { error: EngineError::QuizGenerationFailed.to_string() }).await;
            return Err(EngineError::QuizGenerationFailed);
        }

        let count = questions.len();
        self.manager.store().update(&self.code, |room| {
            room.used_question_ids.extend(questions.iter().map(|q| q.id.clone()));
            room.questions = questions;
            room.settings.category = category.clone();
            room.settings.difficulty = difficulty;
            Ok(())
        }).await?;

        self.broadcast(&ServerEvent::QuizGenerated { question_count: count }).await?;
        Ok(count)
    }

    async fn select_category(&mut self, requester: Role, category_id: String, category_name: String) -> Result<(), EngineError> {
        require_host(requester, "select a category")?;
        self.manager.store().update(&self.code, |room| {
            room.settings.category = category_id.clone();
            Ok(())
        }).await?;
        self.broadcast(&ServerEvent::QuizCategorySelected { category_id, category_name }).await
    }

    async fn set_options(
        &mut self,
        requester: Role,
        question_count: Option<u32>,
        difficulty: Option<Difficulty>,
        time_limit: Option<u32>,
    ) -> Result<RoomSettings, EngineError> {
        require_host(requester, "set quiz options")?;
        let patch = RoomSettingsPatch { question_count, difficulty, time_limit, ..Default::default() };
        Validator::validate_settings(&patch)?;
        let (_, settings) = self.manager.store().update(&self.code, |room| {
            room.settings.apply_patch(patch.clone());
            Ok(room.settings.clone())
        }).await?;
        Ok(settings)
    }

    // -- phase transitions ----------------------------------------------

    async fn transition_into_question(&mut self, index: usize) -> Result<(), EngineError> {
        let (room, time_limit) = self.manager.store().update(&self.code, |room| {
            let time_limit = room.questions.get(index).map(|q| q.time_limit).unwrap_or(room.settings.time_limit);
            room.current_answers.retain(|a| a.question_index != index);
            room.current_question_index = index;
            room.question_start_time = Some(now_ms());
            room.phase = Phase::Question;
            Ok(time_limit)
        }).await?;

        let question = &room.questions[index];
        let public = QuestionPublic::from(question);
        self.broadcast(&ServerEvent::GameQuestion { question_index: index, total_questions: room.questions.len(), question: public, time_limit }).await?;

        let tick_count = time_limit.saturating_sub(1);
        let tick_generation = self
            .timers
            .start_ticks(
                self.code.clone(),
                tick_count,
                self.self_tx.clone(),
                |generation, remaining| EngineCommand::TimerTick { generation, remaining },
                |generation| EngineCommand::TimerTicksEnded { generation },
            )
            .await;
        self.tick_generation = tick_generation;

        let deadline_generation = self
            .timers
            .set_deadline(
                self.code.clone(),
                Duration::from_secs(time_limit as u64 + 1),
                self.self_tx.clone(),
                |generation| EngineCommand::TimerDeadlineFired { generation },
            )
            .await;
        self.deadline_generation = deadline_generation;
        Ok(())
    }

    async fn resolve_question(&mut self, index: usize) -> Result<(), EngineError> {
        let (room, (results, winner)) = self.manager.store().update(&self.code, |room| {
            let question = room.questions.get(index).ok_or_else(|| RoomError::Precondition("No questions loaded".to_string()))?.clone();
            let answers: Vec<Answer> = room.current_answers.iter().filter(|a| a.question_index == index).copied().collect();
            let results = Scorer::compute_results(room, &question, &answers);
            for result in &results {
                if let Some(player_index) = room.player_index_by_id(result.player_id) {
                    room.players[player_index].score = result.new_score;
                    room.players[player_index].streak = result.streak;
                }
            }
            let winner = results.iter().find(|r| r.is_correct && r.points_earned > 0).cloned();
            room.phase = Phase::Reveal;
            Ok((results, winner))
        }).await?;

        let result_payloads: Vec<QuestionResultPayload> = results.iter().map(to_result_payload).collect();
        let standings: Vec<LeaderboardEntryPayload> = Scorer::rank_leaderboard(&room.players).into_iter().map(to_leaderboard_payload).collect();
        let winner_payload = winner.as_ref().map(to_result_payload);
        let correct_answer = room.questions[index].correct_answer;
        let has_winner = winner.is_some();

        self.broadcast(&ServerEvent::GameReveal { correct_answer, results: result_payloads, standings, question_winner: winner_payload }).await?;

        let reveal_share = self.config.reveal_duration.as_secs_f64() * (1.0 - LEADERBOARD_SHARE);
        let mut reveal_window = Duration::from_secs_f64(reveal_share.max(1.0));
        if has_winner {
            reveal_window += self.config.winner_jingle_duration;
        }
        let generation = self
            .timers
            .set_deadline(self.code.clone(), reveal_window, self.self_tx.clone(), |generation| EngineCommand::TimerDeadlineFired { generation })
            .await;
        self.deadline_generation = generation;
        Ok(())
    }

    async fn enter_leaderboard(&mut self) -> Result<(), EngineError> {
        let (room, _) = self.manager.store().update(&self.code, |room| {
            room.phase = Phase::Leaderboard;
            Ok(())
        }).await?;

        let standings: Vec<LeaderboardEntryPayload> = Scorer::rank_leaderboard(&room.players).into_iter().map(to_leaderboard_payload).collect();
        self.broadcast(&ServerEvent::GameLeaderboard { standings }).await?;

        let leaderboard_window = Duration::from_secs_f64((self.config.reveal_duration.as_secs_f64() * LEADERBOARD_SHARE).max(1.0));
        let generation = self
            .timers
            .set_deadline(self.code.clone(), leaderboard_window, self.self_tx.clone(), |generation| EngineCommand::TimerDeadlineFired { generation })
            .await;
        self.deadline_generation = generation;
        Ok(())
    }

    async fn advance(&mut self) -> Result<(), EngineError> {
        let (room, next_index) = self.manager.store().update(&self.code, |room| {
            let next_index = room.current_question_index + 1;
            Ok(next_index)
        }).await?;

        if next_index >= room.questions.len() {
            self.end_game().await
        } else {
            self.transition_into_question(next_index).await
        }
    }

    async fn end_game(&mut self) -> Result<(), EngineError> {
        self.timers.cancel(&self.code).await;
        let (room, _) = self.manager.store().update(&self.code, |room| {
            room.phase = Phase::Final;
            Ok(())
        }).await?;

        let standings = Scorer::rank_leaderboard(&room.players);
        let winner = standings.first().cloned();
        let standings_payload: Vec<LeaderboardEntryPayload> = standings.iter().cloned().map(to_leaderboard_payload).collect();
        let winner_payload = winner.clone().map(to_leaderboard_payload);
        self.broadcast(&ServerEvent::GameFinished { standings: standings_payload, winner: winner_payload }).await?;

        let total_questions = room.questions.len() as u32;
        let outcomes: Vec<PlayerOutcome> = standings
            .into_iter()
            .map(|entry| PlayerOutcome { player_id: entry.player_id, player_name: entry.name, final_rank: entry.rank, final_score: entry.score, total_questions })
            .collect();
        if let Err(e) = self.archive.record_end(SessionEndRecord { room_code: self.code.clone(), ended_at: now_ms() }, outcomes).await {
            tracing::warn!(room_code = %self.code, error = %e, "failed to archive session end");
        }
        Ok(())
    }

    // -- timer and presence events ---------------------------------------

    async fn on_tick(&mut self, generation: u64, remaining: u32) {
        if generation != self.tick_generation {
            return;
        }
        let Ok(room) = self.manager.store().get(&self.code).await else { return };
        let result = match room.phase {
            Phase::Starting => self.broadcast(&ServerEvent::GameCountdown { count: remaining + 1 }).await,
            Phase::Question => self.broadcast(&ServerEvent::TimerTick { time_remaining: remaining + 1 }).await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!(room_code = %self.code, error = %e, "failed to broadcast timer tick");
        }
    }

    async fn on_ticks_ended(&mut self, generation: u64) {
        if generation != self.tick_generation {
            return;
        }
        let Ok(room) = self.manager.store().get(&self.code).await else { return };
        match room.phase {
            Phase::Starting => {
                let question_count = room.questions.len();
                if let Err(e) = self.broadcast(&ServerEvent::GameStarted { phase: "question", question_count, current_question: 0 }).await {
                    tracing::warn!(room_code = %self.code, error = %e, "failed to broadcast game:started");
                }
                if let Err(e) = self.transition_into_question(0).await {
                    tracing::warn!(room_code = %self.code, error = %e, "failed to transition into the first question");
                }
            }
            Phase::Question => {
                if let Err(e) = self.broadcast(&ServerEvent::TimerEnd).await {
                    tracing::warn!(room_code = %self.code, error = %e, "failed to broadcast timer:end");
                }
            }
            _ => {}
        }
    }

    async fn on_deadline_fired(&mut self, generation: u64) {
        if generation != self.deadline_generation {
            return;
        }
        let Ok(room) = self.manager.store().get(&self.code).await else { return };
        let result = match room.phase {
            Phase::Question => self.resolve_question(room.current_question_index).await,
            Phase::Reveal if room.current_question_index + 1 < room.questions.len() => self.enter_leaderboard().await,
            Phase::Reveal => self.end_game().await,
            Phase::Leaderboard => self.advance().await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!(room_code = %self.code, error = %e, "failed to act on a fired deadline");
        }
    }

    async fn on_tv_disconnected(&mut self) {
        let Ok(room) = self.manager.store().get(&self.code).await else { return };
        if matches!(room.phase, Phase::Lobby | Phase::Final) {
            return;
        }
        self.tv_grace_generation += 1;
        let generation = self.tv_grace_generation;
        let tx = self.self_tx.clone();
        let grace = self.config.tv_reconnect_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(EngineCommand::TvGraceExpired { generation }).await;
        });
    }

    async fn on_tv_grace_expired(&mut self, generation: u64) {
        if generation != self.tv_grace_generation {
            return;
        }
        tracing::info!(room_code = %self.code, "TV did not reconnect within the grace window, ending the game");
        if let Err(e) = self.end_game().await {
            tracing::warn!(room_code = %self.code, error = %e, "failed to force-end game after TV grace expiry");
        }
    }
}

/// Cheap-to-clone handle to a running [`GameEngine`] actor's mailbox.
#[derive(Clone)]
pub struct GameEngineHandle {
    sender: mpsc::Sender<EngineCommand>,
}

impl GameEngineHandle {
    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineCommand) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.sender.send(build(reply)).await.map_err(|_| EngineError::ServiceUnavailable("game engine actor stopped".to_string()))?;
        rx.await.map_err(|_| EngineError::ServiceUnavailable("game engine actor stopped".to_string()))?
    }

    pub async fn start_game(&self, requester: Role) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::StartGame { requester, reply }).await
    }

    pub async fn submit_answer(&self, player_id: PlayerId, answer: AnswerOption, timestamp: u64) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::SubmitAnswer { player_id, answer, timestamp, reply }).await
    }

    pub async fn answer_timeout(&self, requester: Role) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::AnswerTimeout { requester, reply }).await
    }

    pub async fn pause(&self, requester: Role) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::Pause { requester, reply }).await
    }

    pub async fn resume(&self, requester: Role) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::Resume { requester, reply }).await
    }

    pub async fn end(&self, requester: Role) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::End { requester, reply }).await
    }

    pub async fn restart(&self, requester: Role) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::Restart { requester, reply }).await
    }

    pub async fn next_question(&self, requester: Role) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::NextQuestion { requester, reply }).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn generate_quiz(
        &self,
        requester: Role,
        category: String,
        question_count: u32,
        difficulty: Option<Difficulty>,
        is_custom_topic: bool,
        topic_id: Option<String>,
    ) -> Result<usize, EngineError> {
        self.call(|reply| EngineCommand::GenerateQuiz { requester, category, question_count, difficulty, is_custom_topic, topic_id, reply }).await
    }

    pub async fn select_category(&self, requester: Role, category_id: String, category_name: String) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::SelectCategory { requester, category_id, category_name, reply }).await
    }

    pub async fn set_options(
        &self,
        requester: Role,
        question_count: Option<u32>,
        difficulty: Option<Difficulty>,
        time_limit: Option<u32>,
    ) -> Result<RoomSettings, EngineError> {
        self.call(|reply| EngineCommand::SetOptions { requester, question_count, difficulty, time_limit, reply }).await
    }

    pub async fn tv_disconnected(&self) {
        let _ = self.sender.send(EngineCommand::TvDisconnected).await;
    }

    pub async fn tv_reconnected(&self) {
        let _ = self.sender.send(EngineCommand::TvReconnected).await;
    }

    async fn shutdown(&self) {
        let _ = self.sender.send(EngineCommand::Shutdown).await;
    }
}

/// Spawns and tracks one [`GameEngine`] actor per room, on demand.
pub struct GameEngineRegistry<C, B, Cat, Prov, Arch>
where
    C: Cache,
    B: EventBus,
    Cat: Catalog,
    Prov: QuestionProvider,
    Arch: SessionArchive,
{
    manager: Arc<RoomManager<C>>,
    bus: Arc<B>,
    pipeline: Arc<QuestionPipeline<Cat, Prov>>,
    archive: Arc<Arch>,
    timers: Arc<TimerRegistry<EngineCommand>>,
    config: Arc<AppConfig>,
    engines: Mutex<HashMap<RoomCode, GameEngineHandle>>,
}

impl<C, B, Cat, Prov, Arch> GameEngineRegistry<C, B, Cat, Prov, Arch>
where
    C: Cache,
    B: EventBus,
    Cat: Catalog,
    Prov: QuestionProvider,
    Arch: SessionArchive,
{
    pub fn new(manager: Arc<RoomManager<C>>, bus: Arc<B>, pipeline: Arc<QuestionPipeline<Cat, Prov>>, archive: Arc<Arch>, config: Arc<AppConfig>) -> Self {
        Self { manager, bus, pipeline, archive, timers: Arc::new(TimerRegistry::new()), config, engines: Mutex::new(HashMap::new()) }
    }

    /// Returns the handle for `code`, spawning a fresh actor the first
    /// time any room command is dispatched for it.
    pub async fn handle_for(&self, code: &RoomCode) -> GameEngineHandle {
        let mut engines = self.engines.lock().await;
        if let Some(handle) = engines.get(code) {
            return handle.clone();
        }

        let (tx, rx) = mpsc::channel(64);
        let engine = GameEngine {
            code: code.clone(),
            manager: self.manager.clone(),
            bus: self.bus.clone(),
            pipeline: self.pipeline.clone(),
            archive: self.archive.clone(),
            timers: self.timers.clone(),
            config: self.config.clone(),
            receiver: rx,
            self_tx: tx.clone(),
            deadline_generation: 0,
            tick_generation: 0,
            paused_from: None,
            pause_remaining: None,
            tv_grace_generation: 0,
        };
        tokio::spawn(engine.run());

        let handle = GameEngineHandle { sender: tx };
        engines.insert(code.clone(), handle.clone());
        handle
    }

    /// Tears down an actor and forgets its timers, e.g. on room deletion.
    pub async fn remove(&self, code: &RoomCode) {
        if let Some(handle) = self.engines.lock().await.remove(code) {
            handle.shutdown().await;
        }
        self.timers.remove_room(code).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use trivia_protocol::{ConnectionId, JoinPlayer, Player, Question, QuestionOptions};
    use trivia_room::{InMemoryCache, JoinKind as RoomJoinKind};

    use crate::archive::LoggingSessionArchive;
    use crate::catalog::{CatalogError, GenerationRequest, ProviderError};

    #[derive(Default)]
    struct RecordingBus {
        events: StdMutex<Vec<(RoomCode, String)>>,
    }

    impl RecordingBus {
        fn events_named(&self, name: &str) -> usize {
            self.events.lock().unwrap().iter().filter(|(_, n)| n == name).count()
        }

        fn event_name(event: &ServerEvent) -> &'static str {
            match event {
                ServerEvent::RoomCreated { .. } => "room:created",
                ServerEvent::RoomPlayerJoined { .. } => "room:player-joined",
                ServerEvent::RoomPlayerRejoined { .. } => "room:player-rejoined",
                ServerEvent::RoomPlayerLeft { .. } => "room:player-left",
                ServerEvent::RoomPlayerDisconnected { .. } => "room:player-disconnected",
                ServerEvent::RoomTvDisconnected => "room:tv-disconnected",
                ServerEvent::RoomKicked => "room:kicked",
                ServerEvent::RoomSettingsUpdated { .. } => "room:settings-updated",
                ServerEvent::RoomPlayerUpdated { .. } => "room:player-updated",
                ServerEvent::RoomAllPlayersReady => "room:all-players-ready",
                ServerEvent::GameStarting { .. } => "game:starting",
                ServerEvent::GameCountdown { .. } => "game:countdown",
                ServerEvent::GameStarted { .. } => "game:started",
                ServerEvent::GameQuestion { .. } => "game:question",
                ServerEvent::TimerTick { .. } => "timer:tick",
                ServerEvent::TimerEnd => "timer:end",
                ServerEvent::AnswerReceived { .. } => "answer:received",
                ServerEvent::PlayerAnswered { .. } => "player:answered",
                ServerEvent::AnswerAllReceived => "answer:all-received",
                ServerEvent::GameReveal { .. } => "game:reveal",
                ServerEvent::GameLeaderboard { .. } => "game:leaderboard",
                ServerEvent::GameFinished { .. } => "game:finished",
                ServerEvent::GamePaused => "game:paused",
                ServerEvent::GameResumed => "game:resumed",
                ServerEvent::GameRestarted { .. } => "game:restarted",
                ServerEvent::QuizGenerating => "quiz:generating",
                ServerEvent::QuizGenerated { .. } => "quiz:generated",
                ServerEvent::QuizCategorySelected { .. } => "quiz:category-selected",
                ServerEvent::QuizError { .. } => "quiz:error",
            }
        }
    }

    impl EventBus for RecordingBus {
        async fn join_room(&self, _conn: ConnectionId, _room: &RoomCode, _role: Role) {}
        async fn leave_room(&self, _conn: ConnectionId, _room: &RoomCode) {}
        async fn reply(&self, _conn: ConnectionId, _id: u64, _ack: trivia_protocol::Ack) -> Result<(), trivia_transport::TransportError> {
            Ok(())
        }
        async fn emit(&self, _conn: ConnectionId, _event: &ServerEvent) -> Result<(), trivia_transport::TransportError> {
            Ok(())
        }
        async fn broadcast(&self, room: &RoomCode, event: &ServerEvent) -> Result<(), trivia_transport::TransportError> {
            self.events.lock().unwrap().push((room.clone(), Self::event_name(event).to_string()));
            Ok(())
        }
        async fn broadcast_except(&self, room: &RoomCode, _exclude: ConnectionId, event: &ServerEvent) -> Result<(), trivia_transport::TransportError> {
            self.broadcast(room, event).await
        }
        async fn broadcast_filtered(&self, room: &RoomCode, _exclude_role: Role, event: &ServerEvent) -> Result<(), trivia_transport::TransportError> {
            self.broadcast(room, event).await
        }
    }

    struct EmptyCatalog;
    impl Catalog for EmptyCatalog {
        async fn fetch_least_used(&self, _category: &str, _difficulty: Difficulty, _limit: u32, _exclude_ids: &[String]) -> Result<Vec<Question>, CatalogError> {
            Ok(Vec::new())
        }
        async fn record_used(&self, _ids: &[String]) -> Result<(), CatalogError> {
            Ok(())
        }
        async fn persist_generated(&self, _category: &str, _questions: &[Question]) -> Result<(), CatalogError> {
            Ok(())
        }
    }

    struct NoProvider;
    impl QuestionProvider for NoProvider {
        async fn generate(&self, _request: GenerationRequest) -> Result<String, ProviderError> {
            Err(ProviderError::Request("no provider configured in this test".to_string()))
        }
    }

    fn question(id: &str, correct: AnswerOption) -> Question {
        Question {
            id: id.to_string(),
            text: format!("Question {id}?"),
            options: QuestionOptions { a: "A".into(), b: "B".into(), c: "C".into(), d: "D".into() },
            correct_answer: correct,
            time_limit: 20,
            image_url: None,
            difficulty: Some(Difficulty::Easy),
        }
    }

    async fn harness() -> (RoomCode, Arc<RoomManager<InMemoryCache>>, Arc<RecordingBus>, GameEngineRegistry<InMemoryCache, RecordingBus, EmptyCatalog, NoProvider, LoggingSessionArchive>) {
        let manager = Arc::new(RoomManager::new(InMemoryCache::new()));
        let bus = Arc::new(RecordingBus::default());
        let config = Arc::new(AppConfig { countdown_duration: Duration::from_secs(3), reveal_duration: Duration::from_secs(5), winner_jingle_duration: Duration::from_secs(2), ..AppConfig::default() });
        let pipeline = Arc::new(QuestionPipeline::new(Arc::new(EmptyCatalog), Arc::new(NoProvider), Duration::from_secs(5)));
        let archive = Arc::new(LoggingSessionArchive);
        let registry = GameEngineRegistry::new(manager.clone(), bus.clone(), pipeline, archive, config);

        let room = manager.create_room(ConnectionId(0), Some("Host TV".into()), 0, bus.as_ref()).await.unwrap();
        (room.code, manager, bus, registry)
    }

    async fn add_player(manager: &RoomManager<InMemoryCache>, bus: &RecordingBus, code: &RoomCode, conn: u64, name: &str) -> PlayerId {
        let player = JoinPlayer { name: name.to_string(), avatar: "🦊".to_string(), jingle_id: None };
        match manager.join_room(code, ConnectionId(conn), RoomJoinKind::Player, Some(player), bus).await.unwrap() {
            trivia_room::JoinOutcome::Player(p, _) => p.id,
            trivia_room::JoinOutcome::Tv(_) => unreachable!(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_game_requires_host_role() {
        let (code, manager, bus, registry) = harness().await;
        add_player(&manager, &bus, &code, 1, "Alice").await;
        add_player(&manager, &bus, &code, 2, "Bob").await;
        manager.store().update(&code, |room| {
            room.questions = vec![question("q1", AnswerOption::B)];
            Ok(())
        }).await.unwrap();

        let handle = registry.handle_for(&code).await;
        let err = handle.start_game(Role::Player).await.unwrap_err();
        assert!(matches!(err, EngineError::Room(RoomError::AuthZ(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn start_game_rejects_below_minimum_players() {
        let (code, manager, bus, registry) = harness().await;
        add_player(&manager, &bus, &code, 1, "Alice").await;
        manager.store().update(&code, |room| {
            room.questions = vec![question("q1", AnswerOption::B)];
            Ok(())
        }).await.unwrap();

        let handle = registry.handle_for(&code).await;
        let err = handle.start_game(Role::Tv).await.unwrap_err();
        assert!(matches!(err, EngineError::Room(RoomError::Precondition(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn full_round_resolves_scores_and_reaches_final() {
        let (code, manager, bus, registry) = harness().await;
        let alice = add_player(&manager, &bus, &code, 1, "Alice").await;
        let bob = add_player(&manager, &bus, &code, 2, "Bob").await;
        manager.store().update(&code, |room| {
            room.questions = vec![question("q1", AnswerOption::B)];
            Ok(())
        }).await.unwrap();

        let handle = registry.handle_for(&code).await;
        handle.start_game(Role::Tv).await.unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert!(bus.events_named("game:countdown") >= 1);
        assert_eq!(bus.events_named("game:started"), 1);
        assert_eq!(bus.events_named("game:question"), 1);

        handle.submit_answer(alice, AnswerOption::B, 0).await.unwrap();
        handle.submit_answer(bob, AnswerOption::A, 0).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(bus.events_named("answer:all-received"), 1);
        assert_eq!(bus.events_named("game:reveal"), 1);

        let room = manager.store().get(&code).await.unwrap();
        let alice_player = room.players.iter().find(|p| p.id == alice).unwrap();
        assert!(alice_player.score > 0, "the correct answer must score points");
        let bob_player = room.players.iter().find(|p| p.id == bob).unwrap();
        assert_eq!(bob_player.score, 0);

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(bus.events_named("game:finished"), 1);

        let room = manager.store().get(&code).await.unwrap();
        assert_eq!(room.phase, Phase::Final);
    }

    #[tokio::test(start_paused = true)]
    async fn leaderboard_is_skipped_on_the_final_questions_reveal() {
        let (code, manager, bus, registry) = harness().await;
        let alice = add_player(&manager, &bus, &code, 1, "Alice").await;
        let bob = add_player(&manager, &bus, &code, 2, "Bob").await;
        manager.store().update(&code, |room| {
            room.questions = vec![question("q1", AnswerOption::B), question("q2", AnswerOption::A)];
            Ok(())
        }).await.unwrap();

        let handle = registry.handle_for(&code).await;
        handle.start_game(Role::Tv).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;

        handle.submit_answer(alice, AnswerOption::B, 0).await.unwrap();
        handle.submit_answer(bob, AnswerOption::A, 0).await.unwrap();
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(bus.events_named("game:leaderboard"), 1, "one question remains, so the leaderboard interstitial must run");
        let room = manager.store().get(&code).await.unwrap();
        assert_eq!(room.phase, Phase::Leaderboard);

        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        let room = manager.store().get(&code).await.unwrap();
        assert_eq!(room.phase, Phase::Question);
        assert_eq!(room.current_question_index, 1);

        handle.submit_answer(alice, AnswerOption::A, 0).await.unwrap();
        handle.submit_answer(bob, AnswerOption::B, 0).await.unwrap();
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(bus.events_named("game:leaderboard"), 1, "the last question's reveal must go straight to final, not back through leaderboard");
        assert_eq!(bus.events_named("game:finished"), 1);
        let room = manager.store().get(&code).await.unwrap();
        assert_eq!(room.phase, Phase::Final);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_answer_is_rejected() {
        let (code, manager, bus, registry) = harness().await;
        let alice = add_player(&manager, &bus, &code, 1, "Alice").await;
        add_player(&manager, &bus, &code, 2, "Bob").await;
        manager.store().update(&code, |room| {
            room.questions = vec![question("q1", AnswerOption::B)];
            Ok(())
        }).await.unwrap();

        let handle = registry.handle_for(&code).await;
        handle.start_game(Role::Tv).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;

        handle.submit_answer(alice, AnswerOption::B, 0).await.unwrap();
        let err = handle.submit_answer(alice, AnswerOption::A, 0).await.unwrap_err();
        assert!(matches!(err, EngineError::Room(RoomError::Conflict(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_then_resume_restores_the_question_phase() {
        let (code, manager, bus, registry) = harness().await;
        add_player(&manager, &bus, &code, 1, "Alice").await;
        add_player(&manager, &bus, &code, 2, "Bob").await;
        manager.store().update(&code, |room| {
            room.questions = vec![question("q1", AnswerOption::B)];
            Ok(())
        }).await.unwrap();

        let handle = registry.handle_for(&code).await;
        handle.start_game(Role::Tv).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;

        handle.pause(Role::Tv).await.unwrap();
        let room = manager.store().get(&code).await.unwrap();
        assert_eq!(room.phase, Phase::Paused);

        handle.resume(Role::Tv).await.unwrap();
        let room = manager.store().get(&code).await.unwrap();
        assert_eq!(room.phase, Phase::Question);
    }

    #[tokio::test(start_paused = true)]
    async fn tv_disconnect_without_reconnect_force_ends_the_game() {
        let (code, manager, bus, registry) = harness().await;
        add_player(&manager, &bus, &code, 1, "Alice").await;
        add_player(&manager, &bus, &code, 2, "Bob").await;
        manager.store().update(&code, |room| {
            room.questions = vec![question("q1", AnswerOption::B)];
            Ok(())
        }).await.unwrap();

        let handle = registry.handle_for(&code).await;
        handle.start_game(Role::Tv).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;

        handle.tv_disconnected().await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;

        let room = manager.store().get(&code).await.unwrap();
        assert_eq!(room.phase, Phase::Final);
    }

    #[tokio::test(start_paused = true)]
    async fn tv_reconnect_cancels_the_grace_window() {
        let (code, manager, bus, registry) = harness().await;
        add_player(&manager, &bus, &code, 1, "Alice").await;
        add_player(&manager, &bus, &code, 2, "Bob").await;
        manager.store().update(&code, |room| {
            room.questions = vec![question("q1", AnswerOption::B)];
            Ok(())
        }).await.unwrap();

        let handle = registry.handle_for(&code).await;
        handle.start_game(Role::Tv).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;

        handle.tv_disconnected().await;
        tokio::task::yield_now().await;
        handle.tv_reconnected().await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;

        let room = manager.store().get(&code).await.unwrap();
        assert_eq!(room.phase, Phase::Question, "a reconnect must cancel the pending force-end");
    }
}
