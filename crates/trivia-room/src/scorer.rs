//! Pure scoring functions — no I/O.

use trivia_protocol::{Answer, AnswerOption, Player, Question, Room};

pub const BASE: u32 = 1000;
pub const STREAK_STEP: u32 = 100;
pub const STREAK_CAP: u32 = 500;
pub const TIME_MULT: f64 = 0.5;

/// One player's outcome for a resolved question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionResult {
    pub player_id: trivia_protocol::PlayerId,
    pub answer: Option<AnswerOption>,
    pub is_correct: bool,
    pub points_earned: u32,
    pub new_score: u32,
    pub streak: u32,
    pub time_elapsed: u64,
}

/// One row of a ranked leaderboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub player_id: trivia_protocol::PlayerId,
    pub name: String,
    pub avatar: String,
    pub score: u32,
    pub rank: u32,
}

pub struct Scorer;

impl Scorer {
    /// Points for one answer, given the player's streak *before* this
    /// question is resolved.
    pub fn compute_points(
        answer: Option<AnswerOption>,
        correct_answer: AnswerOption,
        time_elapsed_ms: u64,
        time_limit_secs: u32,
        prior_streak: u32,
    ) -> u32 {
        let Some(answer) = answer else { return 0 };
        if answer != correct_answer {
            return 0;
        }
        let limit_ms = (time_limit_secs as f64) * 1000.0;
        let time_ratio = (1.0 - (time_elapsed_ms as f64) / limit_ms).max(0.0);
        let time_bonus = ((BASE as f64) * time_ratio * TIME_MULT).floor() as u32;
        let streak_bonus = (prior_streak * STREAK_STEP).min(STREAK_CAP);
        BASE + time_bonus + streak_bonus
    }

    /// One [`QuestionResult`] per player in `room`, sorted by `pointsEarned`
    /// descending, ties broken by `timeElapsed` ascending.
    pub fn compute_results(room: &Room, question: &Question, answers: &[Answer]) -> Vec<QuestionResult> {
        let mut results: Vec<QuestionResult> = room
            .players
            .iter()
            .map(|player| {
                let answer = answers.iter().find(|a| a.player_id == player.id);
                let is_correct = answer.is_some_and(|a| a.answer == question.correct_answer);
                let points_earned = Self::compute_points(
                    answer.map(|a| a.answer),
                    question.correct_answer,
                    answer.map(|a| a.time_elapsed).unwrap_or(0),
                    question.time_limit,
                    player.streak,
                );
                QuestionResult {
                    player_id: player.id,
                    answer: answer.map(|a| a.answer),
                    is_correct,
                    points_earned,
                    new_score: player.score + points_earned,
                    streak: if is_correct { player.streak + 1 } else { 0 },
                    time_elapsed: answer.map(|a| a.time_elapsed).unwrap_or(0),
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.points_earned.cmp(&a.points_earned).then(a.time_elapsed.cmp(&b.time_elapsed))
        });
        results
    }

    /// Entries sorted by `score` descending, ties broken by insertion order
    /// (join time — i.e. `players`' existing order), then `name` ascending.
    /// Ranks are dense (1, 2, 3, ...).
    pub fn rank_leaderboard(players: &[Player]) -> Vec<LeaderboardEntry> {
        let mut indexed: Vec<(usize, &Player)> = players.iter().enumerate().collect();
        indexed.sort_by(|(ia, a), (ib, b)| {
            b.score.cmp(&a.score).then(ia.cmp(ib)).then(a.name.cmp(&b.name))
        });

        let mut entries = Vec::with_capacity(indexed.len());
        let mut rank = 0u32;
        let mut last_score: Option<u32> = None;
        for (_, player) in indexed {
            if last_score != Some(player.score) {
                rank += 1;
                last_score = Some(player.score);
            }
            entries.push(LeaderboardEntry {
                player_id: player.id,
                name: player.name.clone(),
                avatar: player.avatar.clone(),
                score: player.score,
                rank,
            });
        }
        entries
    }
}
