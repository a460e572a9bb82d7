//! Binary entrypoint: wires a default in-memory catalog, a built-in
//! fallback question provider, and a structured-log session archive into a
//! running [`TriviaServer`].
//!
//! A real deployment swaps [`InMemoryQuestionCatalog`] for a database-backed
//! [`Catalog`] and [`BuiltinQuestionProvider`] for one that calls out to a
//! real question-generation service; both traits exist precisely so that
//! swap doesn't touch the engine.

use std::collections::HashMap;
use std::sync::Mutex;

use trivia_engine::{AppConfig, TriviaServerBuilder};
use trivia_engine::archive::LoggingSessionArchive;
use trivia_engine::catalog::{Catalog, CatalogError, GenerationRequest, ProviderError, QuestionProvider};
use trivia_protocol::{Difficulty, Question};
use trivia_room::InMemoryCache;

/// Process-lifetime question store, keyed by category and difficulty.
/// Sufficient for local development and for the example deployment; a
/// production backend persists this in a real database instead.
#[derive(Default)]
struct InMemoryQuestionCatalog {
    questions: Mutex<HashMap<(String, Difficulty), Vec<Question>>>,
    use_counts: Mutex<HashMap<String, u32>>,
}

impl Catalog for InMemoryQuestionCatalog {
    async fn fetch_least_used(
        &self,
        category: &str,
        difficulty: Difficulty,
        limit: u32,
        exclude_ids: &[String],
    ) -> Result<Vec<Question>, CatalogError> {
        let questions = self.questions.lock().unwrap();
        let use_counts = self.use_counts.lock().unwrap();
        let Some(pool) = questions.get(&(category.to_string(), difficulty)) else {
            return Ok(Vec::new());
        };
        let mut candidates: Vec<&Question> =
            pool.iter().filter(|q| !exclude_ids.contains(&q.id)).collect();
        candidates.sort_by_key(|q| use_counts.get(&q.id).copied().unwrap_or(0));
        Ok(candidates.into_iter().take(limit as usize).cloned().collect())
    }

    async fn record_used(&self, ids: &[String]) -> Result<(), CatalogError> {
        let mut use_counts = self.use_counts.lock().unwrap();
        for id in ids {
            *use_counts.entry(id.clone()).or_insert(0) += 1;
        }
        Ok(())
    }

    async fn persist_generated(&self, category: &str, questions: &[Question]) -> Result<(), CatalogError> {
        let mut store = self.questions.lock().unwrap();
        for question in questions {
            let difficulty = question.difficulty.unwrap_or(Difficulty::Medium);
            store.entry((category.to_string(), difficulty)).or_default().push(question.clone());
        }
        Ok(())
    }
}

/// Generates questions from a small built-in bank instead of calling out to
/// an external service, so the server runs standalone with zero
/// configuration. Ignores `category`/`topic_id` and just cycles through the
/// bank; a hosted deployment replaces this with a provider backed by a real
/// question-generation API.
struct BuiltinQuestionProvider;

impl QuestionProvider for BuiltinQuestionProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError> {
        let bank = [
            ("What is the capital of France?", "Paris", "Rome", "Berlin", "Madrid", "A"),
            ("Which planet is known as the Red Planet?", "Venus", "Mars", "Jupiter", "Saturn", "B"),
            ("How many continents are there on Earth?", "5", "6", "7", "8", "C"),
            ("What is the chemical symbol for gold?", "Ag", "Au", "Gd", "Go", "B"),
            ("Who wrote Romeo and Juliet?", "Dickens", "Shakespeare", "Austen", "Twain", "B"),
            ("What is the largest ocean on Earth?", "Atlantic", "Indian", "Arctic", "Pacific", "D"),
        ];

        let questions: Vec<serde_json::Value> = bank
            .iter()
            .cycle()
            .take(request.question_count as usize)
            .map(|(text, a, b, c, d, correct)| {
                serde_json::json!({
                    "text": text,
                    "options": { "A": a, "B": b, "C": c, "D": d },
                    "correctAnswer": correct,
                    "timeLimit": 20,
                })
            })
            .collect();

        Ok(serde_json::Value::Array(questions).to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = AppConfig::from_env();
    tracing::info!(bind_addr = %config.bind_addr, "starting trivia server");

    let server = TriviaServerBuilder::new()
        .config(config)
        .build(
            InMemoryCache::new(),
            InMemoryQuestionCatalog::default(),
            BuiltinQuestionProvider,
            LoggingSessionArchive,
        )
        .await?;

    server.run().await?;
    Ok(())
}
