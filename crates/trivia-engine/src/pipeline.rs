//! Question sourcing: prefer the catalog's least-used questions, fall
//! back to the provider for the shortfall, and never fail a room's whole
//! generation request over one malformed generated question — drop it
//! and keep the rest.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::Deserialize;
use trivia_protocol::{AnswerOption, Difficulty, Question, QuestionOptions};

use crate::catalog::{Catalog, GenerationRequest, QuestionProvider};

pub struct QuestionPipeline<Cat, Prov> {
    catalog: Arc<Cat>,
    provider: Arc<Prov>,
    provider_timeout: Duration,
}

impl<Cat: Catalog, Prov: QuestionProvider> QuestionPipeline<Cat, Prov> {
    pub fn new(catalog: Arc<Cat>, provider: Arc<Prov>, provider_timeout: Duration) -> Self {
        Self { catalog, provider, provider_timeout }
    }

    /// Returns up to `count` questions, shortest being an empty `Vec` if
    /// both the catalog and the provider came up dry — the caller surfaces
    /// this as [`crate::error::EngineError::QuizGenerationFailed`].
    ///
    /// `exclude_ids` are ids the caller has already asked in this room (e.g.
    /// a prior round before a `game:restart`); the catalog fetch drops them
    /// from the candidate pool instead of just deprioritizing them.
    pub async fn produce(
        &self,
        category: &str,
        difficulty: Difficulty,
        count: u32,
        is_custom_topic: bool,
        topic_id: Option<String>,
        exclude_ids: &[String],
    ) -> Vec<Question> {
        let fetch_limit = count.saturating_mul(2).max(count);
        let mut pool = self
            .catalog
            .fetch_least_used(category, difficulty, fetch_limit, exclude_ids)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "catalog lookup failed, falling back to the provider");
                Vec::new()
            });

        let mut rng = rand::rng();
        pool.shuffle(&mut rng);

        if pool.len() as u32 >= count {
            pool.truncate(count as usize);
            self.mark_used(&pool).await;
            return pool;
        }

        let still_needed = count - pool.len() as u32;
        let request = GenerationRequest {
            category: category.to_string(),
            question_count: still_needed,
            difficulty,
            is_custom_topic,
            topic_id,
        };

        let generated = match tokio::time::timeout(self.provider_timeout, self.provider.generate(request)).await {
            Ok(Ok(text)) => parse_generated(&text, difficulty),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "question provider request failed");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.provider_timeout, "question provider request timed out");
                Vec::new()
            }
        };

        if !generated.is_empty() {
            if let Err(e) = self.catalog.persist_generated(category, &generated).await {
                tracing::debug!(error = %e, "failed to persist generated questions");
            }
        }

        pool.extend(generated);
        pool.truncate(count as usize);
        self.mark_used(&pool).await;
        pool
    }

    async fn mark_used(&self, questions: &[Question]) {
        if questions.is_empty() {
            return;
        }
        let ids: Vec<String> = questions.iter().map(|q| q.id.clone()).collect();
        if let Err(e) = self.catalog.record_used(&ids).await {
            tracing::debug!(error = %e, "failed to record question usage");
        }
    }
}

#[derive(Deserialize)]
struct RawOptions {
    #[serde(rename = "A")]
    a: String,
    #[serde(rename = "B")]
    b: String,
    #[serde(rename = "C")]
    c: String,
    #[serde(rename = "D")]
    d: String,
}

#[derive(Deserialize)]
struct RawQuestion {
    text: String,
    options: RawOptions,
    #[serde(rename = "correctAnswer")]
    correct_answer: String,
    #[serde(rename = "timeLimit")]
    time_limit: Option<u32>,
}

/// Extracts the first bracketed JSON array out of a provider's free-text
/// response and validates each element, rejecting the whole batch if any
/// one element is malformed.
fn parse_generated(text: &str, difficulty: Difficulty) -> Vec<Question> {
    let Some(array_text) = extract_bracketed_array(text) else {
        tracing::warn!("provider response contained no JSON array");
        return Vec::new();
    };

    let raw: Vec<RawQuestion> = match serde_json::from_str(array_text) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "provider response array failed to parse");
            return Vec::new();
        }
    };

    let mut questions = Vec::with_capacity(raw.len());
    for item in raw {
        let Ok(correct_answer) = item.correct_answer.parse::<AnswerOption>() else {
            tracing::warn!(answer = %item.correct_answer, "rejecting generated batch: invalid correctAnswer");
            return Vec::new();
        };
        let options = QuestionOptions { a: item.options.a, b: item.options.b, c: item.options.c, d: item.options.d };
        if item.text.trim().is_empty() || !options.all_non_empty() {
            tracing::warn!("rejecting generated batch: blank question text or option");
            return Vec::new();
        }
        questions.push(Question {
            id: generate_question_id(),
            text: item.text,
            options,
            correct_answer,
            time_limit: item.time_limit.unwrap_or(20),
            image_url: None,
            difficulty: Some(difficulty),
        });
    }
    questions
}

fn extract_bracketed_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let mut depth = 0i32;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn generate_question_id() -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    let suffix: String = (0..16).map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char).collect();
    format!("gen-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogError, ProviderError};
    use std::sync::Mutex;

    struct FakeCatalog {
        seeded: Vec<Question>,
        recorded: Mutex<Vec<String>>,
        persisted: Mutex<Vec<Question>>,
    }

    impl Catalog for FakeCatalog {
        async fn fetch_least_used(
            &self,
            _category: &str,
            _difficulty: Difficulty,
            limit: u32,
            exclude_ids: &[String],
        ) -> Result<Vec<Question>, CatalogError> {
            Ok(self
                .seeded
                .iter()
                .filter(|q| !exclude_ids.contains(&q.id))
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn record_used(&self, ids: &[String]) -> Result<(), CatalogError> {
            self.recorded.lock().unwrap().extend(ids.iter().cloned());
            Ok(())
        }

        async fn persist_generated(&self, _category: &str, questions: &[Question]) -> Result<(), CatalogError> {
            self.persisted.lock().unwrap().extend(questions.iter().cloned());
            Ok(())
        }
    }

    struct FakeProvider {
        response: String,
    }

    impl QuestionProvider for FakeProvider {
        async fn generate(&self, _request: GenerationRequest) -> Result<String, ProviderError> {
            Ok(self.response.clone())
        }
    }

    struct FailingProvider;

    impl QuestionProvider for FailingProvider {
        async fn generate(&self, _request: GenerationRequest) -> Result<String, ProviderError> {
            Err(ProviderError::Request("down".into()))
        }
    }

    fn sample_question(id: &str) -> Question {
        Question {
            id: id.to_string(),
            text: "2+2?".into(),
            options: QuestionOptions { a: "3".into(), b: "4".into(), c: "5".into(), d: "6".into() },
            correct_answer: AnswerOption::B,
            time_limit: 20,
            image_url: None,
            difficulty: Some(Difficulty::Easy),
        }
    }

    #[tokio::test]
    async fn satisfies_the_full_count_from_the_catalog_alone() {
        let catalog = Arc::new(FakeCatalog {
            seeded: vec![sample_question("q1"), sample_question("q2"), sample_question("q3")],
            recorded: Mutex::new(Vec::new()),
            persisted: Mutex::new(Vec::new()),
        });
        let provider = Arc::new(FailingProvider);
        let pipeline = QuestionPipeline::new(catalog.clone(), provider, Duration::from_secs(1));

        let result = pipeline.produce("general", Difficulty::Easy, 2, false, None, &[]).await;
        assert_eq!(result.len(), 2);
        assert_eq!(catalog.recorded.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn falls_back_to_the_provider_for_the_shortfall() {
        let catalog = Arc::new(FakeCatalog {
            seeded: vec![sample_question("q1")],
            recorded: Mutex::new(Vec::new()),
            persisted: Mutex::new(Vec::new()),
        });
        let response = r#"Sure thing! [{"text":"Capital of France?","options":{"A":"Paris","B":"Rome","C":"Berlin","D":"Madrid"},"correctAnswer":"A","timeLimit":15}]"#;
        let provider = Arc::new(FakeProvider { response: response.to_string() });
        let pipeline = QuestionPipeline::new(catalog.clone(), provider, Duration::from_secs(1));

        let result = pipeline.produce("geography", Difficulty::Medium, 2, false, None, &[]).await;
        assert_eq!(result.len(), 2);
        assert_eq!(catalog.persisted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_the_whole_batch_when_one_element_is_malformed() {
        let catalog = Arc::new(FakeCatalog { seeded: Vec::new(), recorded: Mutex::new(Vec::new()), persisted: Mutex::new(Vec::new()) });
        let response = r#"[{"text":"Ok?","options":{"A":"1","B":"2","C":"3","D":"4"},"correctAnswer":"A"},{"text":"Bad?","options":{"A":"1","B":"2","C":"3","D":"4"},"correctAnswer":"Z"}]"#;
        let provider = Arc::new(FakeProvider { response: response.to_string() });
        let pipeline = QuestionPipeline::new(catalog, provider, Duration::from_secs(1));

        let result = pipeline.produce("general", Difficulty::Easy, 2, false, None, &[]).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn excluded_ids_are_dropped_from_the_catalog_pool() {
        let catalog = Arc::new(FakeCatalog {
            seeded: vec![sample_question("q1"), sample_question("q2")],
            recorded: Mutex::new(Vec::new()),
            persisted: Mutex::new(Vec::new()),
        });
        let provider = Arc::new(FailingProvider);
        let pipeline = QuestionPipeline::new(catalog, provider, Duration::from_secs(1));

        let result = pipeline.produce("general", Difficulty::Easy, 2, false, None, &["q1".to_string()]).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "q2");
    }

    #[tokio::test]
    async fn returns_empty_when_both_sources_come_up_dry() {
        let catalog = Arc::new(FakeCatalog { seeded: Vec::new(), recorded: Mutex::new(Vec::new()), persisted: Mutex::new(Vec::new()) });
        let provider = Arc::new(FailingProvider);
        let pipeline = QuestionPipeline::new(catalog, provider, Duration::from_secs(1));

        let result = pipeline.produce("general", Difficulty::Easy, 5, false, None, &[]).await;
        assert!(result.is_empty());
    }
}
