//! The two external dependencies of question sourcing: a cache of
//! previously-asked questions (`Catalog`) and a generator of new ones
//! (`QuestionProvider`). `QuestionPipeline` (pipeline.rs) composes both;
//! neither trait knows about the other.

use trivia_protocol::{Difficulty, Question};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to {0}")]
    Io(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,
    #[error("failed to {0}")]
    Request(String),
}

/// A request for freshly generated questions, carrying through the
/// `quiz:generate` fields a provider needs to prompt for them.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub category: String,
    pub question_count: u32,
    pub difficulty: Difficulty,
    pub is_custom_topic: bool,
    pub topic_id: Option<String>,
}

/// Previously-asked-question storage, keyed by category and difficulty.
/// An `InMemoryCache`-backed implementation is sufficient for local
/// development; a production deployment backs this with a real database.
pub trait Catalog: Send + Sync + 'static {
    /// Returns up to `limit` questions for `category`/`difficulty`,
    /// excluding `exclude_ids`, ordered least-recently-used first.
    async fn fetch_least_used(
        &self,
        category: &str,
        difficulty: Difficulty,
        limit: u32,
        exclude_ids: &[String],
    ) -> Result<Vec<Question>, CatalogError>;

    /// Marks `ids` as asked, bumping their use count so future
    /// `fetch_least_used` calls prefer other questions.
    async fn record_used(&self, ids: &[String]) -> Result<(), CatalogError>;

    /// Best-effort persistence of freshly generated questions so later
    /// games can reuse them. Failures here must never fail the caller's
    /// in-progress quiz generation.
    async fn persist_generated(&self, category: &str, questions: &[Question]) -> Result<(), CatalogError>;
}

/// Generates new questions from a natural-language request. Returns the
/// provider's raw response text; extracting and validating the embedded
/// JSON array of questions is `QuestionPipeline`'s job, not the
/// provider's, since different providers format accompanying prose
/// differently around the same payload shape.
pub trait QuestionProvider: Send + Sync + 'static {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ProviderError>;
}
