//! Collaborator traits the pipeline is built against.
//!
//! ```text
//!  ContentSource ──▶ ┌──────────┐ ◀── TextGenerator
//!  (GitHub REST)     │ Pipeline │     (OpenAI-compatible chat)
//!                    └────┬─────┘
//!  EmbeddingProvider ─────┤
//!                         ▼
//!                       Store (SQLite / in-memory)
//! ```
//!
//! Concrete implementations are chosen in `main.rs` from configuration and
//! injected through [`Pipeline::new`](crate::pipeline::Pipeline::new); tests
//! inject fakes.

use anyhow::Result;
use async_trait::async_trait;

use codewiki_core::models::{IdentifiedTopic, PageDraft, RepoMetadata, RepoRef};
use codewiki_core::retrieval::ChatContext;

/// Read access to a hosted repository.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_metadata(&self, repo: &RepoRef) -> Result<RepoMetadata>;

    /// Paths of every file (blob) on `branch`.
    async fn fetch_tree(&self, repo: &RepoRef, branch: &str) -> Result<Vec<String>>;

    /// Fetch file contents with at most `concurrency` requests in flight.
    ///
    /// Returns `(path, text)` pairs in the order of `paths`. Files that cannot
    /// be fetched or are not text are left out.
    async fn fetch_files(
        &self,
        repo: &RepoRef,
        branch: &str,
        paths: &[String],
        concurrency: usize,
    ) -> Vec<(String, String)>;
}

/// Inputs for topic identification.
#[derive(Debug, Clone)]
pub struct TopicRequest {
    pub repo: RepoRef,
    pub description: Option<String>,
    pub language: Option<String>,
    /// Indented rendering of the filtered file tree.
    pub tree: String,
    pub readme: Option<String>,
    /// `(path, content)` of root-level manifests.
    pub manifests: Vec<(String, String)>,
    pub max_topics: usize,
}

#[derive(Debug, Clone)]
pub struct PageRequest {
    pub repo: RepoRef,
    pub branch: String,
    pub topic: IdentifiedTopic,
    pub files: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct OverviewRequest {
    pub repo: RepoRef,
    pub description: Option<String>,
    pub readme: Option<String>,
    /// `(title, summary)` of every generated page.
    pub topics: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub repo: RepoRef,
    pub question: String,
    pub context: ChatContext,
}

/// Language-model backed text generation.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn identify_topics(&self, req: &TopicRequest) -> Result<Vec<IdentifiedTopic>>;

    async fn generate_page(&self, req: &PageRequest) -> Result<PageDraft>;

    async fn synthesize_overview(&self, req: &OverviewRequest) -> Result<String>;

    /// Answer a question from the assembled context.
    async fn answer(&self, req: &AnswerRequest) -> Result<String>;
}
