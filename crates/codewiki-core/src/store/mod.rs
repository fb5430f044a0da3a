//! Storage abstraction for Code Wiki.
//!
//! The [`Store`] trait covers everything the pipeline and the retrieval
//! assembler persist or read: analysis units, generated topic pages, and
//! embedded passages. Backends: [`memory::InMemoryStore`] here, and the
//! SQLite store in the app crate.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{AnalysisUnit, Passage, RepoRef, ScoredPassage, Topic, UnitStatus};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_unit`](Store::upsert_unit) | Find or create the unit for a repository |
/// | [`set_status`](Store::set_status) | Record a status transition (and error message) |
/// | [`clear_unit`](Store::clear_unit) | Delete a unit's topics, passages, and overview |
/// | [`insert_topic`](Store::insert_topic) | Persist one generated page |
/// | [`insert_passages`](Store::insert_passages) | Persist passages with their vectors |
/// | [`similarity_search`](Store::similarity_search) | Cosine search within one unit |
#[async_trait]
pub trait Store: Send + Sync {
    /// Return the unit for `repo`, creating a `pending` one if none exists.
    async fn upsert_unit(&self, repo: &RepoRef) -> Result<AnalysisUnit>;

    async fn get_unit(&self, id: &str) -> Result<Option<AnalysisUnit>>;

    async fn find_unit(&self, repo: &RepoRef) -> Result<Option<AnalysisUnit>>;

    /// All units, most recently updated first.
    async fn list_units(&self) -> Result<Vec<AnalysisUnit>>;

    /// Set the unit's status. `message` replaces the stored error message;
    /// `None` clears it.
    async fn set_status(&self, unit_id: &str, status: UnitStatus, message: Option<&str>) -> Result<()>;

    async fn set_unit_details(
        &self,
        unit_id: &str,
        default_branch: &str,
        description: Option<&str>,
    ) -> Result<()>;

    async fn set_overview(&self, unit_id: &str, overview: &str) -> Result<()>;

    /// Delete every topic and passage of the unit and clear its overview.
    async fn clear_unit(&self, unit_id: &str) -> Result<()>;

    async fn insert_topic(&self, topic: &Topic) -> Result<()>;

    /// Topics of a unit, ordered by position.
    async fn list_topics(&self, unit_id: &str) -> Result<Vec<Topic>>;

    /// Insert passages paired with their vectors. Fails if the slices differ
    /// in length.
    async fn insert_passages(&self, passages: &[Passage], vectors: &[Vec<f32>], model: &str) -> Result<()>;

    /// Up to `k` passages of the unit whose similarity to `query_vec` is
    /// above `threshold`, best first.
    async fn similarity_search(
        &self,
        unit_id: &str,
        query_vec: &[f32],
        k: usize,
        threshold: f64,
    ) -> Result<Vec<ScoredPassage>>;

    async fn count_passages(&self, unit_id: &str) -> Result<usize>;
}
