//! Core data models used throughout Code Wiki.
//!
//! These types represent the repository under analysis, the topics the
//! generator proposes and the pages persisted for them, and the passages
//! that flow through chunking, embedding, and retrieval.

use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// A repository identified by `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `owner/name` or a `https://github.com/owner/name[.git]` URL.
    ///
    /// ```rust
    /// use codewiki_core::models::RepoRef;
    ///
    /// let r = RepoRef::parse("https://github.com/rust-lang/cargo.git").unwrap();
    /// assert_eq!(r.to_string(), "rust-lang/cargo");
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim().trim_end_matches('/');
        let path = trimmed
            .strip_prefix("https://github.com/")
            .or_else(|| trimmed.strip_prefix("http://github.com/"))
            .or_else(|| trimmed.strip_prefix("github.com/"))
            .unwrap_or(trimmed);
        let path = path.strip_suffix(".git").unwrap_or(path);

        let mut parts = path.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None)
                if is_valid_segment(owner) && is_valid_segment(name) =>
            {
                Ok(Self::new(owner, name))
            }
            _ => bail!("Invalid repository '{}': expected owner/name", input),
        }
    }
}

fn is_valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Progress marker of an [`AnalysisUnit`].
///
/// A run moves strictly forward through
/// `pending → fetching_tree → identifying_features → generating_pages → embedding → done`.
/// `error` is terminal and reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    FetchingTree,
    IdentifyingFeatures,
    GeneratingPages,
    Embedding,
    Done,
    Error,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::FetchingTree => "fetching_tree",
            UnitStatus::IdentifyingFeatures => "identifying_features",
            UnitStatus::GeneratingPages => "generating_pages",
            UnitStatus::Embedding => "embedding",
            UnitStatus::Done => "done",
            UnitStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "pending" => UnitStatus::Pending,
            "fetching_tree" => UnitStatus::FetchingTree,
            "identifying_features" => UnitStatus::IdentifyingFeatures,
            "generating_pages" => UnitStatus::GeneratingPages,
            "embedding" => UnitStatus::Embedding,
            "done" => UnitStatus::Done,
            "error" => UnitStatus::Error,
            other => bail!("Unknown unit status: {}", other),
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitStatus::Done | UnitStatus::Error)
    }

    /// Position in the forward sequence; `error` sits outside it.
    fn rank(&self) -> Option<u8> {
        match self {
            UnitStatus::Pending => Some(0),
            UnitStatus::FetchingTree => Some(1),
            UnitStatus::IdentifyingFeatures => Some(2),
            UnitStatus::GeneratingPages => Some(3),
            UnitStatus::Embedding => Some(4),
            UnitStatus::Done => Some(5),
            UnitStatus::Error => None,
        }
    }

    /// Whether a run currently at `self` may move to `next`.
    pub fn can_transition_to(&self, next: UnitStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(cur), Some(nxt)) => nxt > cur,
            (None, Some(_)) => false,
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The repository under analysis, as persisted in the store.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisUnit {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub default_branch: Option<String>,
    pub description: Option<String>,
    pub status: UnitStatus,
    pub overview: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AnalysisUnit {
    pub fn repo(&self) -> RepoRef {
        RepoRef::new(&self.owner, &self.name)
    }
}

/// Repository metadata reported by the content source.
#[derive(Debug, Clone, Default)]
pub struct RepoMetadata {
    pub default_branch: String,
    pub description: Option<String>,
    pub html_url: Option<String>,
    pub language: Option<String>,
}

/// A generator-proposed unit of functionality, before any page exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifiedTopic {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub file: String,
    pub line: u32,
    pub symbol: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(default)]
    pub url: String,
}

/// Page generator output for one topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageDraft {
    pub body: String,
    pub entry_points: Vec<EntryPoint>,
    pub citations: Vec<Citation>,
}

/// A persisted documentation page for one identified topic.
#[derive(Debug, Clone, Serialize)]
pub struct Topic {
    pub id: String,
    pub unit_id: String,
    /// The [`IdentifiedTopic::id`] this page was generated from.
    pub slug: String,
    pub title: String,
    pub summary: String,
    pub body: String,
    pub entry_points: Vec<EntryPoint>,
    pub citations: Vec<Citation>,
    pub position: i64,
}

/// Where a passage's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassageKind {
    Document,
    Code,
}

impl PassageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassageKind::Document => "document",
            PassageKind::Code => "code",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "document" => Ok(PassageKind::Document),
            "code" => Ok(PassageKind::Code),
            other => bail!("Unknown passage kind: {}", other),
        }
    }
}

/// An embedding unit: bounded text plus where it came from.
#[derive(Debug, Clone, Serialize)]
pub struct Passage {
    pub id: String,
    pub unit_id: String,
    pub kind: PassageKind,
    pub topic_id: Option<String>,
    pub source_file: Option<String>,
    pub content: String,
    pub hash: String,
    pub position: i64,
}

/// A passage returned from similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f64,
}
