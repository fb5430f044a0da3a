//! Validation of generator JSON output.
//!
//! Language models return JSON that is almost, but not always, what was
//! asked for: wrapped in a markdown fence, camelCase instead of snake_case,
//! ids missing or repeated. These parsers accept those variations and
//! reject anything that would leave the pipeline with unusable data.

use std::collections::HashSet;

use serde::Deserialize;
use thiserror::Error;

use crate::models::{Citation, EntryPoint, IdentifiedTopic, PageDraft};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("response contains no {0}")]
    Empty(&'static str),
    #[error("item {index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },
}

#[derive(Debug, Deserialize)]
struct RawTopic {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "name")]
    title: String,
    #[serde(default, alias = "description")]
    summary: String,
    #[serde(
        default,
        alias = "relevantFiles",
        alias = "relevant_files",
        alias = "paths"
    )]
    files: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTopicList {
    Wrapped {
        #[serde(alias = "features")]
        topics: Vec<RawTopic>,
    },
    Bare(Vec<RawTopic>),
}

#[derive(Debug, Deserialize)]
struct RawEntryPoint {
    #[serde(default)]
    file: String,
    #[serde(default)]
    line: u32,
    #[serde(default, alias = "name")]
    symbol: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct RawCitation {
    #[serde(default)]
    file: String,
    #[serde(default, alias = "startLine", alias = "line")]
    start_line: u32,
    #[serde(default, alias = "endLine")]
    end_line: u32,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    #[serde(default, alias = "content", alias = "markdown")]
    body: String,
    #[serde(default, alias = "entryPoints")]
    entry_points: Vec<RawEntryPoint>,
    #[serde(default)]
    citations: Vec<RawCitation>,
}

/// Remove a surrounding markdown fence and any prose around the JSON value.
fn extract_json(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```") {
        let rest = rest.split_once('\n').map(|(_, r)| r).unwrap_or("");
        s = rest.trim_end().strip_suffix("```").unwrap_or(rest).trim();
    }
    let open = s.find(|c: char| c == '{' || c == '[');
    let close = s.rfind(|c: char| c == '}' || c == ']');
    match (open, close) {
        (Some(o), Some(c)) if o < c => &s[o..=c],
        _ => s,
    }
}

/// Lowercase ASCII slug: runs of non-alphanumerics become one `-`.
///
/// ```rust
/// use codewiki_core::schema::slugify;
///
/// assert_eq!(slugify("HTTP Routing & Middleware"), "http-routing-middleware");
/// ```
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

fn normalize_path(p: &str) -> Option<String> {
    let p = p.trim();
    let p = p.strip_prefix("./").unwrap_or(p).trim_start_matches('/');
    (!p.is_empty()).then(|| p.to_string())
}

/// Parse the topic-identification response.
///
/// Accepts `{"topics": [...]}`, `{"features": [...]}`, or a bare array.
/// Missing ids are derived from the title, repeated ids get a numeric
/// suffix, and the list is capped at `max_topics`.
pub fn parse_identified_topics(
    raw: &str,
    max_topics: usize,
) -> Result<Vec<IdentifiedTopic>, SchemaError> {
    let list = match serde_json::from_str::<RawTopicList>(extract_json(raw))? {
        RawTopicList::Wrapped { topics } => topics,
        RawTopicList::Bare(topics) => topics,
    };

    let mut seen = HashSet::new();
    let mut topics = Vec::with_capacity(list.len().min(max_topics));

    for (index, t) in list.into_iter().enumerate() {
        if topics.len() >= max_topics {
            break;
        }
        let title = t.title.trim().to_string();
        if title.is_empty() {
            return Err(SchemaError::MissingField {
                index,
                field: "title",
            });
        }

        let mut base = t.id.as_deref().map(slugify).unwrap_or_default();
        if base.is_empty() {
            base = slugify(&title);
        }
        if base.is_empty() {
            base = format!("topic-{}", index + 1);
        }
        let mut id = base.clone();
        let mut n = 2;
        while !seen.insert(id.clone()) {
            id = format!("{}-{}", base, n);
            n += 1;
        }

        let mut file_set = HashSet::new();
        let files = t
            .files
            .iter()
            .filter_map(|f| normalize_path(f))
            .filter(|f| file_set.insert(f.clone()))
            .collect();

        topics.push(IdentifiedTopic {
            id,
            title,
            summary: t.summary.trim().to_string(),
            files,
        });
    }

    if topics.is_empty() {
        return Err(SchemaError::Empty("topics"));
    }
    Ok(topics)
}

/// Parse a page-generation response.
///
/// Entry points and citations without a file are dropped; line numbers are
/// clamped to start at 1 and citation ranges are ordered.
pub fn parse_page_draft(raw: &str) -> Result<PageDraft, SchemaError> {
    let page: RawPage = serde_json::from_str(extract_json(raw))?;
    let body = page.body.trim().to_string();
    if body.is_empty() {
        return Err(SchemaError::Empty("page body"));
    }

    let entry_points = page
        .entry_points
        .into_iter()
        .filter_map(|e| {
            let file = normalize_path(&e.file)?;
            Some(EntryPoint {
                file,
                line: e.line.max(1),
                symbol: e.symbol.trim().to_string(),
                url: e.url,
            })
        })
        .collect();

    let citations = page
        .citations
        .into_iter()
        .filter_map(|c| {
            let file = normalize_path(&c.file)?;
            let start = c.start_line.max(1);
            let end = c.end_line.max(start);
            Some(Citation {
                file,
                start_line: start,
                end_line: end,
                url: c.url,
            })
        })
        .collect();

    Ok(PageDraft {
        body,
        entry_points,
        citations,
    })
}
