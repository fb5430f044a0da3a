//! Retrieval assembler: search results and RAG context windows.
//!
//! Ranking itself is delegated to [`Store::similarity_search`]. This module
//! post-processes the hits:
//!
//! - [`semantic_search`] trims passage content to a display snippet.
//! - [`search`] merges title matches on topic pages with semantic hits.
//! - [`assemble_context`] builds the bounded context handed to the answer
//!   generator, falling back to topic summaries when nothing relevant was
//!   found so the generator is never left without grounding.

use std::collections::HashSet;

use anyhow::Result;
use serde::Serialize;

use crate::models::{ScoredPassage, Topic};
use crate::store::Store;

/// Minimum title-match score for a topic to count as a structural hit.
const MIN_TITLE_SCORE: f64 = 0.5;

/// Tunables for search and context assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    pub top_k: usize,
    /// Passages at or below this cosine similarity are ignored.
    pub threshold: f64,
    pub snippet_chars: usize,
    pub overview_chars: usize,
    pub page_context_chars: usize,
    pub fallback_topics: usize,
    pub max_context_chars: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 8,
            threshold: 0.3,
            snippet_chars: 240,
            overview_chars: 2000,
            page_context_chars: 4000,
            fallback_topics: 5,
            max_context_chars: 16000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HitKind {
    Topic,
    Passage,
}

/// One row of a search response.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub kind: HitKind,
    pub score: f64,
    pub topic_id: Option<String>,
    pub title: Option<String>,
    pub source_file: Option<String>,
    pub snippet: String,
}

/// Context window for answer generation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatContext {
    pub text: String,
    /// Source files cited by the included passages, first occurrence order.
    pub sources: Vec<String>,
    /// True when no passage made it into the window and topic summaries
    /// were used instead.
    pub used_fallback: bool,
}

/// First `max_chars` characters of `s`, with `...` appended when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// How well `query` matches a topic title, in `[0, 1]`.
///
/// `1.0` if the whole query occurs in the title; otherwise the fraction of
/// query words that do.
pub fn title_match_score(query: &str, title: &str) -> f64 {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return 0.0;
    }
    let t = title.to_lowercase();
    if t.contains(&q) {
        return 1.0;
    }
    let words: Vec<&str> = q.split_whitespace().collect();
    let present = words.iter().filter(|w| t.contains(*w)).count();
    present as f64 / words.len() as f64
}

/// Semantic hits for `query_vec`, with content cut to `snippet_chars`.
pub async fn semantic_search(
    store: &dyn Store,
    unit_id: &str,
    query_vec: &[f32],
    params: &RetrievalParams,
) -> Result<Vec<ScoredPassage>> {
    let mut hits = store
        .similarity_search(unit_id, query_vec, params.top_k, params.threshold)
        .await?;
    for hit in &mut hits {
        hit.passage.content = truncate_chars(&hit.passage.content, params.snippet_chars);
    }
    Ok(hits)
}

/// Combined search: topic title matches first, then semantic passages that
/// don't belong to an already-listed topic. `query_vec` is `None` when
/// embeddings are disabled.
pub async fn search(
    store: &dyn Store,
    unit_id: &str,
    query: &str,
    query_vec: Option<&[f32]>,
    limit: usize,
    params: &RetrievalParams,
) -> Result<Vec<SearchHit>> {
    let topics = store.list_topics(unit_id).await?;

    let mut structural: Vec<(f64, &Topic)> = topics
        .iter()
        .map(|t| (title_match_score(query, &t.title), t))
        .filter(|(score, _)| *score >= MIN_TITLE_SCORE)
        .collect();
    structural.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut listed_topics = HashSet::new();
    let mut hits: Vec<SearchHit> = Vec::new();
    for (score, t) in structural {
        listed_topics.insert(t.id.clone());
        hits.push(SearchHit {
            kind: HitKind::Topic,
            score,
            topic_id: Some(t.id.clone()),
            title: Some(t.title.clone()),
            source_file: None,
            snippet: truncate_chars(&t.summary, params.snippet_chars),
        });
    }

    if let Some(vec) = query_vec {
        let mut seen = HashSet::new();
        for sp in semantic_search(store, unit_id, vec, params).await? {
            let p = sp.passage;
            if p.topic_id.as_ref().is_some_and(|id| listed_topics.contains(id)) {
                continue;
            }
            if !seen.insert(p.hash.clone()) {
                continue;
            }
            let title = p
                .topic_id
                .as_ref()
                .and_then(|id| topics.iter().find(|t| &t.id == id))
                .map(|t| t.title.clone());
            hits.push(SearchHit {
                kind: HitKind::Passage,
                score: sp.score,
                topic_id: p.topic_id,
                title,
                source_file: p.source_file,
                snippet: p.content,
            });
        }
    }

    hits.truncate(limit);
    Ok(hits)
}

/// Build the context window for answering a question about a unit.
///
/// Layout: overview slice, then the "currently viewing" page slice (if
/// given), then relevant passages labelled with their source file. The two
/// leading slices together take at most half of `max_context_chars`; a
/// passage that would overflow the window is skipped. When no passage makes
/// it in, up to `fallback_topics` topic summaries take their place, the last
/// one clipped to the room left.
pub async fn assemble_context(
    store: &dyn Store,
    unit_id: &str,
    query_vec: Option<&[f32]>,
    current_page: Option<&str>,
    params: &RetrievalParams,
) -> Result<ChatContext> {
    let mut ctx = ChatContext::default();
    let framing_limit = params.max_context_chars / 2;

    if let Some(overview) = store
        .get_unit(unit_id)
        .await?
        .and_then(|u| u.overview)
        .filter(|o| !o.trim().is_empty())
    {
        push_clipped(
            &mut ctx.text,
            "## Repository overview",
            &overview,
            params.overview_chars,
            framing_limit,
        );
    }

    if let Some(page) = current_page.filter(|p| !p.trim().is_empty()) {
        push_clipped(
            &mut ctx.text,
            "## Currently viewing",
            page,
            params.page_context_chars,
            framing_limit,
        );
    }

    let hits = match query_vec {
        Some(vec) => {
            store
                .similarity_search(unit_id, vec, params.top_k, params.threshold)
                .await?
        }
        None => Vec::new(),
    };

    let mut included = 0;
    for hit in hits {
        let p = hit.passage;
        let block = match &p.source_file {
            Some(file) => format!("[Source: {}]\n{}\n\n", file, p.content),
            None => format!("{}\n\n", p.content),
        };
        if !push_within(&mut ctx.text, &block, params.max_context_chars) {
            continue;
        }
        included += 1;
        if let Some(file) = p.source_file {
            if !ctx.sources.contains(&file) {
                ctx.sources.push(file);
            }
        }
    }

    if included == 0 {
        ctx.used_fallback = true;
        let topics = store.list_topics(unit_id).await?;
        for t in topics.iter().take(params.fallback_topics) {
            let heading = format!("## {}", t.title);
            if !push_clipped(
                &mut ctx.text,
                &heading,
                &t.summary,
                usize::MAX,
                params.max_context_chars,
            ) {
                break;
            }
        }
    }
    Ok(ctx)
}

fn push_within(text: &mut String, block: &str, max_chars: usize) -> bool {
    if text.chars().count() + block.chars().count() > max_chars {
        return false;
    }
    text.push_str(block);
    true
}

/// Append `heading`, then `body` cut to `cap` chars and to whatever still
/// fits under `limit`. Returns whether the whole body fit; nothing is
/// appended when not even the heading does.
fn push_clipped(text: &mut String, heading: &str, body: &str, cap: usize, limit: usize) -> bool {
    // newline after the heading, blank line after the body, truncation marker
    let overhead = heading.chars().count() + 3 + 3;
    let used = text.chars().count();
    if used + overhead >= limit {
        return false;
    }
    let room = limit - used - overhead;
    let fits = body.chars().count() <= room;
    text.push_str(heading);
    text.push('\n');
    text.push_str(&truncate_chars(body, cap.min(room)));
    text.push_str("\n\n");
    fits
}
