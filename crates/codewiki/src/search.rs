//! `wiki search` and `wiki ask`.
//!
//! Both embed the query with the configured provider when embeddings are
//! enabled. Without a query vector, search returns title matches only and
//! `ask` answers from topic summaries.

use anyhow::{bail, Context, Result};

use codewiki_core::models::{AnalysisUnit, RepoRef, UnitStatus};
use codewiki_core::retrieval::{self, HitKind};
use codewiki_core::store::Store;

use crate::config::Config;
use crate::embedding::{create_provider, embed_query};
use crate::generation::create_generator;
use crate::sqlite_store::SqliteStore;
use crate::traits::AnswerRequest;

/// Look up an analyzed repository by `owner/name` or GitHub URL.
pub async fn resolve_unit(store: &dyn Store, repo: &str) -> Result<AnalysisUnit> {
    let repo = RepoRef::parse(repo)?;
    match store.find_unit(&repo).await? {
        Some(unit) => Ok(unit),
        None => bail!("{} has not been analyzed. Run `wiki analyze {}` first.", repo, repo),
    }
}

async fn query_vector(config: &Config, query: &str) -> Option<Vec<f32>> {
    if !config.embedding.is_enabled() {
        return None;
    }
    let provider = match create_provider(&config.embedding) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "embedding provider unavailable, using title matches only");
            return None;
        }
    };
    match embed_query(provider.as_ref(), query).await {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(error = %e, "query embedding failed, using title matches only");
            None
        }
    }
}

pub async fn run_search(config: &Config, repo: &str, query: &str, limit: usize, json: bool) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let unit = resolve_unit(&store, repo).await?;
    if unit.status != UnitStatus::Done {
        tracing::warn!(unit = %unit.id, status = %unit.status, "searching an incomplete analysis");
    }

    let params = config.retrieval.params();
    let vec = query_vector(config, query).await;
    let hits = retrieval::search(&store, &unit.id, query, vec.as_deref(), limit, &params).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
    } else if hits.is_empty() {
        println!("No results.");
    } else {
        for (i, hit) in hits.iter().enumerate() {
            let kind = match hit.kind {
                HitKind::Topic => "topic",
                HitKind::Passage => "passage",
            };
            let label = hit
                .title
                .as_deref()
                .or(hit.source_file.as_deref())
                .unwrap_or("(untitled)");
            println!("{}. [{:.2}] {} {}", i + 1, hit.score, kind, label);
            if let Some(file) = &hit.source_file {
                println!("    file: {}", file);
            }
            println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " ").trim());
            println!();
        }
    }

    store.pool().close().await;
    Ok(())
}

pub async fn run_ask(config: &Config, repo: &str, question: &str, page: Option<&str>) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let unit = resolve_unit(&store, repo).await?;

    let current_page = match page {
        Some(slug) => {
            let topics = store.list_topics(&unit.id).await?;
            let topic = topics
                .into_iter()
                .find(|t| t.slug == slug)
                .with_context(|| format!("No page '{}' for {}", slug, unit.repo()))?;
            Some(topic.body)
        }
        None => None,
    };

    let params = config.retrieval.params();
    let vec = query_vector(config, question).await;
    let context = retrieval::assemble_context(
        &store,
        &unit.id,
        vec.as_deref(),
        current_page.as_deref(),
        &params,
    )
    .await?;
    tracing::debug!(
        chars = context.text.len(),
        sources = context.sources.len(),
        fallback = context.used_fallback,
        "context assembled"
    );

    let generator = create_generator(&config.generation)?;
    let sources = context.sources.clone();
    let answer = generator
        .answer(&AnswerRequest {
            repo: unit.repo(),
            question: question.to_string(),
            context,
        })
        .await?;

    println!("{}", answer.trim());
    if !sources.is_empty() {
        println!();
        println!("Sources:");
        for source in sources {
            println!("  - {}", source);
        }
    }

    store.pool().close().await;
    Ok(())
}
