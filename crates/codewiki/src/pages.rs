//! `wiki status`, `wiki topics`, and `wiki page`.

use anyhow::{Context, Result};

use codewiki_core::models::AnalysisUnit;
use codewiki_core::store::Store;

use crate::config::Config;
use crate::search::resolve_unit;
use crate::sqlite_store::SqliteStore;

fn print_unit(unit: &AnalysisUnit) {
    let updated = chrono::DateTime::from_timestamp(unit.updated_at, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    println!("{}  {}  (updated {})", unit.repo(), unit.status, updated);
    if let Some(msg) = &unit.error_message {
        println!("    error: {}", msg);
    }
}

/// Status of one repository, or of every analyzed repository.
pub async fn show_status(config: &Config, repo: Option<&str>, json: bool) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let units = match repo {
        Some(repo) => vec![resolve_unit(&store, repo).await?],
        None => store.list_units().await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&units)?);
    } else if units.is_empty() {
        println!("No repositories analyzed yet.");
    } else {
        for unit in &units {
            print_unit(unit);
            let passages = store.count_passages(&unit.id).await?;
            let topics = store.list_topics(&unit.id).await?.len();
            println!("    topics: {}  passages: {}", topics, passages);
        }
    }

    store.pool().close().await;
    Ok(())
}

pub async fn list_topics(config: &Config, repo: &str) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let unit = resolve_unit(&store, repo).await?;
    let topics = store.list_topics(&unit.id).await?;

    print_unit(&unit);
    if let Some(overview) = &unit.overview {
        println!();
        println!("{}", overview.trim());
    }
    println!();
    for topic in &topics {
        println!("  {:<32} {}", topic.slug, topic.title);
        if !topic.summary.is_empty() {
            println!("  {:<32} {}", "", topic.summary);
        }
    }

    store.pool().close().await;
    Ok(())
}

/// Print one page as markdown, followed by its entry points and citations.
pub async fn show_page(config: &Config, repo: &str, slug: &str, json: bool) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let unit = resolve_unit(&store, repo).await?;
    let topic = store
        .list_topics(&unit.id)
        .await?
        .into_iter()
        .find(|t| t.slug == slug)
        .with_context(|| format!("No page '{}' for {}", slug, unit.repo()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&topic)?);
    } else {
        println!("# {}", topic.title);
        println!();
        println!("{}", topic.body.trim());
        if !topic.entry_points.is_empty() {
            println!();
            println!("## Entry points");
            for ep in &topic.entry_points {
                println!("- `{}` {}:{} {}", ep.symbol, ep.file, ep.line, ep.url);
            }
        }
        if !topic.citations.is_empty() {
            println!();
            println!("## Citations");
            for c in &topic.citations {
                println!("- {}:{}-{} {}", c.file, c.start_line, c.end_line, c.url);
            }
        }
    }

    store.pool().close().await;
    Ok(())
}
