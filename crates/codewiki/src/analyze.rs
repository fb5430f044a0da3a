//! `wiki analyze`: wire the production collaborators into a [`Pipeline`].

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use codewiki_core::models::RepoRef;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::generation::create_generator;
use crate::github::GitHubSource;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::progress::{BroadcastProgress, ProgressMode};
use crate::sqlite_store::SqliteStore;

pub async fn run_analyze(config: &Config, repo: &str, mode: ProgressMode) -> Result<()> {
    let repo = RepoRef::parse(repo)?;

    let store = Arc::new(SqliteStore::open(config).await?);
    let source = Arc::new(GitHubSource::new(&config.github)?);
    let generator = Arc::from(create_generator(&config.generation)?);
    let embedder = Arc::from(create_provider(&config.embedding)?);
    let pipeline = Pipeline::new(
        source,
        generator,
        embedder,
        store.clone(),
        PipelineSettings::from_config(config),
    )?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling analysis");
                cancel.cancel();
            }
        });
    }

    let progress = BroadcastProgress::new(256);
    let renderer = progress.forward_to(mode.reporter());

    let result = pipeline
        .run_with_deadline(&repo, &progress, &cancel, config.pipeline.run_timeout())
        .await;

    drop(progress);
    let _ = renderer.await;
    store.pool().close().await;

    let unit_id = result?;
    println!("{}", unit_id);
    Ok(())
}
