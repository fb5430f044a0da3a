//! GitHub-backed [`ContentSource`].
//!
//! Metadata and the recursive tree come from the REST API
//! (`GET /repos/{owner}/{name}` and `GET /repos/{owner}/{name}/git/trees/{branch}?recursive=1`);
//! file contents come from the raw content host, fetched through
//! [`run_bounded`] so the number of requests in flight stays bounded.
//!
//! A token is read from the environment variable named by
//! `github.token_env` if present; public repositories work without one at a
//! lower rate limit.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;

use codewiki_core::batch::run_bounded;
use codewiki_core::models::{RepoMetadata, RepoRef};

use crate::config::GitHubConfig;
use crate::traits::ContentSource;

pub struct GitHubSource {
    api_url: String,
    raw_url: String,
    token: Option<String>,
    max_file_bytes: u64,
    client: reqwest::Client,
}

impl GitHubSource {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty());
        if token.is_none() {
            tracing::debug!(env = %config.token_env, "no GitHub token set, using anonymous access");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("codewiki/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            raw_url: config.raw_url.trim_end_matches('/').to_string(),
            token,
            max_file_bytes: config.max_file_bytes,
            client,
        })
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let req = self.client.get(url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn get_json(&self, url: Url) -> Result<serde_json::Value> {
        let response = self
            .get(url.clone())
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .with_context(|| format!("GitHub request failed: {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("GitHub API error {} for {}: {}", status, url, body);
        }
        Ok(response.json().await?)
    }

    /// Fetch one file; `None` if it is missing, too large, or not UTF-8.
    async fn fetch_raw(&self, repo: &RepoRef, branch: &str, path: String) -> Option<(String, String)> {
        match self.try_fetch_raw(repo, branch, &path).await {
            Ok(Some(text)) => Some((path, text)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(repo = %repo, file = %path, error = %e, "file fetch failed");
                None
            }
        }
    }

    async fn try_fetch_raw(&self, repo: &RepoRef, branch: &str, path: &str) -> Result<Option<String>> {
        let url = raw_file_url(&self.raw_url, repo, branch, path)?;
        let response = self.get(url).send().await?;
        if !response.status().is_success() {
            bail!("HTTP {}", response.status());
        }
        if response
            .content_length()
            .is_some_and(|len| len > self.max_file_bytes)
        {
            tracing::debug!(file = %path, "skipping oversized file");
            return Ok(None);
        }
        let bytes = response.bytes().await?;
        if bytes.len() as u64 > self.max_file_bytes {
            tracing::debug!(file = %path, "skipping oversized file");
            return Ok(None);
        }
        match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Ok(Some(text)),
            Err(_) => {
                tracing::debug!(file = %path, "skipping non-UTF-8 file");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ContentSource for GitHubSource {
    async fn fetch_metadata(&self, repo: &RepoRef) -> Result<RepoMetadata> {
        let url = api_url(&self.api_url, &["repos", &repo.owner, &repo.name])?;
        let json = self.get_json(url).await?;
        parse_metadata(&json)
    }

    async fn fetch_tree(&self, repo: &RepoRef, branch: &str) -> Result<Vec<String>> {
        let mut url = api_url(
            &self.api_url,
            &["repos", &repo.owner, &repo.name, "git", "trees", branch],
        )?;
        url.query_pairs_mut().append_pair("recursive", "1");
        let json = self.get_json(url).await?;
        if json.get("truncated").and_then(|t| t.as_bool()) == Some(true) {
            tracing::warn!(repo = %repo, "GitHub truncated the file tree");
        }
        parse_tree(&json)
    }

    async fn fetch_files(
        &self,
        repo: &RepoRef,
        branch: &str,
        paths: &[String],
        concurrency: usize,
    ) -> Vec<(String, String)> {
        run_bounded(paths.to_vec(), concurrency, |_, path| {
            self.fetch_raw(repo, branch, path)
        })
        .await
        .into_iter()
        .flatten()
        .collect()
    }
}

fn api_url(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("Invalid GitHub URL: {}", base))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("GitHub URL cannot be a base: {}", base))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn raw_file_url(base: &str, repo: &RepoRef, branch: &str, path: &str) -> Result<Url> {
    let mut segments = vec![repo.owner.as_str(), repo.name.as_str()];
    segments.extend(branch.split('/'));
    segments.extend(path.split('/'));
    api_url(base, &segments)
}

fn parse_metadata(json: &serde_json::Value) -> Result<RepoMetadata> {
    let text = |key: &str| {
        json.get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    };
    let default_branch =
        text("default_branch").ok_or_else(|| anyhow!("Invalid GitHub response: missing default_branch"))?;

    Ok(RepoMetadata {
        default_branch,
        description: text("description"),
        html_url: text("html_url"),
        language: text("language"),
    })
}

/// Blob paths from a recursive tree response.
fn parse_tree(json: &serde_json::Value) -> Result<Vec<String>> {
    let entries = json
        .get("tree")
        .and_then(|t| t.as_array())
        .ok_or_else(|| anyhow!("Invalid GitHub response: missing tree array"))?;

    Ok(entries
        .iter()
        .filter(|e| e.get("type").and_then(|t| t.as_str()) == Some("blob"))
        .filter_map(|e| e.get("path").and_then(|p| p.as_str()))
        .map(|p| p.to_string())
        .collect())
}
