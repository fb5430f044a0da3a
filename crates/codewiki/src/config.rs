//! Configuration parsing and validation.
//!
//! Code Wiki is configured via a TOML file (default: `./config/wiki.toml`).
//! Only `[db]` is required; every other section falls back to defaults.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/wiki.sqlite"
//!
//! [chunking]
//! max_tokens = 1024
//!
//! [pipeline]
//! max_topics = 12
//! topic_concurrency = 4
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [github]
//! token_env = "GITHUB_TOKEN"
//! ```
//!
//! Secrets are never stored in the file: `generation.api_key_env`,
//! `embedding.api_key_env`, and `github.token_env` name environment
//! variables that hold them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use codewiki_core::chunk::{ChunkBudget, DEFAULT_MAX_TOKENS, DEFAULT_MIN_SLICE_TOKENS};
use codewiki_core::retrieval::RetrievalParams;
use serde::Deserialize;

/// Upper bound on topics per analysis, unless configured otherwise.
pub const DEFAULT_MAX_TOPICS: usize = 12;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_min_slice_tokens")]
    pub min_slice_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            min_slice_tokens: default_min_slice_tokens(),
        }
    }
}

impl ChunkingConfig {
    pub fn budget(&self) -> ChunkBudget {
        ChunkBudget::new(self.max_tokens, self.min_slice_tokens)
    }
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}
fn default_min_slice_tokens() -> usize {
    DEFAULT_MIN_SLICE_TOKENS
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_max_topics")]
    pub max_topics: usize,
    #[serde(default = "default_topic_concurrency")]
    pub topic_concurrency: usize,
    #[serde(default = "default_max_files_per_topic")]
    pub max_files_per_topic: usize,
    #[serde(default = "default_file_fetch_concurrency")]
    pub file_fetch_concurrency: usize,
    /// Ceiling for any single collaborator call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Ceiling for a whole `analyze` run.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_topics: default_max_topics(),
            topic_concurrency: default_topic_concurrency(),
            max_files_per_topic: default_max_files_per_topic(),
            file_fetch_concurrency: default_file_fetch_concurrency(),
            call_timeout_secs: default_call_timeout_secs(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

fn default_max_topics() -> usize {
    DEFAULT_MAX_TOPICS
}
fn default_topic_concurrency() -> usize {
    4
}
fn default_max_files_per_topic() -> usize {
    30
}
fn default_file_fetch_concurrency() -> usize {
    8
}
fn default_call_timeout_secs() -> u64 {
    180
}
fn default_run_timeout_secs() -> u64 {
    1800
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible gateways, Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embed_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_openai_key_env(),
            batch_size: default_embed_batch_size(),
            concurrency: default_embed_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_embed_batch_size() -> usize {
    7
}
fn default_embed_concurrency() -> usize {
    5
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_generation_url")]
    pub url: String,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            url: default_generation_url(),
            api_key_env: default_openai_key_env(),
            max_retries: default_generation_retries(),
            timeout_secs: default_generation_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

fn default_generation_provider() -> String {
    "openai".to_string()
}
fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_generation_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_generation_retries() -> u32 {
    2
}
fn default_generation_timeout_secs() -> u64 {
    120
}
fn default_temperature() -> f32 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitHubConfig {
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    #[serde(default = "default_github_raw_url")]
    pub raw_url: String,
    #[serde(default = "default_github_token_env")]
    pub token_env: String,
    /// Files larger than this are skipped when fetching.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_max_tree_entries")]
    pub max_tree_entries: usize,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_github_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            raw_url: default_github_raw_url(),
            token_env: default_github_token_env(),
            max_file_bytes: default_max_file_bytes(),
            max_tree_entries: default_max_tree_entries(),
            exclude_globs: Vec::new(),
            timeout_secs: default_github_timeout_secs(),
        }
    }
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_github_raw_url() -> String {
    "https://raw.githubusercontent.com".to_string()
}
fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_max_file_bytes() -> u64 {
    200_000
}
fn default_max_tree_entries() -> usize {
    2000
}
fn default_github_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
    #[serde(default = "default_overview_chars")]
    pub overview_chars: usize,
    #[serde(default = "default_page_context_chars")]
    pub page_context_chars: usize,
    #[serde(default = "default_fallback_topics")]
    pub fallback_topics: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            threshold: default_threshold(),
            snippet_chars: default_snippet_chars(),
            overview_chars: default_overview_chars(),
            page_context_chars: default_page_context_chars(),
            fallback_topics: default_fallback_topics(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            top_k: self.top_k,
            threshold: self.threshold,
            snippet_chars: self.snippet_chars,
            overview_chars: self.overview_chars,
            page_context_chars: self.page_context_chars,
            fallback_topics: self.fallback_topics,
            max_context_chars: self.max_context_chars,
        }
    }
}

fn default_top_k() -> usize {
    8
}
fn default_threshold() -> f64 {
    0.3
}
fn default_snippet_chars() -> usize {
    240
}
fn default_overview_chars() -> usize {
    2000
}
fn default_page_context_chars() -> usize {
    4000
}
fn default_fallback_topics() -> usize {
    5
}
fn default_max_context_chars() -> usize {
    16000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_tokens < 2 {
        bail!("chunking.max_tokens must be >= 2");
    }

    // Validate pipeline
    if config.pipeline.max_topics == 0 {
        bail!("pipeline.max_topics must be > 0");
    }
    if config.pipeline.topic_concurrency == 0 {
        bail!("pipeline.topic_concurrency must be > 0");
    }
    if config.pipeline.call_timeout_secs == 0 || config.pipeline.run_timeout_secs == 0 {
        bail!("pipeline timeouts must be > 0");
    }

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.threshold) {
        bail!("retrieval.threshold must be in [-1.0, 1.0]");
    }
    if config.retrieval.overview_chars + config.retrieval.page_context_chars
        >= config.retrieval.max_context_chars
    {
        bail!("retrieval.overview_chars + retrieval.page_context_chars must be < retrieval.max_context_chars");
    }

    // Validate embedding
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.max_attempts == 0 {
        bail!("embedding.max_attempts must be > 0");
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.generation.provider.as_str() {
        "openai" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be openai.",
            other
        ),
    }

    for pattern in &config.github.exclude_globs {
        globset::Glob::new(pattern)
            .with_context(|| format!("Invalid github.exclude_globs pattern: {}", pattern))?;
    }

    Ok(config)
}
