//! Analysis pipeline orchestrator.
//!
//! Turns a repository into topic pages, an overview, and embedded passages.
//!
//! # Phases
//!
//! ```text
//! reset ─▶ context gather ─▶ topic identification ─▶ per-topic pages ─▶ overview ─▶ chunk + embed ─▶ done
//!          (fatal)           (fatal)                 (per-topic, partial)  (fatal)    (degradable)
//! ```
//!
//! 1. **Reset**: the unit for `(owner, name)` is created or reused; its prior
//!    topics, passages and overview are deleted and the status returns to
//!    `pending`.
//! 2. **Context gather**: metadata, the filtered file tree, README and root
//!    manifests.
//! 3. **Topic identification**: one generator call, at most
//!    `pipeline.max_topics` topics.
//! 4. **Pages**: topics run through [`run_bounded`]; each fetches its
//!    candidate files and generates and persists a page. A failing topic is
//!    dropped with a `partial` [`TopicOutcome`]; the others continue.
//! 5. **Overview**: synthesized from the pages that succeeded.
//! 6. **Chunk + embed**: the overview, every page, and every fetched file
//!    are chunked and embedded. Failed batches lose only their own passages.
//!
//! Fatal errors set the unit to `error` with a message, emit a
//! `fatal-error` event, and are returned to the caller.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail};
use tokio_util::sync::CancellationToken;

use codewiki_core::batch::run_bounded;
use codewiki_core::chunk::{content_hash, ChunkBudget, Chunker};
use codewiki_core::models::{
    Citation, EntryPoint, IdentifiedTopic, Passage, RepoMetadata, RepoRef, Topic, UnitStatus,
};
use codewiki_core::schema::SchemaError;
use codewiki_core::store::Store;
use codewiki_core::tokenize::{CharTokenizer, Tokenizer};

use crate::config::Config;
use crate::embed_batch::{BatchPolicy, EmbeddingBatcher};
use crate::embedding::EmbeddingProvider;
use crate::error::PipelineError;
use crate::progress::{ProgressEvent, ProgressReporter, TopicOutcome};
use crate::repo_context::{find_manifests, find_readme, render_tree, TreeFilter};
use crate::traits::{ContentSource, OverviewRequest, PageRequest, TextGenerator, TopicRequest};

/// Tunables for one [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_topics: usize,
    pub topic_concurrency: usize,
    pub max_files_per_topic: usize,
    pub file_fetch_concurrency: usize,
    /// Ceiling for each collaborator call.
    pub call_timeout: Duration,
    pub max_tree_entries: usize,
    pub exclude_globs: Vec<String>,
    pub budget: ChunkBudget,
    pub batch: BatchPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_topics: config.pipeline.max_topics,
            topic_concurrency: config.pipeline.topic_concurrency,
            max_files_per_topic: config.pipeline.max_files_per_topic,
            file_fetch_concurrency: config.pipeline.file_fetch_concurrency,
            call_timeout: config.pipeline.call_timeout(),
            max_tree_entries: config.github.max_tree_entries,
            exclude_globs: config.github.exclude_globs.clone(),
            budget: config.chunking.budget(),
            batch: BatchPolicy::from_config(&config.embedding),
        }
    }
}

/// Everything learned about the repository before topic identification.
struct RepoContext {
    metadata: RepoMetadata,
    tree: Vec<String>,
    /// `(path, content)` of the README.
    readme: Option<(String, String)>,
    manifests: Vec<(String, String)>,
}

/// Status writer that refuses to move a run backwards.
struct StatusTracker {
    unit_id: String,
    current: UnitStatus,
}

impl StatusTracker {
    fn new(unit_id: &str) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            current: UnitStatus::Pending,
        }
    }

    async fn advance(
        &mut self,
        store: &dyn Store,
        progress: &dyn ProgressReporter,
        next: UnitStatus,
        message: Option<&str>,
    ) -> Result<(), PipelineError> {
        if !self.current.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.current,
                to: next,
            });
        }
        store.set_status(&self.unit_id, next, message).await?;
        self.current = next;
        progress.report(ProgressEvent::StatusChanged {
            unit_id: self.unit_id.clone(),
            status: next,
        });
        Ok(())
    }
}

pub struct Pipeline {
    source: Arc<dyn ContentSource>,
    generator: Arc<dyn TextGenerator>,
    batcher: EmbeddingBatcher,
    store: Arc<dyn Store>,
    chunker: Chunker,
    tree_filter: TreeFilter,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn ContentSource>,
        generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn Store>,
        settings: PipelineSettings,
    ) -> anyhow::Result<Self> {
        let tree_filter = TreeFilter::new(&settings.exclude_globs, settings.max_tree_entries)?;
        Ok(Self {
            source,
            generator,
            batcher: EmbeddingBatcher::new(embedder, settings.batch.clone()),
            store,
            chunker: Chunker::new(Arc::new(CharTokenizer), settings.budget),
            tree_filter,
            settings,
        })
    }

    /// Replace the default character-based tokenizer used for chunking.
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.chunker = Chunker::new(tokenizer, self.settings.budget);
        self
    }

    /// Analyze `repo` and return its unit id.
    pub async fn run(
        &self,
        repo: &RepoRef,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        self.run_inner(repo, progress, cancel, None).await
    }

    /// [`run`](Self::run) with a wall-clock ceiling on the whole analysis.
    pub async fn run_with_deadline(
        &self,
        repo: &RepoRef,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
        deadline: Duration,
    ) -> Result<String, PipelineError> {
        self.run_inner(repo, progress, cancel, Some(deadline)).await
    }

    async fn run_inner(
        &self,
        repo: &RepoRef,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
        deadline: Option<Duration>,
    ) -> Result<String, PipelineError> {
        let unit = self.store.upsert_unit(repo).await?;
        let unit_id = unit.id;
        self.store.clear_unit(&unit_id).await?;
        self.store
            .set_status(&unit_id, UnitStatus::Pending, None)
            .await?;
        progress.report(ProgressEvent::StatusChanged {
            unit_id: unit_id.clone(),
            status: UnitStatus::Pending,
        });
        tracing::info!(unit = %unit_id, repo = %repo, "analysis started");

        let mut tracker = StatusTracker::new(&unit_id);
        let outcome = match deadline {
            Some(limit) => tokio::time::timeout(
                limit,
                self.execute(&unit_id, repo, &mut tracker, progress, cancel),
            )
            .await
            .unwrap_or(Err(PipelineError::TimedOut(limit))),
            None => {
                self.execute(&unit_id, repo, &mut tracker, progress, cancel)
                    .await
            }
        };

        match outcome {
            Ok(()) => {
                tracing::info!(unit = %unit_id, "analysis complete");
                progress.report(ProgressEvent::Completed {
                    unit_id: unit_id.clone(),
                });
                Ok(unit_id)
            }
            Err(err) => {
                self.fail(&mut tracker, progress, &err).await;
                Err(err)
            }
        }
    }

    async fn fail(&self, tracker: &mut StatusTracker, progress: &dyn ProgressReporter, err: &PipelineError) {
        let message = err.to_string();
        tracing::error!(unit = %tracker.unit_id, error = %message, "analysis failed");
        if tracker.current.can_transition_to(UnitStatus::Error) {
            if let Err(e) = tracker
                .advance(self.store.as_ref(), progress, UnitStatus::Error, Some(&message))
                .await
            {
                tracing::error!(unit = %tracker.unit_id, error = %e, "could not record failure");
            }
        }
        progress.report(ProgressEvent::Failed {
            unit_id: tracker.unit_id.clone(),
            message,
        });
    }

    async fn execute(
        &self,
        unit_id: &str,
        repo: &RepoRef,
        tracker: &mut StatusTracker,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let store = self.store.as_ref();

        check_cancel(cancel)?;
        tracker
            .advance(store, progress, UnitStatus::FetchingTree, None)
            .await?;
        let ctx = self
            .gather_context(repo)
            .await
            .map_err(PipelineError::ContextGather)?;
        let branch = ctx.metadata.default_branch.clone();
        store
            .set_unit_details(unit_id, &branch, ctx.metadata.description.as_deref())
            .await?;

        check_cancel(cancel)?;
        tracker
            .advance(store, progress, UnitStatus::IdentifyingFeatures, None)
            .await?;
        let topics = self.identify(repo, &ctx).await?;
        tracing::info!(unit = %unit_id, topics = topics.len(), "topics identified");
        progress.report(ProgressEvent::TopicsListed {
            unit_id: unit_id.to_string(),
            titles: topics.iter().map(|t| t.title.clone()).collect(),
        });

        check_cancel(cancel)?;
        tracker
            .advance(store, progress, UnitStatus::GeneratingPages, None)
            .await?;
        let files: Mutex<HashMap<String, String>> = Mutex::new(
            ctx.readme
                .iter()
                .chain(ctx.manifests.iter())
                .cloned()
                .collect(),
        );
        let tree: HashSet<&str> = ctx.tree.iter().map(String::as_str).collect();
        let base_url = ctx
            .metadata
            .html_url
            .clone()
            .unwrap_or_else(|| format!("https://github.com/{}", repo));
        let job = TopicJob {
            unit_id,
            repo,
            branch: &branch,
            base_url: &base_url,
            tree: &tree,
            files: &files,
            progress,
            cancel,
        };
        let pages: Vec<Topic> = run_bounded(topics, self.settings.topic_concurrency, |index, topic| {
            self.generate_topic(&job, index, topic)
        })
        .await
        .into_iter()
        .flatten()
        .collect();
        tracing::info!(unit = %unit_id, pages = pages.len(), "pages generated");

        check_cancel(cancel)?;
        let overview_req = OverviewRequest {
            repo: repo.clone(),
            description: ctx.metadata.description.clone(),
            readme: ctx.readme.as_ref().map(|(_, content)| content.clone()),
            topics: pages
                .iter()
                .map(|t| (t.title.clone(), t.summary.clone()))
                .collect(),
        };
        let overview = self
            .with_timeout(self.generator.synthesize_overview(&overview_req))
            .await
            .map_err(PipelineError::Overview)?;
        store.set_overview(unit_id, &overview).await?;

        check_cancel(cancel)?;
        tracker
            .advance(store, progress, UnitStatus::Embedding, None)
            .await?;
        if self.batcher.provider().is_enabled() {
            let files = files.into_inner().map_err(|_| anyhow!("file map lock poisoned"))?;
            let passages = self.build_passages(unit_id, repo, &ctx, &overview, &pages, files);
            self.embed_passages(unit_id, &passages, cancel).await?;
        } else {
            tracing::info!(unit = %unit_id, "embeddings disabled, skipping passage indexing");
        }

        check_cancel(cancel)?;
        tracker
            .advance(store, progress, UnitStatus::Done, None)
            .await?;
        Ok(())
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = anyhow::Result<T>>) -> anyhow::Result<T> {
        let limit = self.settings.call_timeout;
        tokio::time::timeout(limit, fut)
            .await
            .unwrap_or_else(|_| Err(anyhow!("timed out after {:?}", limit)))
    }

    async fn gather_context(&self, repo: &RepoRef) -> anyhow::Result<RepoContext> {
        let metadata = self.with_timeout(self.source.fetch_metadata(repo)).await?;
        let branch = metadata.default_branch.as_str();
        let raw_tree = self.with_timeout(self.source.fetch_tree(repo, branch)).await?;
        let tree = self.tree_filter.filter_tree(raw_tree);
        if tree.is_empty() {
            bail!("repository has no analyzable files");
        }

        let readme_path = find_readme(&tree);
        let mut wanted: Vec<String> = readme_path.iter().cloned().collect();
        wanted.extend(find_manifests(&tree));
        let fetched = self
            .with_timeout(async {
                Ok(self
                    .source
                    .fetch_files(repo, branch, &wanted, self.settings.file_fetch_concurrency)
                    .await)
            })
            .await?;

        let mut readme = None;
        let mut manifests = Vec::new();
        for (path, content) in fetched {
            if Some(&path) == readme_path.as_ref() {
                readme = Some((path, content));
            } else {
                manifests.push((path, content));
            }
        }

        Ok(RepoContext {
            metadata,
            tree,
            readme,
            manifests,
        })
    }

    async fn identify(&self, repo: &RepoRef, ctx: &RepoContext) -> Result<Vec<IdentifiedTopic>, PipelineError> {
        let req = TopicRequest {
            repo: repo.clone(),
            description: ctx.metadata.description.clone(),
            language: ctx.metadata.language.clone(),
            tree: render_tree(&ctx.tree),
            readme: ctx.readme.as_ref().map(|(_, content)| content.clone()),
            manifests: ctx.manifests.clone(),
            max_topics: self.settings.max_topics,
        };

        let mut topics = match self.with_timeout(self.generator.identify_topics(&req)).await {
            Ok(topics) => topics,
            Err(e) if matches!(e.downcast_ref::<SchemaError>(), Some(SchemaError::Empty(_))) => {
                return Err(PipelineError::NoTopics)
            }
            Err(e) => return Err(PipelineError::Identify(e)),
        };
        if topics.is_empty() {
            return Err(PipelineError::NoTopics);
        }
        topics.truncate(self.settings.max_topics);
        Ok(topics)
    }

    async fn generate_topic(&self, job: &TopicJob<'_>, index: usize, topic: IdentifiedTopic) -> Option<Topic> {
        job.progress.report(ProgressEvent::TopicStarted {
            index,
            title: topic.title.clone(),
        });

        let title = topic.title.clone();
        match self.try_generate_topic(job, index, topic).await {
            Ok(page) => {
                job.progress.report(ProgressEvent::TopicCompleted {
                    index,
                    title,
                    outcome: TopicOutcome::Generated,
                });
                Some(page)
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                tracing::warn!(unit = %job.unit_id, topic = %title, error = %reason, "topic dropped");
                job.progress.report(ProgressEvent::TopicCompleted {
                    index,
                    title,
                    outcome: TopicOutcome::Partial { reason },
                });
                None
            }
        }
    }

    async fn try_generate_topic(
        &self,
        job: &TopicJob<'_>,
        index: usize,
        topic: IdentifiedTopic,
    ) -> anyhow::Result<Topic> {
        if job.cancel.is_cancelled() {
            bail!("cancelled");
        }

        let mut seen = HashSet::new();
        let candidates: Vec<String> = topic
            .files
            .iter()
            .filter(|f| job.tree.contains(f.as_str()) && seen.insert(f.as_str()))
            .take(self.settings.max_files_per_topic)
            .cloned()
            .collect();

        let fetched = if candidates.is_empty() {
            Vec::new()
        } else {
            self.with_timeout(async {
                Ok(self
                    .source
                    .fetch_files(
                        job.repo,
                        job.branch,
                        &candidates,
                        self.settings.file_fetch_concurrency,
                    )
                    .await)
            })
            .await?
        };
        if fetched.is_empty() {
            bail!("no candidate files could be fetched");
        }
        {
            let mut files = job
                .files
                .lock()
                .map_err(|_| anyhow!("file map lock poisoned"))?;
            for (path, content) in &fetched {
                files.insert(path.clone(), content.clone());
            }
        }

        let req = PageRequest {
            repo: job.repo.clone(),
            branch: job.branch.to_string(),
            topic,
            files: fetched,
        };
        let draft = self.with_timeout(self.generator.generate_page(&req)).await?;
        let topic = req.topic;

        let page = Topic {
            id: uuid::Uuid::new_v4().to_string(),
            unit_id: job.unit_id.to_string(),
            slug: topic.id,
            title: topic.title,
            summary: topic.summary,
            body: draft.body,
            entry_points: draft
                .entry_points
                .into_iter()
                .map(|ep| EntryPoint {
                    url: blob_url(job.base_url, job.branch, &ep.file, ep.line, ep.line),
                    ..ep
                })
                .collect(),
            citations: draft
                .citations
                .into_iter()
                .map(|c| Citation {
                    url: blob_url(job.base_url, job.branch, &c.file, c.start_line, c.end_line),
                    ..c
                })
                .collect(),
            position: index as i64,
        };
        self.store.insert_topic(&page).await?;
        Ok(page)
    }

    /// Chunk the overview, every page, and every fetched file (by path).
    fn build_passages(
        &self,
        unit_id: &str,
        repo: &RepoRef,
        ctx: &RepoContext,
        overview: &str,
        pages: &[Topic],
        files: HashMap<String, String>,
    ) -> Vec<Passage> {
        let mut passages = Vec::new();
        let mut push = |topic_id: Option<&str>, chunk: codewiki_core::chunk::TextChunk| {
            let content = chunk.content();
            passages.push(Passage {
                id: uuid::Uuid::new_v4().to_string(),
                unit_id: unit_id.to_string(),
                kind: chunk.kind,
                topic_id: topic_id.map(str::to_string),
                source_file: chunk.source_file,
                hash: content_hash(&content),
                content,
                position: 0,
            });
        };

        let overview_title = format!("{} overview", repo);
        let description = ctx.metadata.description.as_deref().unwrap_or("");
        for chunk in self
            .chunker
            .chunk_document(&overview_title, description, overview)
        {
            push(None, chunk);
        }
        for page in pages {
            for chunk in self
                .chunker
                .chunk_document(&page.title, &page.summary, &page.body)
            {
                push(Some(&page.id), chunk);
            }
        }

        let mut paths: Vec<&String> = files.keys().collect();
        paths.sort();
        for path in paths {
            for chunk in self.chunker.chunk_code(path, &files[path]) {
                push(None, chunk);
            }
        }

        for (i, passage) in passages.iter_mut().enumerate() {
            passage.position = i as i64;
        }
        passages
    }

    /// Embed and persist passages batch by batch. Failed batches are
    /// dropped; only store errors are fatal.
    async fn embed_passages(
        &self,
        unit_id: &str,
        passages: &[Passage],
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let texts: Vec<String> = passages.iter().map(|p| p.content.clone()).collect();
        let embedded = self.batcher.embed_all(&texts, cancel).await;
        let model = self.batcher.provider().model_name().to_string();

        let mut stored = 0;
        for batch in embedded.batches {
            if !batch.succeeded() {
                tracing::warn!(
                    unit = %unit_id,
                    batch = batch.index,
                    passages = batch.len,
                    error = batch.error.as_deref().unwrap_or(""),
                    "dropping passages of failed embedding batch"
                );
                continue;
            }
            let slice = &passages[batch.start..batch.start + batch.len];
            self.store
                .insert_passages(slice, &batch.vectors, &model)
                .await?;
            stored += slice.len();
        }
        tracing::info!(unit = %unit_id, stored, total = passages.len(), "passages embedded");
        Ok(())
    }
}

/// Shared, borrowed state for the per-topic phase.
struct TopicJob<'a> {
    unit_id: &'a str,
    repo: &'a RepoRef,
    branch: &'a str,
    base_url: &'a str,
    tree: &'a HashSet<&'a str>,
    files: &'a Mutex<HashMap<String, String>>,
    progress: &'a dyn ProgressReporter,
    cancel: &'a CancellationToken,
}

fn check_cancel(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Link to a line range of a file at `branch`.
pub fn blob_url(base_url: &str, branch: &str, file: &str, start: u32, end: u32) -> String {
    let mut url = format!(
        "{}/blob/{}/{}#L{}",
        base_url.trim_end_matches('/'),
        branch,
        file,
        start
    );
    if end > start {
        url.push_str(&format!("-L{}", end));
    }
    url
}
