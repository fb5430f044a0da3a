//! End-to-end pipeline runs against fake collaborators and the in-memory store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use codewiki::embed_batch::BatchPolicy;
use codewiki::embedding::{DisabledProvider, EmbeddingProvider};
use codewiki::error::PipelineError;
use codewiki::pipeline::{Pipeline, PipelineSettings};
use codewiki::progress::{ProgressEvent, TopicOutcome};
use codewiki::traits::{
    AnswerRequest, ContentSource, OverviewRequest, PageRequest, TextGenerator, TopicRequest,
};
use codewiki_core::chunk::ChunkBudget;
use codewiki_core::models::{
    Citation, EntryPoint, IdentifiedTopic, PageDraft, RepoMetadata, RepoRef, UnitStatus,
};
use codewiki_core::retrieval::{self, HitKind, RetrievalParams};
use codewiki_core::store::memory::InMemoryStore;
use codewiki_core::store::Store;

struct FakeSource {
    files: Vec<(String, String)>,
    fail_metadata: bool,
}

impl FakeSource {
    fn new() -> Self {
        let mut files = vec![
            ("README.md".to_string(), "# Widgets\nMakes widgets.\n".to_string()),
            ("Cargo.toml".to_string(), "[package]\nname = \"widgets\"\n".to_string()),
            ("Cargo.lock".to_string(), "# generated\n".to_string()),
        ];
        for name in ["a", "b", "c", "d", "e"] {
            files.push((
                format!("src/{}.rs", name),
                format!("use std::fmt;\n\npub fn {}() {{\n    println!(\"{}\");\n}}\n", name, name),
            ));
        }
        Self {
            files,
            fail_metadata: false,
        }
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    async fn fetch_metadata(&self, _repo: &RepoRef) -> Result<RepoMetadata> {
        if self.fail_metadata {
            bail!("404 Not Found");
        }
        Ok(RepoMetadata {
            default_branch: "main".to_string(),
            description: Some("Makes widgets".to_string()),
            html_url: None,
            language: Some("Rust".to_string()),
        })
    }

    async fn fetch_tree(&self, _repo: &RepoRef, _branch: &str) -> Result<Vec<String>> {
        Ok(self.files.iter().map(|(p, _)| p.clone()).collect())
    }

    async fn fetch_files(
        &self,
        _repo: &RepoRef,
        _branch: &str,
        paths: &[String],
        _concurrency: usize,
    ) -> Vec<(String, String)> {
        paths
            .iter()
            .filter_map(|p| self.files.iter().find(|(path, _)| path == p).cloned())
            .collect()
    }
}

#[derive(Default)]
struct FakeGenerator {
    topics: Vec<IdentifiedTopic>,
    fail_titles: HashSet<String>,
    page_delay: Option<Duration>,
    /// Per-title delay, overriding `page_delay`.
    page_delays: HashMap<String, Duration>,
    seen_tree: Mutex<Option<String>>,
}

fn topic(n: usize, file: &str) -> IdentifiedTopic {
    IdentifiedTopic {
        id: format!("topic-{}", n),
        title: format!("Topic {}", n),
        summary: format!("What topic {} does", n),
        files: vec![file.to_string()],
    }
}

fn five_topics() -> Vec<IdentifiedTopic> {
    ["a", "b", "c", "d", "e"]
        .iter()
        .enumerate()
        .map(|(i, name)| topic(i + 1, &format!("src/{}.rs", name)))
        .collect()
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn identify_topics(&self, req: &TopicRequest) -> Result<Vec<IdentifiedTopic>> {
        *self.seen_tree.lock().unwrap() = Some(req.tree.clone());
        Ok(self.topics.clone())
    }

    async fn generate_page(&self, req: &PageRequest) -> Result<PageDraft> {
        if let Some(delay) = self
            .page_delays
            .get(&req.topic.title)
            .copied()
            .or(self.page_delay)
        {
            tokio::time::sleep(delay).await;
        }
        if self.fail_titles.contains(&req.topic.title) {
            bail!("model refused");
        }
        let file = req.files[0].0.clone();
        Ok(PageDraft {
            body: format!(
                "{} intro.\n\n## How it works\n{} is implemented in {}.\n",
                req.topic.title, req.topic.title, file
            ),
            entry_points: vec![EntryPoint {
                file: file.clone(),
                line: 3,
                symbol: "entry".to_string(),
                url: String::new(),
            }],
            citations: vec![Citation {
                file,
                start_line: 1,
                end_line: 5,
                url: "https://example.com/made-up".to_string(),
            }],
        })
    }

    async fn synthesize_overview(&self, req: &OverviewRequest) -> Result<String> {
        Ok(format!("{} has {} documented features.", req.repo, req.topics.len()))
    }

    async fn answer(&self, _req: &AnswerRequest) -> Result<String> {
        Ok("answer".to_string())
    }
}

/// Two-dimensional vectors; fails any batch containing `poison`.
struct FakeEmbedder {
    poison: Option<String>,
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake-embed"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if let Some(p) = &self.poison {
            if texts.iter().any(|t| t.contains(p.as_str())) {
                bail!("embedding service unavailable");
            }
        }
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

fn settings() -> PipelineSettings {
    PipelineSettings {
        max_topics: 12,
        topic_concurrency: 4,
        max_files_per_topic: 30,
        file_fetch_concurrency: 8,
        call_timeout: Duration::from_secs(5),
        max_tree_entries: 2000,
        exclude_globs: Vec::new(),
        budget: ChunkBudget::default(),
        batch: BatchPolicy {
            batch_size: 1,
            concurrency: 5,
            max_attempts: 2,
            backoff: Duration::ZERO,
            timeout: Duration::from_secs(5),
        },
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn pipeline(
        &self,
        source: FakeSource,
        generator: Arc<FakeGenerator>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Pipeline {
        Pipeline::new(
            Arc::new(source),
            generator,
            embedder,
            self.store.clone(),
            settings(),
        )
        .unwrap()
    }

    async fn run(&self, pipeline: &Pipeline, cancel: &CancellationToken) -> Result<String, PipelineError> {
        let sink = self.events.clone();
        let reporter = move |e: ProgressEvent| sink.lock().unwrap().push(e);
        pipeline
            .run(&RepoRef::new("acme", "widgets"), &reporter, cancel)
            .await
    }

    fn partial_titles(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::TopicCompleted {
                    title,
                    outcome: TopicOutcome::Partial { .. },
                    ..
                } => Some(title.clone()),
                _ => None,
            })
            .collect()
    }

    fn statuses(&self) -> Vec<UnitStatus> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::StatusChanged { status, .. } => Some(*status),
                _ => None,
            })
            .collect()
    }
}

fn embedder() -> Arc<dyn EmbeddingProvider> {
    Arc::new(FakeEmbedder { poison: None })
}

#[tokio::test]
async fn test_failed_topic_is_isolated() {
    let h = Harness::new();
    let generator = Arc::new(FakeGenerator {
        topics: five_topics(),
        fail_titles: HashSet::from(["Topic 3".to_string()]),
        ..Default::default()
    });
    let pipeline = h.pipeline(FakeSource::new(), generator, embedder());

    let unit_id = h.run(&pipeline, &CancellationToken::new()).await.unwrap();

    let topics = h.store.list_topics(&unit_id).await.unwrap();
    assert_eq!(topics.len(), 4);
    let positions: Vec<i64> = topics.iter().map(|t| t.position).collect();
    assert_eq!(positions, vec![0, 1, 3, 4]);
    assert_eq!(h.partial_titles(), vec!["Topic 3".to_string()]);

    let unit = h.store.get_unit(&unit_id).await.unwrap().unwrap();
    assert_eq!(unit.status, UnitStatus::Done);
    assert_eq!(unit.default_branch.as_deref(), Some("main"));
    assert_eq!(
        unit.overview.as_deref(),
        Some("acme/widgets has 4 documented features.")
    );
    assert_eq!(
        h.statuses(),
        vec![
            UnitStatus::Pending,
            UnitStatus::FetchingTree,
            UnitStatus::IdentifyingFeatures,
            UnitStatus::GeneratingPages,
            UnitStatus::Embedding,
            UnitStatus::Done,
        ]
    );
    assert!(matches!(
        h.events.lock().unwrap().last(),
        Some(ProgressEvent::Completed { .. })
    ));
}

#[tokio::test]
async fn test_pages_match_topics_under_skewed_latency() {
    let h = Harness::new();
    let page_delays = (1..=5)
        .map(|n| (format!("Topic {}", n), Duration::from_millis(60 - 10 * n as u64)))
        .collect();
    let generator = Arc::new(FakeGenerator {
        topics: five_topics(),
        page_delays,
        ..Default::default()
    });
    let pipeline = h.pipeline(FakeSource::new(), generator, embedder());
    let unit_id = h.run(&pipeline, &CancellationToken::new()).await.unwrap();

    let topics = h.store.list_topics(&unit_id).await.unwrap();
    assert_eq!(topics.len(), 5);
    for (i, (stored, identified)) in topics.iter().zip(five_topics()).enumerate() {
        assert_eq!(stored.position, i as i64);
        assert_eq!(stored.slug, identified.id);
        assert_eq!(stored.title, identified.title);
        assert_eq!(stored.citations[0].file, identified.files[0]);
        assert!(stored.body.contains(&identified.files[0]));
    }
}

#[tokio::test]
async fn test_links_point_at_the_default_branch() {
    let h = Harness::new();
    let generator = Arc::new(FakeGenerator {
        topics: vec![topic(1, "src/a.rs")],
        ..Default::default()
    });
    let pipeline = h.pipeline(FakeSource::new(), generator, embedder());
    let unit_id = h.run(&pipeline, &CancellationToken::new()).await.unwrap();

    let topics = h.store.list_topics(&unit_id).await.unwrap();
    assert_eq!(topics[0].slug, "topic-1");
    assert_eq!(
        topics[0].entry_points[0].url,
        "https://github.com/acme/widgets/blob/main/src/a.rs#L3"
    );
    assert_eq!(
        topics[0].citations[0].url,
        "https://github.com/acme/widgets/blob/main/src/a.rs#L1-L5"
    );
}

#[tokio::test]
async fn test_tree_is_filtered_before_identification() {
    let h = Harness::new();
    let generator = Arc::new(FakeGenerator {
        topics: vec![topic(1, "src/a.rs")],
        ..Default::default()
    });
    let pipeline = h.pipeline(FakeSource::new(), generator.clone(), embedder());
    h.run(&pipeline, &CancellationToken::new()).await.unwrap();

    let tree = generator.seen_tree.lock().unwrap().clone().unwrap();
    assert!(tree.contains("Cargo.toml"));
    assert!(tree.contains("  a.rs"));
    assert!(!tree.contains("Cargo.lock"));
}

#[tokio::test]
async fn test_no_topics_is_fatal() {
    let h = Harness::new();
    let pipeline = h.pipeline(FakeSource::new(), Arc::new(FakeGenerator::default()), embedder());

    let err = h.run(&pipeline, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::NoTopics));

    let unit = h
        .store
        .find_unit(&RepoRef::new("acme", "widgets"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unit.status, UnitStatus::Error);
    assert_eq!(unit.error_message.as_deref(), Some("no topics identified"));
    assert!(h
        .events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, ProgressEvent::Failed { .. })));
}

#[tokio::test]
async fn test_context_failure_is_fatal() {
    let h = Harness::new();
    let source = FakeSource {
        fail_metadata: true,
        ..FakeSource::new()
    };
    let generator = Arc::new(FakeGenerator {
        topics: five_topics(),
        ..Default::default()
    });
    let pipeline = h.pipeline(source, generator, embedder());

    let err = h.run(&pipeline, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::ContextGather(_)));
    assert!(err.to_string().contains("404"));

    let unit = h
        .store
        .find_unit(&RepoRef::new("acme", "widgets"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unit.status, UnitStatus::Error);
    assert!(h.store.list_topics(&unit.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_topic_without_fetchable_files_is_partial() {
    let h = Harness::new();
    let generator = Arc::new(FakeGenerator {
        topics: vec![topic(1, "src/a.rs"), topic(2, "src/missing.rs")],
        ..Default::default()
    });
    let pipeline = h.pipeline(FakeSource::new(), generator, embedder());
    let unit_id = h.run(&pipeline, &CancellationToken::new()).await.unwrap();

    assert_eq!(h.store.list_topics(&unit_id).await.unwrap().len(), 1);
    let reasons: Vec<String> = h
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::TopicCompleted {
                outcome: TopicOutcome::Partial { reason },
                ..
            } => Some(reason.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].contains("no candidate files"));
}

#[tokio::test]
async fn test_failed_embedding_batch_drops_only_its_passages() {
    let generator = || {
        Arc::new(FakeGenerator {
            topics: five_topics(),
            ..Default::default()
        })
    };

    let clean = Harness::new();
    let pipeline = clean.pipeline(FakeSource::new(), generator(), embedder());
    let clean_id = clean.run(&pipeline, &CancellationToken::new()).await.unwrap();
    let all = clean.store.count_passages(&clean_id).await.unwrap();
    assert!(all > 5);

    // Batch size is 1, so the poisoned text is the only loss.
    let degraded = Harness::new();
    let poisoned: Arc<dyn EmbeddingProvider> = Arc::new(FakeEmbedder {
        poison: Some("println!(\"c\")".to_string()),
    });
    let pipeline = degraded.pipeline(FakeSource::new(), generator(), poisoned);
    let unit_id = degraded.run(&pipeline, &CancellationToken::new()).await.unwrap();

    assert_eq!(degraded.store.count_passages(&unit_id).await.unwrap(), all - 1);
    let unit = degraded.store.get_unit(&unit_id).await.unwrap().unwrap();
    assert_eq!(unit.status, UnitStatus::Done);
}

#[tokio::test]
async fn test_disabled_embeddings_skip_indexing() {
    let h = Harness::new();
    let generator = Arc::new(FakeGenerator {
        topics: five_topics(),
        ..Default::default()
    });
    let pipeline = h.pipeline(FakeSource::new(), generator, Arc::new(DisabledProvider));
    let unit_id = h.run(&pipeline, &CancellationToken::new()).await.unwrap();

    assert_eq!(h.store.count_passages(&unit_id).await.unwrap(), 0);
    assert_eq!(h.store.list_topics(&unit_id).await.unwrap().len(), 5);

    // Title matches still work without vectors.
    let hits = retrieval::search(
        h.store.as_ref(),
        &unit_id,
        "topic 2",
        None,
        5,
        &RetrievalParams::default(),
    )
    .await
    .unwrap();
    assert_eq!(hits[0].kind, HitKind::Topic);
    assert_eq!(hits[0].title.as_deref(), Some("Topic 2"));
}

#[tokio::test]
async fn test_rerun_replaces_previous_output() {
    let h = Harness::new();
    let generator = Arc::new(FakeGenerator {
        topics: five_topics(),
        ..Default::default()
    });
    let pipeline = h.pipeline(FakeSource::new(), generator, embedder());

    let first = h.run(&pipeline, &CancellationToken::new()).await.unwrap();
    let passages = h.store.count_passages(&first).await.unwrap();
    let second = h.run(&pipeline, &CancellationToken::new()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.store.list_topics(&second).await.unwrap().len(), 5);
    assert_eq!(h.store.count_passages(&second).await.unwrap(), passages);
    assert_eq!(h.store.list_units().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancelled_run_ends_in_error() {
    let h = Harness::new();
    let generator = Arc::new(FakeGenerator {
        topics: five_topics(),
        ..Default::default()
    });
    let pipeline = h.pipeline(FakeSource::new(), generator, embedder());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h.run(&pipeline, &cancel).await.unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));
    let unit = h
        .store
        .find_unit(&RepoRef::new("acme", "widgets"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unit.status, UnitStatus::Error);
    assert_eq!(unit.error_message.as_deref(), Some("analysis cancelled"));
}

#[tokio::test]
async fn test_deadline_ends_in_error() {
    let h = Harness::new();
    let generator = Arc::new(FakeGenerator {
        topics: five_topics(),
        page_delay: Some(Duration::from_secs(30)),
        ..Default::default()
    });
    let pipeline = h.pipeline(FakeSource::new(), generator, embedder());

    let reporter = |_e: ProgressEvent| {};
    let err = pipeline
        .run_with_deadline(
            &RepoRef::new("acme", "widgets"),
            &reporter,
            &CancellationToken::new(),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::TimedOut(_)));

    let unit = h
        .store
        .find_unit(&RepoRef::new("acme", "widgets"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unit.status, UnitStatus::Error);
}

#[tokio::test]
async fn test_topic_cap_applies_to_generator_output() {
    let h = Harness::new();
    let topics: Vec<IdentifiedTopic> = (1..=20).map(|n| topic(n, "src/a.rs")).collect();
    let generator = Arc::new(FakeGenerator {
        topics,
        ..Default::default()
    });
    let pipeline = h.pipeline(FakeSource::new(), generator, embedder());
    let unit_id = h.run(&pipeline, &CancellationToken::new()).await.unwrap();

    assert_eq!(h.store.list_topics(&unit_id).await.unwrap().len(), 12);
    let listed = h
        .events
        .lock()
        .unwrap()
        .iter()
        .find_map(|e| match e {
            ProgressEvent::TopicsListed { titles, .. } => Some(titles.len()),
            _ => None,
        });
    assert_eq!(listed, Some(12));
}

#[tokio::test]
async fn test_passages_are_searchable_after_analysis() {
    let h = Harness::new();
    let generator = Arc::new(FakeGenerator {
        topics: five_topics(),
        ..Default::default()
    });
    let pipeline = h.pipeline(FakeSource::new(), generator, embedder());
    let unit_id = h.run(&pipeline, &CancellationToken::new()).await.unwrap();

    let hits = h
        .store
        .similarity_search(&unit_id, &[1.0, 0.0], 100, 0.3)
        .await
        .unwrap();
    let files: HashMap<String, usize> = hits
        .iter()
        .filter_map(|h| h.passage.source_file.clone())
        .fold(HashMap::new(), |mut acc, f| {
            *acc.entry(f).or_default() += 1;
            acc
        });
    assert!(files.contains_key("src/a.rs"));
    assert!(files.contains_key("README.md"));
    assert!(!files.contains_key("Cargo.lock"));
}
