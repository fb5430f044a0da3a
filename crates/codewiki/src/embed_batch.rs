//! Retriable, order-preserving embedding batcher.
//!
//! Groups texts into fixed-size batches, embeds the batches concurrently
//! through [`run_bounded`], and retries each batch with exponential backoff.
//! A batch that exhausts its attempts degrades to an empty result instead
//! of failing the whole call; [`BatchedEmbeddings`] records which texts
//! each batch covered so the caller can drop exactly those.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use codewiki_core::batch::run_bounded;
use tokio_util::sync::CancellationToken;

use crate::config::EmbeddingConfig;
use crate::embedding::{EmbeddingProvider, PermanentError};

/// Retry and concurrency settings for [`EmbeddingBatcher`].
#[derive(Debug, Clone)]
pub struct BatchPolicy {
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for every attempt after.
    pub backoff: Duration,
    pub timeout: Duration,
}

impl BatchPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff * (1u32 << (attempt.saturating_sub(2)).min(5))
    }
}

/// Result of embedding one batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub index: usize,
    /// Offset of the batch's first text in the input.
    pub start: usize,
    pub len: usize,
    /// One vector per text, or empty if the batch failed.
    pub vectors: Vec<Vec<f32>>,
    pub error: Option<String>,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-batch outcomes, in batch order.
#[derive(Debug, Clone, Default)]
pub struct BatchedEmbeddings {
    pub batches: Vec<BatchOutcome>,
}

impl BatchedEmbeddings {
    /// Concatenated vectors in batch order. Length equals the input length
    /// when every batch succeeded; failed batches contribute nothing.
    pub fn into_vectors(self) -> Vec<Vec<f32>> {
        self.batches.into_iter().flat_map(|b| b.vectors).collect()
    }

    pub fn embedded_count(&self) -> usize {
        self.batches.iter().map(|b| b.vectors.len()).sum()
    }

    pub fn failed_batches(&self) -> impl Iterator<Item = &BatchOutcome> {
        self.batches.iter().filter(|b| !b.succeeded())
    }
}

pub struct EmbeddingBatcher {
    provider: Arc<dyn EmbeddingProvider>,
    policy: BatchPolicy,
}

impl EmbeddingBatcher {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, policy: BatchPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    /// Embed `texts` in `ceil(len / batch_size)` batches. Never fails:
    /// problems are recorded on the affected [`BatchOutcome`].
    pub async fn embed_all(&self, texts: &[String], cancel: &CancellationToken) -> BatchedEmbeddings {
        let size = self.policy.batch_size;
        let batches: Vec<(usize, &[String])> = texts
            .chunks(size)
            .enumerate()
            .map(|(i, chunk)| (i * size, chunk))
            .collect();

        let outcomes = run_bounded(batches, self.policy.concurrency, |index, (start, chunk)| {
            self.embed_batch(index, start, chunk, cancel)
        })
        .await;

        BatchedEmbeddings { batches: outcomes }
    }

    async fn embed_batch(
        &self,
        index: usize,
        start: usize,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let mut last_err = anyhow!("no attempts made");

        for attempt in 1..=self.policy.max_attempts {
            if cancel.is_cancelled() {
                last_err = anyhow!("cancelled");
                break;
            }
            if attempt > 1 {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        last_err = anyhow!("cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(self.policy.delay_before(attempt)) => {}
                }
            }

            match tokio::time::timeout(self.policy.timeout, self.provider.embed(texts)).await {
                Ok(Ok(vectors)) if vectors.len() == texts.len() => {
                    return BatchOutcome {
                        index,
                        start,
                        len: texts.len(),
                        vectors,
                        error: None,
                    };
                }
                Ok(Ok(vectors)) => {
                    last_err = anyhow!(
                        "provider returned {} vectors for {} texts",
                        vectors.len(),
                        texts.len()
                    );
                }
                Ok(Err(e)) => {
                    let permanent = e.downcast_ref::<PermanentError>().is_some();
                    last_err = e;
                    if permanent {
                        break;
                    }
                }
                Err(_) => {
                    last_err = anyhow!("timed out after {:?}", self.policy.timeout);
                }
            }
            tracing::warn!(batch = index, attempt, error = %last_err, "embedding attempt failed");
        }

        tracing::error!(batch = index, texts = texts.len(), error = %last_err, "embedding batch dropped");
        BatchOutcome {
            index,
            start,
            len: texts.len(),
            vectors: Vec::new(),
            error: Some(last_err.to_string()),
        }
    }
}
