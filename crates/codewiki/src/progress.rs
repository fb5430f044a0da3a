//! Analysis progress reporting.
//!
//! The pipeline emits [`ProgressEvent`]s through a [`ProgressReporter`].
//! The CLI renders them on **stderr** so stdout remains parseable for
//! scripts, either as human-readable lines or as one JSON object per line.
//!
//! [`BroadcastProgress`] fans one producer out to any number of
//! subscribers. A slow subscriber lags and loses events; it never blocks
//! the pipeline.

use std::io::Write;

use serde::Serialize;
use tokio::sync::broadcast;

use codewiki_core::models::UnitStatus;

/// How one topic's page generation ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TopicOutcome {
    Generated,
    /// The topic was dropped; the rest of the run continues.
    Partial { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ProgressEvent {
    StatusChanged {
        unit_id: String,
        status: UnitStatus,
    },
    TopicsListed {
        unit_id: String,
        titles: Vec<String>,
    },
    TopicStarted {
        index: usize,
        title: String,
    },
    TopicCompleted {
        index: usize,
        title: String,
        #[serde(flatten)]
        outcome: TopicOutcome,
    },
    #[serde(rename = "fatal-error")]
    Failed {
        unit_id: String,
        message: String,
    },
    Completed {
        unit_id: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

impl<F> ProgressReporter for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Human-friendly progress on stderr.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::StatusChanged { status, .. } => format!("analyze  {}\n", status),
            ProgressEvent::TopicsListed { titles, .. } => {
                format!("analyze  {} topics identified\n", titles.len())
            }
            ProgressEvent::TopicStarted { index, title } => {
                format!("  [{}] {}  generating...\n", index + 1, title)
            }
            ProgressEvent::TopicCompleted {
                index,
                title,
                outcome,
            } => match outcome {
                TopicOutcome::Generated => format!("  [{}] {}  done\n", index + 1, title),
                TopicOutcome::Partial { reason } => {
                    format!("  [{}] {}  skipped: {}\n", index + 1, title, reason)
                }
            },
            ProgressEvent::Failed { message, .. } => format!("analyze  failed: {}\n", message),
            ProgressEvent::Completed { unit_id } => format!("analyze  complete ({})\n", unit_id),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Fan-out reporter over a tokio broadcast channel.
#[derive(Clone)]
pub struct BroadcastProgress {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastProgress {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Spawn a task that feeds every event to `sink` until the last
    /// sender is dropped.
    pub fn forward_to(&self, sink: Box<dyn ProgressReporter>) -> tokio::task::JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => sink.report(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "progress subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
