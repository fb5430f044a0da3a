//! Fatal pipeline errors.

use std::time::Duration;

use codewiki_core::models::UnitStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to gather repository context: {0:#}")]
    ContextGather(anyhow::Error),
    #[error("no topics identified")]
    NoTopics,
    #[error("topic identification failed: {0:#}")]
    Identify(anyhow::Error),
    #[error("overview synthesis failed: {0:#}")]
    Overview(anyhow::Error),
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: UnitStatus, to: UnitStatus },
    #[error("analysis cancelled")]
    Cancelled,
    #[error("analysis exceeded its {0:?} deadline")]
    TimedOut(Duration),
}
