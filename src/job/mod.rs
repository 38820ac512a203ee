//! Pollable jobs wrapping one end-to-end provisioning run.
//!
//! A [`Job`] is a snapshot; the live record sits inside the [`JobTracker`]
//! and is only mutated through the [`JobProgress`] handed to the executor.
//! Once a record has ended it never changes again.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TerminalFailure;

mod cancel;
mod tracker;

pub use cancel::CancelToken;
pub use tracker::{BlueprintExecutor, ExecutionFuture, JobHandle, JobProgress, JobTracker};

/// Description shown before the runner has reached its first stage.
pub const SCHEDULED_DESCRIPTION: &str = "Scheduled";
/// Description shown once a job has succeeded.
pub const COMPLETED_DESCRIPTION: &str = "Completed";

/// Stable job identifier.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Allocates a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value).map(Self)
    }
}

/// Point-in-time view of a job.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Job identifier.
    pub id: JobId,
    /// Description of the stage currently running.
    pub current_stage_description: String,
    /// Whether the job has reached a terminal state.
    pub is_ended: bool,
    /// Whether the job ended successfully.
    pub is_succeeded: bool,
    /// Whether the job ended in failure.
    pub is_failed: bool,
    /// Failure details when `is_failed` is set.
    pub terminal_failure: Option<TerminalFailure>,
}
