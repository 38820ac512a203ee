//! In-memory job registry and the scheduling entry point.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info};

use super::{COMPLETED_DESCRIPTION, CancelToken, Job, JobId, SCHEDULED_DESCRIPTION};
use crate::blueprint::Blueprint;
use crate::error::TerminalFailure;

/// Future returned by [`BlueprintExecutor::execute`].
pub type ExecutionFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Drives a blueprint to a terminal state, reporting through `progress`.
pub trait BlueprintExecutor: Send + Sync {
    /// Runs `blueprint`. Implementations must end the job through
    /// [`JobProgress::succeed`] or [`JobProgress::fail`] before returning.
    fn execute(
        &self,
        blueprint: Blueprint,
        progress: JobProgress,
        cancel: CancelToken,
    ) -> ExecutionFuture<'_>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Outcome {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug)]
struct JobRecord {
    description: String,
    outcome: Outcome,
    failure: Option<TerminalFailure>,
    ended_at: Option<Instant>,
    cancel: Arc<watch::Sender<bool>>,
}

impl JobRecord {
    fn pending(cancel: Arc<watch::Sender<bool>>) -> Self {
        Self {
            description: String::from(SCHEDULED_DESCRIPTION),
            outcome: Outcome::Pending,
            failure: None,
            ended_at: None,
            cancel,
        }
    }

    /// Applies a terminal outcome unless one is already recorded.
    fn finish(&mut self, outcome: Outcome, failure: Option<TerminalFailure>) -> bool {
        if self.outcome != Outcome::Pending {
            return false;
        }
        self.outcome = outcome;
        self.failure = failure;
        self.ended_at = Some(Instant::now());
        true
    }

    fn is_expired(&self, retention: Duration, now: Instant) -> bool {
        self.ended_at
            .is_some_and(|ended_at| now.saturating_duration_since(ended_at) > retention)
    }

    fn snapshot(&self, id: JobId) -> Job {
        Job {
            id,
            current_stage_description: self.description.clone(),
            is_ended: self.outcome != Outcome::Pending,
            is_succeeded: self.outcome == Outcome::Succeeded,
            is_failed: self.outcome == Outcome::Failed,
            terminal_failure: self.failure.clone(),
        }
    }
}

type Records = Arc<RwLock<HashMap<JobId, JobRecord>>>;

fn read(records: &Records) -> RwLockReadGuard<'_, HashMap<JobId, JobRecord>> {
    records.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(records: &Records) -> RwLockWriteGuard<'_, HashMap<JobId, JobRecord>> {
    records.write().unwrap_or_else(PoisonError::into_inner)
}

/// Write access to one job, handed to its executor.
#[derive(Clone, Debug)]
pub struct JobProgress {
    id: JobId,
    records: Records,
}

impl JobProgress {
    /// Identifier of the job being driven.
    #[must_use]
    pub const fn id(&self) -> JobId {
        self.id
    }

    /// Publishes the description of the stage now running. Ignored once the
    /// job has ended.
    pub fn advance(&self, description: &str) {
        if let Some(record) = write(&self.records).get_mut(&self.id)
            && record.outcome == Outcome::Pending
        {
            description.clone_into(&mut record.description);
        }
    }

    /// Ends the job successfully unless it already ended.
    pub fn succeed(&self) {
        if let Some(record) = write(&self.records).get_mut(&self.id)
            && record.finish(Outcome::Succeeded, None)
        {
            String::from(COMPLETED_DESCRIPTION).clone_into(&mut record.description);
            info!(job_id = %self.id, "job succeeded");
        }
    }

    /// Ends the job with `failure` unless it already ended.
    pub fn fail(&self, failure: TerminalFailure) {
        let message = failure.message.clone();
        if let Some(record) = write(&self.records).get_mut(&self.id)
            && record.finish(Outcome::Failed, Some(failure))
        {
            info!(job_id = %self.id, error = %message, "job failed");
        }
    }

    /// Returns the current snapshot of the job.
    #[must_use]
    pub fn snapshot(&self) -> Option<Job> {
        read(&self.records)
            .get(&self.id)
            .map(|record| record.snapshot(self.id))
    }
}

/// Caller-facing handle to a scheduled job.
#[derive(Clone, Debug)]
pub struct JobHandle {
    id: JobId,
    cancel: Arc<watch::Sender<bool>>,
}

impl JobHandle {
    /// Identifier to poll.
    #[must_use]
    pub const fn id(&self) -> JobId {
        self.id
    }

    /// Requests cancellation. No effect once the job has ended.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }
}

/// Registry of in-flight and recently ended jobs.
#[derive(Clone, Debug)]
pub struct JobTracker {
    records: Records,
    retention: Duration,
}

impl JobTracker {
    /// Creates a tracker keeping ended jobs visible for `retention`.
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            records: Arc::default(),
            retention,
        }
    }

    /// Registers a job for `blueprint` and starts `executor` on it in the
    /// background. Must be called from within a Tokio runtime.
    pub fn schedule_job(
        &self,
        blueprint: Blueprint,
        executor: Arc<dyn BlueprintExecutor>,
    ) -> JobHandle {
        let id = blueprint.job_id();
        let (cancel_sender, cancel) = CancelToken::channel();
        let sender = Arc::new(cancel_sender);
        write(&self.records).insert(id, JobRecord::pending(Arc::clone(&sender)));

        let progress = JobProgress {
            id,
            records: Arc::clone(&self.records),
        };
        info!(job_id = %id, instance = %blueprint.instance().name, "job scheduled");
        tokio::spawn(async move {
            executor.execute(blueprint, progress, cancel).await;
        });
        JobHandle { id, cancel: sender }
    }

    /// Registers a job that has already succeeded, for requests that need no
    /// work.
    #[must_use]
    pub fn get_completed_job(&self) -> JobHandle {
        let id = JobId::new();
        let (cancel_sender, _) = CancelToken::channel();
        let sender = Arc::new(cancel_sender);
        let mut record = JobRecord::pending(Arc::clone(&sender));
        record.finish(Outcome::Succeeded, None);
        String::from(COMPLETED_DESCRIPTION).clone_into(&mut record.description);
        write(&self.records).insert(id, record);
        debug!(job_id = %id, "registered pre-completed job");
        JobHandle { id, cancel: sender }
    }

    /// Returns the current snapshot, or `None` when the id is unknown or
    /// the job ended longer ago than the retention period.
    #[must_use]
    pub fn get_job_by_id(&self, id: JobId) -> Option<Job> {
        let now = Instant::now();
        read(&self.records)
            .get(&id)
            .filter(|record| !record.is_expired(self.retention, now))
            .map(|record| record.snapshot(id))
    }

    /// Requests cancellation of a pending job. Returns `false` when the job
    /// is unknown or already ended.
    pub fn cancel(&self, id: JobId) -> bool {
        let records = read(&self.records);
        match records.get(&id) {
            Some(record) if record.outcome == Outcome::Pending => {
                record.cancel.send_replace(true);
                info!(job_id = %id, "job cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Drops ended jobs past the retention period, returning how many were
    /// removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut records = write(&self.records);
        let before = records.len();
        records.retain(|_, record| !record.is_expired(self.retention, now));
        let purged = before - records.len();
        if purged > 0 {
            debug!(purged, "purged expired jobs");
        }
        purged
    }
}
