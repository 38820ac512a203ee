//! Rendezvous between remote signal callbacks and waiting pipeline runs.
//!
//! Each `(job, signal)` pair owns one slot. Whichever side arrives first
//! fills it: a waiting runner parks a oneshot sender, while an early callback
//! leaves its report behind for the wait to consume. Only jobs that are
//! still running may leave reports behind.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use crate::job::JobId;

/// Line separating the error text from the diagnostic file listing in a
/// failure callback body.
pub const FILES_MARKER: &str = "--- files ---";

/// Outcome the remote side reported for one signal.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SignalReport {
    /// Whether the remote action succeeded.
    pub succeeded: bool,
    /// Error text captured on the remote side.
    pub error: Option<String>,
    /// Diagnostic file listing captured on the remote side.
    pub files: Vec<String>,
}

impl SignalReport {
    /// A successful report with no payload.
    #[must_use]
    pub fn success() -> Self {
        Self {
            succeeded: true,
            ..Self::default()
        }
    }

    /// Builds a report from a callback. The body of a failure callback holds
    /// the error text, optionally followed by [`FILES_MARKER`] and one file
    /// name per line.
    #[must_use]
    pub fn from_callback(succeeded: bool, body: &str) -> Self {
        let (error_text, listing) = body.split_once(FILES_MARKER).unwrap_or((body, ""));
        let trimmed = error_text.trim();
        Self {
            succeeded,
            error: (!trimmed.is_empty()).then(|| trimmed.to_owned()),
            files: listing
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }
}

/// Errors raised while waiting for a signal.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SignalError {
    /// The signal did not arrive in time.
    #[error("signal '{signal}' not received within {timeout:?}")]
    Timeout {
        /// Signal name.
        signal: String,
        /// Bound that expired.
        timeout: Duration,
    },
    /// The wait was superseded or the job was forgotten.
    #[error("wait for signal '{0}' was abandoned")]
    Abandoned(String),
}

#[derive(Debug)]
enum Slot {
    Waiting(oneshot::Sender<SignalReport>),
    Arrived(SignalReport),
}

type Key = (JobId, String);

/// Early reports kept per job before further ones are dropped.
const MAX_BUFFERED_PER_JOB: usize = 8;

#[derive(Debug, Default)]
struct Registry {
    open: HashSet<JobId>,
    slots: HashMap<Key, Slot>,
}

impl Registry {
    fn buffered_for(&self, job: JobId) -> usize {
        self.slots
            .iter()
            .filter(|((owner, _), slot)| *owner == job && matches!(slot, Slot::Arrived(_)))
            .count()
    }
}

/// Shared registry of pending and early signals.
///
/// Reports are only accepted for jobs opened with [`SignalHub::open_job`]
/// and not yet forgotten, so callbacks for ended or unknown jobs never
/// accumulate.
#[derive(Debug, Default)]
pub struct SignalHub {
    registry: Mutex<Registry>,
}

impl SignalHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts accepting signals for `job`.
    pub fn open_job(&self, job: JobId) {
        self.lock().open.insert(job);
    }

    /// Delivers `report` for `(job, name)`, waking a waiting runner or
    /// buffering the report until the wait starts. Returns `false` when the
    /// report was dropped because `job` is not open or already holds the
    /// maximum number of early reports.
    #[must_use]
    pub fn deliver(&self, job: JobId, name: &str, report: SignalReport) -> bool {
        let key = (job, name.to_owned());
        let mut registry = self.lock();
        if !registry.open.contains(&job) {
            debug!(job_id = %job, signal = name, "dropping signal for inactive job");
            return false;
        }
        let report = match registry.slots.remove(&key) {
            Some(Slot::Waiting(sender)) => match sender.send(report) {
                Ok(()) => return true,
                Err(unsent) => unsent,
            },
            Some(Slot::Arrived(_)) | None => report,
        };
        if registry.buffered_for(job) >= MAX_BUFFERED_PER_JOB {
            debug!(job_id = %job, signal = name, "dropping signal over the buffer bound");
            return false;
        }
        debug!(job_id = %job, signal = name, "buffering early signal");
        registry.slots.insert(key, Slot::Arrived(report));
        true
    }

    /// Waits up to `timeout` for `(job, name)`. Opens `job` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Timeout`] when the bound expires and
    /// [`SignalError::Abandoned`] when the slot is dropped by another wait or
    /// by [`SignalHub::forget_job`].
    pub async fn wait(
        &self,
        job: JobId,
        name: &str,
        timeout: Duration,
    ) -> Result<SignalReport, SignalError> {
        let receiver = {
            let key = (job, name.to_owned());
            let mut registry = self.lock();
            registry.open.insert(job);
            if let Some(Slot::Arrived(report)) = registry.slots.remove(&key) {
                return Ok(report);
            }
            let (sender, receiver) = oneshot::channel();
            registry.slots.insert(key, Slot::Waiting(sender));
            receiver
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(_)) => Err(SignalError::Abandoned(name.to_owned())),
            Err(_) => {
                let key = (job, name.to_owned());
                let mut registry = self.lock();
                match registry.slots.remove(&key) {
                    Some(Slot::Arrived(report)) => return Ok(report),
                    Some(Slot::Waiting(_)) | None => {}
                }
                Err(SignalError::Timeout {
                    signal: name.to_owned(),
                    timeout,
                })
            }
        }
    }

    /// Stops accepting signals for `job` and drops every slot it owns.
    pub fn forget_job(&self, job: JobId) {
        let mut registry = self.lock();
        registry.open.remove(&job);
        registry.slots.retain(|(owner, _), _| *owner != job);
    }
}
