//! Live executors for pipeline stages.
//!
//! A [`ProvisioningState`] performs one unit of remote work. The runner
//! drives each state through `initialize`, repeated `update` calls, and a
//! final `dispose`, which always runs:
//!
//! `Created → Connecting → Executing → {Succeeded | Retrying → Executing | Failed}`
//!
//! States are constructed with everything they need; nothing is configured
//! after construction.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::channel::ChannelFactory;
use crate::error::ProvisionError;
use crate::http::HttpExecutor;
use crate::signal::SignalHub;

mod complete_setup;
mod create_machine;
mod ssh_stage;

pub use complete_setup::CompleteInstanceSetupState;
pub use create_machine::CreateMachineState;
pub use ssh_stage::SshStageState;

/// Future returned by state lifecycle calls.
pub type StateFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of one `update` call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StateOutcome {
    /// All of the state's work is done.
    Succeeded,
    /// A retryable step failed. Calling `update` again resumes at `step`.
    Retry {
        /// Error from the failed attempt.
        error: ProvisionError,
        /// Index of the step that failed, so attempt counts reset when a
        /// later step fails.
        step: usize,
    },
    /// A terminal failure; the pipeline must stop.
    Failed(ProvisionError),
}

/// Lifecycle phases reported in logs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatePhase {
    /// Constructed, not yet connected.
    Created,
    /// Opening the control channel.
    Connecting,
    /// Performing remote work.
    Executing,
    /// Waiting before another attempt.
    Retrying,
    /// Finished successfully.
    Succeeded,
    /// Finished with a terminal error.
    Failed,
}

impl StatePhase {
    /// Lower-case phase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Connecting => "connecting",
            Self::Executing => "executing",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for StatePhase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// One resumable, disposable unit of remote work.
pub trait ProvisioningState: Send {
    /// Progress text shown while the state runs.
    fn description(&self) -> &'static str;

    /// Acquires whatever the state needs, typically a control channel.
    /// Connection failures are retryable.
    ///
    /// The runner never interrupts this call, so anything acquired here is
    /// visible to `dispose` and to compensation even when the job is
    /// cancelled meanwhile.
    fn initialize(&mut self) -> StateFuture<'_, Result<(), ProvisionError>>;

    /// Performs, or resumes, the state's work.
    fn update(&mut self) -> StateFuture<'_, StateOutcome>;

    /// Releases resources acquired in `initialize`. Safe to call more than
    /// once.
    fn dispose(&mut self);
}

/// Per-attempt bounds applied while executing instructions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExecutionLimits {
    /// Bound on one shell command or HTTP call.
    pub command_timeout: Duration,
    /// Bound on waiting for one signal.
    pub signal_timeout: Duration,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(600),
            signal_timeout: Duration::from_secs(900),
        }
    }
}

/// Collaborators shared by every SSH-backed state.
#[derive(Clone)]
pub struct StateServices {
    /// Opens control channels.
    pub channels: Arc<dyn ChannelFactory>,
    /// Sends HTTP calls.
    pub http: Arc<dyn HttpExecutor>,
    /// Delivers signal callbacks.
    pub signals: Arc<SignalHub>,
    /// Timeouts applied to each attempt.
    pub limits: ExecutionLimits,
}

impl fmt::Debug for StateServices {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("StateServices")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
