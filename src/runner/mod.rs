//! Drives a blueprint through its states against a real machine.
//!
//! The machine is created first; each stage group then runs as its own
//! SSH-backed state, strictly in pipeline order. Retryable failures are
//! attempted again in place with a linear backoff. Terminal failures,
//! exhausted retries, and cancellation all route through the failure events
//! so compensation always runs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::backend::{Backend, MachineNetworking};
use crate::blueprint::Blueprint;
use crate::error::{ProvisionError, TerminalFailure};
use crate::instruction::InstructionGroup;
use crate::job::{BlueprintExecutor, CancelToken, ExecutionFuture, JobProgress};
use crate::notify::ProvisioningEvents;
use crate::stage::StageKind;
use crate::state::{
    CompleteInstanceSetupState, CreateMachineState, ProvisioningState, SshStageState, StateOutcome,
    StatePhase, StateServices,
};
use crate::store::InstanceStore;

/// Bounds on retrying one step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetrySettings {
    /// Attempts per step, including the first.
    pub max_attempts: u32,
    /// Pause before the second attempt; later pauses grow linearly.
    pub backoff: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetrySettings {
    const fn pause_before(self, next_attempt: u32) -> Duration {
        self.backoff.saturating_mul(next_attempt.saturating_sub(1))
    }
}

/// [`BlueprintExecutor`] that provisions through a [`Backend`] and SSH.
pub struct PipelineRunner<B: Backend> {
    backend: Arc<B>,
    services: StateServices,
    store: Arc<dyn InstanceStore>,
    events: ProvisioningEvents<B>,
    retry: RetrySettings,
}

impl<B: Backend> PipelineRunner<B> {
    /// Creates a runner.
    pub const fn new(
        backend: Arc<B>,
        services: StateServices,
        store: Arc<dyn InstanceStore>,
        events: ProvisioningEvents<B>,
        retry: RetrySettings,
    ) -> Self {
        Self {
            backend,
            services,
            store,
            events,
            retry,
        }
    }

    async fn run(
        &self,
        blueprint: &Blueprint,
        progress: &JobProgress,
        cancel: &CancelToken,
        machine: &mut CreateMachineState<B>,
    ) -> Result<MachineNetworking, ProvisionError> {
        progress.advance(machine.description());
        self.drive(machine, cancel).await?;
        let networking = machine.networking().ok_or_else(|| ProvisionError::Provider {
            message: String::from("machine reported ready without networking"),
        })?;

        for (kind, group) in blueprint.stage_groups() {
            if cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }
            let mut state = self.state_for(blueprint, kind, group, networking);
            progress.advance(state.description());
            self.drive(state.as_mut(), cancel).await?;
        }
        Ok(networking)
    }

    fn state_for(
        &self,
        blueprint: &Blueprint,
        kind: StageKind,
        group: &InstructionGroup,
        networking: MachineNetworking,
    ) -> Box<dyn ProvisioningState> {
        let ssh = SshStageState::new(
            kind,
            blueprint.job_id(),
            group,
            networking,
            self.services.clone(),
        );
        match kind {
            StageKind::CompleteSetup => Box::new(CompleteInstanceSetupState::new(
                ssh,
                Arc::clone(&self.store),
                blueprint.instance().name.clone(),
            )),
            StageKind::CreateInstance | StageKind::InstallSoftware | StageKind::RunCompose => {
                Box::new(ssh)
            }
        }
    }

    /// Runs one state to a terminal outcome. `dispose` runs on every path.
    async fn drive(
        &self,
        state: &mut dyn ProvisioningState,
        cancel: &CancelToken,
    ) -> Result<(), ProvisionError> {
        debug!(state = state.description(), phase = %StatePhase::Created, "state constructed");
        let result = match self.connect(state, cancel).await {
            Ok(()) => self.perform(state, cancel).await,
            Err(err) => Err(err),
        };
        state.dispose();
        let phase = if result.is_ok() {
            StatePhase::Succeeded
        } else {
            StatePhase::Failed
        };
        debug!(state = state.description(), phase = %phase, "state disposed");
        result
    }

    async fn connect(
        &self,
        state: &mut dyn ProvisioningState,
        cancel: &CancelToken,
    ) -> Result<(), ProvisionError> {
        let mut attempt = 1;
        loop {
            debug!(state = state.description(), phase = %StatePhase::Connecting, attempt);
            // Runs to completion so a half-acquired resource is never lost.
            let outcome = state.initialize().await;
            if cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }
            let error = match outcome {
                Ok(()) => return Ok(()),
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) => error,
            };
            attempt = self
                .next_attempt(state.description(), attempt, error, cancel)
                .await?;
        }
    }

    async fn perform(
        &self,
        state: &mut dyn ProvisioningState,
        cancel: &CancelToken,
    ) -> Result<(), ProvisionError> {
        let mut attempt = 1;
        let mut failing_step = None;
        loop {
            debug!(state = state.description(), phase = %StatePhase::Executing, attempt);
            match cancellable(cancel, state.update()).await? {
                StateOutcome::Succeeded => return Ok(()),
                StateOutcome::Failed(error) => return Err(error),
                StateOutcome::Retry { error, step } => {
                    if failing_step != Some(step) {
                        failing_step = Some(step);
                        attempt = 1;
                    }
                    attempt = self
                        .next_attempt(state.description(), attempt, error, cancel)
                        .await?;
                }
            }
        }
    }

    /// Waits out the backoff and returns the next attempt number, or the
    /// exhausted error once the bound is reached.
    async fn next_attempt(
        &self,
        description: &'static str,
        attempt: u32,
        error: ProvisionError,
        cancel: &CancelToken,
    ) -> Result<u32, ProvisionError> {
        if attempt >= self.retry.max_attempts {
            return Err(ProvisionError::RetriesExhausted {
                attempts: attempt,
                source: Box::new(error),
            });
        }
        let next = attempt + 1;
        let pause = self.retry.pause_before(next);
        warn!(
            state = description,
            phase = %StatePhase::Retrying,
            attempt = next,
            pause_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "retrying"
        );
        cancellable(cancel, tokio::time::sleep(pause)).await?;
        Ok(next)
    }
}

async fn cancellable<F: Future>(cancel: &CancelToken, future: F) -> Result<F::Output, ProvisionError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ProvisionError::Cancelled),
        output = future => Ok(output),
    }
}

impl<B: Backend + 'static> BlueprintExecutor for PipelineRunner<B> {
    fn execute(
        &self,
        blueprint: Blueprint,
        progress: JobProgress,
        cancel: CancelToken,
    ) -> ExecutionFuture<'_> {
        Box::pin(async move {
            let job_id = blueprint.job_id();
            let instance = blueprint.instance().name.clone();
            info!(job_id = %job_id, instance = %instance, plan = %blueprint.plan().id, "provisioning started");
            self.events.started(&blueprint).await;

            let mut machine = CreateMachineState::new(
                Arc::clone(&self.backend),
                blueprint.machine_request().clone(),
            );
            match self.run(&blueprint, &progress, &cancel, &mut machine).await {
                Ok(networking) => {
                    self.events.completed(&blueprint, networking).await;
                    progress.succeed();
                    info!(job_id = %job_id, instance = %instance, address = %networking.public_ip, "provisioning succeeded");
                }
                Err(err) => {
                    error!(job_id = %job_id, instance = %instance, error = %err, "provisioning failed");
                    let failure = TerminalFailure::from(&err);
                    self.events
                        .failed(&blueprint, machine.handle().cloned(), &failure)
                        .await;
                    progress.fail(failure);
                }
            }
            self.services.signals.forget_job(job_id);
        })
    }
}
