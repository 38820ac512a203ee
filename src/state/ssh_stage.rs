//! Executes one stage group's instructions over a control channel.

use tokio::time::timeout;
use tracing::{debug, info};

use super::{ProvisioningState, StateFuture, StateOutcome, StateServices};
use crate::backend::MachineNetworking;
use crate::channel::ControlChannel;
use crate::error::ProvisionError;
use crate::http::HttpResponse;
use crate::instruction::{HttpCall, Instruction, InstructionAction, InstructionGroup, RetryPolicy};
use crate::job::JobId;
use crate::signal::{SignalError, SignalReport};
use crate::stage::StageKind;

/// SSH-backed executor for the instructions of one stage.
///
/// Instructions run strictly in order. A successful instruction is never
/// repeated: after a retryable failure the next `update` resumes at the
/// failing instruction.
pub struct SshStageState {
    kind: StageKind,
    job_id: JobId,
    instructions: Vec<Instruction>,
    cursor: usize,
    networking: MachineNetworking,
    services: StateServices,
    channel: Option<Box<dyn ControlChannel>>,
}

impl SshStageState {
    /// Creates a state for the instructions beneath `group`.
    #[must_use]
    pub fn new(
        kind: StageKind,
        job_id: JobId,
        group: &InstructionGroup,
        networking: MachineNetworking,
        services: StateServices,
    ) -> Self {
        Self {
            kind,
            job_id,
            instructions: group.flatten().into_iter().cloned().collect(),
            cursor: 0,
            networking,
            services,
            channel: None,
        }
    }

    /// Number of instructions completed so far.
    #[must_use]
    pub const fn completed(&self) -> usize {
        self.cursor
    }

    fn host(&self) -> String {
        self.networking.public_ip.to_string()
    }

    async fn perform(&mut self, instruction: &Instruction) -> Result<(), ProvisionError> {
        let group = instruction.group().to_string();
        match instruction.action() {
            InstructionAction::ShellCommand(command) => self.run_shell(command, group).await,
            InstructionAction::HttpCall(call) => send_http(&self.services, call, group).await,
            InstructionAction::SignalWait(name) => {
                await_signal(&self.services, self.job_id, name, group).await
            }
        }
    }

    async fn run_shell(&mut self, command: &str, group: String) -> Result<(), ProvisionError> {
        let host = self.host();
        let limit = self.services.limits.command_timeout;
        let channel = self.channel.as_mut().ok_or_else(|| ProvisionError::Connection {
            host: host.clone(),
            message: String::from("control channel is not open"),
        })?;
        debug!(host = %host, group = %group, "running shell command");
        let output = timeout(limit, channel.execute(command))
            .await
            .map_err(|_| timed_out("shell command", &group, limit.as_secs()))??;
        if output.is_success() {
            return Ok(());
        }
        let diagnostic = output.diagnostic_text();
        Err(ProvisionError::RemoteCommand {
            action: String::from("shell command"),
            message: format!("exited with status {}", output.status_text()),
            output: (!diagnostic.is_empty()).then(|| diagnostic.to_owned()),
            group,
            files: Vec::new(),
        })
    }
}

async fn send_http(
    services: &StateServices,
    call: &HttpCall,
    group: String,
) -> Result<(), ProvisionError> {
    let limit = services.limits.command_timeout;
    let response: HttpResponse = timeout(limit, services.http.send(call))
        .await
        .map_err(|_| timed_out("http call", &group, limit.as_secs()))??;
    if response.is_success() {
        return Ok(());
    }
    let body = response.body.trim();
    Err(ProvisionError::RemoteCommand {
        action: String::from("http call"),
        message: format!(
            "{} {} returned {}",
            call.verb.as_str(),
            call.url,
            response.status
        ),
        output: (!body.is_empty()).then(|| body.to_owned()),
        group,
        files: Vec::new(),
    })
}

async fn await_signal(
    services: &StateServices,
    job_id: JobId,
    name: &str,
    group: String,
) -> Result<(), ProvisionError> {
    let limit = services.limits.signal_timeout;
    debug!(job_id = %job_id, signal = name, "waiting for signal");
    let report = services
        .signals
        .wait(job_id, name, limit)
        .await
        .map_err(|err| match err {
            SignalError::Timeout { signal, timeout: bound } => ProvisionError::SignalTimeout {
                signal,
                timeout_secs: bound.as_secs(),
            },
            SignalError::Abandoned(_) => ProvisionError::Cancelled,
        })?;
    info!(job_id = %job_id, signal = name, succeeded = report.succeeded, "signal received");
    if report.succeeded {
        return Ok(());
    }
    let SignalReport { error, files, .. } = report;
    Err(ProvisionError::RemoteCommand {
        action: String::from("signal"),
        group,
        message: format!("'{name}' reported failure"),
        output: error,
        files,
    })
}

fn timed_out(action: &str, group: &str, seconds: u64) -> ProvisionError {
    ProvisionError::RemoteCommand {
        action: action.to_owned(),
        group: group.to_owned(),
        message: format!("timed out after {seconds} seconds"),
        output: None,
        files: Vec::new(),
    }
}

fn classify(instruction: &Instruction, error: ProvisionError, step: usize) -> StateOutcome {
    if instruction.retry_policy() == RetryPolicy::AllowRetries && error.is_retryable() {
        StateOutcome::Retry { error, step }
    } else {
        StateOutcome::Failed(error)
    }
}

impl ProvisioningState for SshStageState {
    fn description(&self) -> &'static str {
        self.kind.description()
    }

    fn initialize(&mut self) -> StateFuture<'_, Result<(), ProvisionError>> {
        Box::pin(async move {
            if self.channel.is_some() {
                return Ok(());
            }
            let networking = self.networking;
            let opened = self.services.channels.connect(&networking).await?;
            self.channel = Some(opened);
            Ok(())
        })
    }

    fn update(&mut self) -> StateFuture<'_, StateOutcome> {
        Box::pin(async move {
            while let Some(current) = self.instructions.get(self.cursor).cloned() {
                if let Err(error) = self.perform(&current).await {
                    return classify(&current, error, self.cursor);
                }
                self.cursor += 1;
            }
            StateOutcome::Succeeded
        })
    }

    fn dispose(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }
}
