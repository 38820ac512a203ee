//! Pluggable pipeline stages and the registry that constructs them.
//!
//! A stage is a pure contributor of instructions; it never performs I/O. The
//! pipeline is the fixed sequence in [`StageKind::PIPELINE`], and each kind is
//! resolved through a [`StageRegistry`] so new stage types can be registered
//! without touching the blueprint factory. Stages receive everything they need
//! through an immutable [`StageContext`] at construction.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use shell_escape::unix::escape;
use thiserror::Error;

use crate::blueprint::{Deployment, Plan};
use crate::instruction::{Instruction, InstructionCollector};
use crate::job::JobId;
use crate::signal::FILES_MARKER;
use crate::store::Instance;

mod complete_setup;
mod create_instance;
mod install_software;
mod run_compose;

pub use complete_setup::CompleteSetupStage;
pub use create_instance::CreateInstanceStage;
pub use install_software::InstallSoftwareStage;
pub use run_compose::{COMPOSE_SIGNAL, FIREWALL_SIGNAL, RunComposeStage};

/// Root directory on the target machine holding per-instance deploy files.
pub const REMOTE_DEPLOY_ROOT: &str = "/opt/slipway";

/// Stable identifiers for the stage types the pipeline knows about.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum StageKind {
    /// Create the machine and wait for first boot.
    CreateInstance,
    /// Install the container runtime and base tooling.
    InstallSoftware,
    /// Upload and start the compose stack, then open the firewall.
    RunCompose,
    /// Verify the stack and register the instance.
    CompleteSetup,
}

impl StageKind {
    /// Stage order shared by every blueprint.
    pub const PIPELINE: [Self; 4] = [
        Self::CreateInstance,
        Self::InstallSoftware,
        Self::RunCompose,
        Self::CompleteSetup,
    ];

    /// Progress text shown to pollers while the stage runs.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::CreateInstance => "Creating instance",
            Self::InstallSoftware => "Installing software",
            Self::RunCompose => "Deploying compose stack",
            Self::CompleteSetup => "Completing setup",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.description())
    }
}

/// Everything a stage may read while contributing instructions.
#[derive(Clone, Debug)]
pub struct StageContext {
    /// Job the blueprint will run under; used to address signal callbacks.
    pub job_id: JobId,
    /// Resolved machine plan.
    pub plan: Plan,
    /// Instance row being provisioned.
    pub instance: Instance,
    /// Validated deployment inputs.
    pub deployment: Deployment,
    /// Base URL the remote side uses to report signals.
    pub callback_base_url: String,
    /// Optional endpoint notified once setup completes.
    pub registration_url: Option<String>,
}

impl StageContext {
    /// URL the remote side posts to when raising `signal`.
    #[must_use]
    pub fn signal_url(&self, signal: &str) -> String {
        format!(
            "{}/jobs/{}/signals/{signal}",
            self.callback_base_url.trim_end_matches('/'),
            self.job_id
        )
    }

    /// Remote working directory for this instance.
    #[must_use]
    pub fn remote_dir(&self) -> String {
        format!("{REMOTE_DEPLOY_ROOT}/{}", self.instance.name)
    }

    /// Wraps `action` so it runs detached and raises `signal` with its
    /// outcome. On failure the tail of its log and a listing of the working
    /// directory are posted as the callback body.
    #[must_use]
    pub fn detached_with_signal(&self, signal: &str, action: &str) -> Instruction {
        let dir = self.remote_dir();
        let log = format!("{dir}/{signal}.log");
        let escaped_log = escape(log.as_str().into());
        let escaped_dir = escape(dir.as_str().into());
        let escaped_ok = escape(format!("{}?status=succeeded", self.signal_url(signal)).into());
        let escaped_failed = escape(format!("{}?status=failed", self.signal_url(signal)).into());
        let script = format!(
            concat!(
                "if ({action}) > {log} 2>&1; then curl -fsS -X POST {ok}; ",
                "else {{ tail -n 50 {log}; echo '{marker}'; ls -1A {dir}; }} ",
                "| curl -fsS -X POST -H 'Content-Type: text/plain' --data-binary @- {failed}; fi"
            ),
            action = action,
            log = escaped_log,
            ok = escaped_ok,
            marker = FILES_MARKER,
            dir = escaped_dir,
            failed = escaped_failed,
        );
        let escaped_script = escape(script.into());
        Instruction::shell(format!("nohup sh -c {escaped_script} >/dev/null 2>&1 &"))
    }
}

/// Errors raised while assembling stages.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StageError {
    /// Raised when a stage kind has no registered constructor.
    #[error("no stage registered for {0:?}")]
    Unregistered(StageKind),
}

/// A pure contributor of instructions to a blueprint.
pub trait ProvisioningStage: Send + Sync {
    /// Identifier of this stage's type.
    fn kind(&self) -> StageKind;

    /// Appends this stage's instructions to `collector`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] when the stage delegates to an unregistered
    /// stage kind.
    fn add_instructions_to(&self, collector: &mut InstructionCollector) -> Result<(), StageError>;
}

/// Constructor stored in the registry.
pub type StageConstructor = fn(&StageContext) -> Box<dyn ProvisioningStage>;

/// Maps [`StageKind`] to the constructor that builds it.
#[derive(Clone, Debug, Default)]
pub struct StageRegistry {
    constructors: HashMap<StageKind, StageConstructor>,
}

impl StageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry wired with the built-in stages.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new()
            .register(StageKind::CreateInstance, CreateInstanceStage::boxed)
            .register(StageKind::InstallSoftware, InstallSoftwareStage::boxed)
            .register(StageKind::RunCompose, RunComposeStage::boxed)
            .register(StageKind::CompleteSetup, CompleteSetupStage::boxed)
    }

    /// Registers or replaces the constructor for `kind`.
    #[must_use]
    pub fn register(mut self, kind: StageKind, constructor: StageConstructor) -> Self {
        self.constructors.insert(kind, constructor);
        self
    }

    /// Builds the stage registered for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Unregistered`] when `kind` is unknown.
    pub fn create(
        &self,
        kind: StageKind,
        context: &StageContext,
    ) -> Result<Box<dyn ProvisioningStage>, StageError> {
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or(StageError::Unregistered(kind))?;
        Ok(constructor(context))
    }
}
