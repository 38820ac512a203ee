//! Core library for the Slipway provisioning orchestrator.
//!
//! A provisioning request names a machine plan and a compose project. The
//! crate turns it into a [`Blueprint`] of ordered instruction groups, runs
//! the groups against a freshly created Scaleway machine over SSH, and
//! exposes progress as a pollable [`Job`]. Failed runs tear the machine down
//! and notify collaborators.

pub mod api;
pub mod backend;
pub mod blueprint;
pub mod channel;
pub mod cloud_init;
pub mod compose;
pub mod config;
pub mod error;
pub mod firewall;
pub mod http;
pub mod instruction;
pub mod job;
pub mod notify;
pub mod runner;
pub mod scaleway;
pub mod service;
pub mod signal;
pub mod stage;
pub mod state;
pub mod store;
#[cfg(test)]
pub mod test_helpers;
pub mod test_support;

pub use backend::{
    Backend, MachineHandle, MachineNetworking, MachineRequest, MachineRequestBuilder,
    MachineTemplate,
};
pub use blueprint::{Blueprint, BlueprintFactory, Deployment, DeploymentFile, DockerAuth};
pub use channel::{CommandOutput, CommandRunner, ProcessCommandRunner, SshChannelFactory};
pub use config::{ConfigError, OrchestratorConfig, PlanSetting, ScalewayConfig, SshConfig};
pub use error::{ProvisionError, TerminalFailure};
pub use firewall::FirewallPort;
pub use http::ReqwestExecutor;
pub use instruction::{Instruction, InstructionCollector, InstructionGroup, RetryPolicy};
pub use job::{Job, JobHandle, JobId, JobTracker};
pub use notify::{ChatNotifier, Compensator, ProvisioningEvents, PullRequestRef};
pub use runner::{PipelineRunner, RetrySettings};
pub use scaleway::{ScalewayBackend, ScalewayBackendError};
pub use service::{ProvisionRequest, ProvisioningService};
pub use signal::{SignalHub, SignalReport};
pub use state::{ExecutionLimits, StateServices};
pub use store::{Instance, InstanceKind, InstanceStore, Inventory, MemoryInstanceStore};
