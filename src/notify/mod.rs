//! Start, completion, and failure events, plus compensation.
//!
//! Every handler here is best-effort: delivery and cleanup failures are
//! logged at `warn` and never change the outcome of the job.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendFuture, MachineHandle, MachineNetworking};
use crate::blueprint::Blueprint;
use crate::error::TerminalFailure;
use crate::firewall::FirewallPort;
use crate::store::InstanceStore;

mod chat;

pub use chat::ChatNotifier;

/// Reference to a pull request the provisioning run reports back to.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestRef {
    /// Repository in `owner/name` form.
    pub repository: String,
    /// Pull request number.
    pub number: u64,
}

impl fmt::Display for PullRequestRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}#{}", self.repository, self.number)
    }
}

/// Which event a notification reports.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    /// The machine is ready.
    Ready,
    /// Provisioning failed and the machine was removed.
    Failed,
}

/// A rendered message for a messaging collaborator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Notification {
    /// Event being reported.
    pub kind: NotificationKind,
    /// Instance the event concerns.
    pub instance: String,
    /// Human readable text.
    pub text: String,
}

/// Errors raised while delivering a notification.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NotifyError {
    /// The collaborator could not be reached.
    #[error("notification transport failed: {0}")]
    Transport(String),
    /// The collaborator answered with a non-success status.
    #[error("notification rejected with status {0}")]
    Rejected(u16),
}

/// Fire-and-forget messaging collaborator, such as a chat webhook.
pub trait Notifier: Send + Sync {
    /// Delivers `notification`.
    fn notify<'a>(&'a self, notification: &'a Notification) -> BackendFuture<'a, (), NotifyError>;
}

/// Code review collaborator that keeps a status comment on a pull request.
pub trait PullRequestCommenter: Send + Sync {
    /// Posts or updates the status comment on `pull_request`.
    fn comment<'a>(
        &'a self,
        pull_request: &'a PullRequestRef,
        body: &'a str,
    ) -> BackendFuture<'a, (), NotifyError>;
}

/// Externally reachable details announced once a machine is ready.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionDetails {
    /// Instance name.
    pub instance: String,
    /// Public address.
    pub address: IpAddr,
    /// Firewall rules that were opened.
    pub ports: Vec<FirewallPort>,
    /// DNS name pointing at the machine, if any.
    pub hostname: Option<String>,
}

impl ConnectionDetails {
    /// Collects the details for `blueprint` running at `networking`.
    #[must_use]
    pub fn resolve(blueprint: &Blueprint, networking: MachineNetworking) -> Self {
        Self {
            instance: blueprint.instance().name.clone(),
            address: networking.public_ip,
            ports: blueprint.firewall_ports().iter().copied().collect(),
            hostname: blueprint.hostname().map(str::to_owned),
        }
    }

    /// Renders the ready message.
    #[must_use]
    pub fn render(&self) -> String {
        let ports: Vec<String> = self.ports.iter().map(ToString::to_string).collect();
        let mut text = format!(
            "{} is ready at {} (ports: {})",
            self.instance,
            self.address,
            ports.join(", ")
        );
        if let Some(hostname) = &self.hostname {
            text.push_str(&format!("\nDNS: {hostname}"));
        }
        text
    }
}

/// Renders the failure message, including remote output and the diagnostic
/// file listing when they were captured.
#[must_use]
pub fn render_failure(instance: &str, failure: &TerminalFailure) -> String {
    let mut text = format!("Provisioning {instance} failed: {}", failure.message);
    if let Some(output) = &failure.remote_output {
        text.push_str("\n\n");
        text.push_str(output);
    }
    if !failure.diagnostic_files.is_empty() {
        text.push_str("\n\nFiles:");
        for file in &failure.diagnostic_files {
            text.push_str(&format!("\n- {file}"));
        }
    }
    text
}

/// Removes what a failed run left behind.
pub struct Compensator<B: Backend> {
    backend: Arc<B>,
    store: Arc<dyn InstanceStore>,
}

impl<B: Backend> Compensator<B> {
    /// Creates a compensator over `backend` and `store`.
    pub const fn new(backend: Arc<B>, store: Arc<dyn InstanceStore>) -> Self {
        Self { backend, store }
    }

    /// Destroys the machine, if one was created, then deletes the instance
    /// row. Neither step fails the caller; an already-absent machine or row
    /// is fine.
    pub async fn compensate(&self, instance: &str, machine: Option<MachineHandle>) {
        if let Some(handle) = machine {
            let machine_id = handle.id.clone();
            match self.backend.destroy(handle).await {
                Ok(()) => info!(instance, machine_id = %machine_id, "machine destroyed"),
                Err(err) => warn!(instance, machine_id = %machine_id, error = %err, "failed to destroy machine"),
            }
        }
        match self.store.delete_instance(instance).await {
            Ok(true) => info!(instance, "instance row deleted"),
            Ok(false) => debug!(instance, "instance row already absent"),
            Err(err) => warn!(instance, error = %err, "failed to delete instance row"),
        }
    }
}

/// Handlers for the three provisioning events.
pub struct ProvisioningEvents<B: Backend> {
    compensator: Compensator<B>,
    notifiers: Vec<Arc<dyn Notifier>>,
    commenter: Option<Arc<dyn PullRequestCommenter>>,
}

impl<B: Backend> ProvisioningEvents<B> {
    /// Creates handlers that only compensate.
    pub const fn new(compensator: Compensator<B>) -> Self {
        Self {
            compensator,
            notifiers: Vec::new(),
            commenter: None,
        }
    }

    /// Adds a messaging collaborator.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Sets the pull request commenter.
    #[must_use]
    pub fn with_commenter(mut self, commenter: Arc<dyn PullRequestCommenter>) -> Self {
        self.commenter = Some(commenter);
        self
    }

    /// Fired once the run starts.
    pub async fn started(&self, blueprint: &Blueprint) {
        let body = format!(
            "Provisioning {} on plan {}.",
            blueprint.instance().name,
            blueprint.plan().id
        );
        self.comment(blueprint, &body).await;
    }

    /// Fired once the final state succeeded.
    pub async fn completed(&self, blueprint: &Blueprint, networking: MachineNetworking) {
        let details = ConnectionDetails::resolve(blueprint, networking);
        let notification = Notification {
            kind: NotificationKind::Ready,
            instance: details.instance.clone(),
            text: details.render(),
        };
        self.broadcast(&notification).await;
        self.comment(blueprint, &notification.text).await;
    }

    /// Fired on any terminal failure. Compensation finishes before anything
    /// is sent.
    pub async fn failed(
        &self,
        blueprint: &Blueprint,
        machine: Option<MachineHandle>,
        failure: &TerminalFailure,
    ) {
        let instance = &blueprint.instance().name;
        self.compensator.compensate(instance, machine).await;
        let notification = Notification {
            kind: NotificationKind::Failed,
            instance: instance.clone(),
            text: render_failure(instance, failure),
        };
        self.broadcast(&notification).await;
        self.comment(blueprint, &notification.text).await;
    }

    async fn broadcast(&self, notification: &Notification) {
        for notifier in &self.notifiers {
            if let Err(err) = notifier.notify(notification).await {
                warn!(instance = %notification.instance, error = %err, "notification not delivered");
            }
        }
    }

    async fn comment(&self, blueprint: &Blueprint, body: &str) {
        let (Some(commenter), Some(pull_request)) = (&self.commenter, blueprint.pull_request())
        else {
            return;
        };
        if let Err(err) = commenter.comment(pull_request, body).await {
            warn!(pull_request = %pull_request, error = %err, "pull request comment not posted");
        }
    }
}

#[cfg(test)]
mod tests;
