//! Blueprints: the complete, ordered plan for provisioning one machine.
//!
//! [`BlueprintFactory::create`] resolves the plan, runs every stage of
//! [`StageKind::PIPELINE`] against a shared [`InstructionCollector`], and
//! returns the frozen result. No I/O happens here.

use std::collections::BTreeSet;

use crate::backend::{MachineRequest, MachineTemplate};
use crate::error::ProvisionError;
use crate::firewall::{FirewallPort, necessary_firewall_ports};
use crate::instruction::{InstructionCollector, InstructionGroup};
use crate::job::JobId;
use crate::notify::PullRequestRef;
use crate::stage::{StageContext, StageError, StageKind, StageRegistry};
use crate::store::Instance;

mod deployment;
mod plan;

pub use deployment::{Deployment, DeploymentFile, DockerAuth, compose_file_name};
pub use plan::{Plan, PlanCatalog};

impl From<StageError> for ProvisionError {
    fn from(value: StageError) -> Self {
        Self::Validation(value.to_string())
    }
}

/// Everything the runner needs to provision one instance.
#[derive(Clone, Debug)]
pub struct Blueprint {
    job_id: JobId,
    plan: Plan,
    instance: Instance,
    machine_request: MachineRequest,
    root: InstructionGroup,
    firewall_ports: BTreeSet<FirewallPort>,
    pull_request: Option<PullRequestRef>,
    hostname: Option<String>,
}

impl Blueprint {
    /// Job identifier the blueprint was built for.
    #[must_use]
    pub const fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Resolved plan.
    #[must_use]
    pub const fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Instance row being provisioned.
    #[must_use]
    pub const fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Provider request used to create the machine.
    #[must_use]
    pub const fn machine_request(&self) -> &MachineRequest {
        &self.machine_request
    }

    /// Root of the instruction tree.
    #[must_use]
    pub const fn root(&self) -> &InstructionGroup {
        &self.root
    }

    /// The top-level group each stage contributed, in pipeline order.
    pub fn stage_groups(&self) -> impl Iterator<Item = (StageKind, &InstructionGroup)> {
        self.root
            .groups()
            .filter_map(|group| group.stage().map(|kind| (kind, group)))
    }

    /// Firewall rules the deploy stage opens.
    #[must_use]
    pub const fn firewall_ports(&self) -> &BTreeSet<FirewallPort> {
        &self.firewall_ports
    }

    /// Linked pull request, if the request came from one.
    #[must_use]
    pub const fn pull_request(&self) -> Option<&PullRequestRef> {
        self.pull_request.as_ref()
    }

    /// Public DNS name announced on completion, if any.
    #[must_use]
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Links the blueprint to a pull request.
    #[must_use]
    pub fn with_pull_request(mut self, pull_request: Option<PullRequestRef>) -> Self {
        self.pull_request = pull_request;
        self
    }

    /// Sets the DNS name announced on completion.
    #[must_use]
    pub fn with_hostname(mut self, hostname: Option<String>) -> Self {
        self.hostname = hostname;
        self
    }
}

/// Builds [`Blueprint`]s from requests.
#[derive(Clone, Debug)]
pub struct BlueprintFactory {
    registry: StageRegistry,
    catalog: PlanCatalog,
    template: MachineTemplate,
    callback_base_url: String,
    registration_url: Option<String>,
}

impl BlueprintFactory {
    /// Creates a factory wired with the built-in stages.
    pub fn new(
        catalog: PlanCatalog,
        template: MachineTemplate,
        callback_base_url: impl Into<String>,
    ) -> Self {
        Self {
            registry: StageRegistry::with_defaults(),
            catalog,
            template,
            callback_base_url: callback_base_url.into(),
            registration_url: None,
        }
    }

    /// Replaces the stage registry.
    #[must_use]
    pub fn with_registry(mut self, registry: StageRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the endpoint the final stage announces the instance to.
    #[must_use]
    pub fn with_registration_url(mut self, registration_url: Option<String>) -> Self {
        self.registration_url = registration_url;
        self
    }

    /// Resolves `plan_id` against the catalogue.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Validation`] for unknown plans.
    pub fn resolve_plan(&self, plan_id: &str) -> Result<Plan, ProvisionError> {
        self.catalog.resolve(plan_id)
    }

    /// Builds the blueprint for provisioning `instance` on `plan_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Validation`] when the plan is unknown, the
    /// machine request is incomplete, or a stage kind is unregistered.
    pub fn create(
        &self,
        plan_id: &str,
        instance: Instance,
        deployment: Deployment,
    ) -> Result<Blueprint, ProvisionError> {
        let plan = self.resolve_plan(plan_id)?;
        let machine_request = self
            .template
            .request_for(&instance.name, &plan.commercial_type)?;
        let firewall_ports = necessary_firewall_ports(instance.kind, deployment.published_ports());
        let context = StageContext {
            job_id: JobId::new(),
            plan,
            instance,
            deployment,
            callback_base_url: self.callback_base_url.clone(),
            registration_url: self.registration_url.clone(),
        };

        let mut collector = InstructionCollector::new(context.instance.name.clone());
        collector.collect_from_stages(&self.registry, &context, &StageKind::PIPELINE)?;

        let StageContext {
            job_id,
            plan,
            instance,
            ..
        } = context;
        Ok(Blueprint {
            job_id,
            plan,
            instance,
            machine_request,
            root: collector.into_group(),
            firewall_ports,
            pull_request: None,
            hostname: None,
        })
    }
}

#[cfg(test)]
mod tests;
