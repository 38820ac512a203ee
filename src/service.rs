//! Entry point for provisioning requests.
//!
//! [`ProvisioningService`] validates a request, short-circuits no-op
//! requests with a pre-completed job, and otherwise builds the blueprint and
//! schedules it. Validation failures are returned immediately; no job is
//! registered for them.

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::blueprint::{BlueprintFactory, Deployment, DeploymentFile, DockerAuth};
use crate::error::ProvisionError;
use crate::job::{BlueprintExecutor, Job, JobHandle, JobId, JobTracker};
use crate::notify::PullRequestRef;
use crate::signal::{SignalHub, SignalReport};
use crate::store::{Instance, InstanceStore};

/// Inbound request to provision or redeploy one instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    /// Ordered plan identifier, for example `2gb`.
    pub plan_id: String,
    /// Name of an existing instance row.
    pub instance: String,
    /// Compose files, in `-f` order.
    pub compose_yml_files: Vec<String>,
    /// Extra files written next to the compose files.
    #[serde(default)]
    pub files: Vec<DeploymentFile>,
    /// Registry credentials used before pulling images.
    #[serde(default)]
    pub docker_auth: Vec<DockerAuth>,
    /// User on whose behalf the request is made.
    #[serde(default)]
    pub requester: Option<String>,
    /// Pull request to report progress on.
    #[serde(default)]
    pub pull_request: Option<PullRequestRef>,
    /// DNS name announced once the machine is ready.
    #[serde(default)]
    pub hostname: Option<String>,
}

/// Accepts requests and exposes job state and signal delivery.
#[derive(Clone)]
pub struct ProvisioningService {
    factory: Arc<BlueprintFactory>,
    tracker: JobTracker,
    store: Arc<dyn InstanceStore>,
    signals: Arc<SignalHub>,
    executor: Arc<dyn BlueprintExecutor>,
}

impl ProvisioningService {
    /// Wires the service.
    pub fn new(
        factory: BlueprintFactory,
        tracker: JobTracker,
        store: Arc<dyn InstanceStore>,
        signals: Arc<SignalHub>,
        executor: Arc<dyn BlueprintExecutor>,
    ) -> Self {
        Self {
            factory: Arc::new(factory),
            tracker,
            store,
            signals,
            executor,
        }
    }

    /// Validates `request` and schedules provisioning, or returns a
    /// pre-completed job when the requester already owns the provisioned
    /// instance.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Validation`] for malformed requests and
    /// unknown plans, and [`ProvisionError::NotFound`] when the instance row
    /// does not exist.
    pub async fn request_provisioning(
        &self,
        request: ProvisionRequest,
    ) -> Result<JobHandle, ProvisionError> {
        let ProvisionRequest {
            plan_id,
            instance,
            compose_yml_files,
            files,
            docker_auth,
            requester,
            pull_request,
            hostname,
        } = request;
        if instance.trim().is_empty() {
            return Err(ProvisionError::validation("instance name is required"));
        }
        self.factory.resolve_plan(&plan_id)?;
        let deployment = Deployment::new(compose_yml_files, files, docker_auth)?;

        let row = self
            .store
            .find_instance(instance.trim())
            .await?
            .ok_or_else(|| ProvisionError::NotFound {
                resource: format!("instance '{}'", instance.trim()),
            })?;
        if self.already_owned(&row, requester.as_deref()).await? {
            let handle = self.tracker.get_completed_job();
            info!(job_id = %handle.id(), instance = %row.name, "instance already provisioned for requester");
            return Ok(handle);
        }

        let blueprint = self
            .factory
            .create(&plan_id, row, deployment)?
            .with_pull_request(pull_request)
            .with_hostname(hostname);
        self.signals.open_job(blueprint.job_id());
        Ok(self
            .tracker
            .schedule_job(blueprint, Arc::clone(&self.executor)))
    }

    async fn already_owned(
        &self,
        row: &Instance,
        requester: Option<&str>,
    ) -> Result<bool, ProvisionError> {
        let Some(requester) = requester else {
            return Ok(false);
        };
        if !row.is_provisioned {
            return Ok(false);
        }
        let cluster = self.store.find_cluster(row.cluster_id).await?;
        Ok(cluster.is_some_and(|found| found.user_id.as_deref() == Some(requester)))
    }

    /// Current snapshot of `id`, if it is known and not expired.
    #[must_use]
    pub fn job_status(&self, id: JobId) -> Option<Job> {
        self.tracker.get_job_by_id(id)
    }

    /// Delivers a signal callback. Returns `false` when the job is unknown
    /// or has already ended.
    #[must_use]
    pub fn deliver_signal(&self, id: JobId, name: &str, report: SignalReport) -> bool {
        match self.tracker.get_job_by_id(id) {
            Some(job) if !job.is_ended => self.signals.deliver(id, name, report),
            _ => false,
        }
    }

    /// Cancels a running job. Returns `false` when the job is unknown.
    #[must_use]
    pub fn cancel(&self, id: JobId) -> bool {
        self.tracker.cancel(id)
    }

    /// Drops expired jobs and returns how many were removed.
    #[must_use]
    pub fn purge_expired(&self) -> usize {
        self.tracker.purge_expired()
    }
}
