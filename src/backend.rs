//! Machine provider abstraction used by the pipeline runner and the
//! compensation layer.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use thiserror::Error;

use crate::error::ProvisionError;

/// Provider-independent defaults shared by every machine request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MachineTemplate {
    /// Human readable boot image label, resolved by the backend.
    pub image_label: String,
    /// Target availability zone (for example `fr-par-1`).
    pub zone: String,
    /// Project identifier used for billing and ownership.
    pub project_id: String,
    /// Optional organisation identifier when the provider requires one.
    pub organisation_id: Option<String>,
    /// CPU architecture requested for the machine.
    pub architecture: String,
    /// Optional cloud-init payload consumed on first boot.
    pub cloud_init: Option<String>,
}

impl MachineTemplate {
    /// Builds a request for a machine called `name` of `commercial_type`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when a required field is empty.
    pub fn request_for(
        &self,
        name: &str,
        commercial_type: &str,
    ) -> Result<MachineRequest, BackendError> {
        MachineRequest::builder()
            .name(name)
            .image_label(&self.image_label)
            .commercial_type(commercial_type)
            .zone(&self.zone)
            .project_id(&self.project_id)
            .organisation_id(self.organisation_id.clone())
            .architecture(&self.architecture)
            .cloud_init(self.cloud_init.clone())
            .tag("slipway")
            .tag(format!("instance={}", name.trim()))
            .build()
    }
}

/// Parameters required to create a new machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MachineRequest {
    /// Machine name, equal to the instance row name.
    pub name: String,
    /// Boot image label.
    pub image_label: String,
    /// Commercial type resolved from the plan (for example `DEV1-S`).
    pub commercial_type: String,
    /// Target availability zone.
    pub zone: String,
    /// Project identifier.
    pub project_id: String,
    /// Optional organisation identifier.
    pub organisation_id: Option<String>,
    /// CPU architecture.
    pub architecture: String,
    /// Provider tags applied to the machine.
    pub tags: Vec<String>,
    /// Optional cloud-init payload.
    pub cloud_init: Option<String>,
}

impl MachineRequest {
    /// Starts a builder for a [`MachineRequest`].
    #[must_use]
    pub fn builder() -> MachineRequestBuilder {
        MachineRequestBuilder::default()
    }

    /// Validates the request, naming the first empty required field.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when a required field is empty.
    pub fn validate(&self) -> Result<(), BackendError> {
        let required = [
            ("name", &self.name),
            ("image_label", &self.image_label),
            ("commercial_type", &self.commercial_type),
            ("zone", &self.zone),
            ("project_id", &self.project_id),
            ("architecture", &self.architecture),
        ];
        required
            .iter()
            .find(|(_, value)| value.is_empty())
            .map_or(Ok(()), |(field, _)| {
                Err(BackendError::Validation((*field).to_owned()))
            })
    }
}

/// Builder for [`MachineRequest`] that trims inputs and validates on build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MachineRequestBuilder {
    name: String,
    image_label: String,
    commercial_type: String,
    zone: String,
    project_id: String,
    organisation_id: Option<String>,
    architecture: String,
    tags: Vec<String>,
    cloud_init: Option<String>,
}

impl MachineRequestBuilder {
    /// Sets the machine name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the image label.
    #[must_use]
    pub fn image_label(mut self, value: impl Into<String>) -> Self {
        self.image_label = value.into();
        self
    }

    /// Sets the commercial type.
    #[must_use]
    pub fn commercial_type(mut self, value: impl Into<String>) -> Self {
        self.commercial_type = value.into();
        self
    }

    /// Sets the availability zone.
    #[must_use]
    pub fn zone(mut self, value: impl Into<String>) -> Self {
        self.zone = value.into();
        self
    }

    /// Sets the project identifier.
    #[must_use]
    pub fn project_id(mut self, value: impl Into<String>) -> Self {
        self.project_id = value.into();
        self
    }

    /// Sets the optional organisation identifier.
    #[must_use]
    pub fn organisation_id(mut self, value: Option<String>) -> Self {
        self.organisation_id = value;
        self
    }

    /// Sets the architecture.
    #[must_use]
    pub fn architecture(mut self, value: impl Into<String>) -> Self {
        self.architecture = value.into();
        self
    }

    /// Appends a provider tag.
    #[must_use]
    pub fn tag(mut self, value: impl Into<String>) -> Self {
        self.tags.push(value.into());
        self
    }

    /// Sets the optional cloud-init payload.
    #[must_use]
    pub fn cloud_init(mut self, value: Option<String>) -> Self {
        self.cloud_init = value;
        self
    }

    /// Builds and validates the [`MachineRequest`].
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when a required field is empty.
    pub fn build(self) -> Result<MachineRequest, BackendError> {
        let request = MachineRequest {
            name: self.name.trim().to_owned(),
            image_label: self.image_label.trim().to_owned(),
            commercial_type: self.commercial_type.trim().to_owned(),
            zone: self.zone.trim().to_owned(),
            project_id: self.project_id.trim().to_owned(),
            organisation_id: self.organisation_id.map(|value| value.trim().to_owned()),
            architecture: self.architecture.trim().to_owned(),
            tags: self.tags,
            cloud_init: self.cloud_init,
        };
        request.validate()?;
        Ok(request)
    }
}

/// Handle returned by a backend once a machine has been created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MachineHandle {
    /// Provider specific identifier.
    pub id: String,
    /// Zone in which the machine was created.
    pub zone: String,
    /// Machine name.
    pub name: String,
}

/// Connection details for reaching a machine once it is ready.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MachineNetworking {
    /// Public address assigned by the provider.
    pub public_ip: IpAddr,
    /// TCP port for SSH.
    pub ssh_port: u16,
}

/// Errors raised while assembling backend requests.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

impl From<BackendError> for ProvisionError {
    fn from(value: BackendError) -> Self {
        Self::Validation(value.to_string())
    }
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface implemented by machine providers.
pub trait Backend: Send + Sync {
    /// Provider specific error type returned by the backend.
    type Error: std::error::Error + Into<ProvisionError> + Send + Sync + 'static;

    /// Creates a new machine and returns a handle used for subsequent calls.
    fn create<'a>(
        &'a self,
        request: &'a MachineRequest,
    ) -> BackendFuture<'a, MachineHandle, Self::Error>;

    /// Waits until the machine accepts SSH connections.
    fn wait_for_ready<'a>(
        &'a self,
        handle: &'a MachineHandle,
    ) -> BackendFuture<'a, MachineNetworking, Self::Error>;

    /// Destroys the machine. A machine the provider no longer knows about is
    /// treated as already destroyed.
    fn destroy(&self, handle: MachineHandle) -> BackendFuture<'_, (), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> MachineTemplate {
        MachineTemplate {
            image_label: String::from("Ubuntu 24.04 Noble Numbat"),
            zone: String::from("fr-par-1"),
            project_id: String::from("project"),
            organisation_id: None,
            architecture: String::from("x86_64"),
            cloud_init: None,
        }
    }

    #[test]
    fn template_tags_requests_with_the_instance_name() {
        let request = template().request_for(" web-1 ", "DEV1-S").expect("valid request");
        assert_eq!(request.name, "web-1");
        assert_eq!(request.commercial_type, "DEV1-S");
        assert_eq!(
            request.tags,
            vec![String::from("slipway"), String::from("instance=web-1")]
        );
    }

    #[test]
    fn rejects_requests_without_a_commercial_type() {
        let err = template().request_for("web-1", "  ").expect_err("empty type");
        assert_eq!(err, BackendError::Validation(String::from("commercial_type")));
    }
}
