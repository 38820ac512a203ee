//! Server creation for the Scaleway backend.
//!
//! Servers are created with `stopped: true` so the cloud-init payload is in
//! place before the first boot, then powered on explicitly.

use serde::{Deserialize, Serialize};

use crate::backend::MachineRequest;

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::{PowerOn, ServerSnapshot};

#[derive(Serialize)]
struct CreateServerRequest<'a> {
    name: &'a str,
    commercial_type: &'a str,
    image: &'a str,
    project: &'a str,
    routed_ip_enabled: bool,
    dynamic_ip_required: bool,
    tags: &'a [String],
    stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    cloud_init: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
}

#[derive(Deserialize)]
struct CreateServerResponse {
    server: scaleway_rs::ScalewayInstance,
}

fn is_commercial_type_error(api_err: &scaleway_rs::ScalewayApiError, request: &MachineRequest) -> bool {
    matches!(api_err.resource.as_deref(), Some("commercial_type"))
        || api_err
            .resource_id
            .as_deref()
            .is_some_and(|id| id == request.commercial_type)
        || (api_err.etype == "invalid_arguments"
            && api_err.message.to_ascii_lowercase().contains("commercial_type"))
}

fn provider(err: impl ToString) -> ScalewayBackendError {
    ScalewayBackendError::Provider {
        message: err.to_string(),
    }
}

impl ScalewayBackend {
    pub(in crate::scaleway) async fn power_on_if_needed(
        &self,
        zone: &str,
        snapshot: &ServerSnapshot,
    ) -> Result<(), ScalewayBackendError> {
        match snapshot.power_on() {
            PowerOn::AlreadyRunning => Ok(()),
            PowerOn::Required => {
                self.api
                    .perform_instance_action_async(zone, &snapshot.id, "poweron")
                    .await?;
                Ok(())
            }
            PowerOn::NotAllowed => Err(ScalewayBackendError::PowerOnNotAllowed {
                server_id: snapshot.id.clone(),
                state: snapshot.state.as_str().to_owned(),
            }),
        }
    }

    pub(in crate::scaleway) async fn create_server_stopped(
        &self,
        request: &MachineRequest,
        image_id: &str,
    ) -> Result<scaleway_rs::ScalewayInstance, ScalewayBackendError> {
        let url = format!(
            "{}/zones/{}/servers",
            super::SCALEWAY_INSTANCE_API_BASE,
            request.zone
        );
        let payload = CreateServerRequest {
            name: &request.name,
            commercial_type: &request.commercial_type,
            image: image_id,
            project: &request.project_id,
            routed_ip_enabled: true,
            dynamic_ip_required: true,
            tags: &request.tags,
            stopped: true,
            cloud_init: request.cloud_init.as_deref(),
            organization: request.organisation_id.as_deref(),
        };

        let response = super::HTTP_CLIENT
            .post(&url)
            .header("X-Auth-Token", &self.secret_key)
            .json(&payload)
            .send()
            .await
            .map_err(provider)?;
        let status = response.status();
        let body = response.bytes().await.map_err(provider)?;

        if status.is_success() {
            let parsed: CreateServerResponse = serde_json::from_slice(&body).map_err(provider)?;
            return Ok(parsed.server);
        }

        if let Ok(api_err) = serde_json::from_slice::<scaleway_rs::ScalewayApiError>(&body)
            && is_commercial_type_error(&api_err, request)
        {
            return Err(ScalewayBackendError::CommercialTypeUnavailable {
                commercial_type: request.commercial_type.clone(),
                zone: request.zone.clone(),
            });
        }
        Err(provider(String::from_utf8_lossy(&body)))
    }
}
