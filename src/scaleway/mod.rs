//! Scaleway implementation of the machine [`Backend`].

mod error;
mod lifecycle;

use std::time::Duration;

use scaleway_rs::ScalewayApi;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendFuture, MachineHandle, MachineNetworking, MachineRequest};
use crate::config::ScalewayConfig;
use lifecycle::ServerSnapshot;

pub use error::ScalewayBackendError;

const DEFAULT_SSH_PORT: u16 = 22;
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Backend that provisions machines through the Scaleway Instances API.
#[derive(Clone)]
pub struct ScalewayBackend {
    api: ScalewayApi,
    secret_key: String,
    ssh_port: u16,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl ScalewayBackend {
    /// Constructs a new backend from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError::Config`] when the configuration fails
    /// validation.
    pub fn new(config: &ScalewayConfig) -> Result<Self, ScalewayBackendError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            secret_key: config.secret_key.clone(),
            ssh_port: DEFAULT_SSH_PORT,
            poll_interval: POLL_INTERVAL,
            wait_timeout: WAIT_TIMEOUT,
        })
    }

    /// Overrides the polling cadence and overall bound of the wait loops.
    #[must_use]
    pub const fn with_wait(mut self, poll_interval: Duration, wait_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.wait_timeout = wait_timeout;
        self
    }
}

impl Backend for ScalewayBackend {
    type Error = ScalewayBackendError;

    fn create<'a>(
        &'a self,
        request: &'a MachineRequest,
    ) -> BackendFuture<'a, MachineHandle, Self::Error> {
        Box::pin(async move {
            request.validate()?;
            let image_id = self.resolve_image_id(request).await?;
            let server = self.create_server_stopped(request, &image_id).await?;
            let snapshot = ServerSnapshot::from(server);
            let handle = MachineHandle {
                id: snapshot.id.clone(),
                zone: request.zone.clone(),
                name: request.name.clone(),
            };
            if let Err(err) = self.power_on_if_needed(&request.zone, &snapshot).await {
                // The caller never sees this server, so nobody else removes it.
                if let Err(cleanup) = self.destroy(handle.clone()).await {
                    warn!(server_id = %handle.id, error = %cleanup, "could not remove server after power-on failure");
                }
                return Err(err);
            }
            info!(
                server_id = %snapshot.id,
                name = %request.name,
                commercial_type = %request.commercial_type,
                zone = %request.zone,
                "created scaleway server"
            );
            Ok(handle)
        })
    }

    fn wait_for_ready<'a>(
        &'a self,
        handle: &'a MachineHandle,
    ) -> BackendFuture<'a, MachineNetworking, Self::Error> {
        Box::pin(async move {
            let networking = self.wait_for_public_ip(handle).await?;
            self.wait_for_ssh_ready(handle, &networking).await?;
            Ok(networking)
        })
    }

    fn destroy(&self, handle: MachineHandle) -> BackendFuture<'_, (), Self::Error> {
        Box::pin(async move {
            if self.fetch_server(&handle).await?.is_none() {
                debug!(server_id = %handle.id, "server already gone");
                return Ok(());
            }
            if let Err(err) = self
                .api
                .delete_instance_async(&handle.zone, &handle.id)
                .await
            {
                if error::is_missing_resource(&err) {
                    return Ok(());
                }
                return Err(err.into());
            }
            self.wait_until_gone(&handle).await?;
            info!(server_id = %handle.id, name = %handle.name, "destroyed scaleway server");
            Ok(())
        })
    }
}
