//! Readiness and teardown wait loops for the Scaleway backend.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::backend::{MachineHandle, MachineNetworking};

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::{ServerSnapshot, ServerState};

const SSH_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

impl ScalewayBackend {
    pub(in crate::scaleway) async fn fetch_server(
        &self,
        handle: &MachineHandle,
    ) -> Result<Option<ServerSnapshot>, ScalewayBackendError> {
        let mut servers = self
            .api
            .list_instances(&handle.zone)
            .servers(&handle.id)
            .per_page(1)
            .run_async()
            .await?;
        Ok(servers.pop().map(ServerSnapshot::from))
    }

    pub(in crate::scaleway) async fn wait_for_public_ip(
        &self,
        handle: &MachineHandle,
    ) -> Result<MachineNetworking, ScalewayBackendError> {
        let deadline = Instant::now() + self.wait_timeout;
        let mut saw_running = false;

        while Instant::now() <= deadline {
            let Some(server) = self.fetch_server(handle).await? else {
                return Err(ScalewayBackendError::NotFound {
                    resource: format!("server {}", handle.id),
                });
            };
            saw_running |= server.state == ServerState::Running;
            if let Some(public_ip) = server.ready_address() {
                return Ok(MachineNetworking {
                    public_ip,
                    ssh_port: self.ssh_port,
                });
            }
            sleep(self.poll_interval).await;
        }

        if saw_running {
            return Err(ScalewayBackendError::MissingPublicIp {
                server_id: handle.id.clone(),
            });
        }
        Err(ScalewayBackendError::Timeout {
            action: String::from("wait_for_ready"),
            server_id: handle.id.clone(),
        })
    }

    pub(in crate::scaleway) async fn wait_for_ssh_ready(
        &self,
        handle: &MachineHandle,
        networking: &MachineNetworking,
    ) -> Result<(), ScalewayBackendError> {
        let deadline = Instant::now() + self.wait_timeout;
        let addr = (networking.public_ip, networking.ssh_port);
        while Instant::now() <= deadline {
            if matches!(timeout(SSH_CONNECT_TIMEOUT, TcpStream::connect(addr)).await, Ok(Ok(_))) {
                return Ok(());
            }
            debug!(server_id = %handle.id, "ssh port not accepting connections yet");
            sleep(self.poll_interval).await;
        }
        Err(ScalewayBackendError::Timeout {
            action: String::from("wait_for_ssh_ready"),
            server_id: handle.id.clone(),
        })
    }

    pub(in crate::scaleway) async fn wait_until_gone(
        &self,
        handle: &MachineHandle,
    ) -> Result<(), ScalewayBackendError> {
        let deadline = Instant::now() + self.wait_timeout;
        while Instant::now() <= deadline {
            if self.fetch_server(handle).await?.is_none() {
                return Ok(());
            }
            sleep(self.poll_interval).await;
        }
        Err(ScalewayBackendError::ResidualResource {
            server_id: handle.id.clone(),
        })
    }
}
