//! Creates the machine and waits until it accepts SSH.

use std::sync::Arc;

use tracing::info;

use super::{ProvisioningState, StateFuture, StateOutcome};
use crate::backend::{Backend, MachineHandle, MachineNetworking, MachineRequest};
use crate::error::ProvisionError;
use crate::stage::StageKind;

const READY_STEP: usize = 1;

/// Drives machine creation through a [`Backend`].
///
/// Creation happens in `initialize`, which the runner lets finish even under
/// cancellation. The handle is kept as soon as the provider returns it, so
/// compensation can destroy the machine even when readiness never arrives.
#[derive(Debug)]
pub struct CreateMachineState<B: Backend> {
    backend: Arc<B>,
    request: MachineRequest,
    handle: Option<MachineHandle>,
    networking: Option<MachineNetworking>,
}

impl<B: Backend> CreateMachineState<B> {
    /// Creates the state for `request`.
    pub const fn new(backend: Arc<B>, request: MachineRequest) -> Self {
        Self {
            backend,
            request,
            handle: None,
            networking: None,
        }
    }

    /// Handle of the created machine, once the provider returned one.
    #[must_use]
    pub const fn handle(&self) -> Option<&MachineHandle> {
        self.handle.as_ref()
    }

    /// Connection details once the machine is ready.
    #[must_use]
    pub const fn networking(&self) -> Option<MachineNetworking> {
        self.networking
    }
}

impl<B: Backend> ProvisioningState for CreateMachineState<B> {
    fn description(&self) -> &'static str {
        StageKind::CreateInstance.description()
    }

    fn initialize(&mut self) -> StateFuture<'_, Result<(), ProvisionError>> {
        Box::pin(async move {
            if self.handle.is_some() {
                return Ok(());
            }
            // Never retried: a second create could leak the first machine.
            let created = self.backend.create(&self.request).await.map_err(|err| {
                match Into::<ProvisionError>::into(err) {
                    error if error.is_retryable() => ProvisionError::Provider {
                        message: error.to_string(),
                    },
                    error => error,
                }
            })?;
            info!(machine_id = %created.id, name = %created.name, "machine created");
            self.handle = Some(created);
            Ok(())
        })
    }

    fn update(&mut self) -> StateFuture<'_, StateOutcome> {
        Box::pin(async move {
            let Some(handle) = self.handle.clone() else {
                return StateOutcome::Failed(ProvisionError::Provider {
                    message: String::from("machine was not created"),
                });
            };
            match self.backend.wait_for_ready(&handle).await {
                Ok(networking) => {
                    self.networking = Some(networking);
                    StateOutcome::Succeeded
                }
                Err(err) => {
                    let error: ProvisionError = err.into();
                    if error.is_retryable() {
                        StateOutcome::Retry {
                            error,
                            step: READY_STEP,
                        }
                    } else {
                        StateOutcome::Failed(error)
                    }
                }
            }
        })
    }

    fn dispose(&mut self) {}
}
