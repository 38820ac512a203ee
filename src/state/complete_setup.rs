//! Final state: runs the completion stage, then marks the instance
//! provisioned.

use std::sync::Arc;

use tracing::info;

use super::{ProvisioningState, SshStageState, StateFuture, StateOutcome};
use crate::error::ProvisionError;
use crate::store::InstanceStore;

/// Wraps the completion stage's [`SshStageState`] and flips
/// `is_provisioned` once its remote work succeeds.
pub struct CompleteInstanceSetupState {
    inner: SshStageState,
    store: Arc<dyn InstanceStore>,
    instance_name: String,
}

impl CompleteInstanceSetupState {
    /// Creates the state for `instance_name`.
    pub fn new(
        inner: SshStageState,
        store: Arc<dyn InstanceStore>,
        instance_name: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            store,
            instance_name: instance_name.into(),
        }
    }
}

impl ProvisioningState for CompleteInstanceSetupState {
    fn description(&self) -> &'static str {
        self.inner.description()
    }

    fn initialize(&mut self) -> StateFuture<'_, Result<(), ProvisionError>> {
        self.inner.initialize()
    }

    fn update(&mut self) -> StateFuture<'_, StateOutcome> {
        Box::pin(async move {
            let outcome = self.inner.update().await;
            if outcome != StateOutcome::Succeeded {
                return outcome;
            }
            match self.store.mark_provisioned(&self.instance_name).await {
                Ok(()) => {
                    info!(instance = %self.instance_name, "instance marked provisioned");
                    StateOutcome::Succeeded
                }
                Err(err) => StateOutcome::Failed(err.into()),
            }
        })
    }

    fn dispose(&mut self) {
        self.inner.dispose();
    }
}
