//! Final stage: confirm the stack is up and register the instance.

use serde_json::json;
use shell_escape::unix::escape;

use super::{ProvisioningStage, StageContext, StageError, StageKind};
use crate::instruction::{HttpCall, HttpVerb, Instruction, InstructionCollector};

/// Verifies the running stack and optionally announces it to a registry.
#[derive(Clone, Debug)]
pub struct CompleteSetupStage {
    remote_dir: String,
    instance_name: String,
    registration_url: Option<String>,
}

impl CompleteSetupStage {
    /// Builds the stage from `context`.
    #[must_use]
    pub fn new(context: &StageContext) -> Self {
        Self {
            remote_dir: context.remote_dir(),
            instance_name: context.instance.name.clone(),
            registration_url: context.registration_url.clone(),
        }
    }

    pub(super) fn boxed(context: &StageContext) -> Box<dyn ProvisioningStage> {
        Box::new(Self::new(context))
    }
}

impl ProvisioningStage for CompleteSetupStage {
    fn kind(&self) -> StageKind {
        StageKind::CompleteSetup
    }

    fn add_instructions_to(&self, collector: &mut InstructionCollector) -> Result<(), StageError> {
        let mut finalizing = collector.collect_group("Finalizing");
        finalizing.collect_instruction(
            Instruction::shell(format!(
                "cd {} && sudo docker compose ps",
                escape(self.remote_dir.as_str().into())
            ))
            .allow_retries(),
        );
        if let Some(url) = &self.registration_url {
            let body = json!({ "instance": self.instance_name, "status": "ready" });
            finalizing.collect_instruction(
                Instruction::http(HttpCall {
                    verb: HttpVerb::Post,
                    url: url.clone(),
                    headers: vec![(
                        String::from("Content-Type"),
                        String::from("application/json"),
                    )],
                    body: Some(body.to_string()),
                })
                .allow_retries(),
            );
        }
        Ok(())
    }
}
