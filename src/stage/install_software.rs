//! Second stage: base packages and the container runtime.

use super::{ProvisioningStage, StageContext, StageError, StageKind};
use crate::instruction::{Instruction, InstructionCollector};

const APT_PACKAGES: &str = "curl ufw";
const DOCKER_INSTALL: &str = "command -v docker >/dev/null 2>&1 || curl -fsSL https://get.docker.com | sudo sh";

/// Installs the tooling every compose deployment relies on.
#[derive(Clone, Debug, Default)]
pub struct InstallSoftwareStage;

impl InstallSoftwareStage {
    /// Builds the stage. It reads nothing from `context`.
    #[must_use]
    pub const fn new(_context: &StageContext) -> Self {
        Self
    }

    pub(super) fn boxed(context: &StageContext) -> Box<dyn ProvisioningStage> {
        Box::new(Self::new(context))
    }
}

impl ProvisioningStage for InstallSoftwareStage {
    fn kind(&self) -> StageKind {
        StageKind::InstallSoftware
    }

    fn add_instructions_to(&self, collector: &mut InstructionCollector) -> Result<(), StageError> {
        {
            let mut packages = collector.collect_group("Installing base packages");
            packages.collect_instruction(
                Instruction::shell("sudo apt-get update -qq").allow_retries(),
            );
            packages.collect_instruction(
                Instruction::shell(format!(
                    "sudo DEBIAN_FRONTEND=noninteractive apt-get install -y -qq {APT_PACKAGES}"
                ))
                .allow_retries(),
            );
        }
        let mut docker = collector.collect_group("Installing Docker");
        docker.collect_instruction(Instruction::shell(DOCKER_INSTALL).allow_retries());
        docker.collect_instruction(
            Instruction::shell("sudo systemctl enable --now docker").allow_retries(),
        );
        Ok(())
    }
}
