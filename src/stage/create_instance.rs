//! First stage: the machine exists and has finished its first boot.

use super::{ProvisioningStage, StageContext, StageError, StageKind};
use crate::instruction::{Instruction, InstructionCollector};

/// Marker cloud-init writes once first boot has finished.
const BOOT_FINISHED_MARKER: &str = "/var/lib/cloud/instance/boot-finished";
/// Seconds between marker checks on images without the `cloud-init` CLI.
const MARKER_POLL_SECS: u32 = 2;

/// Waits for the freshly created machine to finish booting.
///
/// Machine creation itself is performed by the runner through the backend
/// before any control channel exists, so this stage only contributes the
/// readiness probe that gates every later command. The probe blocks on the
/// machine until first boot completes, so a slow cloud-config is bounded by
/// the command timeout rather than by the retry budget.
#[derive(Clone, Debug)]
pub struct CreateInstanceStage {
    instance_name: String,
    commercial_type: String,
}

impl CreateInstanceStage {
    /// Builds the stage from `context`.
    #[must_use]
    pub fn new(context: &StageContext) -> Self {
        Self {
            instance_name: context.instance.name.clone(),
            commercial_type: context.plan.commercial_type.clone(),
        }
    }

    pub(super) fn boxed(context: &StageContext) -> Box<dyn ProvisioningStage> {
        Box::new(Self::new(context))
    }
}

impl ProvisioningStage for CreateInstanceStage {
    fn kind(&self) -> StageKind {
        StageKind::CreateInstance
    }

    fn add_instructions_to(&self, collector: &mut InstructionCollector) -> Result<(), StageError> {
        let title = format!(
            "Waiting for {} ({}) to boot",
            self.instance_name, self.commercial_type
        );
        let mut boot = collector.collect_group(title);
        boot.collect_instruction(Instruction::shell(boot_wait_command()).allow_retries());
        Ok(())
    }
}

/// Blocks until cloud-init reports completion, then until the marker exists.
/// `status --wait` exits non-zero for degraded runs, which still count as
/// booted once the marker is written.
fn boot_wait_command() -> String {
    format!(
        "cloud-init status --wait >/dev/null 2>&1 || true; \
         until test -f {BOOT_FINISHED_MARKER}; do sleep {MARKER_POLL_SECS}; done"
    )
}
