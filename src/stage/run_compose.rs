//! Third stage: upload the compose project, start it, and open the firewall.

use std::collections::BTreeSet;

use camino::Utf8PathBuf;
use shell_escape::unix::escape;

use super::{ProvisioningStage, StageContext, StageError, StageKind};
use crate::blueprint::{DeploymentFile, DockerAuth, compose_file_name};
use crate::firewall::{FirewallPort, necessary_firewall_ports};
use crate::instruction::{Instruction, InstructionCollector};

/// Signal raised by the remote side once `docker compose up` has finished.
pub const COMPOSE_SIGNAL: &str = "docker-compose";

/// Signal raised by the remote side once the firewall rules are active.
pub const FIREWALL_SIGNAL: &str = "open-firewall";

/// Deploys the requested compose stack into a scratch directory.
#[derive(Clone, Debug)]
pub struct RunComposeStage {
    context: StageContext,
    firewall_ports: BTreeSet<FirewallPort>,
}

impl RunComposeStage {
    /// Builds the stage from `context`.
    #[must_use]
    pub fn new(context: &StageContext) -> Self {
        let firewall_ports = necessary_firewall_ports(
            context.instance.kind,
            context.deployment.published_ports(),
        );
        Self {
            context: context.clone(),
            firewall_ports,
        }
    }

    pub(super) fn boxed(context: &StageContext) -> Box<dyn ProvisioningStage> {
        Box::new(Self::new(context))
    }

    fn compose_file_names(&self) -> Vec<String> {
        (0..self.context.deployment.compose_files().len())
            .map(compose_file_name)
            .collect()
    }

    fn upload(&self, relative: &str, contents: &str) -> Instruction {
        let target = Utf8PathBuf::from(self.context.remote_dir()).join(relative);
        let parent = target
            .parent()
            .map_or_else(|| self.context.remote_dir(), ToString::to_string);
        Instruction::shell(format!(
            "mkdir -p {} && printf '%s' {} > {}",
            escape(parent.into()),
            escape(contents.into()),
            escape(target.as_str().into()),
        ))
    }

    fn compose_up(&self) -> String {
        let files: Vec<String> = self
            .compose_file_names()
            .iter()
            .map(|name| format!("-f {}", escape(name.as_str().into())))
            .collect();
        format!(
            "cd {} && sudo docker compose {} up -d --remove-orphans",
            escape(self.context.remote_dir().into()),
            files.join(" ")
        )
    }

    fn open_firewall(&self) -> String {
        let mut rules: Vec<String> = self
            .firewall_ports
            .iter()
            .map(|port| format!("sudo ufw allow {}", port.ufw_rule()))
            .collect();
        rules.push(String::from("sudo ufw --force enable"));
        rules.join(" && ")
    }
}

fn login(auth: &DockerAuth) -> Instruction {
    Instruction::shell(format!(
        "printf '%s' {} | sudo docker login {} -u {} --password-stdin",
        escape(auth.password.as_str().into()),
        escape(auth.registry.as_str().into()),
        escape(auth.username.as_str().into()),
    ))
    .allow_retries()
}

impl ProvisioningStage for RunComposeStage {
    fn kind(&self) -> StageKind {
        StageKind::RunCompose
    }

    fn add_instructions_to(&self, collector: &mut InstructionCollector) -> Result<(), StageError> {
        let dir = escape(self.context.remote_dir().into()).into_owned();
        {
            let mut clearing = collector.collect_group("Clearing old files");
            clearing.collect_instruction(Instruction::shell(format!("sudo rm -rf {dir}")));
            clearing.collect_instruction(Instruction::shell(format!(
                "sudo mkdir -p {dir} && sudo chown \"$(id -u)\" {dir}"
            )));
        }
        {
            let mut uploading = collector.collect_group("Uploading files");
            let compose = self.context.deployment.compose_files();
            for (name, contents) in self.compose_file_names().iter().zip(compose) {
                uploading.collect_instruction(self.upload(name, contents));
            }
            for DeploymentFile { path, contents } in self.context.deployment.files() {
                uploading.collect_instruction(self.upload(path.as_str(), contents));
            }
        }
        let auths = self.context.deployment.docker_auth();
        if !auths.is_empty() {
            let mut registries = collector.collect_group("Authenticating registries");
            for auth in auths {
                registries.collect_instruction(login(auth));
            }
        }
        {
            let mut deploying = collector.collect_group("Deploying containers");
            let up = self
                .context
                .detached_with_signal(COMPOSE_SIGNAL, &self.compose_up());
            deploying.collect_instruction_with_signal(COMPOSE_SIGNAL, Some(up));
        }
        let mut firewall = collector.collect_group("Opening firewall");
        let open = self
            .context
            .detached_with_signal(FIREWALL_SIGNAL, &self.open_firewall());
        firewall.collect_instruction_with_signal(FIREWALL_SIGNAL, Some(open));
        Ok(())
    }
}
