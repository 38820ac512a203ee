//! Validated deployment inputs: compose files, extra files, registry auth.

use std::collections::BTreeSet;
use std::fmt;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::compose;
use crate::error::ProvisionError;
use crate::firewall::FirewallPort;

/// An extra file written next to the compose files.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct DeploymentFile {
    /// Path relative to the remote working directory.
    pub path: Utf8PathBuf,
    /// File contents.
    pub contents: String,
}

/// Credentials for one container registry.
#[derive(Clone, Deserialize, Eq, PartialEq)]
pub struct DockerAuth {
    /// Registry host (for example `ghcr.io`).
    pub registry: String,
    /// Registry user.
    pub username: String,
    /// Registry password or token.
    pub password: String,
}

impl fmt::Debug for DockerAuth {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DockerAuth")
            .field("registry", &self.registry)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Remote name of the compose file at `index`.
#[must_use]
pub fn compose_file_name(index: usize) -> String {
    match index {
        0 => String::from("docker-compose.yml"),
        n => format!("docker-compose.{n}.yml"),
    }
}

/// Compose project contents plus the host ports it publishes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Deployment {
    compose_files: Vec<String>,
    files: Vec<DeploymentFile>,
    docker_auth: Vec<DockerAuth>,
    published_ports: BTreeSet<FirewallPort>,
}

impl Deployment {
    /// Validates the inputs and discovers published ports.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Validation`] when no compose file is given,
    /// a compose file is malformed, a file path escapes the working directory
    /// or collides with an uploaded compose file, or a registry credential is
    /// incomplete.
    pub fn new(
        compose_files: Vec<String>,
        files: Vec<DeploymentFile>,
        docker_auth: Vec<DockerAuth>,
    ) -> Result<Self, ProvisionError> {
        if compose_files.iter().all(|contents| contents.trim().is_empty()) {
            return Err(ProvisionError::validation(
                "at least one non-empty compose file is required",
            ));
        }
        let mut published_ports = BTreeSet::new();
        for (index, contents) in compose_files.iter().enumerate() {
            let ports = compose::published_ports(index, contents)
                .map_err(|err| ProvisionError::validation(err.to_string()))?;
            published_ports.extend(ports);
        }
        for file in &files {
            validate_relative(&file.path)?;
            reject_compose_name(&file.path)?;
        }
        for auth in &docker_auth {
            if auth.registry.trim().is_empty() || auth.username.trim().is_empty() {
                return Err(ProvisionError::validation(
                    "docker auth entries need a registry and a username",
                ));
            }
        }
        Ok(Self {
            compose_files,
            files,
            docker_auth,
            published_ports,
        })
    }

    /// Compose file contents in request order.
    #[must_use]
    pub fn compose_files(&self) -> &[String] {
        &self.compose_files
    }

    /// Extra files to upload.
    #[must_use]
    pub fn files(&self) -> &[DeploymentFile] {
        &self.files
    }

    /// Registry credentials to log in with before starting the stack.
    #[must_use]
    pub fn docker_auth(&self) -> &[DockerAuth] {
        &self.docker_auth
    }

    /// Host ports published by the compose files.
    #[must_use]
    pub const fn published_ports(&self) -> &BTreeSet<FirewallPort> {
        &self.published_ports
    }
}

fn reject_compose_name(path: &Utf8Path) -> Result<(), ProvisionError> {
    let mut names = path.components().filter_map(|component| match component {
        Utf8Component::Normal(name) => Some(name),
        _ => None,
    });
    let (Some(name), None) = (names.next(), names.next()) else {
        return Ok(());
    };
    let reserved = name == "docker-compose.yml"
        || name
            .strip_prefix("docker-compose.")
            .and_then(|rest| rest.strip_suffix(".yml"))
            .is_some_and(|index| !index.is_empty() && index.bytes().all(|byte| byte.is_ascii_digit()));
    if reserved {
        return Err(ProvisionError::validation(format!(
            "file path '{path}' is reserved for the compose files"
        )));
    }
    Ok(())
}

fn validate_relative(path: &Utf8Path) -> Result<(), ProvisionError> {
    let mut components = path.components().peekable();
    if components.peek().is_none() {
        return Err(ProvisionError::validation("file paths must not be empty"));
    }
    let contained = components
        .all(|component| matches!(component, Utf8Component::Normal(_) | Utf8Component::CurDir));
    if contained {
        Ok(())
    } else {
        Err(ProvisionError::validation(format!(
            "file path '{path}' must stay inside the deployment directory"
        )))
    }
}
