//! Configuration loading via `ortho-config`.
//!
//! Three sections are layered from defaults, `slipway.toml`, and environment
//! variables: [`ScalewayConfig`] for the machine provider, [`SshConfig`] for
//! the control channel, and [`OrchestratorConfig`] for the service itself.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::MachineTemplate;
use crate::blueprint::PlanCatalog;
use crate::cloud_init::{resolve_user_data, validate_sources};

/// Scaleway specific configuration derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCW")]
pub struct ScalewayConfig {
    /// Access key assigned to the Scaleway application. Not needed for API
    /// calls; accepted so a shared `scw` profile loads unchanged.
    pub access_key: Option<String>,
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Organisation identifier used by some Scaleway endpoints.
    pub default_organization_id: Option<String>,
    /// Project identifier machines are billed to.
    pub default_project_id: String,
    /// Availability zone for new machines. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Human-friendly image label (for example `Ubuntu 24.04 Noble Numbat`).
    #[ortho_config(default = "Ubuntu 24.04 Noble Numbat".to_owned())]
    pub default_image: String,
    /// CPU architecture used to select the correct image variant.
    #[ortho_config(default = "x86_64".to_owned())]
    pub default_architecture: String,
    /// Inline cloud-init payload applied on first boot.
    pub cloud_init_user_data: Option<String>,
    /// Path to a cloud-init payload. Supports `~/` expansion.
    pub cloud_init_user_data_file: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }

    fn require(&self, value: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [{}] in slipway.toml",
                self.description, self.env_var, self.toml_key, self.section
            )));
        }
        Ok(())
    }

    fn require_optional(&self, value: Option<&str>) -> Result<(), ConfigError> {
        value.map_or(Ok(()), |present| self.require(present))
    }
}

impl ScalewayConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("slipway")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Builds the machine template shared by every blueprint, resolving the
    /// cloud-init payload once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails or the cloud-init file
    /// cannot be read.
    pub fn as_template(&self) -> Result<MachineTemplate, ConfigError> {
        self.validate()?;
        let cloud_init = resolve_user_data(
            self.cloud_init_user_data.as_deref(),
            self.cloud_init_user_data_file.as_deref(),
        )
        .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        Ok(MachineTemplate {
            image_label: self.default_image.trim().to_owned(),
            zone: self.default_zone.trim().to_owned(),
            project_id: self.default_project_id.trim().to_owned(),
            organisation_id: self.default_organization_id.clone(),
            architecture: self.default_architecture.trim().to_owned(),
            cloud_init: Some(cloud_init),
        })
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty,
    /// or [`ConfigError::Invalid`] when both cloud-init sources are set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FieldMetadata::new(
            "Scaleway API secret key",
            "SCW_SECRET_KEY",
            "secret_key",
            "scaleway",
        )
        .require(&self.secret_key)?;
        FieldMetadata::new(
            "Scaleway project ID",
            "SCW_DEFAULT_PROJECT_ID",
            "default_project_id",
            "scaleway",
        )
        .require(&self.default_project_id)?;
        FieldMetadata::new("VM image", "SCW_DEFAULT_IMAGE", "default_image", "scaleway")
            .require(&self.default_image)?;
        FieldMetadata::new(
            "availability zone",
            "SCW_DEFAULT_ZONE",
            "default_zone",
            "scaleway",
        )
        .require(&self.default_zone)?;
        FieldMetadata::new(
            "CPU architecture",
            "SCW_DEFAULT_ARCHITECTURE",
            "default_architecture",
            "scaleway",
        )
        .require(&self.default_architecture)?;
        validate_sources(
            self.cloud_init_user_data.as_deref(),
            self.cloud_init_user_data_file.as_deref(),
        )
        .map_err(|err| ConfigError::Invalid(err.to_string()))
    }
}

/// SSH settings for the control channel.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SLIPWAY_SSH",
    discovery(
        app_name = "slipway",
        env_var = "SLIPWAY_CONFIG_PATH",
        config_file_name = "slipway.toml",
        dotfile_name = ".slipway.toml",
        project_file_name = "slipway.toml"
    )
)]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = "root".to_owned())]
    pub user: String,
    /// Whether to force batch mode so SSH never prompts.
    #[ortho_config(default = true)]
    pub batch_mode: bool,
    /// Whether to enforce host key checking. Machines are fresh, so this
    /// defaults to off.
    #[ortho_config(default = false)]
    pub strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null`.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub known_hosts_file: String,
    /// Private key used to authenticate. Supports `~/` expansion; when unset
    /// SSH falls back to its default key locations.
    pub identity_file: Option<String>,
    /// Seconds SSH waits for the TCP handshake.
    #[ortho_config(default = 10)]
    pub connect_timeout_secs: u64,
}

impl SshConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("slipway")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Ensures required values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FieldMetadata::new("ssh executable", "SLIPWAY_SSH_BIN", "bin", "ssh").require(&self.bin)?;
        FieldMetadata::new("ssh user", "SLIPWAY_SSH_USER", "user", "ssh").require(&self.user)?;
        FieldMetadata::new(
            "ssh identity file",
            "SLIPWAY_SSH_IDENTITY_FILE",
            "identity_file",
            "ssh",
        )
        .require_optional(self.identity_file.as_deref())
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            bin: String::from("ssh"),
            user: String::from("root"),
            batch_mode: true,
            strict_host_key_checking: false,
            known_hosts_file: String::from("/dev/null"),
            identity_file: None,
            connect_timeout_secs: 10,
        }
    }
}

/// Service level settings: listener, callbacks, retry bounds, and hooks.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SLIPWAY",
    discovery(
        app_name = "slipway",
        env_var = "SLIPWAY_CONFIG_PATH",
        config_file_name = "slipway.toml",
        dotfile_name = ".slipway.toml",
        project_file_name = "slipway.toml"
    )
)]
pub struct OrchestratorConfig {
    /// Socket address the HTTP API binds to.
    #[ortho_config(default = "0.0.0.0:8080".to_owned())]
    pub listen_addr: String,
    /// Public base URL machines use to reach the signal endpoint.
    pub callback_base_url: String,
    /// Attempts per retryable instruction, including the first.
    #[ortho_config(default = 3)]
    pub retry_max_attempts: u32,
    /// Pause between attempts; multiplied by the attempt number.
    #[ortho_config(default = 2000)]
    pub retry_backoff_ms: u64,
    /// Bound on a single shell command or HTTP call.
    #[ortho_config(default = 600)]
    pub command_timeout_secs: u64,
    /// Bound on waiting for one signal callback.
    #[ortho_config(default = 900)]
    pub signal_timeout_secs: u64,
    /// How long finished jobs stay queryable.
    #[ortho_config(default = 3600)]
    pub job_retention_secs: u64,
    /// How often expired jobs are purged.
    #[ortho_config(default = 60)]
    pub purge_interval_secs: u64,
    /// Incoming webhook that receives chat notifications.
    pub chat_webhook_url: Option<String>,
    /// Endpoint the final stage announces ready instances to.
    pub registration_url: Option<String>,
    /// Plan catalogue; defaults to the built-in plans.
    #[ortho_config(skip_cli)]
    pub plans: Option<PlanSetting>,
    /// YAML file of cluster and instance rows loaded at startup.
    pub inventory_file: Option<String>,
}

impl OrchestratorConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("slipway")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Ensures required values are present and bounds are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for empty required fields and
    /// [`ConfigError::Invalid`] for unusable values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FieldMetadata::new(
            "listen address",
            "SLIPWAY_LISTEN_ADDR",
            "listen_addr",
            "slipway",
        )
        .require(&self.listen_addr)?;
        FieldMetadata::new(
            "callback base URL",
            "SLIPWAY_CALLBACK_BASE_URL",
            "callback_base_url",
            "slipway",
        )
        .require(&self.callback_base_url)?;
        FieldMetadata::new(
            "chat webhook URL",
            "SLIPWAY_CHAT_WEBHOOK_URL",
            "chat_webhook_url",
            "slipway",
        )
        .require_optional(self.chat_webhook_url.as_deref())?;
        FieldMetadata::new(
            "registration URL",
            "SLIPWAY_REGISTRATION_URL",
            "registration_url",
            "slipway",
        )
        .require_optional(self.registration_url.as_deref())?;
        FieldMetadata::new(
            "inventory file",
            "SLIPWAY_INVENTORY_FILE",
            "inventory_file",
            "slipway",
        )
        .require_optional(self.inventory_file.as_deref())?;
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::Invalid(String::from(
                "retry_max_attempts must be at least 1",
            )));
        }
        if self.purge_interval_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "purge_interval_secs must be at least 1",
            )));
        }
        self.plan_catalog().map(|_| ())
    }

    /// Returns the configured plan catalogue.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `plans` is malformed.
    pub fn plan_catalog(&self) -> Result<PlanCatalog, ConfigError> {
        self.plans.as_ref().map_or_else(
            || Ok(PlanCatalog::default()),
            PlanSetting::to_catalog,
        )
    }

    /// Bound on a single shell command or HTTP call.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Bound on waiting for one signal.
    #[must_use]
    pub const fn signal_timeout(&self) -> Duration {
        Duration::from_secs(self.signal_timeout_secs)
    }

    /// Pause before the second attempt.
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Retention of finished jobs.
    #[must_use]
    pub const fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    /// Interval between purges of expired jobs.
    #[must_use]
    pub const fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

/// Plan catalogue as written in configuration.
///
/// `SLIPWAY_PLANS=2gb=DEV1-S,4gb=DEV1-M` arrives as a list once the
/// environment layer splits it on commas, a single pair stays a string, and
/// a `[slipway.plans]` table maps ids to commercial types.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PlanSetting {
    /// Comma separated `id=TYPE` pairs.
    Pairs(String),
    /// One `id=TYPE` pair per entry.
    List(Vec<String>),
    /// Plan id to commercial type.
    Table(BTreeMap<String, String>),
}

impl PlanSetting {
    /// Builds the catalogue this setting describes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for malformed pairs or an empty
    /// catalogue.
    pub fn to_catalog(&self) -> Result<PlanCatalog, ConfigError> {
        let parsed = match self {
            Self::Pairs(text) => PlanCatalog::parse(text),
            Self::List(pairs) => PlanCatalog::parse(&pairs.join(",")),
            Self::Table(table) => PlanCatalog::parse(
                &table
                    .iter()
                    .map(|(id, commercial_type)| format!("{id}={commercial_type}"))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        };
        parsed.map_err(|err| ConfigError::Invalid(err.to_string()))
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
