//! Error types for the Scaleway backend.

use scaleway_rs::ScalewayError;
use thiserror::Error;

use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::error::ProvisionError;

/// Errors raised by the Scaleway backend.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayBackendError {
    /// Raised when the configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when a request is missing a required field.
    #[error("invalid machine request: {0}")]
    Validation(String),
    /// Raised when the requested image label cannot be resolved.
    #[error("image '{label}' (arch {arch}) not found in zone {zone}")]
    ImageNotFound {
        /// Image label passed by the caller.
        label: String,
        /// Architecture requested by the caller.
        arch: String,
        /// Zone used for the lookup.
        zone: String,
    },
    /// Raised when the commercial type is not offered in the zone.
    #[error("commercial type '{commercial_type}' not available in zone {zone}")]
    CommercialTypeUnavailable {
        /// Requested commercial type.
        commercial_type: String,
        /// Target zone.
        zone: String,
    },
    /// Raised when a wait loop exceeds its bound.
    #[error("timeout waiting for {action} on server {server_id}")]
    Timeout {
        /// Action being waited on.
        action: String,
        /// Provider server identifier.
        server_id: String,
    },
    /// Raised when the server runs but never exposes a public address.
    #[error("server {server_id} missing public IPv4 address")]
    MissingPublicIp {
        /// Provider server identifier.
        server_id: String,
    },
    /// Raised when teardown leaves a server visible in the API.
    #[error("server {server_id} still present after teardown")]
    ResidualResource {
        /// Provider server identifier.
        server_id: String,
    },
    /// Raised when a server cannot be powered on.
    #[error("server {server_id} in state {state} cannot be powered on")]
    PowerOnNotAllowed {
        /// Provider server identifier.
        server_id: String,
        /// Current state reported by the provider.
        state: String,
    },
    /// Raised when the provider reports that an addressed resource does not
    /// exist.
    #[error("{resource} not found")]
    NotFound {
        /// Description of the missing resource.
        resource: String,
    },
    /// Wrapper for provider level failures.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the provider SDK.
        message: String,
    },
}

/// Returns `true` when the provider reports that the addressed resource does
/// not exist.
pub(super) fn is_missing_resource(error: &ScalewayError) -> bool {
    matches!(
        error,
        ScalewayError::Api(api_err)
            if api_err.etype == "unknown_resource"
                || api_err.message.to_ascii_lowercase().contains("not found")
    )
}

impl From<ScalewayError> for ScalewayBackendError {
    fn from(value: ScalewayError) -> Self {
        match value {
            ScalewayError::Api(ref api_err) if is_missing_resource(&value) => {
                let kind = api_err.resource.as_deref().unwrap_or("resource");
                let resource = match api_err.resource_id.as_deref() {
                    Some(id) => format!("{kind} {id}"),
                    None => kind.to_owned(),
                };
                Self::NotFound { resource }
            }
            other => Self::Provider {
                message: other.to_string(),
            },
        }
    }
}

impl From<BackendError> for ScalewayBackendError {
    fn from(value: BackendError) -> Self {
        match value {
            BackendError::Validation(field) => Self::Validation(field),
        }
    }
}

impl From<ConfigError> for ScalewayBackendError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<ScalewayBackendError> for ProvisionError {
    fn from(value: ScalewayBackendError) -> Self {
        match value {
            ScalewayBackendError::Config(message) | ScalewayBackendError::Validation(message) => {
                Self::Validation(message)
            }
            ScalewayBackendError::MissingPublicIp { ref server_id } => Self::Connection {
                host: server_id.clone(),
                message: value.to_string(),
            },
            ScalewayBackendError::NotFound { resource } => Self::NotFound { resource },
            ScalewayBackendError::ImageNotFound { label, arch, zone } => Self::NotFound {
                resource: format!("image '{label}' (arch {arch}) in zone {zone}"),
            },
            other => Self::Provider {
                message: other.to_string(),
            },
        }
    }
}
