//! Error taxonomy shared by the provisioning pipeline.
//!
//! Every failure the orchestrator can observe is folded into
//! [`ProvisionError`]. The runner consults [`ProvisionError::is_retryable`] to
//! decide whether an instruction may be attempted again, and a failed job
//! records the terminal error as a [`TerminalFailure`].

use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Errors raised while validating, building, or executing a provisioning run.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// Raised when the control channel to the machine cannot be opened.
    #[error("could not connect to {host}: {message}")]
    Connection {
        /// Address the channel tried to reach.
        host: String,
        /// Underlying transport error.
        message: String,
    },
    /// Raised when a remote action exits non-zero or is rejected.
    #[error("{action} failed during '{group}': {message}")]
    RemoteCommand {
        /// Kind of action that failed (for example `shell command`).
        action: String,
        /// Group path of the failing instruction.
        group: String,
        /// Short description safe to surface to pollers.
        message: String,
        /// Captured remote output, kept out of the display string.
        output: Option<String>,
        /// Diagnostic file listing reported by the remote side.
        files: Vec<String>,
    },
    /// Raised when an awaited callback never arrives.
    #[error("signal '{signal}' was not received within {timeout_secs} seconds")]
    SignalTimeout {
        /// Name of the awaited signal.
        signal: String,
        /// Bound that expired.
        timeout_secs: u64,
    },
    /// Raised when the target machine or record disappeared.
    #[error("{resource} not found")]
    NotFound {
        /// Human readable description of the missing resource.
        resource: String,
    },
    /// Raised when a request is malformed.
    #[error("invalid provisioning request: {0}")]
    Validation(String),
    /// Raised when the owning job was cancelled.
    #[error("provisioning was cancelled")]
    Cancelled,
    /// Raised when the machine provider fails.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the provider.
        message: String,
    },
    /// Raised when a retryable error persisted past the attempt bound.
    #[error("{source} (gave up after {attempts} attempts)")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last error observed.
        source: Box<ProvisionError>,
    },
}

impl ProvisionError {
    /// Returns `true` when the runner may retry the failed step in place.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::RemoteCommand { .. })
    }

    /// Stable machine readable code used in API responses.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection_error",
            Self::RemoteCommand { .. } => "remote_command_error",
            Self::SignalTimeout { .. } => "signal_timeout",
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation_error",
            Self::Cancelled => "cancelled",
            Self::Provider { .. } => "provider_error",
            Self::RetriesExhausted { source, .. } => source.code(),
        }
    }

    /// Builds a validation error from any displayable message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    fn innermost(&self) -> &Self {
        match self {
            Self::RetriesExhausted { source, .. } => source.innermost(),
            other => other,
        }
    }
}

/// Terminal outcome recorded on a failed job.
///
/// `message` and `api_response` are what pollers see. Remote output and the
/// diagnostic file listing are only forwarded to notifications.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalFailure {
    /// Human readable summary.
    pub message: String,
    /// Pre-rendered body for the status endpoint.
    pub api_response: Option<serde_json::Value>,
    /// Remote error text captured while failing, if any.
    #[serde(skip)]
    pub remote_output: Option<String>,
    /// Diagnostic file listing captured while failing.
    #[serde(skip)]
    pub diagnostic_files: Vec<String>,
}

impl TerminalFailure {
    /// Creates a failure with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            api_response: None,
            remote_output: None,
            diagnostic_files: Vec::new(),
        }
    }
}

impl From<&ProvisionError> for TerminalFailure {
    fn from(error: &ProvisionError) -> Self {
        let message = error.to_string();
        let (remote_output, diagnostic_files) = match error.innermost() {
            ProvisionError::RemoteCommand { output, files, .. } => (output.clone(), files.clone()),
            _ => (None, Vec::new()),
        };
        Self {
            api_response: Some(json!({ "code": error.code(), "message": message })),
            message,
            remote_output,
            diagnostic_files,
        }
    }
}
