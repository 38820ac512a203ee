//! Server lifecycle helpers for the Scaleway backend.

use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;

mod create;
mod image;
mod wait;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Power state reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ServerState {
    Running,
    Stopped,
    Other(String),
}

impl From<&str> for ServerState {
    fn from(value: &str) -> Self {
        match value {
            "running" => Self::Running,
            "stopped" | "stopped in place" => Self::Stopped,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl ServerState {
    fn as_str(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Other(state) => state,
        }
    }
}

/// What has to happen before a freshly created server boots.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum PowerOn {
    AlreadyRunning,
    Required,
    NotAllowed,
}

/// The parts of a provider server record the lifecycle loops inspect.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ServerSnapshot {
    pub(crate) id: String,
    pub(crate) state: ServerState,
    pub(crate) allowed_actions: Vec<String>,
    pub(crate) public_ip: Option<String>,
}

impl From<scaleway_rs::ScalewayInstance> for ServerSnapshot {
    fn from(server: scaleway_rs::ScalewayInstance) -> Self {
        Self {
            state: ServerState::from(server.state.as_str()),
            id: server.id,
            allowed_actions: server.allowed_actions,
            public_ip: server.public_ip.map(|ip| ip.address),
        }
    }
}

impl ServerSnapshot {
    pub(crate) fn power_on(&self) -> PowerOn {
        if self.state == ServerState::Running {
            PowerOn::AlreadyRunning
        } else if self.allowed_actions.iter().any(|action| action == "poweron") {
            PowerOn::Required
        } else {
            PowerOn::NotAllowed
        }
    }

    /// Public address once the server is running and has one.
    pub(crate) fn ready_address(&self) -> Option<IpAddr> {
        if self.state != ServerState::Running {
            return None;
        }
        self.public_ip.as_deref().and_then(|ip| ip.parse().ok())
    }
}

#[cfg(test)]
mod tests;
