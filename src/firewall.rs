//! Firewall port sets derived from instance kind and published ports.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::store::InstanceKind;

/// Transport protocol of a firewall rule.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

impl Protocol {
    /// Lower-case protocol name as used by ufw and compose.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// An inclusive port range opened for one protocol.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct FirewallPort {
    /// First port of the range.
    pub from: u16,
    /// Last port of the range; equal to `from` for a single port.
    pub to: u16,
    /// Protocol of the rule.
    pub protocol: Protocol,
}

impl FirewallPort {
    /// A single TCP port.
    #[must_use]
    pub const fn tcp(port: u16) -> Self {
        Self::tcp_range(port, port)
    }

    /// An inclusive TCP range.
    #[must_use]
    pub const fn tcp_range(from: u16, to: u16) -> Self {
        Self {
            from,
            to,
            protocol: Protocol::Tcp,
        }
    }

    /// Returns `true` when `port` falls inside this rule.
    #[must_use]
    pub const fn contains(&self, port: u16) -> bool {
        self.from <= port && port <= self.to
    }

    /// Rule text accepted by `ufw allow`, which writes ranges with a colon.
    #[must_use]
    pub fn ufw_rule(&self) -> String {
        if self.from == self.to {
            format!("{}/{}", self.from, self.protocol.as_str())
        } else {
            format!("{}:{}/{}", self.from, self.to, self.protocol.as_str())
        }
    }
}

impl fmt::Display for FirewallPort {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from == self.to {
            write!(formatter, "{}/{}", self.from, self.protocol.as_str())
        } else {
            write!(
                formatter,
                "{}-{}/{}",
                self.from,
                self.to,
                self.protocol.as_str()
            )
        }
    }
}

/// SSH must stay reachable on every machine.
pub const SSH_PORT: FirewallPort = FirewallPort::tcp(22);

const CONTROL_PLANE_PORTS: [FirewallPort; 3] = [
    FirewallPort::tcp(6443),
    FirewallPort::tcp_range(2379, 2380),
    FirewallPort::tcp_range(10250, 10252),
];

const WORKER_PORTS: [FirewallPort; 2] = [
    FirewallPort::tcp(10250),
    FirewallPort::tcp_range(30000, 32767),
];

/// Returns every rule a machine of `kind` publishing `published` needs.
#[must_use]
pub fn necessary_firewall_ports(
    kind: InstanceKind,
    published: &BTreeSet<FirewallPort>,
) -> BTreeSet<FirewallPort> {
    let mut ports = BTreeSet::from([SSH_PORT]);
    match kind {
        InstanceKind::Compose => {}
        InstanceKind::KubernetesControlPlane => ports.extend(CONTROL_PLANE_PORTS),
        InstanceKind::KubernetesWorker => ports.extend(WORKER_PORTS),
    }
    ports.extend(published.iter().copied());
    ports
}
