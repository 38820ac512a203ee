//! Published-port discovery for compose files.
//!
//! Only the host side of each `ports` entry matters here: it decides which
//! firewall rules the deploy stage opens. Short syntax (`"8080:80"`,
//! `"127.0.0.1:8080:80"`, `"53:53/udp"`, `"8000-8005:8000-8005"`, `"80"`) and
//! long syntax (`{ published, target, protocol }`) are both understood.

use std::collections::BTreeSet;

use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::warn;

use crate::firewall::{FirewallPort, Protocol};

/// Errors raised while reading a compose file.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ComposeError {
    /// The document is not valid YAML.
    #[error("compose file {index} is not valid YAML: {message}")]
    Yaml {
        /// Zero-based position of the file in the request.
        index: usize,
        /// Parser diagnostic.
        message: String,
    },
    /// The document parsed but is not a mapping of services.
    #[error("compose file {index} does not define any services")]
    NoServices {
        /// Zero-based position of the file in the request.
        index: usize,
    },
}

/// Returns the host ports published by every service in `contents`.
///
/// `index` is only used to label errors. Entries using variable
/// interpolation or other unparseable forms are skipped with a warning.
///
/// # Errors
///
/// Returns [`ComposeError`] when the document is not YAML or has no
/// services.
pub fn published_ports(index: usize, contents: &str) -> Result<BTreeSet<FirewallPort>, ComposeError> {
    let document: Value = serde_yaml::from_str(contents).map_err(|err| ComposeError::Yaml {
        index,
        message: err.to_string(),
    })?;
    let services = services(&document).ok_or(ComposeError::NoServices { index })?;

    let mut ports = BTreeSet::new();
    for (name, service) in services {
        let Some(entries) = service.get("ports").and_then(Value::as_sequence) else {
            continue;
        };
        for entry in entries {
            match parse_entry(entry) {
                Some(port) => {
                    ports.insert(port);
                }
                None => warn!(
                    service = ?name,
                    entry = ?entry,
                    "skipping unrecognised compose port entry"
                ),
            }
        }
    }
    Ok(ports)
}

/// Services live under `services` in current files and at the root in the
/// legacy format.
fn services(document: &Value) -> Option<Vec<(&Value, &Value)>> {
    let root = document.as_mapping()?;
    let mapping: &Mapping = match root.get("services") {
        Some(Value::Mapping(services)) => services,
        Some(_) => return None,
        None => root,
    };
    let services: Vec<_> = mapping
        .iter()
        .filter(|(_, service)| service.is_mapping())
        .collect();
    if services.is_empty() {
        None
    } else {
        Some(services)
    }
}

fn parse_entry(entry: &Value) -> Option<FirewallPort> {
    match entry {
        Value::Number(number) => {
            let port = u16::try_from(number.as_u64()?).ok()?;
            Some(FirewallPort::tcp(port))
        }
        Value::String(spec) => parse_short(spec),
        Value::Mapping(long) => parse_long(long),
        _ => None,
    }
}

fn parse_short(spec: &str) -> Option<FirewallPort> {
    let (mapping, protocol) = split_protocol(spec.trim())?;
    let published = mapping.rsplit_once(':').map_or(mapping, |(host, container)| {
        let host_port = host.rsplit_once(':').map_or(host, |(_, port)| port);
        if host_port.is_empty() {
            container
        } else {
            host_port
        }
    });
    parse_range(published, protocol)
}

fn parse_long(long: &Mapping) -> Option<FirewallPort> {
    let protocol = match long.get("protocol").and_then(Value::as_str) {
        Some(name) => parse_protocol(name)?,
        None => Protocol::Tcp,
    };
    let published = long.get("published").or_else(|| long.get("target"))?;
    match published {
        Value::Number(number) => {
            let port = u16::try_from(number.as_u64()?).ok()?;
            Some(FirewallPort {
                from: port,
                to: port,
                protocol,
            })
        }
        Value::String(text) => parse_range(text, protocol),
        _ => None,
    }
}

fn split_protocol(spec: &str) -> Option<(&str, Protocol)> {
    match spec.rsplit_once('/') {
        Some((mapping, protocol)) => Some((mapping, parse_protocol(protocol)?)),
        None => Some((spec, Protocol::Tcp)),
    }
}

fn parse_protocol(name: &str) -> Option<Protocol> {
    match name.to_ascii_lowercase().as_str() {
        "tcp" => Some(Protocol::Tcp),
        "udp" => Some(Protocol::Udp),
        _ => None,
    }
}

fn parse_range(text: &str, protocol: Protocol) -> Option<FirewallPort> {
    let (from, to): (u16, u16) = match text.split_once('-') {
        Some((from, to)) => (from.parse().ok()?, to.parse().ok()?),
        None => {
            let port = text.parse().ok()?;
            (port, port)
        }
    };
    (from <= to).then_some(FirewallPort { from, to, protocol })
}
