//! Control channel used to run shell commands on provisioned machines.
//!
//! [`ChannelFactory`] opens a [`ControlChannel`] to a ready machine; the
//! built-in implementation drives the system `ssh` client through a
//! [`CommandRunner`] so tests can script process outcomes.

use std::ffi::OsString;

use thiserror::Error;
use tokio::process::Command;

use crate::backend::{BackendFuture, MachineNetworking};
use crate::error::ProvisionError;

mod ssh;

pub use ssh::{SshChannel, SshChannelFactory};

/// Result of running an external command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Human readable exit status.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }

    /// Standard error when present, otherwise standard output.
    #[must_use]
    pub fn diagnostic_text(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Errors raised by the control channel.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ChannelError {
    /// The transport could not reach the machine.
    #[error("could not reach {host}: {message}")]
    Connect {
        /// Address that was dialled.
        host: String,
        /// Client error text.
        message: String,
    },
    /// A local process could not be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// The channel was used after [`ControlChannel::close`].
    #[error("control channel is closed")]
    Closed,
}

impl From<ChannelError> for ProvisionError {
    fn from(value: ChannelError) -> Self {
        match value {
            ChannelError::Connect { host, message } => Self::Connection { host, message },
            ChannelError::Closed => Self::Connection {
                host: String::from("closed channel"),
                message: value.to_string(),
            },
            ChannelError::Spawn { .. } => Self::Provider {
                message: value.to_string(),
            },
        }
    }
}

/// Abstraction over process execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args`, capturing stdout and stderr.
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
    ) -> BackendFuture<'a, CommandOutput, ChannelError>;
}

/// Runner that spawns real processes. Dropping the returned future kills the
/// child.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
    ) -> BackendFuture<'a, CommandOutput, ChannelError> {
        Box::pin(async move {
            let output = Command::new(program)
                .args(args)
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|err| ChannelError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;
            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}

/// An open session to one machine.
pub trait ControlChannel: Send {
    /// Runs `command` through the remote shell.
    fn execute<'a>(&'a mut self, command: &'a str)
    -> BackendFuture<'a, CommandOutput, ChannelError>;

    /// Releases the session. Later calls to [`ControlChannel::execute`] fail
    /// with [`ChannelError::Closed`].
    fn close(&mut self);
}

/// Opens control channels to ready machines.
pub trait ChannelFactory: Send + Sync {
    /// Connects to `networking`, failing when the machine is unreachable.
    fn connect<'a>(
        &'a self,
        networking: &'a MachineNetworking,
    ) -> BackendFuture<'a, Box<dyn ControlChannel>, ChannelError>;
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// The input is returned unchanged when `HOME` is not set.
///
/// # Examples
///
/// ```
/// # use slipway::channel::expand_tilde;
/// assert_eq!(expand_tilde("/etc/ssh/key"), "/etc/ssh/key");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}
