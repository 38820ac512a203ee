//! Control channel backed by the system `ssh` client.

use std::ffi::OsString;
use std::sync::Arc;

use tracing::debug;

use super::{
    ChannelError, ChannelFactory, CommandOutput, CommandRunner, ControlChannel,
    ProcessCommandRunner, expand_tilde,
};
use crate::backend::{BackendFuture, MachineNetworking};
use crate::config::SshConfig;

/// Exit code the `ssh` client reserves for its own failures.
const SSH_CLIENT_FAILURE: i32 = 255;

/// Opens [`SshChannel`]s using a shared [`SshConfig`].
#[derive(Debug)]
pub struct SshChannelFactory<R: CommandRunner = ProcessCommandRunner> {
    config: Arc<SshConfig>,
    runner: Arc<R>,
}

impl SshChannelFactory<ProcessCommandRunner> {
    /// Creates a factory that spawns the real `ssh` binary.
    #[must_use]
    pub fn with_process_runner(config: SshConfig) -> Self {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> SshChannelFactory<R> {
    /// Creates a factory that runs `ssh` through `runner`.
    pub fn new(config: SshConfig, runner: R) -> Self {
        Self {
            config: Arc::new(config),
            runner: Arc::new(runner),
        }
    }
}

impl<R: CommandRunner + 'static> ChannelFactory for SshChannelFactory<R> {
    fn connect<'a>(
        &'a self,
        networking: &'a MachineNetworking,
    ) -> BackendFuture<'a, Box<dyn ControlChannel>, ChannelError> {
        Box::pin(async move {
            let mut channel = SshChannel {
                config: Arc::clone(&self.config),
                runner: Arc::clone(&self.runner),
                networking: *networking,
                closed: false,
            };
            // A trivial command proves authentication as well as reachability.
            channel.execute("true").await?;
            debug!(host = %networking.public_ip, "ssh channel established");
            let boxed: Box<dyn ControlChannel> = Box::new(channel);
            Ok(boxed)
        })
    }
}

/// A logical session to one machine. Each command is a separate `ssh`
/// invocation with the same options.
#[derive(Debug)]
pub struct SshChannel<R: CommandRunner> {
    config: Arc<SshConfig>,
    runner: Arc<R>,
    networking: MachineNetworking,
    closed: bool,
}

impl<R: CommandRunner> SshChannel<R> {
    fn host(&self) -> String {
        self.networking.public_ip.to_string()
    }

    fn build_args(&self, remote_command: &str) -> Vec<OsString> {
        let mut args = ssh_options(&self.config, self.networking.ssh_port);
        args.push(OsString::from(format!(
            "{}@{}",
            self.config.user,
            self.host()
        )));
        args.push(OsString::from(remote_command));
        args
    }
}

impl<R: CommandRunner> ControlChannel for SshChannel<R> {
    fn execute<'a>(
        &'a mut self,
        command: &'a str,
    ) -> BackendFuture<'a, CommandOutput, ChannelError> {
        Box::pin(async move {
            if self.closed {
                return Err(ChannelError::Closed);
            }
            let args = self.build_args(command);
            let output = self.runner.run(&self.config.bin, &args).await?;
            if output.code == Some(SSH_CLIENT_FAILURE) {
                return Err(ChannelError::Connect {
                    host: self.host(),
                    message: output.diagnostic_text().to_owned(),
                });
            }
            Ok(output)
        })
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

pub(super) fn ssh_options(config: &SshConfig, port: u16) -> Vec<OsString> {
    let mut args = vec![OsString::from("-p"), OsString::from(port.to_string())];

    if let Some(ref identity_file) = config.identity_file {
        args.push(OsString::from("-i"));
        args.push(OsString::from(expand_tilde(identity_file)));
    }

    let mut option = |value: String| {
        args.push(OsString::from("-o"));
        args.push(OsString::from(value));
    };
    if config.batch_mode {
        option(String::from("BatchMode=yes"));
    }
    if !config.strict_host_key_checking {
        option(String::from("StrictHostKeyChecking=no"));
    }
    if !config.known_hosts_file.trim().is_empty() {
        option(format!("UserKnownHostsFile={}", config.known_hosts_file));
    }
    option(format!("ConnectTimeout={}", config.connect_timeout_secs));
    args
}
