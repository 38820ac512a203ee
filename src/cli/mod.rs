//! Command-line interface definitions for the `slipway` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `slipway` binary.
#[derive(Debug, Parser)]
#[command(
    name = "slipway",
    about = "Provision Scaleway machines and deploy compose stacks onto them",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run the provisioning API.
    #[command(name = "serve", about = "Run the provisioning API")]
    Serve(ServeCommand),
    /// Load and validate configuration, then exit.
    #[command(name = "check-config", about = "Load and validate configuration, then exit")]
    CheckConfig,
}

/// Arguments for the `slipway serve` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ServeCommand {
    /// Override the socket address the API binds to.
    ///
    /// Takes precedence over `SLIPWAY_LISTEN_ADDR` and `listen_addr` in
    /// `slipway.toml`.
    #[arg(long, value_name = "ADDR")]
    pub(crate) listen: Option<String>,
}
