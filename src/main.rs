//! Binary entry point for the `slipway` provisioning daemon.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use slipway::{
    BlueprintFactory, ChatNotifier, Compensator, ConfigError, ExecutionLimits, InstanceStore,
    Inventory, JobTracker, MemoryInstanceStore, OrchestratorConfig, PipelineRunner, ProvisioningEvents,
    ProvisioningService, ReqwestExecutor, RetrySettings, ScalewayBackend, ScalewayConfig,
    SignalHub, SshChannelFactory, SshConfig, StateServices, api,
};

mod cli;

use cli::{Cli, ServeCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("inventory error: {0}")]
    Inventory(String),
    #[error("failed to bind {addr}: {message}")]
    Bind { addr: String, message: String },
    #[error("server error: {0}")]
    Serve(String),
}

/// Every configuration layer the daemon needs.
struct Settings {
    orchestrator: OrchestratorConfig,
    scaleway: ScalewayConfig,
    ssh: SshConfig,
}

impl Settings {
    fn load() -> Result<Self, CliError> {
        let orchestrator = OrchestratorConfig::load_without_cli_args()?;
        orchestrator.validate()?;
        let scaleway = ScalewayConfig::load_without_cli_args()?;
        scaleway.validate()?;
        let ssh = SshConfig::load_without_cli_args()?;
        ssh.validate()?;
        Ok(Self {
            orchestrator,
            scaleway,
            ssh,
        })
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Serve(command) => serve(command).await,
        Cli::CheckConfig => check_config(),
    }
}

fn check_config() -> Result<(), CliError> {
    let settings = Settings::load()?;
    let template = settings.scaleway.as_template()?;
    writeln!(
        io::stdout(),
        "configuration ok: listening on {}, machines in {}, {} retry attempts",
        settings.orchestrator.listen_addr,
        template.zone,
        settings.orchestrator.retry_max_attempts
    )
    .ok();
    Ok(())
}

async fn serve(command: ServeCommand) -> Result<(), CliError> {
    let Settings {
        orchestrator,
        scaleway,
        ssh,
    } = Settings::load()?;
    let listen_addr = command
        .listen
        .unwrap_or_else(|| orchestrator.listen_addr.clone());

    let store = match orchestrator.inventory_file.as_deref() {
        Some(path) => MemoryInstanceStore::from_inventory(
            Inventory::load(path).map_err(|err| CliError::Inventory(err.to_string()))?,
        ),
        None => MemoryInstanceStore::new(),
    };
    let service = build_service(&orchestrator, &scaleway, ssh, store)?;
    spawn_purge(service.clone(), orchestrator.purge_interval());

    let listener = TcpListener::bind(&listen_addr)
        .await
        .map_err(|err| CliError::Bind {
            addr: listen_addr.clone(),
            message: err.to_string(),
        })?;
    info!(addr = %listen_addr, "provisioning API listening");
    axum::serve(listener, api::router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| CliError::Serve(err.to_string()))
}

fn build_service(
    orchestrator: &OrchestratorConfig,
    scaleway: &ScalewayConfig,
    ssh: SshConfig,
    store: MemoryInstanceStore,
) -> Result<ProvisioningService, CliError> {
    let backend =
        Arc::new(ScalewayBackend::new(scaleway).map_err(|err| CliError::Backend(err.to_string()))?);
    let store: Arc<dyn InstanceStore> = Arc::new(store);
    let signals = Arc::new(SignalHub::new());
    let services = StateServices {
        channels: Arc::new(SshChannelFactory::with_process_runner(ssh)),
        http: Arc::new(ReqwestExecutor),
        signals: Arc::clone(&signals),
        limits: ExecutionLimits {
            command_timeout: orchestrator.command_timeout(),
            signal_timeout: orchestrator.signal_timeout(),
        },
    };

    let mut events =
        ProvisioningEvents::new(Compensator::new(Arc::clone(&backend), Arc::clone(&store)));
    if let Some(url) = orchestrator.chat_webhook_url.as_deref() {
        events = events.with_notifier(Arc::new(ChatNotifier::new(url)));
    }
    let runner = PipelineRunner::new(
        backend,
        services,
        Arc::clone(&store),
        events,
        RetrySettings {
            max_attempts: orchestrator.retry_max_attempts,
            backoff: orchestrator.retry_backoff(),
        },
    );
    let factory = BlueprintFactory::new(
        orchestrator.plan_catalog()?,
        scaleway.as_template()?,
        orchestrator.callback_base_url.clone(),
    )
    .with_registration_url(orchestrator.registration_url.clone());

    Ok(ProvisioningService::new(
        factory,
        JobTracker::new(orchestrator.job_retention()),
        store,
        signals,
        Arc::new(runner),
    ))
}

fn spawn_purge(service: ProvisioningService, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let purged = service.purge_expired();
            if purged > 0 {
                info!(purged, "expired jobs purged");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
