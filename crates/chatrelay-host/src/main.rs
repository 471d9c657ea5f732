//! chatrelay Host
//!
//! Starts the relay orchestrator with the demo echo handler, then serves
//! until interrupted or until the gateway goes away.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use chatrelay_core::config::{DEFAULT_PREFERRED_MODELS, RelayConfig, parse_model_list};
use chatrelay_core::tracing_init::{init_tracing, relay_filter};
use chatrelay_core::transport::WorkerLauncher;
use chatrelay_gateway::EmbeddedLauncher;
use chatrelay_host::echo::EchoHandler;
use chatrelay_host::{LifecycleState, ProcessLauncher, RelayOrchestrator, StaticEndpointProvider};

#[derive(Parser, Debug)]
#[command(name = "chatrelay-host")]
#[command(version, about = "chatrelay host - relay orchestrator for the HTTP/SSE gateway")]
struct Args {
    /// Gateway port (overrides CHATRELAY_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Exact model to bind (overrides CHATRELAY_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Comma separated model preference order (overrides CHATRELAY_PREFERRED_MODELS)
    #[arg(long)]
    preferred_models: Option<String>,

    /// Path to the gateway binary (overrides CHATRELAY_GATEWAY_BIN)
    #[arg(long)]
    gateway_bin: Option<PathBuf>,

    /// Run the gateway inside this process instead of spawning it.
    #[arg(long)]
    embedded: bool,

    /// Verbose gateway logging.
    #[arg(long)]
    debug: bool,

    /// Models the demo endpoint provider knows about.
    #[arg(long, value_delimiter = ',', env = "CHATRELAY_AVAILABLE_MODELS")]
    available_models: Vec<String>,

    /// Seconds to wait for the gateway to report ready.
    #[arg(long)]
    startup_timeout: Option<u64>,

    /// Seconds to wait for the gateway to exit before killing it.
    #[arg(long)]
    shutdown_timeout: Option<u64>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "CHATRELAY_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON.
    #[arg(long, env = "CHATRELAY_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn apply(&self, config: &mut RelayConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(model) = &self.model {
            config.model.exact = Some(model.clone());
        }
        if let Some(list) = &self.preferred_models {
            config.model.preferred = parse_model_list(list);
        }
        if let Some(bin) = &self.gateway_bin {
            config.gateway_bin.clone_from(bin);
        }
        if self.debug {
            config.debug = true;
        }
        if let Some(secs) = self.startup_timeout {
            config.startup_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.shutdown_timeout {
            config.shutdown_timeout = Duration::from_secs(secs);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&relay_filter(&args.log_level), args.log_json);

    let mut config = RelayConfig::from_env()?;
    args.apply(&mut config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        gateway_bin = %config.gateway_bin.display(),
        embedded = args.embedded,
        "Starting chatrelay-host"
    );

    let launcher: Arc<dyn WorkerLauncher> = if args.embedded {
        Arc::new(EmbeddedLauncher::default())
    } else {
        Arc::new(ProcessLauncher::new(&config.gateway_bin))
    };
    let endpoints = if args.available_models.is_empty() {
        StaticEndpointProvider::from_ids(DEFAULT_PREFERRED_MODELS.iter().copied())
    } else {
        StaticEndpointProvider::from_ids(args.available_models.iter().map(String::as_str))
    };

    let relay = RelayOrchestrator::new(
        config,
        launcher,
        Arc::new(EchoHandler::default()),
        Arc::new(endpoints),
    );
    relay.start().await?;
    info!(port = ?relay.port(), "Relay serving");

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    let mut state = relay.subscribe_state();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
        _ = state.wait_for(|s| *s == LifecycleState::Stopped) => {
            info!("Relay stopped");
        }
    }

    relay.stop().await;
    info!("Host stopped");
    Ok(())
}
