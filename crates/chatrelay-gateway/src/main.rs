//! chatrelay Gateway
//!
//! Serves the chat HTTP/SSE endpoints and relays requests to the host over
//! stdio (NDJSON on stdin/stdout).

use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use chatrelay_core::tracing_init::{init_tracing, relay_filter};
use chatrelay_gateway::host_link::{read_host_messages, write_gateway_messages};
use chatrelay_gateway::{GatewayOptions, run};

#[derive(Parser, Debug)]
#[command(name = "chatrelay-gateway")]
#[command(version, about = "chatrelay gateway - HTTP/SSE front end for the relay host")]
struct Args {
    /// Bind address
    #[arg(long, default_value = "127.0.0.1", env = "CHATRELAY_GATEWAY_HOST")]
    host: IpAddr,

    /// Port to listen on (0 picks a free port)
    #[arg(long, default_value_t = 3899, env = "CHATRELAY_GATEWAY_PORT")]
    port: u16,

    /// Verbose logging, including per-chunk traces.
    #[arg(long, env = "CHATRELAY_GATEWAY_DEBUG")]
    debug: bool,

    /// Log level filter (e.g. "info", "debug", "warn"). Ignored with --debug.
    #[arg(long, default_value = "info", env = "CHATRELAY_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON.
    #[arg(long, env = "CHATRELAY_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { args.log_level.as_str() };
    init_tracing(&relay_filter(level), args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        host = %args.host,
        port = args.port,
        debug = args.debug,
        "Starting chatrelay-gateway"
    );

    let (upstream_tx, upstream_rx) = mpsc::unbounded_channel();
    let (downstream_tx, downstream_rx) = mpsc::channel(256);

    let writer = tokio::spawn(write_gateway_messages(tokio::io::stdout(), upstream_rx));
    tokio::spawn(read_host_messages(tokio::io::stdin(), downstream_tx));

    let options = GatewayOptions {
        host: args.host,
        port: args.port,
    };
    let result = run(options, upstream_tx, downstream_rx).await;

    // Give queued upstream messages (e.g. `shutdown`) a chance to reach the host.
    if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
        warn!("Host link writer did not drain in time");
    }

    // The stdin reader sits in a blocking read; exit explicitly instead of
    // waiting for the runtime to join it.
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(error = %e, "Gateway failed");
            std::process::exit(1)
        }
    }
}
