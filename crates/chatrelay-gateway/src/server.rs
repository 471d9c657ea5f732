//! Gateway server loop.

use std::net::{IpAddr, Ipv4Addr};

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;

use chatrelay_core::protocol::{GatewayMessage, HostMessage};

use crate::gateway::Gateway;
use crate::routes::build_router;

/// Where the gateway listens.
#[derive(Debug, Clone, Copy)]
pub struct GatewayOptions {
    pub host: IpAddr,
    /// `0` lets the OS pick a free port; the bound port is announced upstream.
    pub port: u16,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: chatrelay_core::config::DEFAULT_PORT,
        }
    }
}

/// Run the gateway until it is shut down.
///
/// Messages for the host go to `upstream`; messages from the host arrive on
/// `downstream`. The gateway shuts down on a host `shutdown`, on
/// `POST /shutdown`, or when `downstream` closes.
pub async fn run(
    options: GatewayOptions,
    upstream: mpsc::UnboundedSender<GatewayMessage>,
    mut downstream: mpsc::Receiver<HostMessage>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind((options.host, options.port)).await?;
    let addr = listener.local_addr()?;
    let gateway = Gateway::new(upstream);

    info!(%addr, "Gateway listening");
    gateway.send_upstream(GatewayMessage::ServerReady { port: addr.port() });

    let dispatcher = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            while let Some(msg) = downstream.recv().await {
                gateway.handle_host_message(msg);
            }
            gateway.shutdown("host link closed");
        })
    };

    let shutdown = gateway.shutdown_token();
    let result = axum::serve(listener, build_router(gateway))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;

    dispatcher.abort();
    info!("Gateway stopped");
    result
}
