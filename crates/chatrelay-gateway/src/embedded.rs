//! Runs the gateway as a tokio task inside the host process.

use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use chatrelay_core::transport::{
    LaunchError, LaunchOptions, WorkerEnds, WorkerEvent, WorkerExit, WorkerLauncher, WorkerLink,
    link_pair,
};

use crate::server::{GatewayOptions, run};

/// Launcher that keeps the gateway in-process, connected over channels
/// instead of stdio.
#[derive(Debug, Clone)]
pub struct EmbeddedLauncher {
    host: IpAddr,
}

impl EmbeddedLauncher {
    pub const fn new(host: IpAddr) -> Self {
        Self { host }
    }
}

impl Default for EmbeddedLauncher {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

#[async_trait]
impl WorkerLauncher for EmbeddedLauncher {
    async fn launch(&self, options: LaunchOptions) -> Result<WorkerLink, LaunchError> {
        let id = format!("embedded-{}", uuid::Uuid::new_v4());
        let (link, ends) = link_pair(id.clone());
        let WorkerEnds {
            inbound,
            events,
            exit,
            kill,
        } = ends;

        let (upstream_tx, mut upstream_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(msg) = upstream_rx.recv().await {
                if events.send(WorkerEvent::Message(msg)).await.is_err() {
                    break;
                }
            }
        });

        let options = GatewayOptions {
            host: self.host,
            port: options.port,
        };
        info!(worker = %id, port = options.port, "Starting embedded gateway");
        tokio::spawn(async move {
            let code = tokio::select! {
                result = run(options, upstream_tx, inbound) => match result {
                    Ok(()) => Some(0),
                    Err(e) => {
                        error!(worker = %id, error = %e, "Embedded gateway failed");
                        Some(1)
                    }
                },
                () = kill.cancelled() => {
                    warn!(worker = %id, "Embedded gateway killed");
                    None
                }
            };
            exit.send_replace(Some(WorkerExit { code }));
        });

        Ok(link)
    }
}
