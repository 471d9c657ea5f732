//! Worker transport contract.
//!
//! The host never touches the gateway's sockets. It talks to it through a
//! [`WorkerLink`]: an ordered outbound channel of [`HostMessage`]s, an inbound
//! channel of [`WorkerEvent`]s, a watch that resolves once the worker exits,
//! and a token that force-terminates it. How the worker actually runs (OS
//! process over stdio, tokio task over channels) is up to the launcher.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::protocol::{GatewayMessage, HostMessage};

const LINK_CAPACITY: usize = 256;

/// Parameters handed to a launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOptions {
    pub port: u16,
    pub debug: bool,
}

/// Something the worker reported.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Message(GatewayMessage),
    /// Transport-level fault (broken pipe, read error, crashed task).
    Error(String),
}

/// How a worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// Exit code; `None` when killed by a signal.
    pub code: Option<i32>,
}

impl WorkerExit {
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Host-side ends of a running worker.
#[derive(Debug)]
pub struct WorkerLink {
    /// Identifier for log correlation.
    pub id: String,
    pub outbound: mpsc::Sender<HostMessage>,
    pub inbound: mpsc::Receiver<WorkerEvent>,
    /// `Some` once the worker has exited.
    pub exit: watch::Receiver<Option<WorkerExit>>,
    /// Cancel to force-terminate the worker.
    pub kill: CancellationToken,
}

/// Worker-side ends, held by the launcher's plumbing.
#[derive(Debug)]
pub struct WorkerEnds {
    pub inbound: mpsc::Receiver<HostMessage>,
    pub events: mpsc::Sender<WorkerEvent>,
    pub exit: watch::Sender<Option<WorkerExit>>,
    pub kill: CancellationToken,
}

/// Create a connected pair of link ends.
pub fn link_pair(id: impl Into<String>) -> (WorkerLink, WorkerEnds) {
    let (outbound_tx, outbound_rx) = mpsc::channel(LINK_CAPACITY);
    let (events_tx, events_rx) = mpsc::channel(LINK_CAPACITY);
    let (exit_tx, exit_rx) = watch::channel(None);
    let kill = CancellationToken::new();

    let link = WorkerLink {
        id: id.into(),
        outbound: outbound_tx,
        inbound: events_rx,
        exit: exit_rx,
        kill: kill.clone(),
    };
    let ends = WorkerEnds {
        inbound: outbound_rx,
        events: events_tx,
        exit: exit_tx,
        kill,
    };
    (link, ends)
}

/// Wait until the worker has exited.
///
/// Returns `None` if the exit watch was dropped without ever reporting.
pub async fn wait_for_exit(exit: &mut watch::Receiver<Option<WorkerExit>>) -> Option<WorkerExit> {
    exit.wait_for(Option::is_some).await.ok().and_then(|v| *v)
}

/// Errors from launching a worker.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to spawn worker: {reason}")]
    SpawnFailed { reason: String },
}

/// Starts gateway workers.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, options: LaunchOptions) -> Result<WorkerLink, LaunchError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exit_is_observed_by_every_clone() {
        let (link, ends) = link_pair("w1");
        let mut first = link.exit.clone();
        let mut second = link.exit.clone();

        ends.exit.send_replace(Some(WorkerExit { code: Some(3) }));

        assert_eq!(
            wait_for_exit(&mut first).await,
            Some(WorkerExit { code: Some(3) })
        );
        assert_eq!(
            wait_for_exit(&mut second).await,
            Some(WorkerExit { code: Some(3) })
        );
    }

    #[tokio::test]
    async fn dropped_exit_sender_yields_none() {
        let (link, ends) = link_pair("w1");
        let mut exit = link.exit.clone();
        drop(ends);
        assert_eq!(wait_for_exit(&mut exit).await, None);
    }

    #[tokio::test]
    async fn messages_flow_both_ways() {
        let (mut link, mut ends) = link_pair("w1");
        link.outbound.send(HostMessage::Shutdown).await.unwrap();
        assert_eq!(ends.inbound.recv().await, Some(HostMessage::Shutdown));

        ends.events
            .send(WorkerEvent::Message(GatewayMessage::ServerReady { port: 1 }))
            .await
            .unwrap();
        assert_eq!(
            link.inbound.recv().await,
            Some(WorkerEvent::Message(GatewayMessage::ServerReady { port: 1 }))
        );
    }

    #[test]
    fn only_code_zero_is_success() {
        assert!(WorkerExit { code: Some(0) }.success());
        assert!(!WorkerExit { code: Some(1) }.success());
        assert!(!WorkerExit { code: None }.success());
    }
}
