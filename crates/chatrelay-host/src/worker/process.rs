//! Runs the gateway as a child process speaking NDJSON over stdio.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chatrelay_core::protocol::{Decoded, GatewayMessage, HostMessage, decode_line, encode_line};
use chatrelay_core::transport::{
    LaunchError, LaunchOptions, WorkerEnds, WorkerEvent, WorkerExit, WorkerLauncher, WorkerLink,
    link_pair,
};

/// Spawns the `chatrelay-gateway` binary.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    gateway_bin: PathBuf,
}

impl ProcessLauncher {
    pub fn new(gateway_bin: impl Into<PathBuf>) -> Self {
        Self {
            gateway_bin: gateway_bin.into(),
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, options: LaunchOptions) -> Result<WorkerLink, LaunchError> {
        let mut cmd = Command::new(&self.gateway_bin);
        cmd.arg("--port")
            .arg(options.port.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if options.debug {
            cmd.arg("--debug");
        }

        info!(
            bin = %self.gateway_bin.display(),
            port = options.port,
            debug = options.debug,
            "Spawning gateway process"
        );
        let mut child = cmd.spawn().map_err(|e| LaunchError::SpawnFailed {
            reason: format!("{}: {e}", self.gateway_bin.display()),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| LaunchError::SpawnFailed {
            reason: "Failed to capture stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| LaunchError::SpawnFailed {
            reason: "Failed to capture stdout".to_string(),
        })?;

        let id = child
            .id()
            .map_or_else(|| "gateway".to_string(), |pid| format!("gateway-{pid}"));
        let (link, ends) = link_pair(id.clone());
        let WorkerEnds {
            inbound,
            events,
            exit,
            kill,
        } = ends;

        tokio::spawn(write_stdin(id.clone(), stdin, inbound));
        tokio::spawn(read_stdout(id.clone(), stdout, events));
        if let Some(stderr) = child.stderr.take() {
            let worker = id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(worker = %worker, "gateway: {}", line);
                }
                debug!(worker = %worker, "stderr reader finished");
            });
        }
        tokio::spawn(wait_child(id, child, exit, kill));

        Ok(link)
    }
}

async fn write_stdin(worker: String, mut stdin: ChildStdin, mut rx: mpsc::Receiver<HostMessage>) {
    while let Some(msg) = rx.recv().await {
        let line = match encode_line(&msg) {
            Ok(line) => line,
            Err(e) => {
                error!(worker = %worker, error = %e, "Failed to encode host message");
                continue;
            }
        };
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            warn!(worker = %worker, error = %e, "Failed to write to gateway stdin");
            break;
        }
        if let Err(e) = stdin.write_all(b"\n").await {
            warn!(worker = %worker, error = %e, "Failed to write newline");
            break;
        }
        if let Err(e) = stdin.flush().await {
            warn!(worker = %worker, error = %e, "Failed to flush gateway stdin");
            break;
        }
    }
    debug!(worker = %worker, "stdin writer finished");
}

async fn read_stdout(worker: String, stdout: ChildStdout, events: mpsc::Sender<WorkerEvent>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let event = match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match decode_line::<GatewayMessage>(&line) {
                Ok(Decoded::Message(msg)) => WorkerEvent::Message(msg),
                Ok(Decoded::Unknown { msg_type }) => {
                    debug!(worker = %worker, msg_type, "Ignoring unknown gateway message");
                    continue;
                }
                Err(e) => {
                    warn!(worker = %worker, error = %e, "Skipping malformed gateway output");
                    continue;
                }
            },
            Ok(None) => break,
            Err(e) => WorkerEvent::Error(format!("Failed to read gateway stdout: {e}")),
        };
        let fatal = matches!(event, WorkerEvent::Error(_));
        if events.send(event).await.is_err() || fatal {
            break;
        }
    }
    debug!(worker = %worker, "stdout reader finished");
}

async fn wait_child(
    worker: String,
    mut child: Child,
    exit: watch::Sender<Option<WorkerExit>>,
    kill: CancellationToken,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        () = kill.cancelled() => {
            warn!(worker = %worker, "Killing gateway process");
            if let Err(e) = child.kill().await {
                error!(worker = %worker, error = %e, "Failed to kill gateway process");
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            error!(worker = %worker, error = %e, "Failed to wait for gateway process");
            None
        }
    };
    debug!(worker = %worker, ?code, "Gateway process reaped");
    exit.send_replace(Some(WorkerExit { code }));
}
