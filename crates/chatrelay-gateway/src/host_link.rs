//! Stdio host link: NDJSON in on stdin, NDJSON out on stdout.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use chatrelay_core::protocol::{Decoded, GatewayMessage, HostMessage, decode_line, encode_line};

/// Read host messages line by line until EOF.
///
/// Unknown message types and malformed lines are logged and skipped; the
/// link only ends on EOF, a read error, or when `tx` is closed.
pub async fn read_host_messages<R>(reader: R, tx: mpsc::Sender<HostMessage>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match decode_line::<HostMessage>(&line) {
                    Ok(Decoded::Message(msg)) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(Decoded::Unknown { msg_type }) => {
                        debug!(msg_type, "Ignoring unknown host message");
                    }
                    Err(e) => warn!(error = %e, "Skipping malformed host message"),
                }
            }
            Ok(None) => {
                debug!("Host link reached EOF");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read from host link");
                break;
            }
        }
    }
}

/// Write gateway messages as NDJSON until the channel closes.
pub async fn write_gateway_messages<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<GatewayMessage>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        let mut line = match encode_line(&msg) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "Failed to encode gateway message");
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            error!(error = %e, "Failed to write to host link");
            break;
        }
        if let Err(e) = writer.flush().await {
            error!(error = %e, "Failed to flush host link");
            break;
        }
    }
}
