//! Gateway state shared by the HTTP handlers and the host dispatch loop.

use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::response::sse::Event;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chatrelay_core::protocol::{ChatMode, ChatPayload, GatewayMessage, HostMessage};

use crate::connections::{ConnectionTable, SseFrame};

pub const SHUTDOWN_STATUS: u16 = 503;
pub const SHUTDOWN_MESSAGE: &str = "Server shutting down";

/// Answer to a `getModelInfo` round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelInfoReply {
    Info {
        model_id: String,
        model_name: String,
        mode: ChatMode,
    },
    Error(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Timed out waiting for the host")]
    HostTimeout,

    #[error("Host link is closed")]
    HostUnavailable,
}

type Waiters = HashMap<String, oneshot::Sender<ModelInfoReply>>;

struct GatewayInner {
    connections: ConnectionTable,
    upstream: mpsc::UnboundedSender<GatewayMessage>,
    model_info_waiters: Mutex<Waiters>,
    shutdown: CancellationToken,
}

/// Cheaply cloneable handle to the gateway.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    pub fn new(upstream: mpsc::UnboundedSender<GatewayMessage>) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                connections: ConnectionTable::new(),
                upstream,
                model_info_waiters: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.inner.connections
    }

    /// Cancelled once the gateway has begun shutting down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn send_upstream(&self, msg: GatewayMessage) {
        if self.inner.upstream.send(msg).is_err() {
            warn!("Host link closed, dropping upstream message");
        }
    }

    fn waiters(&self) -> MutexGuard<'_, Waiters> {
        self.inner
            .model_info_waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept a validated chat request: register its stream, acknowledge it
    /// to the client and forward it to the host.
    pub fn open_stream(&self, payload: ChatPayload) -> ChatStream {
        let request_id = uuid::Uuid::new_v4().to_string();
        let frames = self.inner.connections.register(&request_id);
        self.inner.connections.push(
            &request_id,
            SseFrame::Ack {
                request_id: request_id.clone(),
            },
        );
        info!(
            request_id,
            conversation_id = payload.conversation_id.as_deref().unwrap_or("-"),
            prompt_len = payload.prompt.len(),
            "Accepted chat request"
        );
        self.send_upstream(GatewayMessage::ChatRequest {
            request_id: request_id.clone(),
            payload,
        });
        ChatStream {
            frames,
            _guard: DisconnectGuard {
                request_id,
                gateway: self.clone(),
            },
        }
    }

    /// Route one message from the host. Never fails: anything that does not
    /// match a live request is logged and dropped.
    pub fn handle_host_message(&self, msg: HostMessage) {
        match msg {
            HostMessage::ResponseChunk { request_id, chunk } => {
                debug!(request_id, kind = chunk.kind(), "Chunk");
                if !self
                    .inner
                    .connections
                    .push(&request_id, SseFrame::Chunk(chunk))
                {
                    debug!(request_id, "Chunk for unknown or closed request dropped");
                }
            }
            HostMessage::ResponseComplete {
                request_id,
                conversation_id,
                metadata,
            } => {
                let delivered = self.inner.connections.finish(
                    &request_id,
                    SseFrame::End {
                        conversation_id,
                        metadata,
                    },
                );
                debug!(request_id, delivered, "Response complete");
            }
            HostMessage::ResponseError {
                request_id,
                status,
                message,
            } => {
                let delivered = self
                    .inner
                    .connections
                    .finish(&request_id, SseFrame::Error { status, message });
                debug!(request_id, status, delivered, "Response error");
            }
            HostMessage::Shutdown => self.shutdown("host requested shutdown"),
            HostMessage::ModelInfo {
                request_id,
                model_id,
                model_name,
                mode,
            } => self.resolve_waiter(
                &request_id,
                ModelInfoReply::Info {
                    model_id,
                    model_name,
                    mode,
                },
            ),
            HostMessage::ApiError {
                request_id,
                message,
            } => self.resolve_waiter(&request_id, ModelInfoReply::Error(message)),
        }
    }

    fn resolve_waiter(&self, request_id: &str, reply: ModelInfoReply) {
        let waiter = self.waiters().remove(request_id);
        match waiter {
            Some(tx) => {
                if tx.send(reply).is_err() {
                    debug!(request_id, "Model info caller gave up before the reply");
                }
            }
            None => debug!(request_id, "Reply for unknown model info request dropped"),
        }
    }

    /// Ask the host which model it is bound to.
    pub async fn request_model_info(
        &self,
        timeout: Duration,
    ) -> Result<ModelInfoReply, GatewayError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.waiters().insert(request_id.clone(), tx);
        self.send_upstream(GatewayMessage::GetModelInfo {
            request_id: request_id.clone(),
        });

        let result = tokio::time::timeout(timeout, rx).await;
        self.waiters().remove(&request_id);
        match result {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(GatewayError::HostUnavailable),
            Err(_) => Err(GatewayError::HostTimeout),
        }
    }

    /// Flush every open stream with a 503 and signal the server to stop.
    /// Idempotent.
    pub fn shutdown(&self, reason: &str) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let flushed = self.inner.connections.drain(&SseFrame::Error {
            status: SHUTDOWN_STATUS,
            message: SHUTDOWN_MESSAGE.into(),
        });
        self.waiters().clear();
        info!(reason, flushed, "Gateway shutting down");
        self.inner.shutdown.cancel();
    }
}

/// Cancels the host-side request when the client's response goes away
/// before a terminal frame was delivered.
struct DisconnectGuard {
    request_id: String,
    gateway: Gateway,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.gateway.inner.connections.abort(&self.request_id) {
            info!(request_id = %self.request_id, "Client disconnected, cancelling request");
            self.gateway.send_upstream(GatewayMessage::CancelRequest {
                request_id: self.request_id.clone(),
            });
        }
    }
}

/// SSE event stream for one chat request.
pub struct ChatStream {
    frames: mpsc::UnboundedReceiver<SseFrame>,
    _guard: DisconnectGuard,
}

impl Stream for ChatStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames
            .poll_recv(cx)
            .map(|frame| frame.map(|f| Ok(f.to_event())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use chatrelay_core::protocol::SerializedChatPart;

    fn gateway() -> (Gateway, mpsc::UnboundedReceiver<GatewayMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Gateway::new(tx), rx)
    }

    #[tokio::test]
    async fn open_stream_acks_then_forwards() {
        let (gateway, mut upstream) = gateway();
        let mut stream = gateway.open_stream(ChatPayload {
            prompt: "hi".into(),
            ..ChatPayload::default()
        });

        let ack = stream.frames.recv().await.unwrap();
        let SseFrame::Ack { request_id } = ack else {
            panic!("expected ack");
        };
        let Some(GatewayMessage::ChatRequest {
            request_id: forwarded,
            payload,
        }) = upstream.recv().await
        else {
            panic!("expected chatRequest");
        };
        assert_eq!(forwarded, request_id);
        assert_eq!(payload.prompt, "hi");
    }

    #[tokio::test]
    async fn dropping_live_stream_sends_single_cancel() {
        let (gateway, mut upstream) = gateway();
        let stream = gateway.open_stream(ChatPayload {
            prompt: "hi".into(),
            ..ChatPayload::default()
        });
        let Some(GatewayMessage::ChatRequest { request_id, .. }) = upstream.recv().await else {
            panic!("expected chatRequest");
        };

        drop(stream);

        assert_eq!(
            upstream.recv().await,
            Some(GatewayMessage::CancelRequest {
                request_id: request_id.clone()
            })
        );
        gateway.handle_host_message(HostMessage::ResponseChunk {
            request_id,
            chunk: SerializedChatPart::Markdown {
                value: "late".into(),
            },
        });
        assert!(upstream.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_finished_stream_sends_nothing() {
        let (gateway, mut upstream) = gateway();
        let stream = gateway.open_stream(ChatPayload {
            prompt: "hi".into(),
            ..ChatPayload::default()
        });
        let Some(GatewayMessage::ChatRequest { request_id, .. }) = upstream.recv().await else {
            panic!("expected chatRequest");
        };
        gateway.handle_host_message(HostMessage::ResponseComplete {
            request_id,
            conversation_id: "c1".into(),
            metadata: None,
        });

        drop(stream);
        assert!(upstream.try_recv().is_err());
    }

    #[tokio::test]
    async fn model_info_reply_resolves_waiter() {
        let (gateway, mut upstream) = gateway();
        let responder = gateway.clone();
        tokio::spawn(async move {
            if let Some(GatewayMessage::GetModelInfo { request_id }) = upstream.recv().await {
                responder.handle_host_message(HostMessage::ModelInfo {
                    request_id,
                    model_id: "gpt-5".into(),
                    model_name: "GPT-5".into(),
                    mode: ChatMode::Agent,
                });
            }
        });

        let reply = gateway
            .request_model_info(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            reply,
            ModelInfoReply::Info {
                model_id: "gpt-5".into(),
                model_name: "GPT-5".into(),
                mode: ChatMode::Agent,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn model_info_times_out_without_reply() {
        let (gateway, _upstream) = gateway();
        let err = gateway
            .request_model_info(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::HostTimeout));
        assert!(gateway.waiters().is_empty());
    }

    #[test]
    fn reply_after_caller_gave_up_is_discarded() {
        let (gateway, _upstream) = gateway();
        let (tx, rx) = oneshot::channel();
        gateway.waiters().insert("m1".into(), tx);
        drop(rx);

        gateway.handle_host_message(HostMessage::ApiError {
            request_id: "m1".into(),
            message: "late".into(),
        });
        assert!(gateway.waiters().is_empty());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let (gateway, _upstream) = gateway();
        let _rx = gateway.connections().register("r1");
        gateway.shutdown("test");
        gateway.shutdown("test");
        assert!(gateway.shutdown_token().is_cancelled());
        assert!(gateway.connections().is_empty());
    }
}
