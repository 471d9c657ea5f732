//! The request-handling capability the orchestrator drives.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use chatrelay_core::protocol::HostMessage;

use crate::conversation::Turn;
use crate::error::HandlerError;
use crate::model::ModelEndpoint;
use crate::parts::ResponsePart;
use crate::serializer::serialize_part;

/// A chat request as seen by the handler.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub prompt: String,
    pub command: Option<String>,
    /// Number of completed turns in the conversation before this request.
    pub attempt: usize,
    pub references: Vec<Value>,
    pub tool_references: Vec<Value>,
    pub model: ModelEndpoint,
}

/// Result of a successful invocation.
#[derive(Debug, Clone, Default)]
pub struct HandlerOutcome {
    pub metadata: Option<Value>,
}

impl HandlerOutcome {
    /// Attach metadata. Values that cannot be represented as JSON are dropped.
    #[must_use]
    pub fn with_metadata<T: Serialize>(mut self, metadata: &T) -> Self {
        match serde_json::to_value(metadata) {
            Ok(value) => self.metadata = Some(value),
            Err(e) => warn!(error = %e, "Dropping unserializable result metadata"),
        }
        self
    }
}

/// Produces responses for chat requests.
///
/// Implementations stream parts through `stream` and should return
/// [`HandlerError::Cancelled`] promptly once `cancel` fires. Cancellation is
/// cooperative: the orchestrator never aborts an invocation.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn invoke(
        &self,
        history: &[Turn],
        request: &ChatRequest,
        stream: &ResponseStream,
        cancel: &CancellationToken,
    ) -> Result<HandlerOutcome, HandlerError>;
}

struct StreamInner {
    request_id: String,
    outbound: mpsc::Sender<HostMessage>,
    content: Mutex<Vec<ResponsePart>>,
}

/// Sink for one request's response parts.
///
/// Every pushed part is serialized and forwarded to the gateway as a
/// `responseChunk`; content parts are also kept for the history turn.
#[derive(Clone)]
pub struct ResponseStream {
    inner: Arc<StreamInner>,
}

impl ResponseStream {
    pub fn new(request_id: impl Into<String>, outbound: mpsc::Sender<HostMessage>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                request_id: request_id.into(),
                outbound,
                content: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    pub async fn push(&self, part: ResponsePart) {
        let chunk = serialize_part(&part);
        debug!(request_id = %self.inner.request_id, kind = chunk.kind(), "Streaming chunk");
        if part.is_history_content() {
            self.inner
                .content
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(part);
        }
        let msg = HostMessage::ResponseChunk {
            request_id: self.inner.request_id.clone(),
            chunk,
        };
        if self.inner.outbound.send(msg).await.is_err() {
            debug!(request_id = %self.inner.request_id, "Gateway link closed, chunk dropped");
        }
    }

    pub async fn progress(&self, message: impl Into<String>) {
        self.push(ResponsePart::progress(message)).await;
    }

    pub async fn markdown(&self, value: impl Into<String>) {
        self.push(ResponsePart::markdown(value)).await;
    }

    /// Content parts captured so far.
    pub fn content_parts(&self) -> Vec<ResponsePart> {
        self.inner
            .content
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
