//! In-memory table of open SSE connections, keyed by request id.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use axum::response::sse::Event;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::debug;

use chatrelay_core::protocol::SerializedChatPart;

/// One SSE event destined for a client.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Ack {
        request_id: String,
    },
    Chunk(SerializedChatPart),
    End {
        conversation_id: String,
        metadata: Option<Map<String, Value>>,
    },
    Error {
        status: u16,
        message: String,
    },
}

impl SseFrame {
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Ack { .. } => "ack",
            Self::Chunk(_) => "chunk",
            Self::End { .. } => "end",
            Self::Error { .. } => "error",
        }
    }

    /// JSON body carried in the `data:` field.
    pub fn data(&self) -> Value {
        match self {
            Self::Ack { request_id } => json!({ "requestId": request_id }),
            Self::Chunk(part) => serde_json::to_value(part).unwrap_or(Value::Null),
            Self::End {
                conversation_id,
                metadata,
            } => {
                let mut body = Map::new();
                body.insert("conversationId".into(), json!(conversation_id));
                if let Some(metadata) = metadata {
                    body.insert("metadata".into(), Value::Object(metadata.clone()));
                }
                Value::Object(body)
            }
            Self::Error { status, message } => json!({ "status": status, "message": message }),
        }
    }

    pub fn to_event(&self) -> Event {
        Event::default()
            .event(self.event_name())
            .data(self.data().to_string())
    }
}

/// An open stream. Terminal frames remove the entry before they are sent, so
/// a live entry always means the client is still owed an `end` or `error`.
struct ConnectionEntry {
    frames: mpsc::UnboundedSender<SseFrame>,
}

/// Thread-safe table of open streams.
///
/// Uses a blocking mutex: entries are also touched from `Drop` when a client
/// goes away, and no lock is ever held across an await.
#[derive(Default)]
pub struct ConnectionTable {
    entries: Mutex<HashMap<String, ConnectionEntry>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, ConnectionEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new stream and return the receiving end of its frames.
    pub fn register(&self, request_id: &str) -> mpsc::UnboundedReceiver<SseFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.entries()
            .insert(request_id.to_string(), ConnectionEntry { frames: tx });
        rx
    }

    /// Queue a non-terminal frame. Returns `false` for unknown or finished request ids.
    pub fn push(&self, request_id: &str, frame: SseFrame) -> bool {
        self.entries()
            .get(request_id)
            .is_some_and(|entry| entry.frames.send(frame).is_ok())
    }

    /// Queue a terminal frame and discard the entry.
    ///
    /// Dropping the entry drops the sender, which ends the client's stream
    /// right after the terminal frame.
    pub fn finish(&self, request_id: &str, frame: SseFrame) -> bool {
        let entry = self.entries().remove(request_id);
        entry.is_some_and(|entry| entry.frames.send(frame).is_ok())
    }

    /// The client's response closed. Returns `true` only when the stream was
    /// still live, i.e. when the host must be told to cancel.
    pub fn abort(&self, request_id: &str) -> bool {
        self.entries().remove(request_id).is_some()
    }

    /// Send `frame` to every open stream as its terminal frame and clear the table.
    pub fn drain(&self, frame: &SseFrame) -> usize {
        let drained: Vec<(String, ConnectionEntry)> = self.entries().drain().collect();
        let count = drained.len();
        for (request_id, entry) in drained {
            if entry.frames.send(frame.clone()).is_err() {
                debug!(request_id, "Stream already closed while draining");
            }
        }
        count
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.entries().contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
