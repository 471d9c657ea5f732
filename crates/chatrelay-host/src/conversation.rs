//! Conversation history keyed by conversation id.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::parts::ResponsePart;

/// What the client asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTurn {
    pub prompt: String,
    pub command: Option<String>,
    pub references: Vec<Value>,
    pub tool_references: Vec<Value>,
}

/// What the handler answered: the content parts it streamed plus result metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseTurn {
    pub parts: Vec<ResponsePart>,
    pub metadata: Option<Map<String, Value>>,
}

/// A completed request/response exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub request: RequestTurn,
    pub response: ResponseTurn,
}

/// History of a single conversation.
///
/// Turns are appended whole, so the history is always paired and its length
/// is the number of completed exchanges.
#[derive(Debug, Default)]
pub struct Conversation {
    turns: Mutex<Vec<Turn>>,
}

impl Conversation {
    pub async fn snapshot(&self) -> Vec<Turn> {
        self.turns.lock().await.clone()
    }

    /// Append a completed turn; returns the new number of turns.
    pub async fn append(&self, turn: Turn) -> usize {
        let mut turns = self.turns.lock().await;
        turns.push(turn);
        turns.len()
    }

    pub async fn len(&self) -> usize {
        self.turns.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.turns.lock().await.is_empty()
    }
}

/// All conversations seen by this orchestrator. Lives as long as it does.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: RwLock<HashMap<String, Arc<Conversation>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, conversation_id: &str) -> Arc<Conversation> {
        if let Some(existing) = self.get(conversation_id) {
            return existing;
        }
        let mut conversations = self
            .conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            conversations
                .entry(conversation_id.to_string())
                .or_default(),
        )
    }

    pub fn get(&self, conversation_id: &str) -> Option<Arc<Conversation>> {
        self.conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
