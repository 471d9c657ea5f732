//! Message types for the host ↔ gateway protocol.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Implemented by both message families so the codec can tell a known
/// message it failed to parse apart from a message type it has never heard of.
pub trait WireMessage: serde::de::DeserializeOwned + Serialize {
    /// Every `type` discriminator this family understands.
    const TYPES: &'static [&'static str];
}

/// Body of a chat request as accepted over HTTP and forwarded to the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_references: Option<Vec<Value>>,
}

/// Messages flowing from the gateway up to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GatewayMessage {
    ChatRequest {
        request_id: String,
        payload: ChatPayload,
    },
    CancelRequest {
        request_id: String,
    },
    Shutdown,
    /// The gateway is listening; `port` is the port actually bound.
    ServerReady {
        port: u16,
    },
    GetModelInfo {
        request_id: String,
    },
}

impl WireMessage for GatewayMessage {
    const TYPES: &'static [&'static str] = &[
        "chatRequest",
        "cancelRequest",
        "shutdown",
        "serverReady",
        "getModelInfo",
    ];
}

/// Messages flowing from the host down to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostMessage {
    ResponseChunk {
        request_id: String,
        chunk: SerializedChatPart,
    },
    ResponseComplete {
        request_id: String,
        conversation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
    },
    ResponseError {
        request_id: String,
        status: u16,
        message: String,
    },
    Shutdown,
    ModelInfo {
        request_id: String,
        model_id: String,
        model_name: String,
        mode: ChatMode,
    },
    ApiError {
        request_id: String,
        message: String,
    },
}

impl WireMessage for HostMessage {
    const TYPES: &'static [&'static str] = &[
        "responseChunk",
        "responseComplete",
        "responseError",
        "shutdown",
        "modelInfo",
        "apiError",
    ];
}

impl HostMessage {
    /// Correlation id, when the message belongs to a request.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::ResponseChunk { request_id, .. }
            | Self::ResponseComplete { request_id, .. }
            | Self::ResponseError { request_id, .. }
            | Self::ModelInfo { request_id, .. }
            | Self::ApiError { request_id, .. } => Some(request_id),
            Self::Shutdown => None,
        }
    }
}

/// Interaction mode reported by `modelInfo`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Ask,
    Edit,
    #[default]
    Agent,
}

/// A streamed response fragment in its wire-safe form.
///
/// Closed set: every rich response part the handler produces is mapped onto
/// exactly one of these, with `Raw` as the passthrough of last resort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SerializedChatPart {
    Progress {
        message: String,
    },
    Markdown {
        value: String,
    },
    Thinking {
        title: String,
        body: String,
    },
    Reference {
        value: String,
    },
    Code {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        value: String,
    },
    Warning {
        value: String,
    },
    Tool {
        name: String,
        status: ToolStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<ToolDetails>,
    },
    Raw {
        value: Value,
    },
}

impl SerializedChatPart {
    /// The `kind` discriminator, for logging.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Markdown { .. } => "markdown",
            Self::Thinking { .. } => "thinking",
            Self::Reference { .. } => "reference",
            Self::Code { .. } => "code",
            Self::Warning { .. } => "warning",
            Self::Tool { .. } => "tool",
            Self::Raw { .. } => "raw",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDetails {
    pub call_id: String,
    pub is_error: bool,
    pub is_complete: bool,
}
