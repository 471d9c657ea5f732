//! Content serializer: rich [`ResponsePart`]s to wire-safe [`SerializedChatPart`]s.
//!
//! Total and side-effect free. Parts with no compact wire shape (edits,
//! citations, trees, buttons) travel as `raw` with their full JSON form.

use serde_json::Value;

use chatrelay_core::protocol::{SerializedChatPart, ToolDetails, ToolStatus};

use crate::parts::ResponsePart;

pub fn serialize_part(part: &ResponsePart) -> SerializedChatPart {
    match part {
        ResponsePart::Progress { value } => SerializedChatPart::Progress {
            message: value.clone(),
        },
        ResponsePart::Markdown { value }
        | ResponsePart::MarkdownWithVulnerabilities { value, .. } => SerializedChatPart::Markdown {
            value: value.as_str().to_string(),
        },
        ResponsePart::Thinking { id, value } => SerializedChatPart::Thinking {
            title: id.clone().unwrap_or_default(),
            body: value.joined(),
        },
        ResponsePart::Warning { value } => SerializedChatPart::Warning {
            value: value.as_str().to_string(),
        },
        ResponsePart::CodeblockUri { uri } => SerializedChatPart::Code {
            language: None,
            value: uri.clone(),
        },
        ResponsePart::Reference { value } => SerializedChatPart::Reference {
            value: value.clone(),
        },
        ResponsePart::PrepareToolInvocation { tool_name } => SerializedChatPart::Tool {
            name: tool_name.clone(),
            status: ToolStatus::Start,
            details: None,
        },
        ResponsePart::ToolInvocation {
            tool_name,
            tool_call_id,
            is_error,
            is_complete,
        } => SerializedChatPart::Tool {
            name: tool_name.clone(),
            status: if *is_complete {
                ToolStatus::End
            } else {
                ToolStatus::Start
            },
            details: Some(ToolDetails {
                call_id: tool_call_id.clone(),
                is_error: *is_error,
                is_complete: *is_complete,
            }),
        },
        ResponsePart::TextEdit { .. }
        | ResponsePart::NotebookEdit { .. }
        | ResponsePart::CodeCitation { .. }
        | ResponsePart::FileTree { .. }
        | ResponsePart::Anchor { .. }
        | ResponsePart::CommandButton { .. } => SerializedChatPart::Raw {
            value: serde_json::to_value(part).unwrap_or(Value::Null),
        },
        ResponsePart::Other(value) => SerializedChatPart::Raw {
            value: value.clone(),
        },
    }
}
