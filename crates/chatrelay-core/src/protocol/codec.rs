//! NDJSON codec for the host link.
//!
//! Implements tolerant reader pattern: unknown fields ignored, unknown
//! message types surfaced as [`Decoded::Unknown`] so callers can skip them.

use serde::Serialize;
use serde_json::Value;

use super::types::WireMessage;
use crate::error::{Error, Result};

/// Outcome of decoding one line.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Message(T),
    Unknown { msg_type: String },
}

/// Decode a single NDJSON line.
pub fn decode_line<T: WireMessage>(line: &str) -> Result<Decoded<T>> {
    let raw: Value = serde_json::from_str(line)?;
    decode_value(raw)
}

/// Decode a JSON value into a message of family `T`.
pub fn decode_value<T: WireMessage>(raw: Value) -> Result<Decoded<T>> {
    let msg_type = raw
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Protocol("Missing 'type' field".into()))?;

    if !T::TYPES.contains(&msg_type) {
        return Ok(Decoded::Unknown {
            msg_type: msg_type.to_string(),
        });
    }

    let msg_type = msg_type.to_string();
    serde_json::from_value(raw)
        .map(Decoded::Message)
        .map_err(|e| Error::Protocol(format!("Malformed '{msg_type}' message: {e}")))
}

/// Encode a message as a single line (without the trailing newline).
pub fn encode_line<T: Serialize>(msg: &T) -> Result<String> {
    Ok(serde_json::to_string(msg)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::{
        ChatPayload, GatewayMessage, HostMessage, SerializedChatPart, ToolDetails, ToolStatus,
    };

    #[test]
    fn decodes_chat_request_with_optional_fields() {
        let line = r#"{"type":"chatRequest","requestId":"r1","payload":{"prompt":"hello","conversationId":"c1","toolReferences":[{"name":"search"}]}}"#;
        let Decoded::Message(GatewayMessage::ChatRequest {
            request_id,
            payload,
        }) = decode_line::<GatewayMessage>(line).unwrap()
        else {
            panic!("expected chatRequest");
        };
        assert_eq!(request_id, "r1");
        assert_eq!(payload.prompt, "hello");
        assert_eq!(payload.conversation_id.as_deref(), Some("c1"));
        assert!(payload.command.is_none());
        assert_eq!(payload.tool_references.unwrap().len(), 1);
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let decoded = decode_line::<HostMessage>(r#"{"type":"workspaceStructure","requestId":"x"}"#)
            .unwrap();
        assert_eq!(
            decoded,
            Decoded::Unknown {
                msg_type: "workspaceStructure".into()
            }
        );
    }

    #[test]
    fn missing_type_is_a_protocol_error() {
        let err = decode_line::<HostMessage>(r#"{"requestId":"x"}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn known_type_with_bad_shape_is_a_protocol_error() {
        let err = decode_line::<HostMessage>(r#"{"type":"responseError","requestId":"x"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("responseError"));
    }

    #[test]
    fn extra_fields_are_ignored() {
        let decoded =
            decode_line::<GatewayMessage>(r#"{"type":"shutdown","reason":"bye"}"#).unwrap();
        assert_eq!(decoded, Decoded::Message(GatewayMessage::Shutdown));
    }

    #[test]
    fn progress_part_encodes_exactly() {
        let part = SerializedChatPart::Progress {
            message: "Loading".into(),
        };
        assert_eq!(
            serde_json::to_value(&part).unwrap(),
            json!({"kind": "progress", "message": "Loading"})
        );
    }

    #[test]
    fn tool_details_use_camel_case() {
        let msg = HostMessage::ResponseChunk {
            request_id: "r1".into(),
            chunk: SerializedChatPart::Tool {
                name: "search".into(),
                status: ToolStatus::End,
                details: Some(ToolDetails {
                    call_id: "call-1".into(),
                    is_error: false,
                    is_complete: true,
                }),
            },
        };
        let value: Value = serde_json::from_str(&encode_line(&msg).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "responseChunk",
                "requestId": "r1",
                "chunk": {
                    "kind": "tool",
                    "name": "search",
                    "status": "end",
                    "details": {"callId": "call-1", "isError": false, "isComplete": true}
                }
            })
        );
    }

    #[test]
    fn complete_without_metadata_omits_the_field() {
        let msg = HostMessage::ResponseComplete {
            request_id: "r1".into(),
            conversation_id: "c1".into(),
            metadata: None,
        };
        assert_eq!(
            encode_line(&msg).unwrap(),
            r#"{"type":"responseComplete","requestId":"r1","conversationId":"c1"}"#
        );
    }

    #[test]
    fn payload_skips_absent_optionals() {
        let msg = GatewayMessage::ChatRequest {
            request_id: "r1".into(),
            payload: ChatPayload {
                prompt: "hi".into(),
                ..ChatPayload::default()
            },
        };
        assert_eq!(
            encode_line(&msg).unwrap(),
            r#"{"type":"chatRequest","requestId":"r1","payload":{"prompt":"hi"}}"#
        );
    }
}
