//! HTTP surface of the gateway.

use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use chatrelay_core::protocol::{ChatMode, ChatPayload, GatewayMessage};

use crate::gateway::{Gateway, GatewayError, ModelInfoReply};

/// How long `/api/model/info` waits for the host.
pub const MODEL_INFO_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the gateway router.
pub fn build_router(gateway: Gateway) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/v1/chat", post(chat))
        .route("/health", get(health))
        .route("/shutdown", post(shutdown))
        .route("/api/model/info", get(model_info))
        .fallback(not_found)
        .with_state(gateway)
}

#[derive(Debug, PartialEq, Eq)]
enum BodyRejection {
    InvalidJson,
    MissingPrompt,
    InvalidField(String),
}

impl IntoResponse for BodyRejection {
    fn into_response(self) -> Response {
        let message = match self {
            Self::InvalidJson => "Invalid JSON".to_string(),
            Self::MissingPrompt => "Missing prompt".to_string(),
            Self::InvalidField(detail) => format!("Invalid request body: {detail}"),
        };
        (StatusCode::BAD_REQUEST, message).into_response()
    }
}

/// Validate a `/chat` body. An empty body counts as `{}`.
fn parse_chat_body(body: &[u8]) -> Result<ChatPayload, BodyRejection> {
    let value: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_slice(body).map_err(|_| BodyRejection::InvalidJson)?
    };

    let has_prompt = value
        .get("prompt")
        .and_then(Value::as_str)
        .is_some_and(|p| !p.is_empty());
    if !has_prompt {
        return Err(BodyRejection::MissingPrompt);
    }

    serde_json::from_value(value).map_err(|e| BodyRejection::InvalidField(e.to_string()))
}

async fn chat(State(gateway): State<Gateway>, body: Bytes) -> Response {
    let payload = match parse_chat_body(&body) {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(?rejection, "Rejected chat request");
            return rejection.into_response();
        }
    };

    let stream = gateway.open_stream(payload);
    (
        [(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        )],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn shutdown(State(gateway): State<Gateway>) -> impl IntoResponse {
    info!("Shutdown requested over HTTP");
    gateway.send_upstream(GatewayMessage::Shutdown);
    gateway.shutdown("shutdown endpoint");
    (StatusCode::ACCEPTED, "Shutting down")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelInfoBody {
    model_id: String,
    model_name: String,
    mode: ChatMode,
}

async fn model_info(State(gateway): State<Gateway>) -> Response {
    match gateway.request_model_info(MODEL_INFO_TIMEOUT).await {
        Ok(ModelInfoReply::Info {
            model_id,
            model_name,
            mode,
        }) => Json(ModelInfoBody {
            model_id,
            model_name,
            mode,
        })
        .into_response(),
        Ok(ModelInfoReply::Error(message)) => {
            (StatusCode::BAD_GATEWAY, Json(json!({ "error": message }))).into_response()
        }
        Err(e @ GatewayError::HostTimeout) => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
        Err(e @ GatewayError::HostUnavailable) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_missing_prompt() {
        assert_eq!(parse_chat_body(b""), Err(BodyRejection::MissingPrompt));
        assert_eq!(parse_chat_body(b"  \n"), Err(BodyRejection::MissingPrompt));
    }

    #[test]
    fn non_string_prompt_is_missing_prompt() {
        assert_eq!(
            parse_chat_body(br#"{"prompt": 42}"#),
            Err(BodyRejection::MissingPrompt)
        );
        assert_eq!(parse_chat_body(b"[1,2]"), Err(BodyRejection::MissingPrompt));
    }

    #[test]
    fn garbage_is_invalid_json() {
        assert_eq!(parse_chat_body(b"{oops"), Err(BodyRejection::InvalidJson));
    }

    #[test]
    fn wrong_optional_type_is_rejected() {
        assert!(matches!(
            parse_chat_body(br#"{"prompt":"hi","conversationId":7}"#),
            Err(BodyRejection::InvalidField(_))
        ));
    }

    #[test]
    fn full_body_is_accepted() {
        let payload = parse_chat_body(
            br#"{"prompt":"hi","conversationId":"c1","command":"explain","references":[{"uri":"file:///a"}]}"#,
        )
        .unwrap();
        assert_eq!(payload.conversation_id.as_deref(), Some("c1"));
        assert_eq!(payload.command.as_deref(), Some("explain"));
        assert_eq!(payload.references.unwrap().len(), 1);
    }
}
