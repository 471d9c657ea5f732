#![allow(clippy::unwrap_used, clippy::panic)]

use std::net::{IpAddr, Ipv4Addr};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tower::ServiceExt;

use chatrelay_core::protocol::{ChatMode, GatewayMessage, HostMessage, SerializedChatPart};
use chatrelay_gateway::{Gateway, GatewayOptions, build_router, run};

fn gateway() -> (Gateway, mpsc::UnboundedReceiver<GatewayMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Gateway::new(tx), rx)
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Parse an SSE body into `(event, data)` pairs, skipping keep-alive comments.
fn parse_sse(text: &str) -> Vec<(String, Value)> {
    text.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = Some(v.trim_start().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data = Some(serde_json::from_str(v.trim_start()).unwrap());
                }
            }
            Some((event?, data?))
        })
        .collect()
}

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn chat_streams_ack_chunks_and_end_in_order() {
    let (gateway, mut upstream) = gateway();
    let app = build_router(gateway.clone());

    let host = tokio::spawn(async move {
        let Some(GatewayMessage::ChatRequest {
            request_id,
            payload,
        }) = upstream.recv().await
        else {
            panic!("expected chatRequest");
        };
        assert_eq!(payload.prompt, "hello");
        gateway.handle_host_message(HostMessage::ResponseChunk {
            request_id: request_id.clone(),
            chunk: SerializedChatPart::Progress {
                message: "Working".into(),
            },
        });
        gateway.handle_host_message(HostMessage::ResponseChunk {
            request_id: request_id.clone(),
            chunk: SerializedChatPart::Markdown {
                value: "Hi there".into(),
            },
        });
        gateway.handle_host_message(HostMessage::ResponseComplete {
            request_id: request_id.clone(),
            conversation_id: "c1".into(),
            metadata: Some(json!({"model": "gpt-5"}).as_object().unwrap().clone()),
        });
        (request_id, upstream, gateway)
    });

    let resp = app
        .oneshot(post("/chat", r#"{"prompt":"hello"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );
    assert_eq!(resp.headers()["x-accel-buffering"], "no");

    let events = parse_sse(&body_text(resp).await);
    let (request_id, mut upstream, gateway) = host.await.unwrap();

    let names: Vec<&str> = events.iter().map(|(e, _)| e.as_str()).collect();
    assert_eq!(names, ["ack", "chunk", "chunk", "end"]);
    assert_eq!(events[0].1, json!({"requestId": request_id}));
    assert_eq!(events[1].1, json!({"kind": "progress", "message": "Working"}));
    assert_eq!(
        events[3].1,
        json!({"conversationId": "c1", "metadata": {"model": "gpt-5"}})
    );

    // Completed streams never produce a cancel.
    assert!(upstream.try_recv().is_err());
    assert!(gateway.connections().is_empty());
}

#[tokio::test]
async fn v1_chat_is_an_alias() {
    let (gateway, mut upstream) = gateway();
    let app = build_router(gateway.clone());

    let host = tokio::spawn(async move {
        let Some(GatewayMessage::ChatRequest { request_id, .. }) = upstream.recv().await else {
            panic!("expected chatRequest");
        };
        gateway.handle_host_message(HostMessage::ResponseError {
            request_id,
            status: 500,
            message: "handler exploded".into(),
        });
    });

    let resp = app
        .oneshot(post("/v1/chat", r#"{"prompt":"hello"}"#))
        .await
        .unwrap();
    let events = parse_sse(&body_text(resp).await);
    host.await.unwrap();

    assert_eq!(events.len(), 2);
    assert_eq!(events[1].0, "error");
    assert_eq!(
        events[1].1,
        json!({"status": 500, "message": "handler exploded"})
    );
}

#[tokio::test]
async fn invalid_bodies_are_rejected_without_upstream_traffic() {
    let (gateway, mut upstream) = gateway();

    for (body, expected) in [
        ("{not json", "Invalid JSON"),
        ("{}", "Missing prompt"),
        (r#"{"prompt":""}"#, "Missing prompt"),
        ("", "Missing prompt"),
    ] {
        let resp = build_router(gateway.clone())
            .oneshot(post("/chat", body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body: {body:?}");
        assert_eq!(body_text(resp).await, expected);
    }

    assert!(upstream.try_recv().is_err());
    assert!(gateway.connections().is_empty());
}

#[tokio::test]
async fn client_disconnect_sends_exactly_one_cancel() {
    let (gateway, mut upstream) = gateway();
    let resp = build_router(gateway.clone())
        .oneshot(post("/chat", r#"{"prompt":"long task"}"#))
        .await
        .unwrap();

    let mut body = resp.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&first).contains("ack"));

    let Some(GatewayMessage::ChatRequest { request_id, .. }) = upstream.recv().await else {
        panic!("expected chatRequest");
    };

    drop(body);

    assert_eq!(
        upstream.recv().await,
        Some(GatewayMessage::CancelRequest {
            request_id: request_id.clone()
        })
    );

    // Late host output for the aborted request is dropped quietly.
    gateway.handle_host_message(HostMessage::ResponseComplete {
        request_id,
        conversation_id: "c1".into(),
        metadata: None,
    });
    assert!(upstream.try_recv().is_err());
    assert!(gateway.connections().is_empty());
}

#[tokio::test]
async fn shutdown_endpoint_flushes_open_streams() {
    let (gateway, mut upstream) = gateway();
    let open = build_router(gateway.clone())
        .oneshot(post("/chat", r#"{"prompt":"pending"}"#))
        .await
        .unwrap();
    let Some(GatewayMessage::ChatRequest { .. }) = upstream.recv().await else {
        panic!("expected chatRequest");
    };

    let resp = build_router(gateway.clone())
        .oneshot(Request::builder().method("POST").uri("/shutdown").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert_eq!(body_text(resp).await, "Shutting down");

    let events = parse_sse(&body_text(open).await);
    assert_eq!(events.last().unwrap().0, "error");
    assert_eq!(
        events.last().unwrap().1,
        json!({"status": 503, "message": "Server shutting down"})
    );

    assert_eq!(upstream.recv().await, Some(GatewayMessage::Shutdown));
    assert!(upstream.try_recv().is_err());
    assert!(gateway.shutdown_token().is_cancelled());
}

#[tokio::test]
async fn health_reports_ok() {
    let (gateway, _upstream) = gateway();
    let resp = build_router(gateway).oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn unknown_route_is_404() {
    let (gateway, _upstream) = gateway();
    let resp = build_router(gateway).oneshot(get("/nope")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(resp).await, "Not found");
}

#[tokio::test]
async fn model_info_round_trips_through_host() {
    let (gateway, mut upstream) = gateway();
    let app = build_router(gateway.clone());
    tokio::spawn(async move {
        if let Some(GatewayMessage::GetModelInfo { request_id }) = upstream.recv().await {
            gateway.handle_host_message(HostMessage::ModelInfo {
                request_id,
                model_id: "gpt-5".into(),
                model_name: "GPT-5".into(),
                mode: ChatMode::Agent,
            });
        }
    });

    let resp = app.oneshot(get("/api/model/info")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(
        body,
        json!({"modelId": "gpt-5", "modelName": "GPT-5", "mode": "agent"})
    );
}

#[tokio::test]
async fn model_info_api_error_is_502() {
    let (gateway, mut upstream) = gateway();
    let app = build_router(gateway.clone());
    tokio::spawn(async move {
        if let Some(GatewayMessage::GetModelInfo { request_id }) = upstream.recv().await {
            gateway.handle_host_message(HostMessage::ApiError {
                request_id,
                message: "No model bound".into(),
            });
        }
    });

    let resp = app.oneshot(get("/api/model/info")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(body, json!({"error": "No model bound"}));
}

#[tokio::test]
async fn run_announces_port_and_stops_on_host_shutdown() {
    let (up_tx, mut up_rx) = mpsc::unbounded_channel();
    let (down_tx, down_rx) = mpsc::channel(8);
    let options = GatewayOptions {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
    };
    let server = tokio::spawn(run(options, up_tx, down_rx));

    let Some(GatewayMessage::ServerReady { port }) = up_rx.recv().await else {
        panic!("expected serverReady");
    };
    assert_ne!(port, 0);

    down_tx.send(HostMessage::Shutdown).await.unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn run_stops_when_host_link_closes() {
    let (up_tx, mut up_rx) = mpsc::unbounded_channel();
    let (down_tx, down_rx) = mpsc::channel(8);
    let options = GatewayOptions {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
    };
    let server = tokio::spawn(run(options, up_tx, down_rx));
    assert!(matches!(
        up_rx.recv().await,
        Some(GatewayMessage::ServerReady { .. })
    ));

    drop(down_tx);
    server.await.unwrap().unwrap();
}
