//! Demo request handler that echoes the prompt back.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::conversation::Turn;
use crate::error::HandlerError;
use crate::handler::{ChatRequest, HandlerOutcome, RequestHandler, ResponseStream};
use crate::parts::{ResponsePart, ThinkingBody};

/// Streams a progress note, a short reasoning trace and the prompt back as
/// markdown. Honours cancellation between steps.
#[derive(Debug, Clone)]
pub struct EchoHandler {
    step_delay: Duration,
}

impl EchoHandler {
    pub const fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EchoMetadata<'a> {
    model_id: &'a str,
    attempt: usize,
}

impl EchoHandler {
    async fn pause(&self, cancel: &CancellationToken) -> Result<(), HandlerError> {
        tokio::select! {
            () = cancel.cancelled() => Err(HandlerError::Cancelled),
            () = tokio::time::sleep(self.step_delay) => Ok(()),
        }
    }
}

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn invoke(
        &self,
        history: &[Turn],
        request: &ChatRequest,
        stream: &ResponseStream,
        cancel: &CancellationToken,
    ) -> Result<HandlerOutcome, HandlerError> {
        stream.progress("Preparing response").await;
        self.pause(cancel).await?;

        stream
            .push(ResponsePart::Thinking {
                id: Some("echo".into()),
                value: ThinkingBody::Lines(vec![
                    format!("Conversation has {} earlier turn(s).", history.len()),
                    format!("Bound model: {}.", request.model.id),
                ]),
            })
            .await;
        self.pause(cancel).await?;

        let reply = match request.command.as_deref() {
            Some(command) => format!("/{command} {}", request.prompt),
            None => request.prompt.clone(),
        };
        stream.markdown(format!("You said: {reply}")).await;

        Ok(HandlerOutcome::default().with_metadata(&EchoMetadata {
            model_id: &request.model.id,
            attempt: request.attempt,
        }))
    }
}
