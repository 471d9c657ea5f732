//! Relay orchestrator.
//!
//! Owns one gateway worker at a time. Requests arriving from the gateway are
//! tracked in the pending table, handed to the [`RequestHandler`] with the
//! conversation's history, and answered with exactly one terminal message.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chatrelay_core::config::RelayConfig;
use chatrelay_core::protocol::{ChatMode, ChatPayload, GatewayMessage, HostMessage};
use chatrelay_core::transport::{
    LaunchOptions, WorkerEvent, WorkerExit, WorkerLauncher, WorkerLink, wait_for_exit,
};

use super::pending::{PendingGuard, PendingTable};
use super::state::LifecycleState;
use crate::conversation::{ConversationStore, RequestTurn, ResponseTurn, Turn};
use crate::error::{HandlerError, RelayError};
use crate::handler::{ChatRequest, RequestHandler, ResponseStream};
use crate::model::{EndpointProvider, ModelEndpoint, resolve_default_model};

const PROMPT_PREVIEW_CHARS: usize = 120;

/// How long to wait for the worker after force-killing it.
const KILL_GRACE: Duration = Duration::from_secs(2);

struct WorkerSlot {
    generation: u64,
    id: String,
    outbound: mpsc::Sender<HostMessage>,
    exit: watch::Receiver<Option<WorkerExit>>,
    kill: CancellationToken,
}

struct Inner {
    config: RelayConfig,
    launcher: Arc<dyn WorkerLauncher>,
    handler: Arc<dyn RequestHandler>,
    endpoints: Arc<dyn EndpointProvider>,
    state: watch::Sender<LifecycleState>,
    /// Serializes `start()` and `stop()`.
    transition: tokio::sync::Mutex<()>,
    worker: Mutex<Option<WorkerSlot>>,
    port: Mutex<Option<u16>>,
    model: Mutex<Option<ModelEndpoint>>,
    generation: AtomicU64,
    pending: PendingTable,
    conversations: ConversationStore,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Host-side owner of the relay.
///
/// Construct one per host process and keep it for the process lifetime;
/// clones share the same state.
#[derive(Clone)]
pub struct RelayOrchestrator {
    inner: Arc<Inner>,
}

enum Startup {
    Ready(u16),
    Exited(Option<i32>),
    TimedOut,
}

impl RelayOrchestrator {
    pub fn new(
        config: RelayConfig,
        launcher: Arc<dyn WorkerLauncher>,
        handler: Arc<dyn RequestHandler>,
        endpoints: Arc<dyn EndpointProvider>,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Stopped);
        Self {
            inner: Arc::new(Inner {
                config,
                launcher,
                handler,
                endpoints,
                state,
                transition: tokio::sync::Mutex::new(()),
                worker: Mutex::new(None),
                port: Mutex::new(None),
                model: Mutex::new(None),
                generation: AtomicU64::new(0),
                pending: PendingTable::default(),
                conversations: ConversationStore::new(),
            }),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.inner.state.subscribe()
    }

    /// Port the gateway is listening on, while `Ready`.
    pub fn port(&self) -> Option<u16> {
        *locked(&self.inner.port)
    }

    /// Model resolved by the last successful start.
    pub fn model(&self) -> Option<ModelEndpoint> {
        locked(&self.inner.model).clone()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Completed turns of a conversation, oldest first.
    pub async fn conversation_history(&self, conversation_id: &str) -> Option<Vec<Turn>> {
        let conversation = self.inner.conversations.get(conversation_id)?;
        Some(conversation.snapshot().await)
    }

    fn set_state(&self, state: LifecycleState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Lifecycle transition");
        }
    }

    /// Start the relay.
    ///
    /// Returns immediately when already `Ready`. A call made while another
    /// start is in flight waits for it and shares its outcome; if that start
    /// failed, this call tries again.
    pub async fn start(&self) -> Result<(), RelayError> {
        let _transition = self.inner.transition.lock().await;
        if self.state() == LifecycleState::Ready {
            return Ok(());
        }

        info!(port = self.inner.config.port, "Starting relay");
        self.set_state(LifecycleState::Starting);

        let model = match resolve_default_model(
            self.inner.endpoints.as_ref(),
            &self.inner.config.model,
        )
        .await
        {
            Ok(model) => model,
            Err(e) => {
                error!(error = %e, "Model resolution failed");
                self.set_state(LifecycleState::Stopped);
                return Err(e);
            }
        };
        info!(model = %model.id, "Model resolved");
        *locked(&self.inner.model) = Some(model);

        let options = LaunchOptions {
            port: self.inner.config.port,
            debug: self.inner.config.debug,
        };
        let link = match self.inner.launcher.launch(options).await {
            Ok(link) => link,
            Err(e) => {
                error!(error = %e, "Failed to launch gateway");
                self.set_state(LifecycleState::Stopped);
                return Err(e.into());
            }
        };

        let WorkerLink {
            id,
            outbound,
            inbound,
            exit,
            kill,
        } = link;
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (ready_tx, ready_rx) = oneshot::channel();
        let mut startup_exit = exit.clone();

        *locked(&self.inner.worker) = Some(WorkerSlot {
            generation,
            id: id.clone(),
            outbound,
            exit: exit.clone(),
            kill: kill.clone(),
        });
        tokio::spawn(monitor(
            Arc::downgrade(&self.inner),
            generation,
            id.clone(),
            inbound,
            exit,
            ready_tx,
        ));

        let outcome = tokio::select! {
            biased;
            status = wait_for_exit(&mut startup_exit) => {
                Startup::Exited(status.and_then(|s| s.code))
            }
            // The monitor only drops the sender once the worker is gone.
            port = ready_rx => port.map_or(Startup::Exited(None), Startup::Ready),
            () = tokio::time::sleep(self.inner.config.startup_timeout) => Startup::TimedOut,
        };

        match outcome {
            Startup::Ready(port) => {
                *locked(&self.inner.port) = Some(port);
                self.set_state(LifecycleState::Ready);
                info!(worker = %id, port, "Relay ready");
                Ok(())
            }
            Startup::Exited(code) => {
                error!(worker = %id, ?code, "Gateway exited during startup");
                self.abandon_worker(generation);
                Err(RelayError::WorkerExited { code })
            }
            Startup::TimedOut => {
                let timeout = self.inner.config.startup_timeout;
                error!(worker = %id, ?timeout, "Gateway did not become ready, killing it");
                kill.cancel();
                self.abandon_worker(generation);
                Err(RelayError::StartupTimeout(timeout))
            }
        }
    }

    /// Drop the worker slot of a failed start.
    fn abandon_worker(&self, generation: u64) {
        let mut worker = locked(&self.inner.worker);
        if worker.as_ref().is_some_and(|w| w.generation == generation) {
            worker.take();
        }
        drop(worker);
        *locked(&self.inner.port) = None;
        self.set_state(LifecycleState::Stopped);
    }

    /// Stop the relay. No-op when already stopped or stopping.
    ///
    /// Every pending request is cancelled before the gateway is told to shut
    /// down. Waits for the gateway to exit, force-killing it after the
    /// configured shutdown timeout.
    pub async fn stop(&self) {
        let _transition = self.inner.transition.lock().await;
        if matches!(
            self.state(),
            LifecycleState::Stopped | LifecycleState::Stopping
        ) {
            return;
        }
        self.set_state(LifecycleState::Stopping);

        let cancelled = self.inner.pending.cancel_all();
        info!(cancelled, "Stopping relay");

        let slot = locked(&self.inner.worker).take();
        if let Some(mut slot) = slot {
            let timeout = self.inner.config.shutdown_timeout;
            let graceful = tokio::time::timeout(timeout, async {
                if slot.outbound.send(HostMessage::Shutdown).await.is_err() {
                    debug!(worker = %slot.id, "Gateway link already closed");
                }
                wait_for_exit(&mut slot.exit).await
            })
            .await;

            match graceful {
                Ok(status) => {
                    info!(worker = %slot.id, code = ?status.and_then(|s| s.code), "Gateway exited");
                }
                Err(_) => {
                    warn!(worker = %slot.id, ?timeout, "Gateway did not exit in time, killing it");
                    slot.kill.cancel();
                    if tokio::time::timeout(KILL_GRACE, wait_for_exit(&mut slot.exit))
                        .await
                        .is_err()
                    {
                        error!(worker = %slot.id, "Gateway still running after kill");
                    }
                }
            }
        }

        *locked(&self.inner.port) = None;
        self.set_state(LifecycleState::Stopped);
        info!("Relay stopped");
    }

    fn current_outbound(&self, generation: u64) -> Option<mpsc::Sender<HostMessage>> {
        locked(&self.inner.worker)
            .as_ref()
            .filter(|w| w.generation == generation)
            .map(|w| w.outbound.clone())
    }

    fn handle_worker_event(
        &self,
        generation: u64,
        event: WorkerEvent,
        ready: &mut Option<oneshot::Sender<u16>>,
    ) {
        let msg = match event {
            WorkerEvent::Message(msg) => msg,
            WorkerEvent::Error(reason) => {
                error!(reason, "Gateway worker error");
                self.spawn_stop();
                return;
            }
        };

        match msg {
            GatewayMessage::ServerReady { port } => match ready.take() {
                Some(tx) => {
                    if tx.send(port).is_err() {
                        debug!(port, "serverReady arrived after startup was abandoned");
                    }
                }
                None => debug!(port, "Ignoring repeated serverReady"),
            },
            GatewayMessage::ChatRequest {
                request_id,
                payload,
            } => {
                let Some(outbound) = self.current_outbound(generation) else {
                    warn!(request_id, "Chat request from a retired gateway dropped");
                    return;
                };
                // Register before spawning so a cancel right behind this
                // message finds the entry.
                let conversation_id = payload
                    .conversation_id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let registration = self.inner.pending.register(&request_id, &conversation_id);
                let this = self.clone();
                tokio::spawn(async move {
                    let reply = match registration {
                        Some(registration) => {
                            this.run_chat_request(
                                &outbound,
                                &request_id,
                                conversation_id,
                                payload,
                                registration,
                            )
                            .await
                        }
                        None => {
                            warn!(request_id, "Duplicate request id refused");
                            HostMessage::ResponseError {
                                message: format!("Request {request_id} is already in flight"),
                                request_id: request_id.clone(),
                                status: 500,
                            }
                        }
                    };
                    if outbound.send(reply).await.is_err() {
                        debug!(request_id, "Gateway link closed before the terminal message");
                    }
                });
            }
            GatewayMessage::CancelRequest { request_id } => {
                if self.inner.pending.cancel(&request_id) {
                    info!(request_id, "Cancellation requested by client");
                } else {
                    debug!(request_id, "Cancel for unknown request ignored");
                }
            }
            GatewayMessage::Shutdown => {
                info!("Shutdown requested by gateway");
                self.spawn_stop();
            }
            GatewayMessage::GetModelInfo { request_id } => {
                let Some(outbound) = self.current_outbound(generation) else {
                    return;
                };
                let reply = match self.model() {
                    Some(model) => HostMessage::ModelInfo {
                        request_id,
                        model_id: model.id,
                        model_name: model.name,
                        mode: ChatMode::Agent,
                    },
                    None => HostMessage::ApiError {
                        request_id,
                        message: "No model is bound to the relay".into(),
                    },
                };
                tokio::spawn(async move {
                    if outbound.send(reply).await.is_err() {
                        debug!("Gateway link closed before the model info reply");
                    }
                });
            }
        }
    }

    fn spawn_stop(&self) {
        let this = self.clone();
        tokio::spawn(async move { this.stop().await });
    }

    /// The worker exited on its own.
    fn handle_worker_exit(&self, generation: u64, worker_id: &str, status: Option<WorkerExit>) {
        let code = status.and_then(|s| s.code);
        if status.is_some_and(|s| s.success()) {
            info!(worker = %worker_id, "Gateway exited");
        } else {
            error!(worker = %worker_id, ?code, "Gateway exited abnormally");
        }

        let mut worker = locked(&self.inner.worker);
        if !worker.as_ref().is_some_and(|w| w.generation == generation) {
            // stop() or a failed start already took care of it.
            return;
        }
        worker.take();
        drop(worker);

        // A failed start reports through start() itself.
        let starting = self.state() == LifecycleState::Starting;
        if !starting {
            self.set_state(LifecycleState::Stopping);
        }
        let cancelled = self.inner.pending.cancel_all();
        if cancelled > 0 {
            warn!(cancelled, "Cancelled requests orphaned by gateway exit");
        }
        *locked(&self.inner.port) = None;
        if !starting {
            let this = self.clone();
            tokio::spawn(async move {
                let _transition = this.inner.transition.lock().await;
                if this.state() == LifecycleState::Stopping {
                    this.set_state(LifecycleState::Stopped);
                }
            });
        }
    }

    /// Run one request to completion and build its terminal message.
    async fn run_chat_request(
        &self,
        outbound: &mpsc::Sender<HostMessage>,
        request_id: &str,
        conversation_id: String,
        payload: ChatPayload,
        registration: PendingGuard,
    ) -> HostMessage {
        let failure = |status: u16, message: String| HostMessage::ResponseError {
            request_id: request_id.to_string(),
            status,
            message,
        };

        let Some(model) = self.model() else {
            error!(request_id, "Chat request before a model was resolved");
            return failure(500, "Relay model is not initialized".into());
        };

        let ChatPayload {
            prompt,
            command,
            references,
            tool_references,
            ..
        } = payload;
        let conversation = self.inner.conversations.get_or_create(&conversation_id);
        let history = conversation.snapshot().await;

        let request = ChatRequest {
            prompt,
            command,
            attempt: history.len(),
            references: references.unwrap_or_default(),
            tool_references: tool_references.unwrap_or_default(),
            model,
        };

        let started = Instant::now();
        info!(
            request_id,
            conversation_id,
            attempt = request.attempt,
            prompt = %prompt_preview(&request.prompt),
            "Handling chat request"
        );

        let stream = ResponseStream::new(request_id, outbound.clone());
        let cancel = registration.token().clone();
        let result = self
            .inner
            .handler
            .invoke(&history, &request, &stream, &cancel)
            .await;
        drop(registration);

        // The client is gone once cancellation fired, whatever the handler returned.
        let result = match result {
            Ok(_) if cancel.is_cancelled() => Err(HandlerError::Cancelled),
            other => other,
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(outcome) => {
                let metadata = sanitize_metadata(outcome.metadata);
                let turns = conversation
                    .append(Turn {
                        request: RequestTurn {
                            prompt: request.prompt,
                            command: request.command,
                            references: request.references,
                            tool_references: request.tool_references,
                        },
                        response: ResponseTurn {
                            parts: stream.content_parts(),
                            metadata: metadata.clone(),
                        },
                    })
                    .await;
                info!(request_id, conversation_id, elapsed_ms, turns, "Request complete");
                HostMessage::ResponseComplete {
                    request_id: request_id.to_string(),
                    conversation_id,
                    metadata,
                }
            }
            Err(e @ HandlerError::Cancelled) => {
                info!(request_id, conversation_id, elapsed_ms, "Request cancelled");
                failure(e.status(), e.to_string())
            }
            Err(e) => {
                error!(request_id, conversation_id, elapsed_ms, error = %e, "Request failed");
                failure(e.status(), e.to_string())
            }
        }
    }
}

async fn monitor(
    inner: Weak<Inner>,
    generation: u64,
    worker_id: String,
    mut inbound: mpsc::Receiver<WorkerEvent>,
    mut exit: watch::Receiver<Option<WorkerExit>>,
    ready: oneshot::Sender<u16>,
) {
    enum Next {
        Event(WorkerEvent),
        LinkClosed,
        Exited(Option<WorkerExit>),
    }

    let mut ready = Some(ready);
    let mut link_open = true;
    loop {
        let next = tokio::select! {
            biased;
            event = inbound.recv(), if link_open => event.map_or(Next::LinkClosed, Next::Event),
            status = wait_for_exit(&mut exit) => Next::Exited(status),
        };

        let Some(inner) = inner.upgrade() else {
            debug!(worker = %worker_id, "Orchestrator dropped, monitor exiting");
            return;
        };
        let relay = RelayOrchestrator { inner };

        match next {
            Next::Event(event) => relay.handle_worker_event(generation, event, &mut ready),
            Next::LinkClosed => {
                debug!(worker = %worker_id, "Gateway event stream closed");
                link_open = false;
            }
            Next::Exited(status) => {
                while let Ok(event) = inbound.try_recv() {
                    relay.handle_worker_event(generation, event, &mut ready);
                }
                relay.handle_worker_exit(generation, &worker_id, status);
                return;
            }
        }
    }
}

/// Prompt shortened for logging.
pub fn prompt_preview(prompt: &str) -> String {
    if prompt.chars().count() > PROMPT_PREVIEW_CHARS {
        let head: String = prompt.chars().take(PROMPT_PREVIEW_CHARS - 3).collect();
        format!("{head}...")
    } else {
        prompt.to_string()
    }
}

/// Keep metadata only when it is a JSON object.
pub fn sanitize_metadata(metadata: Option<Value>) -> Option<Map<String, Value>> {
    match metadata? {
        Value::Object(map) => Some(map),
        Value::Null => None,
        other => {
            debug!(kind = json_kind(&other), "Dropping non-object result metadata");
            None
        }
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn short_prompts_are_untouched() {
        assert_eq!(prompt_preview("hello"), "hello");
        let exact = "x".repeat(120);
        assert_eq!(prompt_preview(&exact), exact);
    }

    #[test]
    fn long_prompts_are_truncated_to_120_chars() {
        let preview = prompt_preview(&"é".repeat(200));
        assert_eq!(preview.chars().count(), 120);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn metadata_must_be_an_object() {
        assert_eq!(
            sanitize_metadata(Some(json!({"a": 1}))),
            Some(json!({"a": 1}).as_object().cloned().unwrap_or_default())
        );
        assert_eq!(sanitize_metadata(Some(json!("text"))), None);
        assert_eq!(sanitize_metadata(Some(Value::Null)), None);
        assert_eq!(sanitize_metadata(None), None);
    }
}
