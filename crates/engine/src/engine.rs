//! Protocol engine core — the router task, session lifecycle, and
//! result/close coordination.
//!
//! One task (the router) drains the inbound record stream and classifies
//! each record. Control responses resolve pending outgoing requests;
//! control requests each spawn an independent unit of work so a slow hook
//! or tool call never blocks other inbound traffic; everything else is an
//! application message pushed to bounded queues with a drop-when-full
//! policy. Consumers that fail to drain the application queues lose
//! messages by design — protocol liveness is never traded for backpressure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{pin_mut, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use tether_protocol::message::parse_message;
use tether_protocol::{
    classify, CancelEnvelope, ControlRequestEnvelope, ControlResponse, ControlResponseEnvelope,
    HookEvent, IncomingRequest, Message, OutgoingRequest, RecordKind, ResultMessage,
    OUTGOING_ONLY_SUBTYPES,
};

use crate::bridge::McpBridge;
use crate::builder::{EngineBuilder, EngineConfig};
use crate::correlator::RequestRegistry;
use crate::hooks::{HookContext, HookMatcher, HookRegistry};
use crate::transport::Transport;
use crate::types::{EngineError, PermissionContext, PermissionResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The most recent terminal message plus a single-fire "first result seen"
/// signal. Only the router mutates this; multiple result messages fire the
/// signal once.
pub(crate) struct ResultState {
    last: Mutex<Option<ResultMessage>>,
    received: watch::Sender<bool>,
}

impl ResultState {
    fn new() -> Self {
        let (received, _) = watch::channel(false);
        Self {
            last: Mutex::new(None),
            received,
        }
    }

    fn record(&self, message: ResultMessage) {
        *self.last.lock() = Some(message);
        self.received.send_replace(true);
    }

    pub(crate) fn received(&self) -> bool {
        *self.received.borrow()
    }

    pub(crate) fn last(&self) -> Option<ResultMessage> {
        self.last.lock().clone()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.received.subscribe()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) requests: RequestRegistry,
    pub(crate) hooks: HookRegistry,
    pub(crate) hook_config: HashMap<HookEvent, Vec<HookMatcher>>,
    pub(crate) bridge: McpBridge,
    pub(crate) permission: Option<Arc<dyn crate::types::PermissionHandler>>,
    /// In-flight inbound requests, so a `control_cancel_request` can cancel
    /// exactly one of them.
    pub(crate) inflight: Mutex<HashMap<String, CancellationToken>>,
    pub(crate) tracker: TaskTracker,
    pub(crate) cancel: CancellationToken,
    pub(crate) result: ResultState,
}

#[derive(Clone)]
struct QueueSenders {
    messages: mpsc::Sender<Message>,
    raw: mpsc::Sender<Value>,
    errors: mpsc::Sender<EngineError>,
}

struct ReceiverSlots {
    messages: Option<mpsc::Receiver<Message>>,
    raw: Option<mpsc::Receiver<Value>>,
    errors: Option<mpsc::Receiver<EngineError>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The protocol engine: one instance per peer connection.
///
/// Create via [`ProtocolEngine::builder`], then [`start`](Self::start) to
/// spawn the router. [`close`](Self::close) is idempotent and waits for all
/// in-flight dispatch work before releasing the queues and the transport.
pub struct ProtocolEngine {
    pub(crate) shared: Arc<Shared>,
    streaming: bool,
    request_timeout: Duration,
    close_wait_timeout: Duration,
    queues: Mutex<Option<QueueSenders>>,
    receivers: Mutex<ReceiverSlots>,
    router: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl ProtocolEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub(crate) fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        let bridge = McpBridge::new();
        for server in config.servers {
            bridge.register(server);
        }

        let (messages_tx, messages_rx) = mpsc::channel(config.channel_capacity);
        let (raw_tx, raw_rx) = mpsc::channel(config.channel_capacity);
        let (errors_tx, errors_rx) = mpsc::channel(config.channel_capacity);

        Self {
            shared: Arc::new(Shared {
                transport,
                requests: RequestRegistry::new(),
                hooks: HookRegistry::new(),
                hook_config: config.hooks,
                bridge,
                permission: config.permission,
                inflight: Mutex::new(HashMap::new()),
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
                result: ResultState::new(),
            }),
            streaming: config.streaming,
            request_timeout: config.request_timeout,
            close_wait_timeout: config.close_wait_timeout,
            queues: Mutex::new(Some(QueueSenders {
                messages: messages_tx,
                raw: raw_tx,
                errors: errors_tx,
            })),
            receivers: Mutex::new(ReceiverSlots {
                messages: Some(messages_rx),
                raw: Some(raw_rx),
                errors: Some(errors_rx),
            }),
            router: Mutex::new(None),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Spawn the router task. Fails if called twice.
    pub fn start(&self) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }
        let queues = match self.queues.lock().clone() {
            Some(q) => q,
            None => return Err(EngineError::SessionClosed),
        };
        let shared = self.shared.clone();
        let handle = tokio::spawn(run_router(shared, queues));
        *self.router.lock() = Some(handle);
        Ok(())
    }

    /// Take the typed application-message stream. Yields messages in the
    /// order the router observed them; may drop under sustained consumer
    /// lag. `None` after the first call.
    pub fn messages(&self) -> Option<mpsc::Receiver<Message>> {
        self.receivers.lock().messages.take()
    }

    /// Take the raw (unparsed) application-record stream.
    pub fn raw_messages(&self) -> Option<mpsc::Receiver<Value>> {
        self.receivers.lock().raw.take()
    }

    /// Take the passive error stream (parse failures, transport end).
    pub fn errors(&self) -> Option<mpsc::Receiver<EngineError>> {
        self.receivers.lock().errors.take()
    }

    /// Whether a terminal result message has been observed.
    pub fn result_received(&self) -> bool {
        self.shared.result.received()
    }

    /// The most recent terminal result message, if any.
    pub fn last_result(&self) -> Option<ResultMessage> {
        self.shared.result.last()
    }

    /// Issue a control request and await its correlated response.
    ///
    /// Resolves to the response's `response` object on success; errors on
    /// peer-reported failure, cancellation, timeout, session close, or
    /// transport termination (fail-fast, without waiting out the timeout).
    pub async fn send_control_request(
        &self,
        request: OutgoingRequest,
        timeout: Option<Duration>,
    ) -> Result<Value, EngineError> {
        if !self.streaming {
            return Err(EngineError::RequiresStreaming);
        }
        if !self.started.load(Ordering::SeqCst) {
            return Err(EngineError::NotStarted);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::SessionClosed);
        }

        let (request_id, rx) = self.shared.requests.register();
        let envelope =
            ControlRequestEnvelope::new(&request_id, serde_json::to_value(&request)?);
        let line = serde_json::to_string(&envelope)?;

        tracing::debug!(request_id = %request_id, "sending control request");
        if let Err(e) = self.shared.transport.write(line).await {
            self.shared.requests.remove(&request_id);
            return Err(e.into());
        }

        let timeout = timeout.unwrap_or(self.request_timeout);
        let outcome = tokio::select! {
            r = rx => r,
            _ = tokio::time::sleep(timeout) => {
                self.shared.requests.remove(&request_id);
                return Err(EngineError::Timeout(timeout));
            }
            _ = self.shared.cancel.cancelled() => {
                self.shared.requests.remove(&request_id);
                return Err(EngineError::SessionClosed);
            }
        };

        match outcome {
            Ok(ControlResponse::Success { response, .. }) => {
                let body = response.unwrap_or(Value::Null);
                if body.get("cancelled").and_then(Value::as_bool) == Some(true) {
                    return Err(EngineError::RequestCancelled(request_id));
                }
                Ok(body)
            }
            Ok(ControlResponse::Error { error, .. }) => Err(EngineError::RequestFailed(error)),
            // Sender dropped: the router failed all pending requests
            // because the inbound stream terminated.
            Err(_) => Err(EngineError::TransportClosed),
        }
    }

    /// Write one application record to the peer.
    pub async fn write_record(&self, record: &Value) -> Result<(), EngineError> {
        let line = serde_json::to_string(record)?;
        self.shared.transport.write(line).await?;
        Ok(())
    }

    /// Stream outbound application records to the peer.
    pub async fn stream_input<S>(&self, input: S) -> Result<(), EngineError>
    where
        S: Stream<Item = Value>,
    {
        pin_mut!(input);
        while let Some(record) = input.next().await {
            self.write_record(&record).await?;
        }
        Ok(())
    }

    /// Stream outbound records, then — only when hooks or in-process tool
    /// servers are registered — hold the outbound half open until the first
    /// result arrives, the close-wait timeout elapses, or the session is
    /// cancelled. Half-closing too early would truncate the peer's ability
    /// to finish hook/tool exchanges still in flight.
    pub async fn stream_input_with_wait<S>(&self, input: S) -> Result<(), EngineError>
    where
        S: Stream<Item = Value>,
    {
        self.stream_input(input).await?;

        if !self.shared.hook_config.is_empty() || self.shared.bridge.has_servers() {
            let mut seen = self.shared.result.subscribe();
            let first_result = async move {
                while !*seen.borrow_and_update() {
                    if seen.changed().await.is_err() {
                        break;
                    }
                }
            };
            tokio::select! {
                _ = first_result => {}
                _ = tokio::time::sleep(self.close_wait_timeout) => {
                    tracing::debug!("close wait timed out without a result message");
                }
                _ = self.shared.cancel.cancelled() => {}
            }
        }

        self.shared.transport.end_input().await?;
        Ok(())
    }

    /// Close the session. Idempotent. Stops accepting inbound work, waits
    /// for the router and every in-flight dispatch unit, then closes the
    /// queues and the transport — never a write-after-close.
    pub async fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!("closing protocol engine");
        self.shared.cancel.cancel();

        let handle = self.router.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.shared.tracker.close();
        self.shared.tracker.wait().await;

        // Queues close only after the router and all dispatch work stopped.
        self.queues.lock().take();

        self.shared.transport.close().await?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_router(shared: Arc<Shared>, queues: QueueSenders) {
    tracing::debug!("protocol router started");
    loop {
        let line = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            record = shared.transport.read_record() => match record {
                Some(line) => line,
                None => {
                    tracing::debug!("inbound stream ended");
                    let _ = queues.errors.try_send(EngineError::TransportClosed);
                    break;
                }
            },
        };

        let record: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable inbound record");
                let _ = queues.errors.try_send(EngineError::MalformedMessage {
                    error: e.to_string(),
                    raw: line,
                });
                continue;
            }
        };

        match classify(&record) {
            RecordKind::ControlResponse => handle_response(&shared, record, &queues),
            RecordKind::ControlCancelRequest => handle_cancel(&shared, record),
            RecordKind::ControlRequest => spawn_request(&shared, record, &queues),
            RecordKind::Application => handle_application(&shared, record, &queues),
        }
    }

    // Fail-fast: wake every pending outgoing request instead of letting
    // them wait out their timeouts against a dead stream.
    let failed = shared.requests.fail_all();
    if failed > 0 {
        tracing::warn!(failed, "failed pending control requests on router exit");
    }
    tracing::debug!("protocol router stopped");
}

fn handle_response(shared: &Shared, record: Value, queues: &QueueSenders) {
    match serde_json::from_value::<ControlResponseEnvelope>(record.clone()) {
        Ok(envelope) => {
            let request_id = envelope.response.request_id().to_string();
            if !shared.requests.complete(envelope.response) {
                // Expected after timeout/cancel races; discard silently.
                tracing::debug!(request_id = %request_id, "response for unknown request");
            }
        }
        Err(e) => {
            let _ = queues.errors.try_send(EngineError::MalformedMessage {
                error: format!("bad control_response: {e}"),
                raw: record.to_string(),
            });
        }
    }
}

fn handle_cancel(shared: &Shared, record: Value) {
    let Ok(envelope) = serde_json::from_value::<CancelEnvelope>(record) else {
        tracing::warn!("malformed control_cancel_request");
        return;
    };
    let inflight = shared.inflight.lock();
    match inflight.get(&envelope.request_id) {
        Some(token) => {
            tracing::debug!(request_id = %envelope.request_id, "peer cancelled request");
            token.cancel();
        }
        None => {
            tracing::debug!(request_id = %envelope.request_id, "cancel for unknown request");
        }
    }
}

fn handle_application(shared: &Shared, record: Value, queues: &QueueSenders) {
    // Raw consumers see every application record, parseable or not.
    if queues.raw.try_send(record.clone()).is_err() {
        tracing::debug!("raw queue full, dropping record");
    }

    match parse_message(&record) {
        Ok(message) => {
            if let Message::Result(result) = &message {
                shared.result.record(result.clone());
            }
            if queues.messages.try_send(message).is_err() {
                tracing::debug!("message queue full, dropping record");
            }
        }
        Err(e) => {
            let _ = queues.errors.try_send(EngineError::MalformedMessage {
                error: e.to_string(),
                raw: record.to_string(),
            });
        }
    }
}

fn spawn_request(shared: &Arc<Shared>, record: Value, queues: &QueueSenders) {
    let envelope: ControlRequestEnvelope = match serde_json::from_value(record.clone()) {
        Ok(e) => e,
        Err(e) => {
            // No request_id to answer with; report for passive consumers.
            tracing::warn!(error = %e, "malformed control_request");
            let _ = queues.errors.try_send(EngineError::MalformedMessage {
                error: format!("bad control_request: {e}"),
                raw: record.to_string(),
            });
            return;
        }
    };

    let token = shared.cancel.child_token();
    shared
        .inflight
        .lock()
        .insert(envelope.request_id.clone(), token.clone());

    // Independent unit of work: a slow hook or tool call must not block the
    // router or other inbound requests, and responses may complete out of
    // order.
    let shared = shared.clone();
    let tracker = shared.tracker.clone();
    tracker.spawn(async move {
        let request_id = envelope.request_id;
        let response = tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!(request_id = %request_id, "request cancelled before completion");
                ControlResponse::success(&request_id, Some(json!({"cancelled": true})))
            }
            response = handle_control_request(&shared, &request_id, envelope.request, token.clone()) => response,
        };
        shared.inflight.lock().remove(&request_id);

        // A marshal failure skips the write rather than emitting malformed
        // data or crashing the dispatch task.
        match serde_json::to_string(&ControlResponseEnvelope::new(response)) {
            Ok(line) => {
                if let Err(e) = shared.transport.write(line).await {
                    tracing::warn!(request_id = %request_id, error = %e, "failed to write control response");
                }
            }
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "skipping unserializable control response");
            }
        }
    });
}

async fn handle_control_request(
    shared: &Arc<Shared>,
    request_id: &str,
    request: Value,
    cancel: CancellationToken,
) -> ControlResponse {
    let subtype = request
        .get("subtype")
        .and_then(Value::as_str)
        .unwrap_or("<missing>")
        .to_string();
    tracing::debug!(request_id, subtype = %subtype, "handling control request");

    if OUTGOING_ONLY_SUBTYPES.contains(&subtype.as_str()) {
        return ControlResponse::error(
            request_id,
            format!("control request subtype '{subtype}' is outgoing-only"),
        );
    }

    let parsed: IncomingRequest = match serde_json::from_value(request) {
        Ok(r) => r,
        Err(e) => {
            return ControlResponse::error(
                request_id,
                format!("unsupported control request subtype '{subtype}': {e}"),
            );
        }
    };

    match parsed {
        IncomingRequest::CanUseTool {
            tool_name,
            input,
            permission_suggestions,
            blocked_path,
        } => {
            let Some(handler) = shared.permission.clone() else {
                return ControlResponse::error(request_id, "can_use_tool callback is not provided");
            };
            let ctx = PermissionContext {
                suggestions: permission_suggestions,
                blocked_path,
                cancel,
            };
            match handler.can_use_tool(&tool_name, input.clone(), ctx).await {
                Ok(PermissionResult::Allow {
                    updated_input,
                    updated_permissions,
                }) => {
                    let mut body = json!({
                        "behavior": "allow",
                        "updatedInput": updated_input.unwrap_or(input),
                    });
                    if let Some(permissions) = updated_permissions {
                        body["updatedPermissions"] = permissions;
                    }
                    ControlResponse::success(request_id, Some(body))
                }
                Ok(PermissionResult::Deny { message, interrupt }) => ControlResponse::success(
                    request_id,
                    Some(json!({
                        "behavior": "deny",
                        "message": message,
                        "interrupt": interrupt,
                    })),
                ),
                Err(e) => ControlResponse::error(request_id, e.to_string()),
            }
        }
        IncomingRequest::HookCallback {
            callback_id,
            input,
            tool_use_id,
        } => {
            let ctx = HookContext {
                request_id: request_id.to_string(),
                cancel,
            };
            match shared.hooks.dispatch(&callback_id, input, tool_use_id, ctx).await {
                Ok(output) => ControlResponse::success(request_id, Some(output)),
                Err(e) => ControlResponse::error(request_id, e.to_string()),
            }
        }
        IncomingRequest::McpToolCall {
            server_name,
            tool_name,
            input,
        } => match shared
            .bridge
            .call_tool(&server_name, &tool_name, input, cancel)
            .await
        {
            Ok(output) => match serde_json::to_value(&output) {
                Ok(v) => ControlResponse::success(request_id, Some(v)),
                Err(e) => ControlResponse::error(request_id, e.to_string()),
            },
            Err(e) => ControlResponse::error(request_id, e.to_string()),
        },
        IncomingRequest::McpMessage {
            server_name,
            message,
        } => match shared.bridge.handle_message(&server_name, message, cancel).await {
            Some(reply) => {
                ControlResponse::success(request_id, Some(json!({ "mcp_response": reply })))
            }
            // JSON-RPC notifications never receive a response envelope;
            // the control request itself is still acknowledged.
            None => ControlResponse::success(request_id, None),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_state_fires_once() {
        let state = ResultState::new();
        let mut rx = state.subscribe();
        assert!(!state.received());

        let msg: ResultMessage = serde_json::from_value(json!({"subtype": "success"})).unwrap();
        state.record(msg.clone());
        state.record(msg);

        assert!(state.received());
        assert!(*rx.borrow_and_update());
        assert_eq!(state.last().unwrap().subtype, "success");
    }
}
