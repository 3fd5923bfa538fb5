//! Hook dispatch subsystem.
//!
//! Callers register hook handlers per lifecycle event at configuration time.
//! At session initialize, every handler is minted a stable callback ID and
//! the (event → matchers → IDs) mapping is serialized for the peer; matching
//! against runtime values is the peer's job, the client-side registry only
//! remembers which ID maps to which handler. At runtime, `hook_callback`
//! control requests are dispatched here by callback ID.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use tether_protocol::{HookEvent, HookInput, HookMatcherPayload, HookOutput};

/// Context passed to every hook invocation.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Control request ID of the `hook_callback` being answered.
    pub request_id: String,
    /// Cancelled if the peer cancels this request or the session closes.
    pub cancel: CancellationToken,
}

/// A caller-supplied hook. Errors are converted into an error control
/// response for that exchange and never crash the router.
#[async_trait]
pub trait HookHandler: Send + Sync + 'static {
    async fn run(
        &self,
        input: HookInput,
        tool_use_id: Option<String>,
        ctx: HookContext,
    ) -> Result<HookOutput, anyhow::Error>;
}

/// One registration: an optional matcher (e.g. a tool name for PreToolUse),
/// the handlers it applies to, and an optional timeout the peer enforces.
#[derive(Clone)]
pub struct HookMatcher {
    pub matcher: Option<String>,
    pub hooks: Vec<Arc<dyn HookHandler>>,
    pub timeout: Option<Duration>,
}

impl HookMatcher {
    pub fn new(matcher: Option<&str>, hooks: Vec<Arc<dyn HookHandler>>) -> Self {
        Self {
            matcher: matcher.map(str::to_string),
            hooks,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Handle-to-handler registry. IDs are minted once per handler at
/// initialize time and never reused for the life of the session.
pub struct HookRegistry {
    next_id: AtomicU64,
    callbacks: RwLock<HashMap<String, Arc<dyn HookHandler>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            callbacks: RwLock::new(HashMap::new()),
        }
    }

    /// Mint callback IDs for every configured handler and build the
    /// initialize payload: event name → list of matcher entries.
    /// Returns `None` when no hooks are configured.
    pub fn build_initialize_payload(
        &self,
        config: &HashMap<HookEvent, Vec<HookMatcher>>,
    ) -> Option<HashMap<String, Vec<HookMatcherPayload>>> {
        if config.is_empty() {
            return None;
        }

        let mut payload = HashMap::new();
        for (event, matchers) in config {
            let entries = matchers
                .iter()
                .map(|m| HookMatcherPayload {
                    matcher: m.matcher.clone(),
                    hook_callback_ids: m.hooks.iter().map(|h| self.mint(h.clone())).collect(),
                    timeout: m.timeout.map(|t| t.as_secs_f64()),
                })
                .collect();
            payload.insert(event.as_str().to_string(), entries);
        }
        Some(payload)
    }

    fn mint(&self, handler: Arc<dyn HookHandler>) -> String {
        let id = format!("hook_{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().insert(id.clone(), handler);
        id
    }

    pub fn get(&self, callback_id: &str) -> Option<Arc<dyn HookHandler>> {
        self.callbacks.read().get(callback_id).cloned()
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Dispatch a `hook_callback` request: look up the handler, parse the
    /// typed input, run it, and serialize the output with its "only if set"
    /// semantics. An unknown callback ID is a protocol-level contract
    /// violation and is reported as an error, not swallowed.
    pub async fn dispatch(
        &self,
        callback_id: &str,
        input: Value,
        tool_use_id: Option<String>,
        ctx: HookContext,
    ) -> Result<Value, anyhow::Error> {
        let handler = self
            .get(callback_id)
            .ok_or_else(|| anyhow::anyhow!("no hook callback found for id: {callback_id}"))?;

        let input: HookInput = serde_json::from_value(input)
            .map_err(|e| anyhow::anyhow!("malformed hook input: {e}"))?;

        tracing::debug!(callback_id, request_id = %ctx.request_id, "dispatching hook callback");
        let output = handler.run(input, tool_use_id, ctx).await?;
        Ok(serde_json::to_value(output)?)
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
