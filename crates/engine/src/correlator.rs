//! Outgoing-request correlation.
//!
//! Every outgoing control request registers a oneshot slot keyed by a fresh
//! request ID; the router resolves the slot when a `control_response` with
//! that ID arrives. IDs combine a monotonic counter with a random per-session
//! suffix so they never collide across process restarts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use tether_protocol::ControlResponse;

pub struct RequestRegistry {
    seq: AtomicU64,
    session_suffix: String,
    pending: Mutex<HashMap<String, oneshot::Sender<ControlResponse>>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        let mut suffix = uuid::Uuid::new_v4().simple().to_string();
        suffix.truncate(8);
        Self {
            seq: AtomicU64::new(0),
            session_suffix: suffix,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a fresh request ID and register a pending slot for it.
    pub fn register(&self) -> (String, oneshot::Receiver<ControlResponse>) {
        let n = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let request_id = format!("req_{}_{}", n, self.session_suffix);
        let (tx, rx) = oneshot::channel();
        let prev = self.pending.lock().insert(request_id.clone(), tx);
        debug_assert!(prev.is_none(), "request_id collision: {request_id}");
        (request_id, rx)
    }

    /// Resolve the pending request matching this response. Returns `false`
    /// when the ID is unknown (already timed out, cancelled, or never ours)
    /// — such responses are discarded.
    pub fn complete(&self, response: ControlResponse) -> bool {
        match self.pending.lock().remove(response.request_id()) {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Drop a pending slot (timeout or cancellation on the caller's side).
    pub fn remove(&self, request_id: &str) {
        self.pending.lock().remove(request_id);
    }

    /// Drop every pending slot, waking all waiters with a closed-channel
    /// error. Called when the inbound stream terminates so callers fail
    /// fast instead of waiting out their timeouts.
    pub fn fail_all(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}
