//! Engine error taxonomy and the permission-check seam.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::transport::TransportError;

/// Top-level engine error.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("control requests require streaming mode")]
    RequiresStreaming,

    #[error("engine is not started")]
    NotStarted,

    #[error("engine is already started")]
    AlreadyStarted,

    #[error("control request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("control request failed: {0}")]
    RequestFailed(String),

    #[error("control request cancelled: {0}")]
    RequestCancelled(String),

    #[error("session closed")]
    SessionClosed,

    #[error("transport closed before a response arrived")]
    TransportClosed,

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("serialization: {0}")]
    Json(#[from] serde_json::Error),

    /// Reported on the passive error stream when an inbound record cannot
    /// be parsed; never fails the control protocol.
    #[error("failed to parse message: {error}")]
    MalformedMessage { error: String, raw: String },
}

/// Extra context carried by a `can_use_tool` request.
#[derive(Debug, Clone, Default)]
pub struct PermissionContext {
    /// Permission updates the peer suggests applying on allow.
    pub suggestions: Option<Value>,
    /// Path that triggered the check, when the tool touched the filesystem.
    pub blocked_path: Option<String>,
    /// Cancelled if the peer cancels this request or the session closes.
    pub cancel: CancellationToken,
}

/// Outcome of a permission check.
#[derive(Debug, Clone)]
pub enum PermissionResult {
    Allow {
        /// Replacement tool input; `None` keeps the original.
        updated_input: Option<Value>,
        /// Permission rule updates to persist alongside the allow.
        updated_permissions: Option<Value>,
    },
    Deny {
        message: String,
        /// Request the peer to interrupt the current turn as well.
        interrupt: bool,
    },
}

impl PermissionResult {
    pub fn allow() -> Self {
        Self::Allow {
            updated_input: None,
            updated_permissions: None,
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
            interrupt: false,
        }
    }
}

/// Caller-supplied permission check, invoked for every `can_use_tool`
/// request from the peer. Errors are converted into an error control
/// response for that exchange only.
#[async_trait]
pub trait PermissionHandler: Send + Sync + 'static {
    async fn can_use_tool(
        &self,
        tool_name: &str,
        input: Value,
        ctx: PermissionContext,
    ) -> Result<PermissionResult, anyhow::Error>;
}
