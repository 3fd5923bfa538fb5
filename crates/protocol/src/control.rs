//! Control-plane envelopes and request payloads.
//!
//! Wire shapes (one JSON record per line):
//! - Outgoing request: `{"type":"control_request","request_id":"req_<seq>_<hex>","request":{"subtype":...}}`
//! - Response: `{"type":"control_response","response":{"subtype":"success"|"error","request_id":...,...}}`
//! - Cancellation: `{"type":"control_cancel_request","request_id":...}`

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hooks::HookMatcherPayload;

/// Record `type` discriminator for control requests.
pub const CONTROL_REQUEST: &str = "control_request";
/// Record `type` discriminator for control responses.
pub const CONTROL_RESPONSE: &str = "control_response";
/// Record `type` discriminator for peer-issued request cancellations.
pub const CONTROL_CANCEL_REQUEST: &str = "control_cancel_request";

/// Subtypes the engine sends but never accepts as incoming. Receiving one of
/// these is a protocol violation answered with an error response.
pub const OUTGOING_ONLY_SUBTYPES: &[&str] =
    &["interrupt", "initialize", "set_permission_mode", "rewind_files"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Coarse classification of an inbound record by its `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    ControlResponse,
    ControlRequest,
    ControlCancelRequest,
    /// Anything that is not a control-plane record.
    Application,
}

/// Classify a raw record. Records without a string `type` field are
/// application messages (their parse failure, if any, is reported later).
pub fn classify(record: &Value) -> RecordKind {
    match record.get("type").and_then(Value::as_str) {
        Some(CONTROL_RESPONSE) => RecordKind::ControlResponse,
        Some(CONTROL_REQUEST) => RecordKind::ControlRequest,
        Some(CONTROL_CANCEL_REQUEST) => RecordKind::ControlCancelRequest,
        _ => RecordKind::Application,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelopes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A control request envelope, used in both directions. The payload stays a
/// raw [`Value`] here so a malformed payload can still be answered with an
/// error response carrying the request ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequestEnvelope {
    #[serde(rename = "type")]
    pub record_type: String,
    pub request_id: String,
    pub request: Value,
}

impl ControlRequestEnvelope {
    pub fn new(request_id: impl Into<String>, request: Value) -> Self {
        Self {
            record_type: CONTROL_REQUEST.into(),
            request_id: request_id.into(),
            request,
        }
    }
}

/// A control response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponseEnvelope {
    #[serde(rename = "type")]
    pub record_type: String,
    pub response: ControlResponse,
}

impl ControlResponseEnvelope {
    pub fn new(response: ControlResponse) -> Self {
        Self {
            record_type: CONTROL_RESPONSE.into(),
            response,
        }
    }
}

/// The body of a control response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlResponse {
    Success {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },
    Error {
        request_id: String,
        error: String,
    },
}

impl ControlResponse {
    pub fn success(request_id: impl Into<String>, response: Option<Value>) -> Self {
        Self::Success {
            request_id: request_id.into(),
            response,
        }
    }

    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            request_id: request_id.into(),
            error: message.into(),
        }
    }

    /// The request ID this response correlates to.
    pub fn request_id(&self) -> &str {
        match self {
            Self::Success { request_id, .. } | Self::Error { request_id, .. } => request_id,
        }
    }
}

/// A peer-issued cancellation of an outstanding control request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelEnvelope {
    #[serde(rename = "type")]
    pub record_type: String,
    pub request_id: String,
}

impl CancelEnvelope {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            record_type: CONTROL_CANCEL_REQUEST.into(),
            request_id: request_id.into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Control requests the engine issues to the peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum OutgoingRequest {
    Initialize {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hooks: Option<HashMap<String, Vec<HookMatcherPayload>>>,
    },
    Interrupt,
    SetPermissionMode {
        mode: String,
    },
    /// `model: null` clears a previous override.
    SetModel {
        model: Option<String>,
    },
    SetMaxThinkingTokens {
        max_thinking_tokens: Option<u64>,
    },
    RewindFiles {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_message_id: Option<String>,
        #[serde(default)]
        dry_run: bool,
    },
    McpServerStatus,
    McpReconnect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_name: Option<String>,
    },
    McpToggle {
        server_name: String,
        enabled: bool,
    },
    /// Values are either `{"type":"sdk","name":...}` placeholders for
    /// in-process servers or external connection descriptors passed through
    /// unchanged.
    SetMcpServers {
        servers: HashMap<String, Value>,
    },
}

/// Control requests the peer issues to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum IncomingRequest {
    CanUseTool {
        tool_name: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        permission_suggestions: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        blocked_path: Option<String>,
    },
    HookCallback {
        callback_id: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_use_id: Option<String>,
    },
    McpToolCall {
        server_name: String,
        tool_name: String,
        #[serde(default)]
        input: Value,
    },
    McpMessage {
        server_name: String,
        message: Value,
    },
}
