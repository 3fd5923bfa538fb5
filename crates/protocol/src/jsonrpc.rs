//! JSON-RPC 2.0 types for the MCP bridge.
//!
//! Unlike a JSON-RPC client, the bridge sits on the server side of the
//! exchange: request IDs are opaque [`Value`]s echoed back verbatim, and
//! requests without an `id` are notifications that never receive a response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol revision advertised by the bridge's `initialize` result.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error code: malformed request object.
pub const INVALID_REQUEST: i64 = -32600;
/// JSON-RPC error code: method (or addressed server) not found.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code: internal error (tool lookup or handler failure).
pub const INTERNAL_ERROR: i64 = -32603;

/// A JSON-RPC 2.0 request or notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: None,
            method: method.into(),
            params: None,
        }
    }

    /// Notifications carry no `id` and must never be answered.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_with_numeric_id() {
        let raw = r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#;
        let req: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.id, Some(json!(3)));
        assert!(!req.is_notification());
    }

    #[test]
    fn request_with_string_id() {
        let raw = r#"{"jsonrpc":"2.0","id":"abc","method":"ping"}"#;
        let req: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.id, Some(json!("abc")));
    }

    #[test]
    fn notification_has_no_id() {
        let raw = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let req: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert!(req.is_notification());

        let out = serde_json::to_string(&JsonRpcRequest::notification("notifications/cancelled"))
            .unwrap();
        assert!(!out.contains("\"id\""));
    }

    #[test]
    fn success_response_omits_error() {
        let resp = JsonRpcResponse::result(json!(1), json!({"tools": []}));
        let text = serde_json::to_string(&resp).unwrap();
        assert!(text.contains("\"result\""));
        assert!(!text.contains("\"error\""));
        assert!(!resp.is_error());
    }

    #[test]
    fn error_response_shape() {
        let resp = JsonRpcResponse::error(json!(2), METHOD_NOT_FOUND, "method not found");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["code"], -32601);
        assert_eq!(json["error"]["message"], "method not found");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn error_display() {
        let err = JsonRpcError {
            code: INTERNAL_ERROR,
            message: "boom".into(),
            data: None,
        };
        assert_eq!(format!("{err}"), "JSON-RPC error -32603: boom");
    }
}
