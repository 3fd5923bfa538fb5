//! Typed application messages.
//!
//! Any record whose `type` is not a control-plane discriminator is an
//! application message. The engine forwards the raw value as-is and, when
//! the record parses into one of these shapes, a typed [`Message`] as well.
//! A `result` message is terminal: it marks the end of one exchange turn.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A typed application message from the peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    User {
        message: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    Assistant {
        message: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    System {
        subtype: String,
        #[serde(flatten)]
        data: serde_json::Map<String, Value>,
    },
    Result(ResultMessage),
    StreamEvent {
        event: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl Message {
    /// Whether this message terminates the current exchange turn.
    pub fn is_result(&self) -> bool {
        matches!(self, Self::Result(_))
    }
}

/// The terminal message for one exchange turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMessage {
    pub subtype: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub duration_api_ms: u64,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Parse a raw record into a typed [`Message`].
pub fn parse_message(record: &Value) -> Result<Message, serde_json::Error> {
    serde_json::from_value(record.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_assistant_message() {
        let raw = json!({
            "type": "assistant",
            "message": {"role": "assistant", "content": [{"type": "text", "text": "hi"}]},
            "session_id": "s1"
        });
        let msg = parse_message(&raw).unwrap();
        match msg {
            Message::Assistant { session_id, .. } => {
                assert_eq!(session_id.as_deref(), Some("s1"));
            }
            other => panic!("expected assistant, got {other:?}"),
        }
    }

    #[test]
    fn parse_result_message() {
        let raw = json!({
            "type": "result",
            "subtype": "success",
            "duration_ms": 1200,
            "duration_api_ms": 900,
            "is_error": false,
            "num_turns": 2,
            "session_id": "s1",
            "total_cost_usd": 0.003,
            "result": "done"
        });
        let msg = parse_message(&raw).unwrap();
        assert!(msg.is_result());
        match msg {
            Message::Result(r) => {
                assert_eq!(r.subtype, "success");
                assert_eq!(r.duration_ms, 1200);
                assert_eq!(r.total_cost_usd, Some(0.003));
                assert_eq!(r.result.as_deref(), Some("done"));
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn parse_system_message_keeps_extra_fields() {
        let raw = json!({
            "type": "system",
            "subtype": "init",
            "tools": ["Bash", "Read"],
            "model": "default"
        });
        match parse_message(&raw).unwrap() {
            Message::System { subtype, data } => {
                assert_eq!(subtype, "init");
                assert_eq!(data["tools"], json!(["Bash", "Read"]));
            }
            other => panic!("expected system, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_error() {
        assert!(parse_message(&json!({"type": "telemetry", "x": 1})).is_err());
    }

    #[test]
    fn stream_event_parses() {
        let raw = json!({
            "type": "stream_event",
            "event": {"type": "content_block_delta", "delta": {"text": "h"}}
        });
        assert!(matches!(
            parse_message(&raw).unwrap(),
            Message::StreamEvent { .. }
        ));
    }
}
