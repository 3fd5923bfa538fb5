//! `tether-protocol` — wire types for the tether control protocol.
//!
//! The control protocol is a request/response/notification exchange layered
//! on top of newline-delimited JSON records flowing between the engine and a
//! single long-lived peer process. Three record `type`s belong to the control
//! plane (`control_request`, `control_response`, `control_cancel_request`);
//! every other record is an application message.
//!
//! This crate is pure data: envelope and payload types with their serde
//! derives, plus the JSON-RPC 2.0 types used by the in-process MCP bridge.
//! All I/O, correlation, and dispatch live in `tether-engine`.

pub mod control;
pub mod hooks;
pub mod jsonrpc;
pub mod message;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use control::{
    classify, CancelEnvelope, ControlRequestEnvelope, ControlResponse, ControlResponseEnvelope,
    IncomingRequest, OutgoingRequest, RecordKind, OUTGOING_ONLY_SUBTYPES,
};
pub use hooks::{HookEvent, HookInput, HookMatcherPayload, HookOutput};
pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use message::{parse_message, Message, ResultMessage};
