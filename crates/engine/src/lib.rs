//! tether-engine — client side of a bidirectional control protocol over a
//! newline-delimited JSON record stream.
//!
//! The peer (typically a subprocess) sends application messages interleaved
//! with control traffic. The engine demultiplexes both directions:
//!
//! - outgoing control requests are correlated to their responses by fresh
//!   request IDs ([`correlator`]);
//! - inbound control requests (permission checks, hook callbacks, tool
//!   calls) are dispatched concurrently and always answered ([`engine`]);
//! - hook handlers are addressed by callback IDs minted at initialize time
//!   ([`hooks`]);
//! - in-process MCP tool servers answer JSON-RPC traffic tunnelled through
//!   the control channel ([`bridge`]);
//! - application messages flow out through bounded queues that drop under
//!   consumer lag rather than stall the protocol.
//!
//! Wire shapes live in [`tether_protocol`], re-exported as [`protocol`].

pub mod bridge;
pub mod builder;
pub mod correlator;
pub mod engine;
pub mod hooks;
pub mod ops;
pub mod transport;
pub mod types;

pub use tether_protocol as protocol;

pub use bridge::{tool, McpBridge, SdkMcpServer, ToolContent, ToolContext, ToolDef, ToolHandler, ToolOutput};
pub use builder::EngineBuilder;
pub use engine::ProtocolEngine;
pub use hooks::{HookContext, HookHandler, HookMatcher, HookRegistry};
pub use ops::McpServerSpec;
pub use transport::{Transport, TransportError};
pub use types::{EngineError, PermissionContext, PermissionHandler, PermissionResult};

pub use tether_protocol::{
    HookEvent, HookInput, HookOutput, Message, OutgoingRequest, ResultMessage,
};
