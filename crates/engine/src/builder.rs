//! Fluent construction of a [`ProtocolEngine`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tether_protocol::HookEvent;

use crate::bridge::SdkMcpServer;
use crate::engine::ProtocolEngine;
use crate::hooks::HookMatcher;
use crate::transport::Transport;
use crate::types::PermissionHandler;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CLOSE_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

pub(crate) struct EngineConfig {
    pub(crate) streaming: bool,
    pub(crate) request_timeout: Duration,
    pub(crate) close_wait_timeout: Duration,
    pub(crate) channel_capacity: usize,
    pub(crate) hooks: HashMap<HookEvent, Vec<HookMatcher>>,
    pub(crate) permission: Option<Arc<dyn PermissionHandler>>,
    pub(crate) servers: Vec<SdkMcpServer>,
}

/// Builder for [`ProtocolEngine`]. All knobs have defaults; only the
/// transport is required, supplied at [`build`](Self::build) time.
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    pub(crate) fn new() -> Self {
        Self {
            config: EngineConfig {
                streaming: true,
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
                close_wait_timeout: DEFAULT_CLOSE_WAIT_TIMEOUT,
                channel_capacity: DEFAULT_CHANNEL_CAPACITY,
                hooks: HashMap::new(),
                permission: None,
                servers: Vec::new(),
            },
        }
    }

    /// Whether the underlying connection is a streaming one. Control
    /// requests are rejected on non-streaming connections.
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.config.streaming = streaming;
        self
    }

    /// Default deadline for outgoing control requests.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// How long `stream_input_with_wait` holds the outbound half open
    /// waiting for a first result.
    pub fn close_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_wait_timeout = timeout;
        self
    }

    /// Capacity of the message, raw, and error queues.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Register hook matchers for a lifecycle event. Repeated calls for the
    /// same event append.
    pub fn add_hooks(mut self, event: HookEvent, matchers: Vec<HookMatcher>) -> Self {
        self.config.hooks.entry(event).or_default().extend(matchers);
        self
    }

    /// Handler consulted for `can_use_tool` permission requests.
    pub fn permission_handler(mut self, handler: Arc<dyn PermissionHandler>) -> Self {
        self.config.permission = Some(handler);
        self
    }

    /// Register an in-process tool server, addressable by its name.
    pub fn mcp_server(mut self, server: SdkMcpServer) -> Self {
        self.config.servers.push(server);
        self
    }

    pub fn build(self, transport: Arc<dyn Transport>) -> ProtocolEngine {
        ProtocolEngine::new(transport, self.config)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
