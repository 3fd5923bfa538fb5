//! Typed control operations.
//!
//! Thin wrappers over [`ProtocolEngine::send_control_request`] that build
//! the request payload and, where an operation has session-local side
//! effects (initialize mints hook callback IDs, `set_mcp_servers` swaps the
//! in-process server set), apply them at the right moment.

use std::collections::HashMap;

use serde_json::{json, Value};

use tether_protocol::OutgoingRequest;

use crate::bridge::SdkMcpServer;
use crate::engine::ProtocolEngine;
use crate::types::EngineError;

/// One entry in a dynamic MCP server reconfiguration: either an in-process
/// server handled by the bridge, or an external server config the peer
/// manages on its own.
pub enum McpServerSpec {
    Sdk(SdkMcpServer),
    External(Value),
}

impl ProtocolEngine {
    /// Perform the capability handshake. Hook callback IDs are minted here
    /// and advertised to the peer; the peer's reply describes its supported
    /// commands and modes.
    pub async fn initialize(&self) -> Result<Value, EngineError> {
        let hooks = self
            .shared
            .hooks
            .build_initialize_payload(&self.shared.hook_config);
        self.send_control_request(OutgoingRequest::Initialize { hooks }, None)
            .await
    }

    /// Interrupt whatever the peer is currently doing.
    pub async fn interrupt(&self) -> Result<(), EngineError> {
        self.send_control_request(OutgoingRequest::Interrupt, None)
            .await?;
        Ok(())
    }

    pub async fn set_permission_mode(&self, mode: &str) -> Result<(), EngineError> {
        self.send_control_request(
            OutgoingRequest::SetPermissionMode { mode: mode.into() },
            None,
        )
        .await?;
        Ok(())
    }

    /// Switch the peer's model; `None` resets to its default.
    pub async fn set_model(&self, model: Option<&str>) -> Result<(), EngineError> {
        self.send_control_request(
            OutgoingRequest::SetModel {
                model: model.map(str::to_string),
            },
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn set_max_thinking_tokens(&self, max: Option<u64>) -> Result<(), EngineError> {
        self.send_control_request(
            OutgoingRequest::SetMaxThinkingTokens {
                max_thinking_tokens: max,
            },
            None,
        )
        .await?;
        Ok(())
    }

    /// Rewind the peer's file state to a checkpoint. With `dry_run` the
    /// peer reports what would change without touching anything.
    pub async fn rewind_files(
        &self,
        user_message_id: Option<&str>,
        dry_run: bool,
    ) -> Result<Value, EngineError> {
        self.send_control_request(
            OutgoingRequest::RewindFiles {
                user_message_id: user_message_id.map(str::to_string),
                dry_run,
            },
            None,
        )
        .await
    }

    /// Connection status of every MCP server the peer knows about.
    pub async fn mcp_server_status(&self) -> Result<Value, EngineError> {
        self.send_control_request(OutgoingRequest::McpServerStatus, None)
            .await
    }

    /// Reconnect one MCP server, or all of them when `server_name` is `None`.
    pub async fn mcp_reconnect(&self, server_name: Option<&str>) -> Result<(), EngineError> {
        self.send_control_request(
            OutgoingRequest::McpReconnect {
                server_name: server_name.map(str::to_string),
            },
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn mcp_toggle(&self, server_name: &str, enabled: bool) -> Result<(), EngineError> {
        self.send_control_request(
            OutgoingRequest::McpToggle {
                server_name: server_name.into(),
                enabled,
            },
            None,
        )
        .await?;
        Ok(())
    }

    /// Replace the peer's MCP server set. In-process servers are sent as
    /// lightweight `{"type": "sdk"}` markers on the wire; their handlers
    /// are installed in the local bridge only after the peer accepts the
    /// new configuration, so a rejected swap leaves the bridge untouched.
    pub async fn set_mcp_servers(
        &self,
        servers: HashMap<String, McpServerSpec>,
    ) -> Result<Value, EngineError> {
        let mut wire = HashMap::new();
        let mut local = Vec::new();
        for (name, spec) in servers {
            match spec {
                McpServerSpec::Sdk(server) => {
                    wire.insert(name, json!({"type": "sdk", "name": server.name}));
                    local.push(server);
                }
                McpServerSpec::External(config) => {
                    wire.insert(name, config);
                }
            }
        }

        let reply = self
            .send_control_request(OutgoingRequest::SetMcpServers { servers: wire }, None)
            .await?;
        self.shared.bridge.replace_all(local);
        Ok(reply)
    }
}
