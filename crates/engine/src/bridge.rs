//! MCP bridge — a mini JSON-RPC 2.0 server over in-process tool servers.
//!
//! The peer routes `tools/*` traffic for servers declared as
//! `{"type":"sdk"}` back through the control protocol (`mcp_message`
//! requests); this bridge answers that traffic against a registry of
//! in-process tool definitions, so tool handlers run inside the host
//! process instead of a child process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use tether_protocol::jsonrpc::{
    JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, INVALID_REQUEST, MCP_PROTOCOL_VERSION,
    METHOD_NOT_FOUND,
};

/// Context passed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub server_name: String,
    pub tool_name: String,
    /// Cancelled if the peer cancels the enclosing control request or the
    /// session closes.
    pub cancel: CancellationToken,
}

/// One content item of a tool result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text {
        text: String,
    },
    /// Base64 payload with its MIME type.
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// The result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    pub content: Vec<ToolContent>,
    #[serde(
        rename = "isError",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: true,
        }
    }
}

/// Handler for one in-process tool.
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    async fn call(&self, ctx: ToolContext, args: Value) -> Result<ToolOutput, anyhow::Error>;
}

// Plain async closures work as tool handlers without a newtype.
#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<ToolOutput, anyhow::Error>> + Send + 'static,
{
    async fn call(&self, ctx: ToolContext, args: Value) -> Result<ToolOutput, anyhow::Error> {
        (self)(ctx, args).await
    }
}

/// An in-process tool definition.
#[derive(Clone)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool input; `None` advertises an empty object.
    pub input_schema: Option<Value>,
    pub handler: Arc<dyn ToolHandler>,
}

/// Convenience constructor for a [`ToolDef`].
pub fn tool(
    name: impl Into<String>,
    description: impl Into<String>,
    input_schema: Option<Value>,
    handler: impl ToolHandler,
) -> ToolDef {
    ToolDef {
        name: name.into(),
        description: description.into(),
        input_schema,
        handler: Arc::new(handler),
    }
}

/// An in-process tool server, addressable by name.
#[derive(Clone)]
pub struct SdkMcpServer {
    pub name: String,
    pub version: String,
    pub tools: Vec<ToolDef>,
}

impl SdkMcpServer {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: ToolDef) -> Self {
        self.tools.push(tool);
        self
    }

    fn find_tool(&self, name: &str) -> Option<&ToolDef> {
        self.tools.iter().find(|t| t.name == name)
    }
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bridge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Registry of in-process tool servers plus the JSON-RPC method router.
pub struct McpBridge {
    servers: RwLock<HashMap<String, Arc<SdkMcpServer>>>,
}

impl McpBridge {
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, server: SdkMcpServer) {
        self.servers
            .write()
            .insert(server.name.clone(), Arc::new(server));
    }

    /// Atomically reconcile the registry to contain exactly `servers`.
    /// In-flight tool calls keep the `Arc` of the server they resolved.
    pub fn replace_all(&self, servers: Vec<SdkMcpServer>) {
        let next: HashMap<String, Arc<SdkMcpServer>> = servers
            .into_iter()
            .map(|s| (s.name.clone(), Arc::new(s)))
            .collect();
        *self.servers.write() = next;
    }

    pub fn has_servers(&self) -> bool {
        !self.servers.read().is_empty()
    }

    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn get(&self, server_name: &str) -> Option<Arc<SdkMcpServer>> {
        self.servers.read().get(server_name).cloned()
    }

    /// Invoke a tool directly (the `mcp_tool_call` path, no JSON-RPC
    /// framing). Lookup failures and handler errors surface as plain
    /// errors for the enclosing control response.
    pub async fn call_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        args: Value,
        cancel: CancellationToken,
    ) -> Result<ToolOutput, anyhow::Error> {
        let server = self
            .get(server_name)
            .ok_or_else(|| anyhow::anyhow!("server not found: {server_name}"))?;
        let tool = server
            .find_tool(tool_name)
            .ok_or_else(|| anyhow::anyhow!("tool not found: {tool_name}"))?;
        let ctx = ToolContext {
            server_name: server_name.to_string(),
            tool_name: tool_name.to_string(),
            cancel,
        };
        tool.handler.call(ctx, args).await
    }

    /// Answer one JSON-RPC message addressed to `server_name`. Returns
    /// `None` for notifications, which never receive a response envelope.
    /// All failures are scoped to the JSON-RPC exchange: they come back as
    /// JSON-RPC error responses, never as control-protocol errors.
    pub async fn handle_message(
        &self,
        server_name: &str,
        message: Value,
        cancel: CancellationToken,
    ) -> Option<Value> {
        let request: JsonRpcRequest = match serde_json::from_value(message) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(server = server_name, error = %e, "unparseable JSON-RPC message");
                return Some(to_value(JsonRpcResponse::error(
                    Value::Null,
                    INVALID_REQUEST,
                    format!("invalid JSON-RPC message: {e}"),
                )));
            }
        };

        // Notifications are acknowledged by sending nothing at all.
        if request.is_notification() {
            tracing::debug!(server = server_name, method = %request.method, "notification");
            return None;
        }
        let id = request.id.clone().unwrap_or(Value::Null);

        let server = match self.get(server_name) {
            Some(s) => s,
            None => {
                return Some(to_value(JsonRpcResponse::error(
                    id,
                    METHOD_NOT_FOUND,
                    format!("server not found: {server_name}"),
                )));
            }
        };

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::result(
                id,
                json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": server.name, "version": server.version },
                }),
            ),
            "tools/list" => {
                let tools: Vec<Value> = server
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "inputSchema": t.input_schema.clone().unwrap_or_else(empty_schema),
                        })
                    })
                    .collect();
                JsonRpcResponse::result(id, json!({ "tools": tools }))
            }
            "tools/call" => self.tools_call(&server, id, request.params, cancel).await,
            "ping" => JsonRpcResponse::result(id, json!({})),
            other => JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            ),
        };

        Some(to_value(response))
    }

    async fn tools_call(
        &self,
        server: &SdkMcpServer,
        id: Value,
        params: Option<Value>,
        cancel: CancellationToken,
    ) -> JsonRpcResponse {
        let params = params.unwrap_or_default();
        let tool_name = match params.get("name").and_then(Value::as_str) {
            Some(n) => n.to_string(),
            None => {
                return JsonRpcResponse::error(id, INTERNAL_ERROR, "tools/call missing tool name");
            }
        };
        let args = params.get("arguments").cloned().unwrap_or(json!({}));

        // Unknown tool deliberately shares the internal-error code with
        // handler failures: the exact code is observable wire behavior.
        let tool = match server.find_tool(&tool_name) {
            Some(t) => t,
            None => {
                return JsonRpcResponse::error(
                    id,
                    INTERNAL_ERROR,
                    format!("tool not found: {tool_name}"),
                );
            }
        };

        let ctx = ToolContext {
            server_name: server.name.clone(),
            tool_name: tool_name.clone(),
            cancel,
        };
        match tool.handler.call(ctx, args).await {
            Ok(output) => match serde_json::to_value(&output) {
                Ok(v) => JsonRpcResponse::result(id, v),
                Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
            },
            Err(e) => {
                tracing::debug!(tool = %tool_name, error = %e, "tool handler failed");
                JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string())
            }
        }
    }
}

impl Default for McpBridge {
    fn default() -> Self {
        Self::new()
    }
}

fn to_value(response: JsonRpcResponse) -> Value {
    // Responses are plain data; this cannot fail in practice.
    serde_json::to_value(response).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        async fn call(&self, _ctx: ToolContext, args: Value) -> Result<ToolOutput, anyhow::Error> {
            Ok(ToolOutput::text(args.to_string()))
        }
    }

    struct FailTool;

    #[async_trait]
    impl ToolHandler for FailTool {
        async fn call(&self, _ctx: ToolContext, _args: Value) -> Result<ToolOutput, anyhow::Error> {
            Err(anyhow::anyhow!("intentional failure"))
        }
    }

    fn bridge_with_calc() -> McpBridge {
        let bridge = McpBridge::new();
        bridge.register(
            SdkMcpServer::new("calc", "1.0.0")
                .with_tool(tool("echo", "Echo the arguments", None, EchoTool))
                .with_tool(tool(
                    "explode",
                    "Always fails",
                    Some(json!({"type": "object", "properties": {"x": {"type": "number"}}})),
                    FailTool,
                )),
        );
        bridge
    }

    fn request(id: i64, method: &str, params: Option<Value>) -> Value {
        let mut msg = json!({"jsonrpc": "2.0", "id": id, "method": method});
        if let Some(p) = params {
            msg["params"] = p;
        }
        msg
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let bridge = bridge_with_calc();
        let reply = bridge
            .handle_message("calc", request(1, "initialize", None), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply["result"]["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(reply["result"]["serverInfo"]["name"], "calc");
        assert_eq!(reply["result"]["serverInfo"]["version"], "1.0.0");
        assert!(reply["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn tools_list_defaults_schema() {
        let bridge = bridge_with_calc();
        let reply = bridge
            .handle_message("calc", request(2, "tools/list", None), CancellationToken::new())
            .await
            .unwrap();
        let tools = reply["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["name"], "echo");
        assert_eq!(
            tools[0]["inputSchema"],
            json!({"type": "object", "properties": {}})
        );
        assert_eq!(tools[1]["inputSchema"]["properties"]["x"]["type"], "number");
    }

    #[tokio::test]
    async fn tools_call_echoes_content() {
        let bridge = bridge_with_calc();
        let reply = bridge
            .handle_message(
                "calc",
                request(
                    3,
                    "tools/call",
                    Some(json!({"name": "echo", "arguments": {"a": 1}})),
                ),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(reply["result"]["content"][0]["type"], "text");
        assert_eq!(reply["result"]["content"][0]["text"], r#"{"a":1}"#);
        assert!(reply["result"].get("isError").is_none());
    }

    #[tokio::test]
    async fn unknown_server_is_method_not_found() {
        let bridge = bridge_with_calc();
        let reply = bridge
            .handle_message("nope", request(4, "tools/list", None), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], -32601);
        assert!(reply["error"]["message"]
            .as_str()
            .unwrap()
            .contains("server not found"));
    }

    #[tokio::test]
    async fn unknown_tool_is_internal_error() {
        let bridge = bridge_with_calc();
        let reply = bridge
            .handle_message(
                "calc",
                request(5, "tools/call", Some(json!({"name": "missing"}))),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], -32603);
        assert!(reply["error"]["message"]
            .as_str()
            .unwrap()
            .contains("tool not found"));
    }

    #[tokio::test]
    async fn handler_failure_is_internal_error_with_message() {
        let bridge = bridge_with_calc();
        let reply = bridge
            .handle_message(
                "calc",
                request(6, "tools/call", Some(json!({"name": "explode"}))),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], -32603);
        assert!(reply["error"]["message"]
            .as_str()
            .unwrap()
            .contains("intentional failure"));
    }

    #[tokio::test]
    async fn ping_succeeds() {
        let bridge = bridge_with_calc();
        let reply = bridge
            .handle_message("calc", request(7, "ping", None), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply["result"], json!({}));
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let bridge = bridge_with_calc();
        let reply = bridge
            .handle_message(
                "calc",
                request(8, "resources/list", None),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let bridge = bridge_with_calc();
        for method in ["notifications/initialized", "notifications/cancelled"] {
            let msg = json!({"jsonrpc": "2.0", "method": method});
            assert!(bridge
                .handle_message("calc", msg, CancellationToken::new())
                .await
                .is_none());
        }
    }

    #[tokio::test]
    async fn replace_all_reconciles_registry() {
        let bridge = McpBridge::new();
        bridge.register(SdkMcpServer::new("a", "1.0.0").with_tool(tool(
            "t",
            "",
            None,
            EchoTool,
        )));
        assert_eq!(bridge.server_names(), vec!["a"]);

        bridge.replace_all(vec![SdkMcpServer::new("b", "1.0.0").with_tool(tool(
            "t",
            "",
            None,
            EchoTool,
        ))]);
        assert_eq!(bridge.server_names(), vec!["b"]);

        // Old name now answers "server not found"; new one succeeds.
        let reply = bridge
            .handle_message("a", request(1, "tools/list", None), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], -32601);

        let reply = bridge
            .handle_message("b", request(2, "tools/list", None), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply["result"]["tools"][0]["name"], "t");
    }

    #[tokio::test]
    async fn call_tool_direct_path() {
        let bridge = bridge_with_calc();
        let out = bridge
            .call_tool("calc", "echo", json!({"x": 2}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::text(r#"{"x":2}"#));

        let err = bridge
            .call_tool("calc", "missing", json!({}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("tool not found"));

        let err = bridge
            .call_tool("ghost", "echo", json!({}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("server not found"));
    }
}
