//! Remote tool federation over the Model Context Protocol.
//!
//! A [`RemoteToolEndpoint`] describes how to reach a tool server; [`connect`]
//! opens an [`McpClient`] for it, and [`McpClient::list_tools`] exposes the
//! server's tools as ordinary [`Tool`] values the agent can merge into its
//! namespace.
//!
//! # Transport Types
//! - **Stdio**: spawn the server as a subprocess, newline-delimited JSON
//! - **SSE**: GET event stream for replies, POST for requests
//! - **WebSocket**: text frames, `mcp` subprotocol
//! - **Streamable HTTP**: POST per message, JSON or SSE replies, session header

mod endpoint;
mod sse;
mod transport;
mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, Instrument};

pub use endpoint::{HeaderHook, RemoteToolEndpoint, Transport};
pub use sse::SseTransport;
pub use transport::{McpTransport, StdioTransport, StreamableHttpTransport};
pub use websocket::WebSocketTransport;

use crate::error::{AgentError, Result};
use crate::tool::{Tool, ToolContent, ToolOutput, ToolResponse};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error code for an unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;

// ─── Protocol types ─────────────────────────────────────────────────────────

/// Outbound JSON-RPC message. Requests get their `id` from the transport;
/// notifications never carry one.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// Inbound JSON-RPC message. Server-initiated requests and notifications
/// also deserialize here; [`JsonRpcResponse::answers`] tells them apart.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn answers(&self, id: u64) -> bool {
        self.method.is_none() && self.id.as_ref().and_then(Value::as_u64) == Some(id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// The server does not offer tools at all.
    pub fn is_tools_unsupported(&self) -> bool {
        self.message == "tools not supported" || self.code == METHOD_NOT_FOUND
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "default_input_schema")]
    pub input_schema: Value,
}

fn default_input_schema() -> Value {
    json!({"type": "object"})
}

#[derive(Debug, Clone, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<McpToolDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
struct CallToolResult {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(rename = "isError", default)]
    is_error: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct InitializeResult {
    #[serde(rename = "serverInfo")]
    server_info: ServerInfo,
}

// ─── Client ─────────────────────────────────────────────────────────────────

/// Open a live client for `endpoint`, dispatching on its transport variant.
pub async fn connect(endpoint: &RemoteToolEndpoint) -> Result<Arc<McpClient>> {
    let transport: Box<dyn McpTransport> = match endpoint.transport() {
        Transport::Stdio {
            command,
            args,
            env,
            cwd,
        } => Box::new(StdioTransport::spawn(command, args, env, cwd.as_ref())?),
        Transport::Sse { url, headers } => Box::new(SseTransport::connect(url, headers.clone()).await?),
        Transport::WebSocket { url } => Box::new(WebSocketTransport::connect(url).await?),
        Transport::StreamableHttp { url, headers } => {
            Box::new(StreamableHttpTransport::new(url.clone(), headers.clone()))
        }
    };
    debug!(endpoint = ?endpoint.transport(), "remote tool client connected");
    Ok(McpClient::new(endpoint.clone(), transport))
}

/// A session with one remote tool server, bound to the endpoint it came from.
pub struct McpClient {
    endpoint: RemoteToolEndpoint,
    transport: Box<dyn McpTransport>,
    server: OnceCell<ServerInfo>,
}

impl McpClient {
    pub fn new(endpoint: RemoteToolEndpoint, transport: Box<dyn McpTransport>) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            transport,
            server: OnceCell::new(),
        })
    }

    pub fn endpoint(&self) -> &RemoteToolEndpoint {
        &self.endpoint
    }

    /// Perform the MCP handshake. Later calls return the first result.
    pub async fn initialize(&self) -> Result<&ServerInfo> {
        self.server
            .get_or_try_init(|| async {
                let request = JsonRpcRequest::new(
                    "initialize",
                    Some(json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": {},
                        "clientInfo": {
                            "name": env!("CARGO_PKG_NAME"),
                            "version": env!("CARGO_PKG_VERSION"),
                        },
                    })),
                );
                let response = self.transport.send(request).await?;
                if let Some(error) = response.error {
                    return Err(AgentError::RemoteTool(format!(
                        "initialize failed: {}",
                        error.message
                    )));
                }
                let result: InitializeResult =
                    serde_json::from_value(response.result.unwrap_or_default()).map_err(|err| {
                        AgentError::RemoteTool(format!("invalid initialize result: {err}"))
                    })?;

                self.transport
                    .notify(JsonRpcRequest::new("notifications/initialized", None))
                    .await?;
                debug!(server = %result.server_info.name, "remote tool server initialized");
                Ok(result.server_info)
            })
            .await
    }

    /// Raw definitions, served from the endpoint cache when possible.
    pub async fn tool_definitions(&self) -> Result<Vec<McpToolDefinition>> {
        if let Some(cached) = self.endpoint.cached_tools() {
            return Ok(cached.to_vec());
        }

        let response = self
            .transport
            .send(JsonRpcRequest::new("tools/list", None))
            .await?;
        if let Some(error) = response.error {
            if error.is_tools_unsupported() {
                debug!(message = %error.message, "remote server does not offer tools");
                return Ok(Vec::new());
            }
            return Err(AgentError::RemoteTool(format!(
                "tools/list failed: {}",
                error.message
            )));
        }

        let result: ListToolsResult = serde_json::from_value(response.result.unwrap_or_default())
            .map_err(|err| AgentError::RemoteTool(format!("invalid tools/list result: {err}")))?;
        self.endpoint.store_tools(&result.tools);
        Ok(result.tools)
    }

    /// The server's tools, each bound to this client for invocation.
    pub async fn list_tools(self: &Arc<Self>) -> Result<Vec<Arc<dyn Tool>>> {
        Ok(self
            .tool_definitions()
            .await?
            .into_iter()
            .map(|definition| Arc::new(McpTool::new(Arc::clone(self), definition)) as Arc<dyn Tool>)
            .collect())
    }

    pub async fn call_tool(&self, name: &str, args: Value) -> Result<ToolResponse> {
        let arguments = serde_json::to_string(&args)?;
        let span = tracing::info_span!("tool_call", name = %name, arguments = %arguments);
        self.call_tool_inner(name, args).instrument(span).await
    }

    async fn call_tool_inner(&self, name: &str, args: Value) -> Result<ToolResponse> {
        let response = self
            .transport
            .send(JsonRpcRequest::new(
                "tools/call",
                Some(json!({"name": name, "arguments": args})),
            ))
            .await?;
        if let Some(error) = response.error {
            return Err(AgentError::RemoteTool(format!(
                "tools/call `{name}` failed: {}",
                error.message
            )));
        }

        let result: CallToolResult = serde_json::from_value(response.result.unwrap_or_default())
            .map_err(|err| AgentError::RemoteTool(format!("invalid tools/call result: {err}")))?;
        if result.is_error {
            return Err(AgentError::tool(name, format!("error invoking tool {name}")));
        }

        let content = result
            .content
            .iter()
            .map(|item| content_item(name, item))
            .collect::<Result<Vec<_>>>()?;
        Ok(ToolResponse::new(content))
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }
}

fn content_item(tool: &str, item: &Value) -> Result<ToolContent> {
    let field = |key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AgentError::RemoteTool(format!("content item missing `{key}`")))
    };
    match item.get("type").and_then(Value::as_str).unwrap_or_default() {
        "text" => Ok(ToolContent::Text {
            data: field("text")?,
        }),
        "image" => Ok(ToolContent::Image {
            data: field("data")?,
            mime_type: field("mimeType")?,
        }),
        other => Err(AgentError::not_implemented(
            tool,
            format!("unknown content type `{other}`"),
        )),
    }
}

/// A remote tool exposed through the local [`Tool`] contract.
pub struct McpTool {
    client: Arc<McpClient>,
    definition: McpToolDefinition,
}

impl McpTool {
    pub fn new(client: Arc<McpClient>, definition: McpToolDefinition) -> Self {
        Self { client, definition }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn description(&self) -> Option<&str> {
        self.definition.description.as_deref()
    }

    fn parameters(&self) -> Value {
        self.definition.input_schema.clone()
    }

    async fn call(&self, args: Value) -> Result<ToolOutput> {
        let response = self.client.call_tool(&self.definition.name, args).await?;
        Ok(ToolOutput::Response(response))
    }
}
