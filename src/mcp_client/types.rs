//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types and the MCP protocol structures exchanged
//! over them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─── JSON-RPC 2.0 ────────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
///
/// Inbound messages without an `id` are notifications, not responses. The
/// session demultiplexer filters those out before deserializing into this.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// Build a JSON-RPC notification (no `id`, no response expected).
pub fn notification(method: &str, params: Option<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params.unwrap_or(serde_json::json!({})),
    })
}

// ─── Handshake ───────────────────────────────────────────────────────────────

/// Protocol version advertised in the `initialize` request.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Protocol versions accepted from a server's `initialize` response.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05"];

/// `initialize` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, alias = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default, alias = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server identity returned in the `initialize` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// Operation classes a server advertised during the handshake.
///
/// Recorded once at `initialize` time and consulted before issuing any RPC
/// for an optional operation class. Presence of the corresponding key in
/// the raw capabilities object marks the class as supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerCapabilities {
    pub tools: bool,
    pub prompts: bool,
    pub resources: bool,
}

impl ServerCapabilities {
    /// Parse the raw `capabilities` object from an `initialize` response.
    pub fn from_raw(raw: &serde_json::Value) -> Self {
        Self {
            tools: raw.get("tools").is_some(),
            prompts: raw.get("prompts").is_some(),
            resources: raw.get("resources").is_some(),
        }
    }
}

// ─── Tools ───────────────────────────────────────────────────────────────────

/// Tool definition as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// `tools/list` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// A single content block in a tool result or prompt message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(alias = "mimeType")]
        mime_type: String,
    },
}

/// `tools/call` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, alias = "isError")]
    pub is_error: bool,
}

/// Outcome of a tool call whose RPC round-trip succeeded.
///
/// A domain-level failure (the tool ran and reported an error) is data, not
/// an `Err`; callers feed it back to the model rather than aborting.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// Tool executed and returned content.
    Content(String),
    /// Tool executed but flagged the result as an error (`isError: true`).
    ToolError(String),
}

/// Extract the concatenated text blocks from result content.
pub fn extract_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|c| match c {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── Prompts ─────────────────────────────────────────────────────────────────

/// Prompt definition as returned by `prompts/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// A named argument a prompt accepts.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// `prompts/list` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptsListResult {
    #[serde(default)]
    pub prompts: Vec<PromptDefinition>,
}

/// A single message in a rendered prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: ContentBlock,
}

/// `prompts/get` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct GetPromptResult {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
}

// ─── Resources ───────────────────────────────────────────────────────────────

/// One entry of a `resources/read` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceContents {
    #[serde(default)]
    pub uri: String,
    #[serde(default, alias = "mimeType")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub blob: Option<String>,
}

/// `resources/read` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadResourceResult {
    #[serde(default)]
    pub contents: Vec<ResourceContents>,
}

/// A resource body interpreted according to its declared content type.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceContent {
    /// Textual content, returned as-is.
    Text(String),
    /// Content declared `application/json`, parsed before being handed over.
    Json(serde_json::Value),
}

// ─── Server Specs ────────────────────────────────────────────────────────────

/// Connection spec for a single tool server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSpec {
    pub name: String,
    #[serde(flatten)]
    pub transport: TransportSpec,
}

/// Which transport to use for a server, with its parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum TransportSpec {
    /// Child process speaking newline-delimited JSON over stdio.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// HTTP endpoint answering each POST with an SSE-framed body.
    StreamableHttp {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// Top-level server configuration (`servers` array in the config file).
#[derive(Debug, Clone, Deserialize)]
pub struct ServersConfig {
    pub servers: Vec<ServerSpec>,
}

// ─── Standard JSON-RPC Error Codes ───────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
