//! Per-server session: handshake, request correlation, typed operations.
//!
//! A session owns one transport plus a demultiplexer task that routes
//! inbound responses to their waiting callers by request id. Requests carry
//! monotonically increasing ids, so responses may arrive in any order and
//! still find the right waiter. Closing the session fails every in-flight
//! request instead of leaving it hanging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::transport::Transport;
use super::types::{
    extract_text, notification, GetPromptResult, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, PromptDefinition, PromptsListResult, ReadResourceResult, ResourceContent,
    ServerCapabilities, ServerInfo, ToolCallResult, ToolDefinition, ToolOutcome, ToolsListResult,
    PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};

/// Deadline for the `initialize` exchange.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for control-plane requests (list, get, read).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for `tools/call`. Tools do real work and get more slack.
const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(120);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

// ─── Session ─────────────────────────────────────────────────────────────────

/// An initialized connection to one tool server.
pub struct Session {
    server_name: String,
    transport: Mutex<Box<dyn Transport>>,
    capabilities: ServerCapabilities,
    server_info: Option<ServerInfo>,
    next_id: AtomicU64,
    pending: PendingMap,
    demux: JoinHandle<()>,
    closed: AtomicBool,
}

impl Session {
    /// Connect over an established transport: claim its inbound stream,
    /// start the demultiplexer, and run the `initialize` handshake.
    ///
    /// On handshake failure the transport is released before the error is
    /// returned, so a failed connect never leaks a child process or socket.
    pub async fn connect(
        server_name: &str,
        mut transport: Box<dyn Transport>,
    ) -> Result<Self, McpError> {
        let inbound = transport
            .take_inbound()
            .ok_or_else(|| McpError::ConnectionError {
                server: server_name.to_string(),
                reason: "transport inbound stream already claimed".to_string(),
            })?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let demux = tokio::spawn(demux_loop(
            server_name.to_string(),
            inbound,
            Arc::clone(&pending),
        ));

        let mut session = Self {
            server_name: server_name.to_string(),
            transport: Mutex::new(transport),
            capabilities: ServerCapabilities::default(),
            server_info: None,
            next_id: AtomicU64::new(1),
            pending,
            demux,
            closed: AtomicBool::new(false),
        };

        if let Err(e) = session.initialize().await {
            session.close().await;
            return Err(e);
        }

        tracing::info!(
            server = %session.server_name,
            tools = session.capabilities.tools,
            prompts = session.capabilities.prompts,
            resources = session.capabilities.resources,
            "session established"
        );
        Ok(session)
    }

    async fn initialize(&mut self) -> Result<(), McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let result = self
            .request("initialize", Some(params), INIT_TIMEOUT)
            .await
            .map_err(|e| match e {
                McpError::ServerError { code, message, .. } => McpError::HandshakeError {
                    server: self.server_name.clone(),
                    reason: format!("initialize rejected ({code}): {message}"),
                },
                other => other,
            })?;

        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::HandshakeError {
                server: self.server_name.clone(),
                reason: format!("malformed initialize result: {e}"),
            })?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&init.protocol_version.as_str()) {
            return Err(McpError::HandshakeError {
                server: self.server_name.clone(),
                reason: format!("unsupported protocol version '{}'", init.protocol_version),
            });
        }

        self.capabilities = ServerCapabilities::from_raw(&init.capabilities);
        self.server_info = init.server_info;

        self.notify("notifications/initialized", None).await?;
        Ok(())
    }

    /// Server name this session is bound to.
    pub fn name(&self) -> &str {
        &self.server_name
    }

    /// Capabilities recorded during the handshake.
    pub fn capabilities(&self) -> ServerCapabilities {
        self.capabilities
    }

    /// Identity the server reported during the handshake, if any.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ─── Request Plumbing ────────────────────────────────────────────────────

    /// Issue one request and wait for its response, however late or
    /// out-of-order it arrives. Returns the `result` payload; a JSON-RPC
    /// error object becomes `McpError::ServerError`.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, McpError> {
        if self.is_closed() {
            return Err(McpError::SessionClosed {
                server: self.server_name.clone(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        // close() flips the flag before draining the map, so an insert that
        // raced past the check above is caught here instead of hanging.
        if self.is_closed() {
            self.pending.lock().await.remove(&id);
            return Err(McpError::SessionClosed {
                server: self.server_name.clone(),
            });
        }

        let request = JsonRpcRequest::new(id, method, params);
        let message =
            serde_json::to_value(&request).map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to serialize request: {e}"),
            })?;

        if let Err(e) = self.transport.lock().await.send(message).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            // The sender was dropped: the session closed underneath us.
            Ok(Err(_)) => {
                return Err(McpError::SessionClosed {
                    server: self.server_name.clone(),
                })
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        if let Some(error) = response.error {
            return Err(McpError::ServerError {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    /// Send a notification; no response is expected or awaited.
    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        self.transport
            .lock()
            .await
            .send(notification(method, params))
            .await
    }

    // ─── Typed Operations ────────────────────────────────────────────────────

    /// List the server's tools. A server that never advertised the tools
    /// capability simply has none.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>, McpError> {
        if !self.capabilities.tools {
            return Ok(Vec::new());
        }
        let result = self.request("tools/list", None, CONTROL_TIMEOUT).await?;
        let parsed: ToolsListResult =
            serde_json::from_value(result).map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("malformed tools/list result: {e}"),
            })?;
        Ok(parsed.tools)
    }

    /// Invoke a tool by its server-local name.
    ///
    /// Three ways out: `Err` for protocol-level failure, `ToolError` when
    /// the tool ran and flagged its result as an error, `Content` otherwise.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutcome, McpError> {
        if !self.capabilities.tools {
            return Err(McpError::UnsupportedCapability {
                server: self.server_name.clone(),
                capability: "tools".to_string(),
            });
        }
        let params = serde_json::json!({"name": name, "arguments": arguments});
        let result = self
            .request("tools/call", Some(params), TOOL_CALL_TIMEOUT)
            .await?;
        let parsed: ToolCallResult =
            serde_json::from_value(result).map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("malformed tools/call result: {e}"),
            })?;
        let text = extract_text(&parsed.content);
        if parsed.is_error {
            Ok(ToolOutcome::ToolError(text))
        } else {
            Ok(ToolOutcome::Content(text))
        }
    }

    /// List the server's prompt templates. Empty when the capability was
    /// never advertised.
    pub async fn list_prompts(&self) -> Result<Vec<PromptDefinition>, McpError> {
        if !self.capabilities.prompts {
            return Ok(Vec::new());
        }
        let result = self.request("prompts/list", None, CONTROL_TIMEOUT).await?;
        let parsed: PromptsListResult =
            serde_json::from_value(result).map_err(|e| McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("malformed prompts/list result: {e}"),
            })?;
        Ok(parsed.prompts)
    }

    /// Fetch a prompt template rendered with the given arguments.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<GetPromptResult, McpError> {
        if !self.capabilities.prompts {
            return Err(McpError::UnsupportedCapability {
                server: self.server_name.clone(),
                capability: "prompts".to_string(),
            });
        }
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments.unwrap_or(serde_json::json!({})),
        });
        let result = self
            .request("prompts/get", Some(params), CONTROL_TIMEOUT)
            .await?;
        serde_json::from_value(result).map_err(|e| McpError::TransportError {
            server: self.server_name.clone(),
            reason: format!("malformed prompts/get result: {e}"),
        })
    }

    /// Read a resource by URI, decoding the body per its declared content
    /// type. A body declared `application/json` that fails to parse is a
    /// `DecodeError`, not silently passed through as text.
    pub async fn read_resource(&self, uri: &str) -> Result<ResourceContent, McpError> {
        if !self.capabilities.resources {
            return Err(McpError::UnsupportedCapability {
                server: self.server_name.clone(),
                capability: "resources".to_string(),
            });
        }
        let params = serde_json::json!({"uri": uri});
        let result = self
            .request("resources/read", Some(params), CONTROL_TIMEOUT)
            .await?;
        let parsed: ReadResourceResult =
            serde_json::from_value(result).map_err(|e| McpError::DecodeError {
                uri: uri.to_string(),
                reason: format!("malformed resources/read result: {e}"),
            })?;

        let first = parsed
            .contents
            .into_iter()
            .next()
            .ok_or_else(|| McpError::DecodeError {
                uri: uri.to_string(),
                reason: "response carried no contents".to_string(),
            })?;
        let text = first.text.ok_or_else(|| McpError::DecodeError {
            uri: uri.to_string(),
            reason: "resource has no text content".to_string(),
        })?;

        match first.mime_type.as_deref() {
            Some("application/json") => serde_json::from_str(&text)
                .map(ResourceContent::Json)
                .map_err(|e| McpError::DecodeError {
                    uri: uri.to_string(),
                    reason: format!("invalid JSON body: {e}"),
                }),
            _ => Ok(ResourceContent::Text(text)),
        }
    }

    /// Close the session: release the transport, stop the demultiplexer,
    /// and fail every request still waiting. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.transport.lock().await.close().await;
        self.demux.abort();
        // Dropping the senders wakes every waiter with SessionClosed.
        self.pending.lock().await.clear();
        tracing::info!(server = %self.server_name, "session closed");
    }
}

/// Route inbound responses to their waiters. Runs until the transport's
/// inbound stream ends, then fails whatever is still pending.
async fn demux_loop(
    server_name: String,
    mut inbound: mpsc::Receiver<serde_json::Value>,
    pending: PendingMap,
) {
    while let Some(message) = inbound.recv().await {
        if message.get("id").and_then(|v| v.as_u64()).is_none() {
            // JSON-RPC mandates a null id when the server could not parse
            // the request. With exactly one request in flight that failure
            // can only belong to it; fail it now instead of letting the
            // caller ride out the timeout.
            if let Some(raw) = message.get("error") {
                match serde_json::from_value::<JsonRpcError>(raw.clone()) {
                    Ok(error) => {
                        let mut pending = pending.lock().await;
                        if pending.len() == 1 {
                            if let Some(id) = pending.keys().next().copied() {
                                tracing::warn!(
                                    server = %server_name,
                                    code = error.code,
                                    "null-id error response, failing the sole pending request"
                                );
                                if let Some(tx) = pending.remove(&id) {
                                    let _ = tx.send(JsonRpcResponse {
                                        jsonrpc: "2.0".to_string(),
                                        id,
                                        result: None,
                                        error: Some(error),
                                    });
                                }
                            }
                        } else {
                            tracing::warn!(
                                server = %server_name,
                                code = error.code,
                                in_flight = pending.len(),
                                "unattributable null-id error response"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::debug!(server = %server_name, error = %e, "malformed error object");
                    }
                }
            } else {
                tracing::debug!(server = %server_name, "ignoring server-initiated message");
            }
            continue;
        }
        match serde_json::from_value::<JsonRpcResponse>(message) {
            Ok(response) => {
                let waiter = pending.lock().await.remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        tracing::debug!(
                            server = %server_name,
                            id = response.id,
                            "response for unknown or timed-out request"
                        );
                    }
                }
            }
            Err(e) => {
                tracing::debug!(server = %server_name, error = %e, "malformed inbound message");
            }
        }
    }
    tracing::debug!(server = %server_name, "inbound stream ended");
    pending.lock().await.clear();
}

// ─── Tests ───────────────────────────────────────────────────────────────────
