//! MCP client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// The transport could not be established at all.
    #[error("failed to connect to server '{server}': {reason}")]
    ConnectionError { server: String, reason: String },

    /// The transport came up but the `initialize` exchange failed.
    #[error("handshake with server '{server}' failed: {reason}")]
    HandshakeError { server: String, reason: String },

    /// A send or receive failed on an established transport.
    #[error("transport error on server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// The server returned a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The session was closed while a request was still in flight,
    /// or an operation was attempted on a closed session.
    #[error("session '{server}' is closed")]
    SessionClosed { server: String },

    /// A request did not complete within its deadline.
    #[error("request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// A resource declared a structured content type but its body
    /// did not parse as that type.
    #[error("failed to decode resource '{uri}': {reason}")]
    DecodeError { uri: String, reason: String },

    /// The server never advertised the capability this operation requires.
    #[error("server '{server}' does not support {capability}")]
    UnsupportedCapability { server: String, capability: String },

    /// The server name cannot be used for registration.
    #[error("invalid server name '{name}': {reason}")]
    InvalidServerName { name: String, reason: String },

    /// A server with this name is already registered.
    #[error("server '{name}' is already registered")]
    DuplicateServer { name: String },

    /// No server with this name is registered.
    #[error("unknown server '{name}'")]
    UnknownServer { name: String },
}

impl McpError {
    /// Transient errors that a caller may reasonably retry.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            McpError::Timeout { .. } | McpError::TransportError { .. }
        )
    }
}
