//! MCP client: transports, sessions, and the server registry.
//!
//! Layering, bottom up:
//! - `transport` / `sse`: move opaque JSON messages to and from one server
//!   (child process stdio or streamable HTTP).
//! - `session`: one initialized server connection. Owns request-id
//!   correlation and the typed protocol operations.
//! - `registry`: named sessions plus the aggregated, collision-free tool
//!   catalog that higher layers hand to a model.

pub mod errors;
pub mod registry;
pub mod session;
pub mod sse;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::McpError;
pub use registry::{QualifiedTool, ServerRegistry};
pub use session::Session;
pub use sse::StreamableHttpTransport;
pub use transport::{StdioTransport, Transport};
pub use types::{
    ResourceContent, ServerSpec, ServersConfig, ToolDefinition, ToolOutcome, TransportSpec,
};
