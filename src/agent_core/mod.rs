//! Agent core: the conversation loop and tool routing above the MCP
//! client.

pub mod conversation;
pub mod errors;
pub mod tool_router;
pub mod types;

pub use conversation::{ConversationLoop, DEFAULT_MAX_TOOL_ROUNDS};
pub use errors::AgentError;
pub use tool_router::{ToolFilter, ToolRouter};
pub use types::{DispatchOutcome, Turn, TurnOutcome};
