//! Conversation state and dispatch outcome types.

use serde::{Deserialize, Serialize};

/// One entry in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    /// Something the user said.
    User { content: String },
    /// A final (non-tool-calling) model reply.
    Assistant { content: String },
    /// The model asked for a tool invocation.
    ToolCall {
        id: String,
        /// Qualified tool name, e.g. `"docs.search"`.
        name: String,
        arguments: serde_json::Value,
    },
    /// The result fed back for a prior tool call.
    ToolResult {
        call_id: String,
        content: String,
        is_error: bool,
    },
}

/// How a single tool dispatch ended.
///
/// All three cases are data, not `Err`: the conversation loop reports each
/// of them back to the model and lets it decide what to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The tool ran and returned content.
    Ok(String),
    /// The tool ran and reported a failure.
    ToolError(String),
    /// The call never reached a tool: unknown name, filtered out, closed
    /// session, protocol failure.
    DispatchError(String),
}

impl DispatchOutcome {
    /// Collapse into the `(content, is_error)` pair recorded in a
    /// [`Turn::ToolResult`].
    pub fn into_result_parts(self) -> (String, bool) {
        match self {
            DispatchOutcome::Ok(content) => (content, false),
            DispatchOutcome::ToolError(message) => (message, true),
            DispatchOutcome::DispatchError(message) => (message, true),
        }
    }
}

/// How a user turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The model produced a final reply.
    FinalAnswer(String),
    /// The model kept requesting tools past the round budget.
    TurnLimitExceeded { rounds: usize },
}
