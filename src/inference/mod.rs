//! Model backends.
//!
//! The conversation loop talks to models through the [`ModelClient`]
//! trait; [`OpenAiClient`] is the bundled implementation for
//! OpenAI-compatible endpoints. Tests script their own implementations.

pub mod client;
pub mod errors;
pub mod types;

use async_trait::async_trait;

use crate::agent_core::types::Turn;
use crate::mcp_client::registry::QualifiedTool;

pub use client::OpenAiClient;
pub use errors::InferenceError;
pub use types::{ModelResponse, ToolCallRequest};

/// A model that, given the conversation so far and the visible tools,
/// either answers or asks for tool invocations.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        turns: &[Turn],
        tools: &[QualifiedTool],
    ) -> Result<ModelResponse, InferenceError>;
}
