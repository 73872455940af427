//! Agent core error types.

use thiserror::Error;

use crate::inference::InferenceError;

/// Errors that can abort a conversation turn.
///
/// Tool-level failures never appear here; those flow back to the model as
/// [`DispatchOutcome`](super::types::DispatchOutcome) data.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model call itself failed.
    #[error("model call failed: {reason}")]
    Model { reason: String },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

impl From<InferenceError> for AgentError {
    fn from(e: InferenceError) -> Self {
        AgentError::Model {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Serialization {
            reason: e.to_string(),
        }
    }
}
