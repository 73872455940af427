//! Inference client error types.

use thiserror::Error;

/// Errors that can occur talking to a model backend.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The HTTP request itself failed.
    #[error("inference request failed: {reason}")]
    Http { reason: String },

    /// The backend answered with a non-success status.
    #[error("inference API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The backend answered 200 but the body was not usable.
    #[error("malformed inference response: {reason}")]
    MalformedResponse { reason: String },
}

impl From<reqwest::Error> for InferenceError {
    fn from(e: reqwest::Error) -> Self {
        InferenceError::Http {
            reason: e.to_string(),
        }
    }
}
