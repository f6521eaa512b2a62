//! Error type for chat operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// The model call failed after transport retries
    #[error("Model call failed: {0}")]
    ModelCallFailed(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ChatError {
    /// True for failures caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ChatError::UnknownModel(_))
    }
}
