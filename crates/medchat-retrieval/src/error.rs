//! Error types for similarity search.

use thiserror::Error;

/// Failure reported by a similarity index implementation.
///
/// The gateway never surfaces these to callers; they become an empty
/// result and a warning.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index unavailable: {0}")]
    Unavailable(String),

    #[error("Index query failed: {0}")]
    Query(String),

    #[error("Malformed index response: {0}")]
    Malformed(String),
}

/// Errors returned by the similarity search gateway.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Rejected before any index call
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

impl SearchError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        SearchError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// True for failures caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, SearchError::InvalidParameter { .. })
    }
}
