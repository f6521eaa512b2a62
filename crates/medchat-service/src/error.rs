//! Service-level error type.
//!
//! Every failure falls into one of two categories: client-input errors,
//! rejected before any external call, and transient or provider errors.
//! [`ServiceError::is_client_error`] tells them apart.

use thiserror::Error;

use medchat_chat::ChatError;
use medchat_embeddings::EmbeddingError;
use medchat_retrieval::SearchError;
use medchat_scheduler::SchedulerError;
use medchat_storage::StorageError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => ServiceError::NotFound(what),
            other => ServiceError::Storage(other),
        }
    }
}

impl ServiceError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ServiceError::InvalidInput(reason.into())
    }

    /// True for failures caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        match self {
            ServiceError::InvalidInput(_) | ServiceError::NotFound(_) => true,
            ServiceError::Search(e) => e.is_client_error(),
            ServiceError::Embedding(e) => matches!(e, EmbeddingError::EmptyInput),
            ServiceError::Chat(e) => e.is_client_error(),
            ServiceError::Scheduler(e) => matches!(e, SchedulerError::InvalidParameter { .. }),
            ServiceError::Storage(_) => false,
        }
    }
}
