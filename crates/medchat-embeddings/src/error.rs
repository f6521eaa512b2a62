use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Empty or whitespace-only input
    #[error("Cannot embed empty text")]
    EmptyInput,

    /// Backend could not be constructed (missing key, model load failure)
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Backend failed while encoding
    #[error("Embedding provider error: {0}")]
    ProviderError(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    #[error("Model download failed: {0}")]
    Download(String),

    #[error("Model cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl EmbeddingError {
    /// Collapse backend-specific failures into the provider error categories.
    pub(crate) fn into_provider_error(self) -> Self {
        match self {
            EmbeddingError::EmptyInput
            | EmbeddingError::ProviderUnavailable(_)
            | EmbeddingError::ProviderError(_)
            | EmbeddingError::DimensionMismatch { .. } => self,
            other => EmbeddingError::ProviderError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_errors_become_provider_errors() {
        let err = EmbeddingError::Tokenizer("bad token".to_string()).into_provider_error();
        assert!(matches!(err, EmbeddingError::ProviderError(ref m) if m.contains("bad token")));

        let err = EmbeddingError::EmptyInput.into_provider_error();
        assert!(matches!(err, EmbeddingError::EmptyInput));
    }
}
