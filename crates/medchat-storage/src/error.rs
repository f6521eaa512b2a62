use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Missing, or owned by another user
    #[error("Not found: {0}")]
    NotFound(String),

    /// Snapshot file could not be read or written
    #[error("Snapshot I/O failed: {0}")]
    Backend(#[from] std::io::Error),

    #[error("Snapshot is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}
