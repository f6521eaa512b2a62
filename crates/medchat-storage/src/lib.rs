//! Storage layer for medchat.
//!
//! Provides:
//! - [`ChatStore`]: the persistence capabilities the pipeline calls
//!   (conversations, messages, memories, preferences, maintenance)
//! - [`InMemoryStore`]: a reference implementation with optional JSON
//!   snapshots, which also serves as a brute-force `SimilarityIndex`

pub mod error;
pub mod memory_store;
pub mod store;

pub use error::StorageError;
pub use memory_store::InMemoryStore;
pub use store::{ChatStore, EmbeddingStats, TableStats, TransferSummary};
