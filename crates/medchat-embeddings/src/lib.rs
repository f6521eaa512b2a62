//! # medchat-embeddings
//!
//! Fixed-dimension text embeddings for the medchat retrieval pipeline.
//!
//! ## Modes
//! - LOCAL: all-MiniLM-L6-v2 via Candle, 384 dimensions, input capped at 2048 chars
//! - REMOTE: OpenAI-compatible endpoint (text-embedding-3-small), 1536 dimensions,
//!   input capped at 32764 chars
//!
//! The mode is chosen once at startup and never changes for the lifetime of
//! the process; vectors from different modes cannot be compared.
//!
//! ## Components
//! - [`EmbeddingProvider`]: the shared service, lazily backed by one backend
//! - [`DomainTextBuilder`]: templates turning messages and memories into text
//! - [`cosine_similarity`]: explicit-failure similarity on raw vectors
//! - [`HashEmbedder`]: deterministic offline backend for tests

pub mod cache;
pub mod candle;
pub mod error;
pub mod mock;
pub mod model;
pub mod provider;
pub mod remote;
pub mod text;

pub use crate::candle::{CandleEmbedder, LocalBackend};
pub use cache::{ModelCache, ModelPaths, DEFAULT_MODEL_REPO};
pub use error::EmbeddingError;
pub use medchat_types::EmbeddingMode;
pub use mock::HashEmbedder;
pub use model::{cosine_similarity, Embedding, EmbeddingBackend, EmbeddingModel, ModelInfo};
pub use provider::{truncate_to_chars, EmbeddingProvider};
pub use remote::{RemoteEmbedder, RemoteEmbedderConfig};
pub use text::DomainTextBuilder;
