//! # medchat-types
//!
//! Shared domain types for the medchat personalization pipeline.
//!
//! This crate defines the core data structures used throughout the system:
//! - Messages: chat turns, search results and the normalized model protocol
//! - Memories: per-user facts with typed relationships
//! - Preferences: the strongly-typed personalization profile
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use medchat_types::{ChatMessage, Role};
//!
//! let msg = ChatMessage::new("conv_1", Role::User, "hello");
//! assert!(msg.id.starts_with("msg_"));
//! ```

pub mod config;
pub mod error;
pub mod ids;
pub mod memory;
pub mod message;
pub mod preferences;

pub use config::{
    BackfillSettings, ChatSettings, EmbeddingMode, EmbeddingSettings, PersistenceSettings,
    RetrievalSettings, Settings,
};
pub use error::MedchatError;
pub use ids::{new_id, temporary_message_id, IdPrefix};
pub use memory::{MemoryEntity, Relationship};
pub use message::{ChatMessage, Conversation, NormalizedMessage, Role, SearchResult, TokenUsage};
pub use preferences::{
    AgeGroup, LanguageComplexity, ResponseLength, ResponseStyle, UserPreferenceProfile,
    UserProfile,
};
