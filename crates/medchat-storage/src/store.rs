//! The persistence collaborator.
//!
//! The pipeline only ever talks to storage through [`ChatStore`]; it never
//! assumes an engine. Each call is an independent write, with no
//! transactions spanning calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use medchat_types::{ChatMessage, Conversation, MemoryEntity, UserPreferenceProfile, UserProfile};

use crate::error::StorageError;

/// Embedding coverage of one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TableStats {
    pub total: usize,
    pub embedded: usize,
    pub percentage: f64,
}

impl TableStats {
    pub fn new(total: usize, embedded: usize) -> Self {
        let percentage = if total == 0 {
            0.0
        } else {
            // Two decimal places
            ((embedded as f64 / total as f64) * 10_000.0).round() / 100.0
        };
        Self {
            total,
            embedded,
            percentage,
        }
    }
}

/// Embedding coverage across messages and memories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingStats {
    pub messages: TableStats,
    pub memories: TableStats,
}

/// What a guest-to-user transfer moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSummary {
    pub conversations: usize,
    pub memories: usize,
    pub preferences_moved: bool,
}

/// CRUD capabilities the chat pipeline needs from a store.
#[async_trait]
pub trait ChatStore: Send + Sync {
    // Conversations

    async fn create_conversation(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, StorageError>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StorageError>;

    /// A user's conversations, most recently updated first.
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StorageError>;

    async fn rename_conversation(
        &self,
        id: &str,
        title: &str,
    ) -> Result<Conversation, StorageError>;

    /// Delete a conversation and all of its messages. Returns false if it
    /// did not exist.
    async fn delete_conversation(&self, id: &str) -> Result<bool, StorageError>;

    // Messages

    /// Store a message and bump its conversation's `updated_at`.
    async fn create_message(&self, message: ChatMessage) -> Result<ChatMessage, StorageError>;

    /// The last `limit` messages of a conversation, oldest first.
    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StorageError>;

    /// Up to `limit` unembedded messages in insertion order, starting after
    /// the row `after` (from the beginning when `None` or no longer stored).
    async fn messages_missing_embeddings(
        &self,
        limit: usize,
        conversation_id: Option<&str>,
        after: Option<&str>,
    ) -> Result<Vec<ChatMessage>, StorageError>;

    async fn set_message_embedding(
        &self,
        id: &str,
        embedding: Vec<f32>,
    ) -> Result<(), StorageError>;

    // Memories

    async fn create_memory(&self, memory: MemoryEntity) -> Result<MemoryEntity, StorageError>;

    /// A user's memories, newest first.
    async fn list_memories(&self, owner_id: &str) -> Result<Vec<MemoryEntity>, StorageError>;

    /// Delete one memory if it belongs to `owner_id`.
    async fn delete_memory(&self, owner_id: &str, id: &str) -> Result<bool, StorageError>;

    /// Delete all of a user's memories, returning how many were removed.
    async fn clear_memories(&self, owner_id: &str) -> Result<usize, StorageError>;

    /// Same cursor rules as [`messages_missing_embeddings`](Self::messages_missing_embeddings).
    async fn memories_missing_embeddings(
        &self,
        limit: usize,
        owner_id: Option<&str>,
        after: Option<&str>,
    ) -> Result<Vec<MemoryEntity>, StorageError>;

    async fn set_memory_embedding(&self, id: &str, embedding: Vec<f32>)
        -> Result<(), StorageError>;

    // Preferences and profile

    async fn get_preferences(
        &self,
        user_id: &str,
    ) -> Result<Option<UserPreferenceProfile>, StorageError>;

    async fn put_preferences(
        &self,
        user_id: &str,
        preferences: UserPreferenceProfile,
    ) -> Result<(), StorageError>;

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StorageError>;

    async fn put_profile(&self, user_id: &str, profile: UserProfile) -> Result<(), StorageError>;

    // Maintenance

    /// Move a guest's conversations, memories and (if the user has none)
    /// preferences to a registered user.
    async fn transfer_guest_data(
        &self,
        guest_id: &str,
        user_id: &str,
    ) -> Result<TransferSummary, StorageError>;

    async fn embedding_stats(&self) -> Result<EmbeddingStats, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_stats_percentage() {
        assert_eq!(TableStats::new(0, 0).percentage, 0.0);
        assert_eq!(TableStats::new(4, 4).percentage, 100.0);
        assert_eq!(TableStats::new(3, 1).percentage, 33.33);
    }
}
