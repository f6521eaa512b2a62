//! In-process reference store.
//!
//! Rows live in insertion-ordered vectors behind one `RwLock`. A store
//! opened with a path can be flushed to a JSON snapshot and reopened later;
//! without a path it is purely in-memory.
//!
//! The store also implements [`SimilarityIndex`] by brute-force cosine
//! ranking, which is enough for tests and single-user CLI sessions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use medchat_embeddings::cosine_similarity;
use medchat_retrieval::{IndexError, SimilarityIndex, SimilarityMatch};
use medchat_types::{
    new_id, ChatMessage, Conversation, IdPrefix, MemoryEntity, UserPreferenceProfile, UserProfile,
};

use crate::error::StorageError;
use crate::store::{ChatStore, EmbeddingStats, TableStats, TransferSummary};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PreferenceRecord {
    id: String,
    preferences: UserPreferenceProfile,
}

/// Everything the store holds, in its on-disk form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    conversations: Vec<Conversation>,
    messages: Vec<ChatMessage>,
    memories: Vec<MemoryEntity>,
    preferences: BTreeMap<String, PreferenceRecord>,
    profiles: BTreeMap<String, UserProfile>,
}

/// `ChatStore` and `SimilarityIndex` over in-process tables.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    path: Option<PathBuf>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by a snapshot file, loading it if it exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let tables = if tokio::fs::try_exists(&path).await? {
            let bytes = tokio::fs::read(&path).await?;
            let tables: Tables = serde_json::from_slice(&bytes)?;
            info!(
                path = %path.display(),
                conversations = tables.conversations.len(),
                messages = tables.messages.len(),
                memories = tables.memories.len(),
                "Loaded store snapshot"
            );
            tables
        } else {
            Tables::default()
        };

        Ok(Self {
            tables: RwLock::new(tables),
            path: Some(path),
        })
    }

    /// Write the snapshot file. No-op for a store without a path.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let bytes = {
            let tables = self.tables.read().await;
            serde_json::to_vec_pretty(&*tables)?
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        debug!(path = %path.display(), "Flushed store snapshot");
        Ok(())
    }
}

#[async_trait]
impl ChatStore for InMemoryStore {
    async fn create_conversation(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, StorageError> {
        let mut tables = self.tables.write().await;
        tables.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables.conversations.iter().find(|c| c.id == id).cloned())
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StorageError> {
        let tables = self.tables.read().await;
        // Newest insertion first so equal timestamps favor the later row
        let mut list: Vec<Conversation> = tables
            .conversations
            .iter()
            .rev()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(list)
    }

    async fn rename_conversation(
        &self,
        id: &str,
        title: &str,
    ) -> Result<Conversation, StorageError> {
        let mut tables = self.tables.write().await;
        let conversation = tables
            .conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("conversation {}", id)))?;
        conversation.title = title.to_string();
        conversation.updated_at = Utc::now();
        Ok(conversation.clone())
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool, StorageError> {
        let mut tables = self.tables.write().await;
        let before = tables.conversations.len();
        tables.conversations.retain(|c| c.id != id);
        if tables.conversations.len() == before {
            return Ok(false);
        }
        let messages_before = tables.messages.len();
        tables.messages.retain(|m| m.conversation_id != id);
        debug!(
            conversation_id = %id,
            messages = messages_before - tables.messages.len(),
            "Deleted conversation"
        );
        Ok(true)
    }

    async fn create_message(&self, message: ChatMessage) -> Result<ChatMessage, StorageError> {
        let mut tables = self.tables.write().await;
        let conversation = tables
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
            .ok_or_else(|| {
                StorageError::NotFound(format!("conversation {}", message.conversation_id))
            })?;
        conversation.updated_at = Utc::now();
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StorageError> {
        let tables = self.tables.read().await;
        let mut recent: Vec<ChatMessage> = tables
            .messages
            .iter()
            .rev()
            .filter(|m| m.conversation_id == conversation_id)
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn messages_missing_embeddings(
        &self,
        limit: usize,
        conversation_id: Option<&str>,
        after: Option<&str>,
    ) -> Result<Vec<ChatMessage>, StorageError> {
        let tables = self.tables.read().await;
        let start = resume_index(&tables.messages, after, |m| &m.id);
        Ok(tables.messages[start..]
            .iter()
            .filter(|m| m.embedding.is_none())
            .filter(|m| conversation_id.map_or(true, |c| m.conversation_id == c))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_message_embedding(
        &self,
        id: &str,
        embedding: Vec<f32>,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        let message = tables
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("message {}", id)))?;
        message.embedding = Some(embedding);
        Ok(())
    }

    async fn create_memory(&self, memory: MemoryEntity) -> Result<MemoryEntity, StorageError> {
        let mut tables = self.tables.write().await;
        tables.memories.push(memory.clone());
        Ok(memory)
    }

    async fn list_memories(&self, owner_id: &str) -> Result<Vec<MemoryEntity>, StorageError> {
        let tables = self.tables.read().await;
        let mut list: Vec<MemoryEntity> = tables
            .memories
            .iter()
            .rev()
            .filter(|m| m.owner_id == owner_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn delete_memory(&self, owner_id: &str, id: &str) -> Result<bool, StorageError> {
        let mut tables = self.tables.write().await;
        let before = tables.memories.len();
        tables
            .memories
            .retain(|m| !(m.id == id && m.owner_id == owner_id));
        Ok(tables.memories.len() < before)
    }

    async fn clear_memories(&self, owner_id: &str) -> Result<usize, StorageError> {
        let mut tables = self.tables.write().await;
        let before = tables.memories.len();
        tables.memories.retain(|m| m.owner_id != owner_id);
        Ok(before - tables.memories.len())
    }

    async fn memories_missing_embeddings(
        &self,
        limit: usize,
        owner_id: Option<&str>,
        after: Option<&str>,
    ) -> Result<Vec<MemoryEntity>, StorageError> {
        let tables = self.tables.read().await;
        let start = resume_index(&tables.memories, after, |m| &m.id);
        Ok(tables.memories[start..]
            .iter()
            .filter(|m| m.embedding.is_none())
            .filter(|m| owner_id.map_or(true, |o| m.owner_id == o))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_memory_embedding(
        &self,
        id: &str,
        embedding: Vec<f32>,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        let memory = tables
            .memories
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("memory {}", id)))?;
        memory.embedding = Some(embedding);
        memory.updated_at = Utc::now();
        Ok(())
    }

    async fn get_preferences(
        &self,
        user_id: &str,
    ) -> Result<Option<UserPreferenceProfile>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables
            .preferences
            .get(user_id)
            .map(|r| r.preferences.clone()))
    }

    async fn put_preferences(
        &self,
        user_id: &str,
        preferences: UserPreferenceProfile,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        tables
            .preferences
            .entry(user_id.to_string())
            .and_modify(|r| r.preferences = preferences.clone())
            .or_insert_with(|| PreferenceRecord {
                id: new_id(IdPrefix::Preference),
                preferences,
            });
        Ok(())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StorageError> {
        let tables = self.tables.read().await;
        Ok(tables.profiles.get(user_id).cloned())
    }

    async fn put_profile(&self, user_id: &str, profile: UserProfile) -> Result<(), StorageError> {
        let mut tables = self.tables.write().await;
        tables.profiles.insert(user_id.to_string(), profile);
        Ok(())
    }

    async fn transfer_guest_data(
        &self,
        guest_id: &str,
        user_id: &str,
    ) -> Result<TransferSummary, StorageError> {
        let mut tables = self.tables.write().await;
        let mut summary = TransferSummary::default();

        for conversation in tables
            .conversations
            .iter_mut()
            .filter(|c| c.user_id == guest_id)
        {
            conversation.user_id = user_id.to_string();
            conversation.is_guest = false;
            summary.conversations += 1;
        }

        for memory in tables.memories.iter_mut().filter(|m| m.owner_id == guest_id) {
            memory.owner_id = user_id.to_string();
            summary.memories += 1;
        }

        if let Some(record) = tables.preferences.remove(guest_id) {
            if !tables.preferences.contains_key(user_id) {
                tables.preferences.insert(user_id.to_string(), record);
                summary.preferences_moved = true;
            }
        }

        info!(
            guest_id = %guest_id,
            user_id = %user_id,
            conversations = summary.conversations,
            memories = summary.memories,
            preferences_moved = summary.preferences_moved,
            "Transferred guest data"
        );
        Ok(summary)
    }

    async fn embedding_stats(&self) -> Result<EmbeddingStats, StorageError> {
        let tables = self.tables.read().await;
        Ok(EmbeddingStats {
            messages: TableStats::new(
                tables.messages.len(),
                tables.messages.iter().filter(|m| m.embedding.is_some()).count(),
            ),
            memories: TableStats::new(
                tables.memories.len(),
                tables.memories.iter().filter(|m| m.embedding.is_some()).count(),
            ),
        })
    }
}

/// Index just past the row with id `after`; 0 when there is no such row.
fn resume_index<T>(rows: &[T], after: Option<&str>, id: impl Fn(&T) -> &String) -> usize {
    after
        .and_then(|after| rows.iter().position(|row| id(row) == after))
        .map_or(0, |i| i + 1)
}

/// Score rows against the query, keep those at or above `threshold`, and
/// order by descending similarity then ascending id.
///
/// Any stored vector of another dimension (left over from a mode change)
/// fails the whole search with `Malformed`; rows without a vector are
/// skipped.
fn rank<'a, T: Clone + 'a>(
    query: &[f32],
    rows: impl Iterator<Item = (&'a str, Option<&'a [f32]>, &'a T)>,
    threshold: f32,
    top_k: usize,
) -> Result<Vec<SimilarityMatch<T>>, IndexError> {
    let mut scored: Vec<(&str, f32, &T)> = Vec::new();
    let mut mismatched = 0usize;
    for (id, embedding, row) in rows {
        let Some(embedding) = embedding else {
            continue;
        };
        match cosine_similarity(query, embedding) {
            Ok(similarity) if similarity >= threshold => scored.push((id, similarity, row)),
            Ok(_) => {}
            Err(_) => mismatched += 1,
        }
    }

    if mismatched > 0 {
        return Err(IndexError::Malformed(format!(
            "{} stored vectors do not match query dimension {}",
            mismatched,
            query.len()
        )));
    }

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    Ok(scored
        .into_iter()
        .take(top_k)
        .map(|(_, similarity, row)| SimilarityMatch::new(row.clone(), similarity))
        .collect())
}

#[async_trait]
impl SimilarityIndex for InMemoryStore {
    async fn search_memories(
        &self,
        query: &[f32],
        owner_id: &str,
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<SimilarityMatch<MemoryEntity>>, IndexError> {
        let tables = self.tables.read().await;
        let rows = tables
            .memories
            .iter()
            .filter(|m| m.owner_id == owner_id)
            .map(|m| (m.id.as_str(), m.embedding.as_deref(), m));
        rank(query, rows, threshold, top_k)
    }

    async fn search_messages(
        &self,
        query: &[f32],
        owner_id: &str,
        conversation_id: Option<&str>,
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<SimilarityMatch<ChatMessage>>, IndexError> {
        let tables = self.tables.read().await;
        let owned: Vec<&str> = tables
            .conversations
            .iter()
            .filter(|c| c.user_id == owner_id)
            .filter(|c| conversation_id.map_or(true, |id| c.id == id))
            .map(|c| c.id.as_str())
            .collect();

        let rows = tables
            .messages
            .iter()
            .filter(|m| owned.contains(&m.conversation_id.as_str()))
            .map(|m| (m.id.as_str(), m.embedding.as_deref(), m));
        rank(query, rows, threshold, top_k)
    }
}
