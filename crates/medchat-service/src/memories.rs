//! Patient memory management and extraction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use medchat_types::{MemoryEntity, Relationship};

use crate::error::ServiceError;
use crate::service::{vector_or_none, ChatService};

/// Messages read from a conversation for extraction.
const EXTRACTION_MESSAGE_LIMIT: usize = 50;

/// Fields of a memory supplied by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMemory {
    #[serde(alias = "entity_type")]
    pub entity_type: String,

    #[serde(alias = "entity_name")]
    pub entity_name: String,

    #[serde(default)]
    pub relationships: Vec<Relationship>,

    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,

    #[serde(default, alias = "conversation_id")]
    pub conversation_id: Option<String>,
}

impl NewMemory {
    pub fn new(entity_type: impl Into<String>, entity_name: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_name: entity_name.into(),
            ..Default::default()
        }
    }
}

impl ChatService {
    /// Store a memory, embedding it when it has a name.
    ///
    /// An embedding failure stores the memory without a vector.
    pub async fn create_memory(
        &self,
        owner_id: &str,
        memory: NewMemory,
    ) -> Result<MemoryEntity, ServiceError> {
        if owner_id.trim().is_empty() {
            return Err(ServiceError::invalid("owner_id must not be empty"));
        }
        if memory.entity_type.trim().is_empty() {
            return Err(ServiceError::invalid("entityType must not be empty"));
        }

        let mut entity = MemoryEntity::new(owner_id, memory.entity_type, memory.entity_name);
        entity.relationships = memory.relationships;
        entity.metadata = memory.metadata;
        entity.conversation_id = memory.conversation_id;

        self.store_memory(entity).await
    }

    async fn store_memory(&self, mut entity: MemoryEntity) -> Result<MemoryEntity, ServiceError> {
        if !entity.entity_name.trim().is_empty() {
            entity.embedding =
                vector_or_none(self.embedder.embed_memory(&entity).await, "memory", &entity.id);
        }
        Ok(self.store.create_memory(entity).await?)
    }

    /// Newest first.
    pub async fn list_memories(&self, owner_id: &str) -> Result<Vec<MemoryEntity>, ServiceError> {
        Ok(self.store.list_memories(owner_id).await?)
    }

    /// Delete one of the owner's memories.
    pub async fn delete_memory(&self, owner_id: &str, memory_id: &str) -> Result<(), ServiceError> {
        if self.store.delete_memory(owner_id, memory_id).await? {
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!("memory {}", memory_id)))
        }
    }

    /// Delete all of the owner's memories, returning how many there were.
    pub async fn clear_memories(&self, owner_id: &str) -> Result<usize, ServiceError> {
        let removed = self.store.clear_memories(owner_id).await?;
        info!(owner_id, removed, "Memories cleared");
        Ok(removed)
    }

    /// Extract patient facts from a conversation and store each one.
    ///
    /// Extraction is best-effort; a failed model call stores nothing.
    pub async fn extract_memories(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<MemoryEntity>, ServiceError> {
        self.owned_conversation(owner_id, conversation_id).await?;
        let messages = self
            .store
            .recent_messages(conversation_id, EXTRACTION_MESSAGE_LIMIT)
            .await?;

        let transcript = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let mut stored = Vec::new();
        for entity in self.extractor.extract(&transcript).await {
            let memory = entity.into_memory(owner_id, Some(conversation_id));
            stored.push(self.store_memory(memory).await?);
        }

        info!(conversation_id, count = stored.len(), "Memories extracted");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::{fixture, fixture_configured, fixture_with};
    use crate::service::ServiceConfig;
    use medchat_chat::{ChatResponse, MockChatModel};
    use medchat_embeddings::HashEmbedder;
    use medchat_types::{ChatMessage, Role};

    #[tokio::test]
    async fn test_create_memory_embeds() {
        let f = fixture();
        let mut new = NewMemory::new("medication", "Metformin");
        new.relationships.push(Relationship::new("treats", "diabetes"));

        let memory = f.service.create_memory("user_1", new).await.unwrap();
        assert!(memory.id.starts_with("mem_"));
        assert_eq!(memory.embedding.map(|v| v.len()), Some(384));
    }

    #[tokio::test]
    async fn test_create_memory_without_name_or_vector() {
        let f = fixture_with(MockChatModel::new(), HashEmbedder::new(384).failing_on("aspirin"));

        let unnamed = f
            .service
            .create_memory("user_1", NewMemory::new("symptom", ""))
            .await
            .unwrap();
        assert!(unnamed.embedding.is_none());

        let failed = f
            .service
            .create_memory("user_1", NewMemory::new("medication", "Aspirin"))
            .await
            .unwrap();
        assert!(failed.embedding.is_none());
        assert_eq!(f.service.list_memories("user_1").await.unwrap().len(), 2);

        let err = f
            .service
            .create_memory("user_1", NewMemory::new(" ", "x"))
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_new_memory_accepts_both_key_styles() {
        let camel: NewMemory =
            serde_json::from_str(r#"{"entityType": "person", "entityName": "Ana"}"#).unwrap();
        let snake: NewMemory =
            serde_json::from_str(r#"{"entity_type": "person", "entity_name": "Ana"}"#).unwrap();
        assert_eq!(camel.entity_name, snake.entity_name);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let f = fixture();
        let a = f
            .service
            .create_memory("user_1", NewMemory::new("condition", "asthma"))
            .await
            .unwrap();
        f.service
            .create_memory("user_1", NewMemory::new("condition", "eczema"))
            .await
            .unwrap();

        assert!(matches!(
            f.service.delete_memory("user_2", &a.id).await,
            Err(ServiceError::NotFound(_))
        ));
        f.service.delete_memory("user_1", &a.id).await.unwrap();
        assert_eq!(f.service.clear_memories("user_1").await.unwrap(), 1);
        assert!(f.service.list_memories("user_1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extract_memories_stores_entities() {
        let reply = r#"```json
[{"entityType": "medication", "entityName": "Lisinopril", "metadata": {"description": "10mg"}}]
```"#;
        let f = fixture_with(
            MockChatModel::with_reply(ChatResponse::text(reply)),
            HashEmbedder::new(384),
        );
        let conv = f.service.create_conversation("user_1", None, false).await.unwrap();
        f.service
            .create_message(ChatMessage::new(&conv.id, Role::User, "I take lisinopril daily"))
            .await
            .unwrap();

        let stored = f.service.extract_memories("user_1", &conv.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].entity_name, "Lisinopril");
        assert_eq!(stored[0].conversation_id.as_deref(), Some(conv.id.as_str()));
        assert!(stored[0].embedding.is_some());

        let prompt = &f.model.requests()[0].messages[1].content;
        assert!(prompt.contains("user: I take lisinopril daily"));
    }

    #[tokio::test]
    async fn test_extraction_model_ignores_chat_default() {
        let config = ServiceConfig {
            default_model: "sonar".to_string(),
            ..ServiceConfig::default()
        };
        let f = fixture_configured(
            MockChatModel::with_reply(ChatResponse::text("[]")),
            HashEmbedder::new(384),
            config,
        );
        let conv = f.service.create_conversation("user_1", None, false).await.unwrap();
        f.service
            .create_message(ChatMessage::new(&conv.id, Role::User, "my knee is swollen"))
            .await
            .unwrap();

        let stored = f.service.extract_memories("user_1", &conv.id).await.unwrap();
        assert!(stored.is_empty());
        assert_eq!(f.model.requests()[0].model, "sonar-pro");
    }
}
