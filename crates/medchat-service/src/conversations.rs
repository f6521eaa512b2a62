//! Conversation and message management.

use medchat_types::{ChatMessage, Conversation};
use tracing::info;

use crate::error::ServiceError;
use crate::service::{vector_or_none, ChatService};

impl ChatService {
    /// The conversation, if it exists and belongs to `user_id`.
    ///
    /// A conversation owned by someone else is reported as not found.
    pub(crate) async fn owned_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Conversation, ServiceError> {
        match self.store.get_conversation(conversation_id).await? {
            Some(conversation) if conversation.user_id == user_id => Ok(conversation),
            _ => Err(ServiceError::NotFound(format!(
                "conversation {}",
                conversation_id
            ))),
        }
    }

    /// Start a conversation; a blank title becomes "New Conversation".
    pub async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<String>,
        is_guest: bool,
    ) -> Result<Conversation, ServiceError> {
        if user_id.trim().is_empty() {
            return Err(ServiceError::invalid("user_id must not be empty"));
        }
        let title = title.filter(|t| !t.trim().is_empty());
        let conversation = self
            .store
            .create_conversation(Conversation::new(user_id, title, is_guest))
            .await?;
        info!(conversation_id = %conversation.id, is_guest, "Conversation created");
        Ok(conversation)
    }

    pub async fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Conversation, ServiceError> {
        self.owned_conversation(user_id, conversation_id).await
    }

    /// Most recently updated first.
    pub async fn list_conversations(
        &self,
        user_id: &str,
    ) -> Result<Vec<Conversation>, ServiceError> {
        Ok(self.store.list_conversations(user_id).await?)
    }

    pub async fn rename_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<Conversation, ServiceError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ServiceError::invalid("title must not be empty"));
        }
        self.owned_conversation(user_id, conversation_id).await?;
        Ok(self.store.rename_conversation(conversation_id, title).await?)
    }

    /// Delete a conversation and its messages.
    pub async fn delete_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<(), ServiceError> {
        self.owned_conversation(user_id, conversation_id).await?;
        self.store.delete_conversation(conversation_id).await?;
        info!(conversation_id, "Conversation deleted");
        Ok(())
    }

    /// The last `limit` messages, oldest first.
    pub async fn conversation_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ServiceError> {
        self.owned_conversation(user_id, conversation_id).await?;
        Ok(self.store.recent_messages(conversation_id, limit).await?)
    }

    /// Store a message directly, embedding it when it has content.
    ///
    /// An embedding failure stores the message without a vector.
    pub async fn create_message(
        &self,
        mut message: ChatMessage,
    ) -> Result<ChatMessage, ServiceError> {
        if !message.content.trim().is_empty() {
            message.embedding =
                vector_or_none(self.embedder.embed_message(&message).await, "message", &message.id);
        }
        Ok(self.store.create_message(message).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::{fixture, fixture_with};
    use medchat_chat::MockChatModel;
    use medchat_embeddings::HashEmbedder;
    use medchat_storage::ChatStore;
    use medchat_types::Role;

    #[tokio::test]
    async fn test_conversation_lifecycle() {
        let f = fixture();
        let conv = f
            .service
            .create_conversation("user_1", Some("  ".to_string()), false)
            .await
            .unwrap();
        assert!(conv.id.starts_with("conv_"));
        assert_eq!(conv.title, "New Conversation");

        let renamed = f
            .service
            .rename_conversation("user_1", &conv.id, "Blood pressure")
            .await
            .unwrap();
        assert_eq!(renamed.title, "Blood pressure");

        assert!(f
            .service
            .rename_conversation("user_1", &conv.id, " ")
            .await
            .unwrap_err()
            .is_client_error());
        assert!(matches!(
            f.service.get_conversation("user_2", &conv.id).await,
            Err(ServiceError::NotFound(_))
        ));

        f.service
            .create_message(ChatMessage::new(&conv.id, Role::User, "hello"))
            .await
            .unwrap();
        f.service.delete_conversation("user_1", &conv.id).await.unwrap();

        assert!(f.service.list_conversations("user_1").await.unwrap().is_empty());
        assert!(f.store.recent_messages(&conv.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_message_embeds_content() {
        let f = fixture();
        let conv = f.service.create_conversation("user_1", None, false).await.unwrap();

        let stored = f
            .service
            .create_message(ChatMessage::new(&conv.id, Role::User, "chest pain at night"))
            .await
            .unwrap();
        assert_eq!(stored.embedding.map(|v| v.len()), Some(384));

        let blank = f
            .service
            .create_message(ChatMessage::new(&conv.id, Role::Assistant, ""))
            .await
            .unwrap();
        assert!(blank.embedding.is_none());
    }

    #[tokio::test]
    async fn test_create_message_survives_embedding_failure() {
        let f = fixture_with(MockChatModel::new(), HashEmbedder::new(384).failing_on("pain"));
        let conv = f.service.create_conversation("user_1", None, false).await.unwrap();

        let stored = f
            .service
            .create_message(ChatMessage::new(&conv.id, Role::User, "chest pain at night"))
            .await
            .unwrap();
        assert!(stored.embedding.is_none());
        assert_eq!(f.store.recent_messages(&conv.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_message_requires_conversation() {
        let f = fixture();
        let err = f
            .service
            .create_message(ChatMessage::new("conv_missing", Role::User, "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
