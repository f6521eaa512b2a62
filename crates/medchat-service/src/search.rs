//! Text similarity search over a user's memories and messages.

use tracing::warn;

use medchat_retrieval::{
    validate_search_params, SimilarityMatch, MAX_MEMORY_TOP_K, MAX_MESSAGE_TOP_K,
};
use medchat_types::{ChatMessage, MemoryEntity};

use crate::error::ServiceError;
use crate::service::ChatService;

/// Default minimum similarity for text search.
pub const DEFAULT_SEARCH_THRESHOLD: f32 = 0.7;

/// Default result count for memory search.
pub const DEFAULT_MEMORY_MATCHES: usize = 5;

/// Default result count for message search.
pub const DEFAULT_MESSAGE_MATCHES: usize = 10;

impl ChatService {
    /// Memories of `owner_id` similar to `query`.
    ///
    /// Bad parameters are rejected before the query is embedded. An
    /// embedding failure returns no matches.
    pub async fn search_memories(
        &self,
        owner_id: &str,
        query: &str,
        threshold: Option<f32>,
        count: Option<usize>,
    ) -> Result<Vec<SimilarityMatch<MemoryEntity>>, ServiceError> {
        let threshold = threshold.unwrap_or(DEFAULT_SEARCH_THRESHOLD);
        let count = count.unwrap_or(DEFAULT_MEMORY_MATCHES);
        check_query(query)?;
        validate_search_params(threshold, count, MAX_MEMORY_TOP_K)?;

        let Some(vector) = self.query_vector(query).await else {
            return Ok(Vec::new());
        };
        Ok(self
            .gateway
            .search_memories(&vector, owner_id, threshold, count)
            .await?)
    }

    /// Messages in `owner_id`'s conversations similar to `query`,
    /// optionally limited to one conversation.
    pub async fn search_messages(
        &self,
        owner_id: &str,
        conversation_id: Option<&str>,
        query: &str,
        threshold: Option<f32>,
        count: Option<usize>,
    ) -> Result<Vec<SimilarityMatch<ChatMessage>>, ServiceError> {
        let threshold = threshold.unwrap_or(DEFAULT_SEARCH_THRESHOLD);
        let count = count.unwrap_or(DEFAULT_MESSAGE_MATCHES);
        check_query(query)?;
        validate_search_params(threshold, count, MAX_MESSAGE_TOP_K)?;

        if let Some(conversation_id) = conversation_id {
            self.owned_conversation(owner_id, conversation_id).await?;
        }

        let Some(vector) = self.query_vector(query).await else {
            return Ok(Vec::new());
        };
        Ok(self
            .gateway
            .search_messages(&vector, owner_id, conversation_id, threshold, count)
            .await?)
    }

    async fn query_vector(&self, query: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(query).await {
            Ok(embedding) => Some(embedding.into_vec()),
            Err(e) => {
                warn!(error = %e, "Query embedding failed, returning no matches");
                None
            }
        }
    }
}

fn check_query(query: &str) -> Result<(), ServiceError> {
    if query.trim().is_empty() {
        return Err(ServiceError::invalid("query text is required"));
    }
    Ok(())
}
