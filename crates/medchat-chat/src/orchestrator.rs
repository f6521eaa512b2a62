//! Chat orchestration.
//!
//! `ChatOrchestrator` owns the fixed call parameters and post-processing
//! around a [`ChatModel`]: model id validation, the normalized request,
//! and search-result filtering. It never retries; the model client's own
//! transport retries are the only ones.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use medchat_types::{NormalizedMessage, SearchResult, TokenUsage};

use crate::error::ChatError;
use crate::model::{ChatModel, ChatRequest};
use crate::models::is_supported;
use crate::normalize::build_request;

/// Sampling temperature for every answer.
pub const TEMPERATURE: f32 = 0.3;

/// Output token cap for every answer.
pub const MAX_OUTPUT_TOKENS: u32 = 1000;

/// Post-processed model answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    pub content: String,
    pub citations: Vec<String>,

    /// Only entries with a non-empty title and url
    pub search_results: Vec<SearchResult>,

    pub usage: Option<TokenUsage>,
    pub model: String,
}

pub struct ChatOrchestrator {
    model: Arc<dyn ChatModel>,
}

impl ChatOrchestrator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// See [`crate::normalize::build_request`].
    pub fn build_request(
        &self,
        history: &[NormalizedMessage],
        new_user_text: &str,
        system_prompt: &str,
    ) -> Vec<NormalizedMessage> {
        build_request(history, new_user_text, system_prompt)
    }

    /// Call the model once with the fixed parameters.
    ///
    /// Unknown model ids fail with `UnknownModel` before any call. Every
    /// other failure becomes `ModelCallFailed`.
    pub async fn invoke(
        &self,
        messages: Vec<NormalizedMessage>,
        model: &str,
    ) -> Result<ModelReply, ChatError> {
        if !is_supported(model) {
            return Err(ChatError::UnknownModel(model.to_string()));
        }

        let request = ChatRequest::new(model, messages)
            .with_temperature(TEMPERATURE)
            .with_max_tokens(MAX_OUTPUT_TOKENS);

        let start = Instant::now();
        let response = self.model.complete(&request).await.map_err(|e| {
            warn!(error = %e, model, "Model call failed");
            match e {
                ChatError::ModelCallFailed(_) => e,
                other => ChatError::ModelCallFailed(other.to_string()),
            }
        })?;

        let received = response.search_results.len();
        let search_results: Vec<SearchResult> = response
            .search_results
            .into_iter()
            .filter(SearchResult::is_valid)
            .collect();
        if search_results.len() < received {
            debug!(
                dropped = received - search_results.len(),
                "Dropped search results without title or url"
            );
        }

        info!(
            model,
            duration_ms = start.elapsed().as_millis() as u64,
            citations = response.citations.len(),
            search_results = search_results.len(),
            "Model call complete"
        );

        Ok(ModelReply {
            content: response.content,
            citations: response.citations,
            search_results,
            usage: response.usage,
            model: model.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChatModel;
    use crate::model::ChatResponse;
    use medchat_types::Role;

    fn result(title: &str, url: &str, snippet: Option<&str>) -> SearchResult {
        SearchResult {
            title: title.to_string(),
            url: url.to_string(),
            snippet: snippet.map(str::to_string),
            date: None,
        }
    }

    #[tokio::test]
    async fn test_invoke_uses_fixed_parameters() {
        let model = Arc::new(MockChatModel::new());
        let orchestrator = ChatOrchestrator::new(model.clone());

        let messages = orchestrator.build_request(&[], "hello", "SYS");
        orchestrator.invoke(messages, "sonar").await.unwrap();

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].temperature, Some(0.3));
        assert_eq!(requests[0].max_tokens, Some(1000));
        assert_eq!(requests[0].model, "sonar");
        assert_eq!(requests[0].messages[0].role, Role::System);
    }

    #[tokio::test]
    async fn test_invalid_search_results_filtered() {
        let model = Arc::new(MockChatModel::with_reply(ChatResponse {
            content: "answer".to_string(),
            search_results: vec![
                result("", "http://x", None),
                result("A", "http://y", Some("s")),
            ],
            ..Default::default()
        }));
        let orchestrator = ChatOrchestrator::new(model);

        let reply = orchestrator
            .invoke(orchestrator.build_request(&[], "q", "SYS"), "sonar-pro")
            .await
            .unwrap();
        assert_eq!(reply.search_results, vec![result("A", "http://y", Some("s"))]);
        assert_eq!(reply.model, "sonar-pro");
    }

    #[tokio::test]
    async fn test_unknown_model_rejected_before_call() {
        let model = Arc::new(MockChatModel::new());
        let orchestrator = ChatOrchestrator::new(model.clone());

        let err = orchestrator
            .invoke(orchestrator.build_request(&[], "q", "SYS"), "gpt-4")
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_failures_become_model_call_failed() {
        let model = Arc::new(MockChatModel::failing_with(ChatError::RateLimited));
        let orchestrator = ChatOrchestrator::new(model.clone());

        let err = orchestrator
            .invoke(orchestrator.build_request(&[], "q", "SYS"), "sonar")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::ModelCallFailed(_)));
        // No orchestrator-level retry
        assert_eq!(model.requests().len(), 1);
    }
}
