//! The personalized chat pipeline.
//!
//! `send_message` runs the full request path:
//! 1. Load history, preferences and profile
//! 2. Classify the query and compose the system prompt
//! 3. For domain queries, embed the query and fold matching memories into
//!    the prompt
//! 4. Normalize roles and call the model
//! 5. Dispatch persistence of both turns in the background
//!
//! Memory retrieval is best-effort: an embedding or search failure only
//! means the prompt goes out without patient history.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use medchat_chat::{build_session_context, ChatModel, ChatOrchestrator, EntityExtractor};
use medchat_embeddings::{Embedding, EmbeddingError, EmbeddingProvider};
use medchat_retrieval::{
    ClassificationResult, ContextAssembler, PromptComposer, QueryClassifier, SimilarityIndex,
    SimilaritySearchGateway,
};
use medchat_scheduler::BackgroundPersistenceScheduler;
use medchat_storage::ChatStore;
use medchat_types::{
    temporary_message_id, ChatMessage, NormalizedMessage, RetrievalSettings, Role, SearchResult,
    Settings, TokenUsage,
};

use crate::backfill::BackfillCursor;
use crate::error::ServiceError;

/// Pipeline tuning taken from [`Settings`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub retrieval: RetrievalSettings,
    pub default_model: String,
    pub history_window: usize,
    /// Embed chat turns when persisting them
    pub embed_messages: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl ServiceConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            retrieval: settings.retrieval.clone(),
            default_model: settings.chat.default_model.clone(),
            history_window: settings.chat.history_window,
            embed_messages: settings.persistence.embed_messages,
        }
    }
}

/// One user turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessage {
    pub user_id: String,

    /// None for a temporary chat: no history, nothing stored
    pub conversation_id: Option<String>,

    pub text: String,

    /// Overrides the user's preferred model
    pub model: Option<String>,
}

/// The assistant's answer to one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    /// `msg_...` when stored, `temp_<millis>` for a temporary chat
    pub message_id: String,
    pub conversation_id: Option<String>,
    pub content: String,
    pub citations: Vec<String>,
    pub search_results: Vec<SearchResult>,
    pub usage: Option<TokenUsage>,
    pub model: String,
    pub classification: ClassificationResult,
    /// Patient history was added to the system prompt
    pub used_memory_context: bool,
}

pub struct ChatService {
    pub(crate) store: Arc<dyn ChatStore>,
    pub(crate) embedder: Arc<EmbeddingProvider>,
    pub(crate) gateway: SimilaritySearchGateway,
    classifier: QueryClassifier,
    composer: PromptComposer,
    assembler: ContextAssembler,
    orchestrator: ChatOrchestrator,
    pub(crate) extractor: EntityExtractor,
    persistence: BackgroundPersistenceScheduler,
    pub(crate) config: ServiceConfig,
    pub(crate) backfill_cursor: tokio::sync::Mutex<BackfillCursor>,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        index: Arc<dyn SimilarityIndex>,
        embedder: Arc<EmbeddingProvider>,
        model: Arc<dyn ChatModel>,
        persistence: BackgroundPersistenceScheduler,
        config: ServiceConfig,
    ) -> Self {
        let retrieval = &config.retrieval;
        let gateway = SimilaritySearchGateway::new(
            index,
            Duration::from_millis(retrieval.search_timeout_ms),
        );
        let assembler = ContextAssembler::new(
            retrieval.similarity_threshold,
            retrieval.max_context_entries,
            retrieval.max_context_chars,
        );

        Self {
            store,
            embedder,
            gateway,
            classifier: QueryClassifier::new(),
            composer: PromptComposer::new(),
            assembler,
            orchestrator: ChatOrchestrator::new(model.clone()),
            extractor: EntityExtractor::new(model),
            persistence,
            config,
            backfill_cursor: tokio::sync::Mutex::new(BackfillCursor::default()),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn persistence(&self) -> &BackgroundPersistenceScheduler {
        &self.persistence
    }

    pub fn gateway(&self) -> &SimilaritySearchGateway {
        &self.gateway
    }

    pub fn embedder(&self) -> &Arc<EmbeddingProvider> {
        &self.embedder
    }

    /// Classify `text` without running the pipeline.
    pub fn classify(&self, text: &str) -> ClassificationResult {
        self.classifier.classify(text)
    }

    /// The system prompt `user_id` would get for `text`, without memory
    /// context.
    pub async fn preview_prompt(&self, user_id: &str, text: &str) -> Result<String, ServiceError> {
        let preferences = self.store.get_preferences(user_id).await?;
        let profile = self.store.get_profile(user_id).await?;
        let kind = self.classifier.kind(text);
        Ok(self
            .composer
            .compose(kind, preferences.as_ref(), profile.as_ref()))
    }

    /// Answer one user turn.
    ///
    /// Only an empty message, an unknown or foreign conversation, an
    /// unknown model or a failed model call are errors. The reply is
    /// returned before the turns are stored.
    pub async fn send_message(&self, request: SendMessage) -> Result<ChatReply, ServiceError> {
        let text = request.text.trim();
        if text.is_empty() {
            return Err(ServiceError::invalid("message text must not be empty"));
        }
        if request.user_id.trim().is_empty() {
            return Err(ServiceError::invalid("user_id must not be empty"));
        }
        let start = Instant::now();
        let user_id = request.user_id.as_str();

        let history = match request.conversation_id.as_deref() {
            Some(conversation_id) => {
                self.owned_conversation(user_id, conversation_id).await?;
                let stored = self
                    .store
                    .recent_messages(conversation_id, self.config.history_window)
                    .await?;
                build_session_context(&stored, self.config.history_window)
            }
            None => Vec::new(),
        };

        let preferences = self.store.get_preferences(user_id).await?;
        let profile = self.store.get_profile(user_id).await?;

        let classification = self.classifier.classify(text);
        let mut system_prompt =
            self.composer
                .compose(classification.kind, preferences.as_ref(), profile.as_ref());

        let context = if classification.kind.is_casual() {
            String::new()
        } else {
            self.memory_context(user_id, text).await
        };
        let used_memory_context = !context.is_empty();
        system_prompt.push_str(&context);

        let model = request
            .model
            .clone()
            .or_else(|| preferences.as_ref().and_then(|p| p.preferred_model.clone()))
            .unwrap_or_else(|| self.config.default_model.clone());

        let messages = self
            .orchestrator
            .build_request(&history, text, &system_prompt);
        let reply = self.orchestrator.invoke(messages, &model).await?;

        let message_id = match request.conversation_id.as_deref() {
            Some(conversation_id) => {
                let user_turn = ChatMessage::new(conversation_id, Role::User, text);
                let assistant_turn =
                    ChatMessage::new(conversation_id, Role::Assistant, reply.content.clone())
                        .with_citations(reply.citations.clone())
                        .with_search_results(reply.search_results.clone())
                        .with_model(reply.model.clone());
                let id = assistant_turn.id.clone();
                self.persist_turns(conversation_id, vec![user_turn, assistant_turn]);
                id
            }
            None => temporary_message_id(),
        };

        info!(
            conversation_id = request.conversation_id.as_deref().unwrap_or("temporary"),
            kind = %classification.kind,
            used_memory_context,
            duration_ms = start.elapsed().as_millis() as u64,
            "Chat turn answered"
        );

        Ok(ChatReply {
            message_id,
            conversation_id: request.conversation_id,
            content: reply.content,
            citations: reply.citations,
            search_results: reply.search_results,
            usage: reply.usage,
            model: reply.model,
            classification,
            used_memory_context,
        })
    }

    /// Patient history block for `text`, or empty on any failure.
    async fn memory_context(&self, user_id: &str, text: &str) -> String {
        let query = match self.embedder.embed(text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(error = %e, "Query embedding failed, continuing without memory context");
                return String::new();
            }
        };

        let retrieval = &self.config.retrieval;
        match self
            .gateway
            .search_memories(
                &query.values,
                user_id,
                retrieval.similarity_threshold,
                retrieval.memory_match_count,
            )
            .await
        {
            Ok(matches) => {
                debug!(matches = matches.len(), "Memory search complete");
                self.assembler.assemble(&matches)
            }
            Err(e) => {
                warn!(error = %e, "Memory search rejected, continuing without memory context");
                String::new()
            }
        }
    }

    /// Store the turns of one exchange off the request path.
    fn persist_turns(&self, conversation_id: &str, turns: Vec<ChatMessage>) {
        let store = self.store.clone();
        let embedder = self.config.embed_messages.then(|| self.embedder.clone());

        self.persistence.dispatch(
            format!("persist_turns:{}", conversation_id),
            async move {
                for mut turn in turns {
                    if let Some(embedder) = &embedder {
                        turn.embedding =
                            vector_or_none(embedder.embed_message(&turn).await, "message", &turn.id);
                    }
                    store.create_message(turn).await?;
                }
                Ok::<(), ServiceError>(())
            },
        );
    }

    /// The history this service would send for `conversation_id`.
    pub async fn session_context(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<NormalizedMessage>, ServiceError> {
        self.owned_conversation(user_id, conversation_id).await?;
        let stored = self
            .store
            .recent_messages(conversation_id, self.config.history_window)
            .await?;
        Ok(build_session_context(&stored, self.config.history_window))
    }
}

/// Keep a vector, or log the failure and store the row without one.
pub(crate) fn vector_or_none(
    result: Result<Embedding, EmbeddingError>,
    kind: &'static str,
    id: &str,
) -> Option<Vec<f32>> {
    match result {
        Ok(embedding) => Some(embedding.into_vec()),
        Err(e) => {
            warn!(kind, id, error = %e, "Embedding failed, storing without vector");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use medchat_chat::{ChatError, ChatResponse, MockChatModel};
    use medchat_embeddings::{EmbeddingMode, HashEmbedder};
    use medchat_retrieval::QueryKind;
    use medchat_storage::InMemoryStore;
    use medchat_types::{
        AgeGroup, Conversation, MemoryEntity, ResponseLength, UserPreferenceProfile,
    };

    pub(crate) struct Fixture {
        pub service: ChatService,
        pub store: Arc<InMemoryStore>,
        pub model: Arc<MockChatModel>,
    }

    pub(crate) fn fixture_with(model: MockChatModel, backend: HashEmbedder) -> Fixture {
        let mut config = ServiceConfig::default();
        config.retrieval.similarity_threshold = 0.3;
        fixture_configured(model, backend, config)
    }

    pub(crate) fn fixture_configured(
        model: MockChatModel,
        backend: HashEmbedder,
        config: ServiceConfig,
    ) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let model = Arc::new(model);
        let embedder = Arc::new(
            EmbeddingProvider::with_backend(EmbeddingMode::Local, Arc::new(backend)).unwrap(),
        );

        let service = ChatService::new(
            store.clone(),
            store.clone(),
            embedder,
            model.clone(),
            BackgroundPersistenceScheduler::new(4),
            config,
        );
        Fixture {
            service,
            store,
            model,
        }
    }

    pub(crate) fn fixture() -> Fixture {
        fixture_with(MockChatModel::new(), HashEmbedder::new(384))
    }

    pub(crate) async fn drain(service: &ChatService) {
        service
            .persistence()
            .shutdown(Duration::from_secs(5))
            .await;
    }

    async fn conversation(store: &InMemoryStore, user_id: &str) -> Conversation {
        store
            .create_conversation(Conversation::new(user_id, None, false))
            .await
            .unwrap()
    }

    fn turn(user_id: &str, conversation_id: Option<&str>, text: &str) -> SendMessage {
        SendMessage {
            user_id: user_id.to_string(),
            conversation_id: conversation_id.map(str::to_string),
            text: text.to_string(),
            model: None,
        }
    }

    #[tokio::test]
    async fn test_send_message_persists_both_turns() {
        let f = fixture();
        let conv = conversation(&f.store, "user_1").await;

        let reply = f
            .service
            .send_message(turn("user_1", Some(&conv.id), "What helps with a migraine?"))
            .await
            .unwrap();
        assert!(reply.message_id.starts_with("msg_"));
        assert_eq!(reply.content, "Mock reply: What helps with a migraine?");
        assert_eq!(reply.classification.kind, QueryKind::Domain);
        assert_eq!(reply.model, "sonar-pro");

        drain(&f.service).await;
        let stored = f.store.recent_messages(&conv.id, 10).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].role, Role::User);
        assert_eq!(stored[1].id, reply.message_id);
        // Message embeddings are left to the backfill job by default
        assert!(stored.iter().all(|m| m.embedding.is_none()));
    }

    #[tokio::test]
    async fn test_request_shape() {
        let f = fixture();
        let conv = conversation(&f.store, "user_1").await;
        f.store
            .create_message(ChatMessage::new(&conv.id, Role::User, "hello"))
            .await
            .unwrap();

        f.service
            .send_message(turn("user_1", Some(&conv.id), "hello again"))
            .await
            .unwrap();

        let request = &f.model.requests()[0];
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[1].content, "hello\nhello again");
        assert_eq!(request.temperature, Some(0.3));
        assert_eq!(request.max_tokens, Some(1000));
    }

    #[tokio::test]
    async fn test_temporary_chat_stores_nothing() {
        let f = fixture();
        let reply = f
            .service
            .send_message(turn("user_1", None, "hi there"))
            .await
            .unwrap();

        assert!(reply.message_id.starts_with("temp_"));
        assert!(reply.conversation_id.is_none());
        assert_eq!(reply.classification.kind, QueryKind::Casual);
        assert_eq!(f.service.persistence().metrics().dispatched, 0);
    }

    #[tokio::test]
    async fn test_domain_query_gets_memory_context() {
        let f = fixture();
        let memory = MemoryEntity::new("user_1", "condition", "type 2 diabetes")
            .with_metadata("description", "diagnosed 2019");
        let embedding = f.service.embedder.embed_memory(&memory).await.unwrap();
        let mut memory = memory;
        memory.embedding = Some(embedding.into_vec());
        f.store.create_memory(memory).await.unwrap();

        let reply = f
            .service
            .send_message(turn("user_1", None, "what diet helps type 2 diabetes"))
            .await
            .unwrap();
        assert!(reply.used_memory_context);

        let system = &f.model.requests()[0].messages[0].content;
        assert!(system.contains("Relevant Patient History"));
        assert!(system.contains("- type 2 diabetes (condition) - diagnosed 2019"));
    }

    #[tokio::test]
    async fn test_casual_query_skips_memory_search() {
        let f = fixture();
        f.service
            .send_message(turn("user_1", None, "thanks so much"))
            .await
            .unwrap();
        assert_eq!(f.service.gateway().metrics().snapshot().searches, 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades() {
        let f = fixture_with(
            MockChatModel::new(),
            HashEmbedder::new(384).failing_on("fever"),
        );
        let reply = f
            .service
            .send_message(turn("user_1", None, "I have had a fever and cough for three days"))
            .await
            .unwrap();
        assert!(!reply.used_memory_context);
        assert_eq!(reply.classification.kind, QueryKind::Domain);
    }

    #[tokio::test]
    async fn test_preferences_shape_prompt_and_model() {
        let f = fixture();
        let prefs = UserPreferenceProfile {
            age_group: Some(AgeGroup::Young),
            response_length: Some(ResponseLength::Brief),
            preferred_model: Some("sonar".to_string()),
            ..Default::default()
        };
        f.store.put_preferences("user_1", prefs).await.unwrap();

        let reply = f
            .service
            .send_message(turn("user_1", None, "how much water should I drink"))
            .await
            .unwrap();
        assert_eq!(reply.model, "sonar");

        let expected = f.service.preview_prompt("user_1", "how much water should I drink").await.unwrap();
        assert_eq!(f.model.requests()[0].messages[0].content, expected);
    }

    #[tokio::test]
    async fn test_errors() {
        let f = fixture();
        let err = f.service.send_message(turn("user_1", None, "   ")).await.unwrap_err();
        assert!(err.is_client_error());

        let conv = conversation(&f.store, "user_1").await;
        let err = f
            .service
            .send_message(turn("user_2", Some(&conv.id), "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let mut request = turn("user_1", None, "hello");
        request.model = Some("gpt-4".to_string());
        let err = f.service.send_message(request).await.unwrap_err();
        assert!(err.is_client_error());
        assert!(f.model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_model_failure_is_not_client_error() {
        let f = fixture_with(
            MockChatModel::failing_with(ChatError::RateLimited),
            HashEmbedder::new(384),
        );
        let conv = conversation(&f.store, "user_1").await;
        let err = f
            .service
            .send_message(turn("user_1", Some(&conv.id), "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Chat(ChatError::ModelCallFailed(_))));
        assert!(!err.is_client_error());

        drain(&f.service).await;
        assert!(f.store.recent_messages(&conv.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_search_results_dropped() {
        let mut response = ChatResponse::text("answer");
        response.search_results = vec![
            SearchResult {
                title: String::new(),
                url: "http://x".to_string(),
                snippet: None,
                date: None,
            },
            SearchResult {
                title: "A".to_string(),
                url: "http://y".to_string(),
                snippet: Some("s".to_string()),
                date: None,
            },
        ];
        let f = fixture_with(MockChatModel::with_reply(response), HashEmbedder::new(384));

        let reply = f
            .service
            .send_message(turn("user_1", None, "is ibuprofen safe"))
            .await
            .unwrap();
        assert_eq!(reply.search_results.len(), 1);
        assert_eq!(reply.search_results[0].url, "http://y");
    }

    #[tokio::test]
    async fn test_embed_messages_when_enabled() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(
            EmbeddingProvider::with_backend(EmbeddingMode::Local, Arc::new(HashEmbedder::new(384)))
                .unwrap(),
        );
        let config = ServiceConfig {
            embed_messages: true,
            ..Default::default()
        };
        let service = ChatService::new(
            store.clone(),
            store.clone(),
            embedder,
            Arc::new(MockChatModel::new()),
            BackgroundPersistenceScheduler::new(1),
            config,
        );
        let conv = conversation(&store, "user_1").await;

        service
            .send_message(turn("user_1", Some(&conv.id), "hello"))
            .await
            .unwrap();
        drain(&service).await;

        let stored = store.recent_messages(&conv.id, 10).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|m| m.embedding.as_ref().map(Vec::len) == Some(384)));
    }
}
