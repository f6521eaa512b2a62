//! End-to-end test infrastructure for medchat.
//!
//! Provides a shared TestHarness that wires the real service, store,
//! gateway and persistence dispatcher around a deterministic embedder and
//! a mock chat model.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use medchat_chat::{ChatResponse, MockChatModel};
use medchat_embeddings::{EmbeddingMode, EmbeddingProvider, HashEmbedder};
use medchat_scheduler::{BackgroundPersistenceScheduler, ShutdownReport};
use medchat_service::{ChatService, SendMessage, ServiceConfig};
use medchat_storage::InMemoryStore;

/// Similarity threshold used by the harness.
///
/// The hashing embedder scores related texts lower than a real model, so
/// tests run with a lower cut-off than the production default.
pub const HARNESS_THRESHOLD: f32 = 0.3;

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Where the store snapshot is written on flush
    pub snapshot_path: PathBuf,
    pub store: Arc<InMemoryStore>,
    pub model: Arc<MockChatModel>,
    pub backend: Arc<HashEmbedder>,
    pub service: Arc<ChatService>,
}

impl TestHarness {
    /// Harness with an echoing model and a healthy embedder.
    pub async fn new() -> Self {
        Self::with(MockChatModel::new(), HashEmbedder::new(384)).await
    }

    /// Harness around the given model and embedding backend.
    pub async fn with(model: MockChatModel, backend: HashEmbedder) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let snapshot_path = temp_dir.path().join("store.json");
        let store = Arc::new(
            InMemoryStore::open(&snapshot_path)
                .await
                .expect("Failed to open test store"),
        );
        let model = Arc::new(model);
        let backend = Arc::new(backend);
        let service = build_service(store.clone(), model.clone(), backend.clone());

        Self {
            _temp_dir: temp_dir,
            snapshot_path,
            store,
            model,
            backend,
            service,
        }
    }

    /// Flush the snapshot and build a fresh service over a reloaded store.
    pub async fn restart(&self) -> Arc<ChatService> {
        self.store.flush().await.expect("Failed to flush store");
        let reopened = Arc::new(
            InMemoryStore::open(&self.snapshot_path)
                .await
                .expect("Failed to reopen store"),
        );
        build_service(reopened, self.model.clone(), self.backend.clone())
    }

    /// Wait until `conversation_id` holds `count` messages, without
    /// closing the dispatcher. Panics after two seconds.
    pub async fn wait_for_messages(&self, user_id: &str, conversation_id: &str, count: usize) {
        for _ in 0..200 {
            let stored = self
                .service
                .conversation_messages(user_id, conversation_id, usize::MAX)
                .await
                .expect("Failed to read messages");
            if stored.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("conversation {} never reached {} messages", conversation_id, count);
    }

    /// Close the dispatcher and wait for background persistence to finish.
    pub async fn drain(&self) -> ShutdownReport {
        self.service
            .persistence()
            .shutdown(Duration::from_secs(5))
            .await
    }
}

fn build_service(
    store: Arc<InMemoryStore>,
    model: Arc<MockChatModel>,
    backend: Arc<HashEmbedder>,
) -> Arc<ChatService> {
    let embedder = Arc::new(
        EmbeddingProvider::with_backend(EmbeddingMode::Local, backend)
            .expect("Failed to build embedding provider"),
    );
    let mut config = ServiceConfig::default();
    config.retrieval.similarity_threshold = HARNESS_THRESHOLD;

    Arc::new(ChatService::new(
        store.clone(),
        store,
        embedder,
        model,
        BackgroundPersistenceScheduler::new(4),
        config,
    ))
}

/// One user turn.
pub fn turn(user_id: &str, conversation_id: Option<&str>, text: &str) -> SendMessage {
    SendMessage {
        user_id: user_id.to_string(),
        conversation_id: conversation_id.map(str::to_string),
        text: text.to_string(),
        model: None,
    }
}

/// A model reply carrying an extraction result.
pub fn extraction_reply(entities: serde_json::Value) -> ChatResponse {
    ChatResponse::text(entities.to_string())
}

/// A model reply with citations.
pub fn cited_reply(content: &str, citations: &[&str]) -> ChatResponse {
    ChatResponse {
        content: content.to_string(),
        citations: citations.iter().map(|c| c.to_string()).collect(),
        ..Default::default()
    }
}
