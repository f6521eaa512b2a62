//! Graceful degradation E2E tests for medchat.
//!
//! Memory retrieval and persistence are best-effort: an unavailable
//! embedder or a closed dispatcher must never cost the user an answer.
//! Only model failures and bad requests surface as errors.

use std::time::Duration;

use pretty_assertions::assert_eq;

use e2e_tests::{turn, TestHarness};
use medchat_chat::{ChatError, MockChatModel};
use medchat_embeddings::HashEmbedder;
use medchat_service::{NewMemory, ServiceError};

/// Embedding failure: the reply still arrives, without patient history.
#[tokio::test]
async fn test_embedding_outage_answers_without_context() {
    let harness = TestHarness::with(
        MockChatModel::new(),
        HashEmbedder::new(384).failing_on("asthma"),
    )
    .await;
    let service = &harness.service;

    // The memory itself is stored without a vector
    let memory = service
        .create_memory("user_1", NewMemory::new("condition", "asthma"))
        .await
        .unwrap();
    assert!(memory.embedding.is_none());

    let reply = service
        .send_message(turn("user_1", None, "my asthma gets worse at night"))
        .await
        .unwrap();
    assert_eq!(reply.content, "Mock reply: my asthma gets worse at night");
    assert!(!reply.used_memory_context);

    // Search degrades to no matches rather than an error
    let matches = service
        .search_memories("user_1", "asthma", None, None)
        .await
        .unwrap();
    assert!(matches.is_empty());
}

/// Model failure is the one pipeline error a user sees; nothing is stored.
#[tokio::test]
async fn test_model_failure_stores_nothing() {
    let harness = TestHarness::with(
        MockChatModel::failing_with(ChatError::RateLimited),
        HashEmbedder::new(384),
    )
    .await;
    let service = &harness.service;
    let conv = service
        .create_conversation("user_1", None, false)
        .await
        .unwrap();

    let err = service
        .send_message(turn("user_1", Some(&conv.id), "what is a normal resting heart rate"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Chat(_)));
    assert!(!err.is_client_error());

    harness.drain().await;
    assert_eq!(service.persistence().metrics().dispatched, 0);
    assert!(service
        .conversation_messages("user_1", &conv.id, 10)
        .await
        .unwrap()
        .is_empty());
}

/// Bad requests are rejected before the model is called.
#[tokio::test]
async fn test_bad_requests_never_reach_model() {
    let harness = TestHarness::new().await;
    let service = &harness.service;
    let conv = service
        .create_conversation("user_1", None, false)
        .await
        .unwrap();

    let mut unknown_model = turn("user_1", None, "what is gout");
    unknown_model.model = Some("gpt-4o".to_string());

    let rejected = [
        turn("user_1", None, "   "),
        turn("", None, "what is gout"),
        turn("user_2", Some(&conv.id), "what is gout"),
        turn("user_1", Some("conv_missing"), "what is gout"),
        unknown_model,
    ];
    for request in rejected {
        let err = service.send_message(request).await.unwrap_err();
        assert!(err.is_client_error(), "expected client error, got {:?}", err);
    }

    assert!(harness.model.requests().is_empty());
}

/// After the dispatcher closes, replies still arrive but their turns are
/// dropped and counted as rejected.
#[tokio::test]
async fn test_closed_dispatcher_drops_writes() {
    let harness = TestHarness::new().await;
    let service = &harness.service;
    let conv = service
        .create_conversation("user_1", None, false)
        .await
        .unwrap();

    let report = service
        .persistence()
        .shutdown(Duration::from_millis(100))
        .await;
    assert!(report.drained);

    let reply = service
        .send_message(turn("user_1", Some(&conv.id), "is ibuprofen safe with asthma"))
        .await
        .unwrap();
    assert!(reply.message_id.starts_with("msg_"));

    let metrics = service.persistence().metrics();
    assert_eq!(metrics.rejected, 1);
    assert_eq!(metrics.dispatched, 0);
    assert!(service
        .conversation_messages("user_1", &conv.id, 10)
        .await
        .unwrap()
        .is_empty());
}
