//! Full pipeline E2E tests for medchat.
//!
//! Drives the chat service the way a client would: conversations with
//! history, memories extracted from one conversation feeding the prompt
//! of the next, and preferences steering prompt and model choice.

use pretty_assertions::assert_eq;
use serde_json::json;

use e2e_tests::{cited_reply, extraction_reply, turn, TestHarness};
use medchat_chat::{ChatResponse, MockChatModel};
use medchat_embeddings::HashEmbedder;
use medchat_retrieval::QueryKind;
use medchat_types::{ResponseLength, Role, UserPreferenceProfile};

/// Two turns in one conversation: the second request carries the first
/// exchange as history, and both exchanges are stored in order.
#[tokio::test]
async fn test_conversation_history_round_trip() {
    let harness = TestHarness::with(
        MockChatModel::scripted(vec![cited_reply(
            "Migraines are often triggered by stress and poor sleep.",
            &["https://example.org/migraine"],
        )]),
        HashEmbedder::new(384),
    )
    .await;
    let service = &harness.service;

    let conv = service
        .create_conversation("user_1", None, false)
        .await
        .unwrap();

    let first = service
        .send_message(turn("user_1", Some(&conv.id), "What triggers migraines?"))
        .await
        .unwrap();
    assert!(first.message_id.starts_with("msg_"));
    assert_eq!(first.citations, vec!["https://example.org/migraine".to_string()]);
    assert_eq!(first.classification.kind, QueryKind::Domain);
    assert!(!first.used_memory_context, "No memories exist yet");

    harness.wait_for_messages("user_1", &conv.id, 2).await;

    let second = service
        .send_message(turn("user_1", Some(&conv.id), "How long do they usually last?"))
        .await
        .unwrap();
    assert_eq!(second.content, "Mock reply: How long do they usually last?");

    // Second request: system, prior user, prior assistant, new user
    let requests = harness.model.requests();
    assert_eq!(requests.len(), 2);
    let roles: Vec<Role> = requests[1].messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::User]
    );
    assert_eq!(requests[1].messages[1].content, "What triggers migraines?");

    let report = harness.drain().await;
    assert!(report.drained);
    assert_eq!(report.pending, 0);

    let stored = service
        .conversation_messages("user_1", &conv.id, 50)
        .await
        .unwrap();
    assert_eq!(stored.len(), 4);
    assert_eq!(stored[1].id, first.message_id);
    assert_eq!(stored[1].citations, first.citations);
    assert_eq!(stored[1].model.as_deref(), Some("sonar-pro"));
    assert_eq!(stored[3].id, second.message_id);
}

/// Entities extracted from one conversation come back as patient history
/// for a later, related question by the same user only.
#[tokio::test]
async fn test_extracted_memory_feeds_later_prompt() {
    let harness = TestHarness::with(
        MockChatModel::scripted(vec![
            ChatResponse::text("Weekly migraines are worth raising with your doctor."),
            extraction_reply(json!([{
                "entityType": "condition",
                "entityName": "migraine headaches",
                "metadata": {"description": "weekly since March"}
            }])),
        ]),
        HashEmbedder::new(384),
    )
    .await;
    let service = &harness.service;

    let conv = service
        .create_conversation("user_1", None, false)
        .await
        .unwrap();
    service
        .send_message(turn(
            "user_1",
            Some(&conv.id),
            "I have had migraine headaches every week since March",
        ))
        .await
        .unwrap();
    harness.wait_for_messages("user_1", &conv.id, 2).await;

    let extracted = service.extract_memories("user_1", &conv.id).await.unwrap();
    assert_eq!(extracted.len(), 1);
    assert_eq!(extracted[0].entity_name, "migraine headaches");
    assert_eq!(extracted[0].conversation_id.as_deref(), Some(conv.id.as_str()));
    assert!(extracted[0].embedding.is_some());

    let query = "migraine headaches weekly since march what helps";
    let reply = service
        .send_message(turn("user_1", None, query))
        .await
        .unwrap();
    assert!(reply.used_memory_context);
    assert!(reply.message_id.starts_with("temp_"));

    let requests = harness.model.requests();
    let system = &requests.last().unwrap().messages[0].content;
    assert!(system.contains("Relevant Patient History"));
    assert!(system.contains("- migraine headaches (condition) - weekly since March"));

    // Another user never sees this history
    let other = service
        .send_message(turn("user_2", None, query))
        .await
        .unwrap();
    assert!(!other.used_memory_context);
}

/// Stored preferences shape the system prompt and pick the model; an
/// explicit model on the request wins.
#[tokio::test]
async fn test_preferences_steer_prompt_and_model() {
    let harness = TestHarness::new().await;
    let service = &harness.service;

    let default_prompt = service.preview_prompt("user_1", "what is gout").await.unwrap();

    service
        .upsert_preferences(
            "user_1",
            &UserPreferenceProfile {
                response_length: Some(ResponseLength::Brief),
                preferred_model: Some("sonar".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let brief_prompt = service.preview_prompt("user_1", "what is gout").await.unwrap();
    assert_ne!(default_prompt, brief_prompt);

    let reply = service
        .send_message(turn("user_1", None, "what is gout"))
        .await
        .unwrap();
    assert_eq!(reply.model, "sonar");

    let requests = harness.model.requests();
    assert_eq!(requests[0].model, "sonar");
    assert_eq!(requests[0].messages[0].content, brief_prompt);

    let mut request = turn("user_1", None, "what is gout");
    request.model = Some("sonar-reasoning".to_string());
    let reply = service.send_message(request).await.unwrap();
    assert_eq!(reply.model, "sonar-reasoning");
}

/// Casual turns are answered without touching memory search.
#[tokio::test]
async fn test_casual_turn_skips_retrieval() {
    let harness = TestHarness::new().await;

    let reply = harness
        .service
        .send_message(turn("user_1", None, "Hello, how are you?"))
        .await
        .unwrap();
    assert_eq!(reply.classification.kind, QueryKind::Casual);
    assert!(!reply.used_memory_context);
    assert_eq!(harness.service.gateway().metrics().snapshot().searches, 0);
    assert_eq!(harness.backend.calls(), 0);
}
