//! Conversation and message types.
//!
//! Messages are immutable once created; the only later mutation is an
//! embedding backfill, which never changes the message identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{new_id, IdPrefix};

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A web source attached to an assistant reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl SearchResult {
    /// Entries with a blank title or url are never surfaced.
    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty() && !self.url.trim().is_empty()
    }

    /// Snippet text, if present and non-empty.
    pub fn snippet_text(&self) -> Option<&str> {
        self.snippet.as_deref().filter(|s| !s.is_empty())
    }
}

/// Token accounting reported by the chat model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A stored chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,

    #[serde(alias = "conversation_id")]
    pub conversation_id: String,

    pub role: Role,

    pub content: String,

    #[serde(default)]
    pub citations: Vec<String>,

    #[serde(default, alias = "search_results")]
    pub search_results: Vec<SearchResult>,

    /// Derived data; regenerable at any time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message with a fresh id and no attachments.
    pub fn new(conversation_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_id(IdPrefix::Message),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            citations: Vec::new(),
            search_results: Vec::new(),
            embedding: None,
            model: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_citations(mut self, citations: Vec<String>) -> Self {
        self.citations = citations;
        self
    }

    pub fn with_search_results(mut self, search_results: Vec<SearchResult>) -> Self {
        self.search_results = search_results;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// A conversation owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,

    #[serde(alias = "user_id")]
    pub user_id: String,

    pub title: String,

    #[serde(default, alias = "is_guest")]
    pub is_guest: bool,

    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,

    #[serde(alias = "updated_at")]
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Default title for conversations created without one.
    pub const DEFAULT_TITLE: &'static str = "New Conversation";

    pub fn new(user_id: impl Into<String>, title: Option<String>, is_guest: bool) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(IdPrefix::Conversation),
            user_id: user_id.into(),
            title: title.unwrap_or_else(|| Self::DEFAULT_TITLE.to_string()),
            is_guest,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One entry of the message sequence sent to the chat model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub role: Role,
    pub content: String,
}

impl NormalizedMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&ChatMessage> for NormalizedMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self::new(msg.role, msg.content.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_result_validity() {
        let blank_title = SearchResult {
            title: "  ".to_string(),
            url: "http://x".to_string(),
            ..Default::default()
        };
        assert!(!blank_title.is_valid());

        let ok = SearchResult {
            title: "A".to_string(),
            url: "http://y".to_string(),
            snippet: Some("s".to_string()),
            date: None,
        };
        assert!(ok.is_valid());
    }

    #[test]
    fn test_search_result_missing_fields_deserialize() {
        let parsed: SearchResult = serde_json::from_str(r#"{"url": "http://x"}"#).unwrap();
        assert_eq!(parsed.title, "");
        assert!(!parsed.is_valid());
    }

    #[test]
    fn test_message_accepts_both_key_styles() {
        let camel = r#"{"id":"msg_1","conversationId":"conv_1","role":"user","content":"hi","createdAt":"2024-01-01T00:00:00Z"}"#;
        let snake = r#"{"id":"msg_1","conversation_id":"conv_1","role":"user","content":"hi","created_at":"2024-01-01T00:00:00Z"}"#;
        let a: ChatMessage = serde_json::from_str(camel).unwrap();
        let b: ChatMessage = serde_json::from_str(snake).unwrap();
        assert_eq!(a, b);
        assert!(a.search_results.is_empty());
    }

    #[test]
    fn test_conversation_default_title() {
        let conv = Conversation::new("user_1", None, false);
        assert_eq!(conv.title, "New Conversation");
        assert!(conv.id.starts_with("conv_"));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }
}
