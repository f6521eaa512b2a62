//! Mock chat model for testing.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use medchat_types::Role;

use crate::error::ChatError;
use crate::model::{ChatModel, ChatRequest, ChatResponse};

enum Behavior {
    Echo,
    Scripted(Mutex<VecDeque<ChatResponse>>),
    Fixed(ChatResponse),
    Fail(fn() -> ChatError),
}

/// Deterministic chat model that records every request.
///
/// By default it echoes the last user turn; it can also replay scripted
/// replies or fail every call.
pub struct MockChatModel {
    behavior: Behavior,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockChatModel {
    /// Reply with `"Mock reply: <last user turn>"`.
    pub fn new() -> Self {
        Self::with_behavior(Behavior::Echo)
    }

    /// Reply with the same response every time.
    pub fn with_reply(response: ChatResponse) -> Self {
        Self::with_behavior(Behavior::Fixed(response))
    }

    /// Reply with each response once, in order, then echo.
    pub fn scripted(responses: Vec<ChatResponse>) -> Self {
        Self::with_behavior(Behavior::Scripted(Mutex::new(responses.into())))
    }

    /// Fail every call with a copy of `error`.
    pub fn failing_with(error: ChatError) -> Self {
        let make: fn() -> ChatError = match error {
            ChatError::RateLimited => || ChatError::RateLimited,
            ChatError::InvalidResponse(_) => {
                || ChatError::InvalidResponse("mock invalid response".to_string())
            }
            _ => || ChatError::ModelCallFailed("mock failure".to_string()),
        };
        Self::with_behavior(Behavior::Fail(make))
    }

    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl Default for MockChatModel {
    fn default() -> Self {
        Self::new()
    }
}

fn echo(request: &ChatRequest) -> ChatResponse {
    let last_user = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or_default();
    ChatResponse::text(format!("Mock reply: {}", last_user))
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ChatError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        match &self.behavior {
            Behavior::Echo => Ok(echo(request)),
            Behavior::Fixed(response) => Ok(response.clone()),
            Behavior::Scripted(queue) => {
                let next = queue.lock().ok().and_then(|mut q| q.pop_front());
                Ok(next.unwrap_or_else(|| echo(request)))
            }
            Behavior::Fail(make) => Err(make()),
        }
    }
}
