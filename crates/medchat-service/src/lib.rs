//! # medchat-service
//!
//! The personalized chat pipeline and the operations around it.
//!
//! [`ChatService`] wires together the embedding provider, similarity
//! search, classifier, prompt composer, chat orchestrator and background
//! persistence. Transport (HTTP routing, sessions, auth) lives outside this
//! crate; every operation here takes plain ids and values.
//!
//! ## Operations
//! - Chat: [`ChatService::send_message`], including temporary chats
//! - Conversations: create, get, list, rename, delete, messages
//! - Memories: create, list, delete, clear, extract from a conversation
//! - Search: [`ChatService::search_memories`], [`ChatService::search_messages`]
//! - Maintenance: [`ChatService::backfill`], [`ChatService::embedding_stats`],
//!   [`ChatService::transfer_guest_data`]

mod backfill;
mod conversations;
mod error;
mod memories;
mod profile;
mod search;
mod service;

pub use backfill::BackfillScope;
pub use error::ServiceError;
pub use memories::NewMemory;
pub use search::{DEFAULT_MEMORY_MATCHES, DEFAULT_MESSAGE_MATCHES, DEFAULT_SEARCH_THRESHOLD};
pub use service::{ChatReply, ChatService, SendMessage, ServiceConfig};
