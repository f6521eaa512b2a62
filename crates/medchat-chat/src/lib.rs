//! # medchat-chat
//!
//! Everything between a composed system prompt and a model answer.
//!
//! - [`normalize`]: role-alternation protocol for model input
//! - [`ChatOrchestrator`]: fixed-parameter model invocation and result filtering
//! - [`PerplexityClient`]: the production [`ChatModel`]
//! - [`EntityExtractor`]: best-effort patient fact extraction
//! - [`models`]: the supported model catalog

pub mod error;
pub mod extract;
pub mod mock;
pub mod model;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod perplexity;

pub use error::ChatError;
pub use extract::{EntityExtractor, ExtractedEntity, EXTRACTION_MODEL};
pub use mock::MockChatModel;
pub use model::{ChatModel, ChatRequest, ChatResponse};
pub use models::{
    available_models, find_model, is_supported, ChatModelInfo, ModelCategory, DEFAULT_MODEL,
};
pub use normalize::{build_request, build_session_context, is_normalized, merge_adjacent};
pub use orchestrator::{ChatOrchestrator, ModelReply, MAX_OUTPUT_TOKENS, TEMPERATURE};
pub use perplexity::{PerplexityClient, PerplexityConfig};
