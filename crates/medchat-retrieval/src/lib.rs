//! # medchat-retrieval
//!
//! Query-side personalization for the medchat pipeline.
//!
//! ## Components
//! - [`QueryClassifier`]: deterministic casual-vs-domain classification
//! - [`PromptComposer`]: system prompt built from classification and preferences
//! - [`SimilaritySearchGateway`]: validating, fail-open front for a vector index
//! - [`ContextAssembler`]: memory matches rendered into a bounded prompt fragment
//!
//! ## Usage
//!
//! ```rust
//! use medchat_retrieval::{PromptComposer, QueryClassifier, QueryKind};
//!
//! let kind = QueryClassifier::new().kind("hi there");
//! assert_eq!(kind, QueryKind::Casual);
//!
//! let prompt = PromptComposer::new().compose(kind, None, None);
//! assert!(prompt.contains("casual conversation"));
//! ```

pub mod classifier;
pub mod context;
pub mod error;
pub mod gateway;
pub mod prompt;

pub use classifier::{
    CasualCategory, CasualPattern, ClassificationResult, ClassifierConfig, QueryClassifier,
    QueryKind,
};
pub use context::{ContextAssembler, DEFAULT_CONTEXT_THRESHOLD};
pub use error::{IndexError, SearchError};
pub use gateway::{
    validate_search_params, GatewayMetrics, GatewayMetricsSnapshot, SimilarityIndex,
    SimilarityMatch, SimilaritySearchGateway, MAX_MEMORY_TOP_K, MAX_MESSAGE_TOP_K,
};
pub use prompt::PromptComposer;
