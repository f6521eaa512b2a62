//! Similarity search gateway.
//!
//! Validates query parameters, then delegates to an external
//! [`SimilarityIndex`]. Key behaviors:
//! - Invalid threshold, top_k, owner or query vector fail with
//!   `SearchError::InvalidParameter` and never reach the index
//! - Index failures and timeouts return an empty list with a warning
//! - Results come back in descending similarity order

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};

use medchat_types::{ChatMessage, MemoryEntity};

use crate::error::{IndexError, SearchError};

/// Largest top_k accepted for memory search.
pub const MAX_MEMORY_TOP_K: usize = 50;

/// Largest top_k accepted for message search.
pub const MAX_MESSAGE_TOP_K: usize = 100;

/// An entity with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatch<T> {
    pub entity: T,
    pub similarity: f32,
}

impl<T> SimilarityMatch<T> {
    pub fn new(entity: T, similarity: f32) -> Self {
        Self { entity, similarity }
    }
}

/// External vector index, one search per entity kind.
///
/// Implementations return rows at or above `threshold`, at most `top_k`,
/// ordered by descending similarity with a deterministic tie-break.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    async fn search_memories(
        &self,
        query: &[f32],
        owner_id: &str,
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<SimilarityMatch<MemoryEntity>>, IndexError>;

    /// Messages in conversations owned by `owner_id`, optionally narrowed
    /// to one conversation.
    async fn search_messages(
        &self,
        query: &[f32],
        owner_id: &str,
        conversation_id: Option<&str>,
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<SimilarityMatch<ChatMessage>>, IndexError>;
}

/// Counters for gateway outcomes.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    pub searches: AtomicU64,
    pub rejected_invalid: AtomicU64,
    pub failed_index: AtomicU64,
    pub failed_timeout: AtomicU64,
}

impl GatewayMetrics {
    pub fn snapshot(&self) -> GatewayMetricsSnapshot {
        GatewayMetricsSnapshot {
            searches: self.searches.load(Ordering::Relaxed),
            rejected_invalid: self.rejected_invalid.load(Ordering::Relaxed),
            failed_index: self.failed_index.load(Ordering::Relaxed),
            failed_timeout: self.failed_timeout.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayMetricsSnapshot {
    pub searches: u64,
    pub rejected_invalid: u64,
    pub failed_index: u64,
    pub failed_timeout: u64,
}

impl GatewayMetricsSnapshot {
    /// Searches that degraded to an empty result.
    pub fn total_degraded(&self) -> u64 {
        self.failed_index + self.failed_timeout
    }
}

/// Validating, fail-open front for a [`SimilarityIndex`].
pub struct SimilaritySearchGateway {
    index: Arc<dyn SimilarityIndex>,
    timeout: Duration,
    metrics: Arc<GatewayMetrics>,
}

impl SimilaritySearchGateway {
    pub fn new(index: Arc<dyn SimilarityIndex>, timeout: Duration) -> Self {
        Self {
            index,
            timeout,
            metrics: Arc::new(GatewayMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    pub async fn search_memories(
        &self,
        query: &[f32],
        owner_id: &str,
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<SimilarityMatch<MemoryEntity>>, SearchError> {
        self.validate(query, owner_id, threshold, top_k, MAX_MEMORY_TOP_K)?;

        let result = self
            .run(
                "memories",
                self.index.search_memories(query, owner_id, threshold, top_k),
            )
            .await;
        Ok(finish(result, threshold, top_k))
    }

    pub async fn search_messages(
        &self,
        query: &[f32],
        owner_id: &str,
        conversation_id: Option<&str>,
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<SimilarityMatch<ChatMessage>>, SearchError> {
        self.validate(query, owner_id, threshold, top_k, MAX_MESSAGE_TOP_K)?;

        let result = self
            .run(
                "messages",
                self.index
                    .search_messages(query, owner_id, conversation_id, threshold, top_k),
            )
            .await;
        Ok(finish(result, threshold, top_k))
    }

    fn validate(
        &self,
        query: &[f32],
        owner_id: &str,
        threshold: f32,
        top_k: usize,
        max_top_k: usize,
    ) -> Result<(), SearchError> {
        let result = validate_params(query, owner_id, threshold, top_k, max_top_k);
        if result.is_err() {
            self.metrics.rejected_invalid.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn run<T, F>(&self, kind: &'static str, search: F) -> Vec<SimilarityMatch<T>>
    where
        F: std::future::Future<Output = Result<Vec<SimilarityMatch<T>>, IndexError>>,
    {
        self.metrics.searches.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        match timeout(self.timeout, search).await {
            Ok(Ok(matches)) => {
                debug!(
                    kind,
                    count = matches.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Similarity search complete"
                );
                matches
            }
            Ok(Err(e)) => {
                self.metrics.failed_index.fetch_add(1, Ordering::Relaxed);
                warn!(kind, error = %e, "Similarity search failed, continuing without matches");
                Vec::new()
            }
            Err(_) => {
                self.metrics.failed_timeout.fetch_add(1, Ordering::Relaxed);
                warn!(
                    kind,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Similarity search timed out, continuing without matches"
                );
                Vec::new()
            }
        }
    }
}

/// Check threshold and top_k without a query vector, so callers can
/// reject bad input before paying for an embedding.
pub fn validate_search_params(
    threshold: f32,
    top_k: usize,
    max_top_k: usize,
) -> Result<(), SearchError> {
    // NaN fails the range check
    if !(0.0..=1.0).contains(&threshold) {
        return Err(SearchError::invalid(
            "threshold",
            format!("must be between 0 and 1, got {}", threshold),
        ));
    }
    if top_k < 1 || top_k > max_top_k {
        return Err(SearchError::invalid(
            "top_k",
            format!("must be between 1 and {}, got {}", max_top_k, top_k),
        ));
    }
    Ok(())
}

fn validate_params(
    query: &[f32],
    owner_id: &str,
    threshold: f32,
    top_k: usize,
    max_top_k: usize,
) -> Result<(), SearchError> {
    validate_search_params(threshold, top_k, max_top_k)?;
    if owner_id.trim().is_empty() {
        return Err(SearchError::invalid("owner_id", "must not be empty"));
    }
    if query.is_empty() {
        return Err(SearchError::invalid("query", "embedding must not be empty"));
    }
    Ok(())
}

/// Enforce the ordering and bounds the index promised.
fn finish<T>(
    mut matches: Vec<SimilarityMatch<T>>,
    threshold: f32,
    top_k: usize,
) -> Vec<SimilarityMatch<T>> {
    matches.retain(|m| m.similarity >= threshold);
    // Stable, so the index's tie order survives
    matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    matches.truncate(top_k);
    matches
}
