//! Deterministic embedding backend for tests and offline runs.
//!
//! Hashes lowercase word tokens into a fixed number of buckets, so texts
//! sharing words have high cosine similarity and identical texts always
//! produce identical vectors. No model download and no network.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::EmbeddingError;
use crate::model::{Embedding, EmbeddingBackend, ModelInfo};

/// Bag-of-words hashing embedder.
pub struct HashEmbedder {
    info: ModelInfo,
    failure_marker: Option<String>,
    fail_batches: bool,
    calls: AtomicUsize,
    last_input_chars: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            info: ModelInfo {
                name: "hash-embedder".to_string(),
                dimension,
                max_sequence_length: usize::MAX,
            },
            failure_marker: None,
            fail_batches: false,
            calls: AtomicUsize::new(0),
            last_input_chars: AtomicUsize::new(0),
        }
    }

    /// Fail any text containing `marker` (case-insensitive).
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.failure_marker = Some(marker.into().to_lowercase());
        self
    }

    /// Reject every batch call; single calls still succeed.
    pub fn failing_batches(mut self) -> Self {
        self.fail_batches = true;
        self
    }

    /// Number of texts this backend was asked to embed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Character count of the most recent input.
    pub fn last_input_chars(&self) -> usize {
        self.last_input_chars.load(Ordering::SeqCst)
    }

    fn encode(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_input_chars
            .store(text.chars().count(), Ordering::SeqCst);

        let lower = text.to_lowercase();
        if let Some(marker) = &self.failure_marker {
            if lower.contains(marker.as_str()) {
                return Err(EmbeddingError::ProviderError(format!(
                    "simulated failure for '{}'",
                    marker
                )));
            }
        }

        let dim = self.info.dimension;
        let mut values = vec![0.0f32; dim];
        let mut any = false;
        for token in lower.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            values[(fnv1a(token) % dim as u64) as usize] += 1.0;
            any = true;
        }
        if !any && dim > 0 {
            values[0] = 1.0;
        }

        Ok(Embedding::new(values))
    }
}

fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl EmbeddingBackend for HashEmbedder {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.encode(text)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        if self.fail_batches {
            return Err(EmbeddingError::ProviderError(
                "simulated batch failure".to_string(),
            ));
        }
        texts.iter().map(|t| self.encode(t)).collect()
    }
}
