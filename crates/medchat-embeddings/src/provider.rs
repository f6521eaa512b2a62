//! The process-wide embedding service.
//!
//! One `EmbeddingProvider` is constructed at startup and shared by
//! reference (`Arc`) with every caller. The backend behind it is built at
//! most once; the daemon calls [`EmbeddingProvider::initialize`] eagerly so
//! the multi-second model load never lands on a user request.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use medchat_types::{ChatMessage, EmbeddingMode, EmbeddingSettings, MemoryEntity};

use crate::cache::ModelCache;
use crate::candle::LocalBackend;
use crate::error::EmbeddingError;
use crate::model::{Embedding, EmbeddingBackend};
use crate::remote::RemoteEmbedder;
use crate::text::DomainTextBuilder;

/// Keep at most `max_chars` characters of `text`, cutting on a char boundary.
pub fn truncate_to_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Fixed-mode embedding service with lazy, once-only backend construction.
pub struct EmbeddingProvider {
    settings: EmbeddingSettings,
    backend: OnceCell<Arc<dyn EmbeddingBackend>>,
}

impl EmbeddingProvider {
    /// Create an uninitialized provider. No model is loaded until
    /// `initialize` or the first embed call.
    pub fn new(settings: EmbeddingSettings) -> Self {
        Self {
            settings,
            backend: OnceCell::new(),
        }
    }

    /// Create a provider around an already-built backend.
    pub fn with_backend(
        mode: EmbeddingMode,
        backend: Arc<dyn EmbeddingBackend>,
    ) -> Result<Self, EmbeddingError> {
        check_backend_dimension(mode, backend.as_ref())?;
        Ok(Self {
            settings: EmbeddingSettings {
                mode,
                ..Default::default()
            },
            backend: OnceCell::new_with(Some(backend)),
        })
    }

    pub fn mode(&self) -> EmbeddingMode {
        self.settings.mode
    }

    /// Vector length every embedding from this provider has.
    pub fn dimension(&self) -> usize {
        self.settings.mode.dimension()
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.initialized()
    }

    /// Build the backend now. Safe to call repeatedly and concurrently;
    /// construction runs once, and a failed attempt is retried on the next
    /// call.
    pub async fn initialize(&self) -> Result<(), EmbeddingError> {
        self.backend().await.map(|_| ())
    }

    async fn backend(&self) -> Result<&Arc<dyn EmbeddingBackend>, EmbeddingError> {
        self.backend
            .get_or_try_init(|| build_backend(&self.settings))
            .await
            .map_err(|e| match e {
                EmbeddingError::ProviderUnavailable(_) => e,
                other => EmbeddingError::ProviderUnavailable(other.to_string()),
            })
    }

    /// Embed one text.
    ///
    /// Blank input fails with `EmptyInput`. Input longer than the mode's
    /// limit is truncated, keeping the prefix.
    pub async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let input = truncate_to_chars(text, self.mode().max_input_chars());
        let backend = self.backend().await?;

        let embedding = backend
            .embed(input)
            .await
            .map_err(EmbeddingError::into_provider_error)?;

        self.check_dimension(embedding)
    }

    /// Embed several texts.
    ///
    /// The result has one slot per input, in input order. A blank or failed
    /// text leaves its slot empty without affecting the others. When the
    /// backend rejects the batch as a whole, every text is retried on its
    /// own.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Embedding>> {
        let mut slots: Vec<Option<Embedding>> = vec![None; texts.len()];
        if texts.is_empty() {
            return slots;
        }

        let max_chars = self.mode().max_input_chars();
        let (indices, inputs): (Vec<usize>, Vec<String>) = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.trim().is_empty())
            .map(|(i, t)| (i, truncate_to_chars(t, max_chars).to_string()))
            .unzip();

        if inputs.is_empty() {
            return slots;
        }

        let backend = match self.backend().await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, count = texts.len(), "Embedding backend unavailable, batch skipped");
                return slots;
            }
        };

        match backend.embed_batch(&inputs).await {
            Ok(embeddings) if embeddings.len() == inputs.len() => {
                for (idx, embedding) in indices.iter().zip(embeddings) {
                    slots[*idx] = self.check_dimension(embedding).ok();
                }
            }
            Ok(embeddings) => {
                warn!(
                    expected = inputs.len(),
                    got = embeddings.len(),
                    "Batch size mismatch, embedding individually"
                );
                self.fill_individually(backend, &indices, &inputs, &mut slots)
                    .await;
            }
            Err(e) => {
                warn!(error = %e, count = inputs.len(), "Batch embedding failed, embedding individually");
                self.fill_individually(backend, &indices, &inputs, &mut slots)
                    .await;
            }
        }

        debug!(
            requested = texts.len(),
            embedded = slots.iter().filter(|s| s.is_some()).count(),
            "Batch embedding complete"
        );
        slots
    }

    async fn fill_individually(
        &self,
        backend: &Arc<dyn EmbeddingBackend>,
        indices: &[usize],
        inputs: &[String],
        slots: &mut [Option<Embedding>],
    ) {
        let results = join_all(inputs.iter().map(|t| backend.embed(t))).await;
        for (idx, result) in indices.iter().zip(results) {
            match result.and_then(|e| self.check_dimension(e)) {
                Ok(embedding) => slots[*idx] = Some(embedding),
                Err(e) => warn!(error = %e, index = idx, "Embedding failed for batch item"),
            }
        }
    }

    /// Embed a chat message using the message template.
    pub async fn embed_message(&self, message: &ChatMessage) -> Result<Embedding, EmbeddingError> {
        self.embed(&DomainTextBuilder::for_message(message)).await
    }

    /// Embed a memory using the memory template.
    pub async fn embed_memory(&self, memory: &MemoryEntity) -> Result<Embedding, EmbeddingError> {
        self.embed(&DomainTextBuilder::memory_text(memory)).await
    }

    fn check_dimension(&self, embedding: Embedding) -> Result<Embedding, EmbeddingError> {
        let expected = self.dimension();
        if embedding.dimension() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: embedding.dimension(),
            });
        }
        Ok(embedding)
    }
}

async fn build_backend(
    settings: &EmbeddingSettings,
) -> Result<Arc<dyn EmbeddingBackend>, EmbeddingError> {
    info!(mode = %settings.mode, "Initializing embedding provider");

    let backend: Arc<dyn EmbeddingBackend> = match settings.mode {
        EmbeddingMode::Local => {
            let cache = ModelCache::for_default_model(&settings.cache_dir);
            Arc::new(LocalBackend::load(cache).await?)
        }
        EmbeddingMode::Remote => Arc::new(RemoteEmbedder::from_settings(settings)?),
    };

    check_backend_dimension(settings.mode, backend.as_ref())?;

    info!(
        mode = %settings.mode,
        model = %backend.info().name,
        dim = backend.info().dimension,
        "Embedding provider ready"
    );
    Ok(backend)
}

fn check_backend_dimension(
    mode: EmbeddingMode,
    backend: &dyn EmbeddingBackend,
) -> Result<(), EmbeddingError> {
    if backend.info().dimension != mode.dimension() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: mode.dimension(),
            actual: backend.info().dimension,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::HashEmbedder;

    fn provider(backend: HashEmbedder) -> EmbeddingProvider {
        EmbeddingProvider::with_backend(EmbeddingMode::Local, Arc::new(backend)).unwrap()
    }

    #[test]
    fn test_truncate_to_chars() {
        assert_eq!(truncate_to_chars("abcdef", 3), "abc");
        assert_eq!(truncate_to_chars("abc", 10), "abc");
        // Multi-byte characters are never split
        assert_eq!(truncate_to_chars("ñandú", 2), "ña");
    }

    #[test]
    fn test_backend_dimension_must_match_mode() {
        let result = EmbeddingProvider::with_backend(
            EmbeddingMode::Remote,
            Arc::new(HashEmbedder::new(384)),
        );
        assert!(matches!(
            result,
            Err(EmbeddingError::DimensionMismatch {
                expected: 1536,
                actual: 384
            })
        ));
    }

    #[tokio::test]
    async fn test_embed_returns_mode_dimension() {
        let provider = provider(HashEmbedder::new(384));
        for text in ["fever", "a much longer sentence about chronic migraines", "é"] {
            let emb = provider.embed(text).await.unwrap();
            assert_eq!(emb.dimension(), 384);
        }
    }

    #[tokio::test]
    async fn test_embed_rejects_blank_input() {
        let provider = provider(HashEmbedder::new(384));
        assert!(matches!(provider.embed("").await, Err(EmbeddingError::EmptyInput)));
        assert!(matches!(provider.embed(" \n\t").await, Err(EmbeddingError::EmptyInput)));
    }

    #[tokio::test]
    async fn test_embed_truncates_long_input() {
        let backend = Arc::new(HashEmbedder::new(384));
        let provider =
            EmbeddingProvider::with_backend(EmbeddingMode::Local, backend.clone()).unwrap();

        let long = "word ".repeat(1000);
        provider.embed(&long).await.unwrap();
        assert_eq!(backend.last_input_chars(), 2048);
    }

    #[tokio::test]
    async fn test_embed_backend_failure_is_provider_error() {
        let provider = provider(HashEmbedder::new(384).failing_on("poison"));
        let result = provider.embed("poison pill").await;
        assert!(matches!(result, Err(EmbeddingError::ProviderError(_))));
    }

    #[tokio::test]
    async fn test_batch_preserves_length_and_order() {
        let provider = provider(HashEmbedder::new(384).failing_on("poison"));
        let texts = vec![
            "headache".to_string(),
            "  ".to_string(),
            "poison".to_string(),
            "nausea".to_string(),
        ];

        let out = provider.embed_batch(&texts).await;
        assert_eq!(out.len(), 4);
        assert!(out[0].is_some());
        assert!(out[1].is_none());
        assert!(out[2].is_none());
        assert!(out[3].is_some());

        let direct = provider.embed("nausea").await.unwrap();
        assert_eq!(out[3].as_ref().unwrap(), &direct);
    }

    #[tokio::test]
    async fn test_batch_falls_back_per_item() {
        let provider = provider(HashEmbedder::new(384).failing_batches());
        let texts = vec!["cough".to_string(), "rash".to_string()];
        let out = provider.embed_batch(&texts).await;
        assert!(out.iter().all(Option::is_some));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let provider = provider(HashEmbedder::new(384));
        assert!(provider.embed_batch(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_remote_without_key_is_unavailable() {
        let provider = EmbeddingProvider::new(EmbeddingSettings {
            mode: EmbeddingMode::Remote,
            remote_api_key: None,
            ..Default::default()
        });

        assert!(!provider.is_initialized());
        let result = provider.embed("fever").await;
        assert!(matches!(result, Err(EmbeddingError::ProviderUnavailable(_))));

        let batch = provider
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await;
        assert_eq!(batch, vec![None, None]);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let provider = provider(HashEmbedder::new(384));
        assert!(provider.is_initialized());
        provider.initialize().await.unwrap();
        provider.initialize().await.unwrap();
        assert_eq!(provider.dimension(), 384);
    }
}
