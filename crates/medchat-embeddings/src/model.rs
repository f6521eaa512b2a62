//! Vectors and the two backend seams.
//!
//! [`EmbeddingModel`] is synchronous and CPU-bound (Candle);
//! [`EmbeddingBackend`] is what the provider awaits, for LOCAL and REMOTE
//! alike.

use async_trait::async_trait;

use crate::error::EmbeddingError;

/// Unit-length vector for one text.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Scales `values` to unit length; the zero vector is kept as is.
    pub fn new(mut values: Vec<f32>) -> Self {
        let norm = magnitude(&values);
        if norm > 0.0 {
            values.iter_mut().for_each(|x| *x /= norm);
        }
        Self { values }
    }

    /// Trust the caller that `values` is already unit length.
    pub fn from_normalized(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn cosine_similarity(&self, other: &Embedding) -> Result<f32, EmbeddingError> {
        cosine_similarity(&self.values, &other.values)
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.values
    }
}

/// Cosine similarity of two vectors, in [-1, 1].
///
/// Vectors of different length cannot be compared and fail with
/// `DimensionMismatch`. A zero-magnitude vector has similarity 0 with
/// everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, EmbeddingError> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let denom = magnitude(a) * magnitude(b);
    if denom == 0.0 {
        return Ok(0.0);
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    Ok(dot / denom)
}

fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub dimension: usize,
    /// Token window; longer input is truncated by the model
    pub max_sequence_length: usize,
}

pub trait EmbeddingModel: Send + Sync {
    fn info(&self) -> &ModelInfo;

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Async backend behind the `EmbeddingProvider`.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn info(&self) -> &ModelInfo;

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    /// Embed several texts in one call. Either every text is embedded or
    /// the whole call fails; the provider handles per-item fallback.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}
