//! LOCAL mode: all-MiniLM-L6-v2 running in-process on Candle.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::{Encoding, Tokenizer};
use tracing::{debug, info};

use crate::cache::{ModelCache, ModelPaths};
use crate::error::EmbeddingError;
use crate::model::{Embedding, EmbeddingBackend, EmbeddingModel, ModelInfo};

pub const EMBEDDING_DIM: usize = 384;

/// Longer inputs are cut to this many tokens
pub const MAX_SEQ_LENGTH: usize = 256;

/// Texts per forward pass
pub const DEFAULT_BATCH_SIZE: usize = 32;

pub struct CandleEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    info: ModelInfo,
}

impl CandleEmbedder {
    /// Blocking: may download on first use.
    pub fn load(cache: &ModelCache) -> Result<Self, EmbeddingError> {
        Self::load_from_paths(&cache.fetch()?)
    }

    pub fn load_from_paths(paths: &ModelPaths) -> Result<Self, EmbeddingError> {
        let device = Device::Cpu;

        let config: BertConfig = serde_json::from_str(&std::fs::read_to_string(&paths.config)?)
            .map_err(|e| EmbeddingError::ModelNotFound(format!("bad BERT config: {}", e)))?;
        let tokenizer = Tokenizer::from_file(&paths.tokenizer)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        // SAFETY: the weights file is owned by the model cache and not
        // rewritten while the process runs.
        let weights = unsafe {
            VarBuilder::from_mmaped_safetensors(&[paths.weights.clone()], DType::F32, &device)?
        };
        let model = BertModel::load(weights, &config)?;

        info!(dim = EMBEDDING_DIM, "LOCAL embedding model loaded");
        Ok(Self {
            model,
            tokenizer,
            device,
            info: ModelInfo {
                name: "all-MiniLM-L6-v2".to_string(),
                dimension: EMBEDDING_DIM,
                max_sequence_length: MAX_SEQ_LENGTH,
            },
        })
    }

    fn forward(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        let (ids, mask) = padded_inputs(&encodings, &self.device)?;
        let token_types = ids.zeros_like()?;
        let hidden = self.model.forward(&ids, &token_types, Some(&mask))?;

        let rows: Vec<Vec<f32>> = mean_pool(&hidden, &mask)?.to_vec2()?;
        Ok(rows.into_iter().map(Embedding::new).collect())
    }
}

/// Right-pad (and truncate) every encoding to the longest one in the
/// batch, capped at [`MAX_SEQ_LENGTH`]. Returns `(input_ids, attention_mask)`.
fn padded_inputs(encodings: &[Encoding], device: &Device) -> Result<(Tensor, Tensor), EmbeddingError> {
    let width = encodings
        .iter()
        .map(|e| e.get_ids().len())
        .max()
        .unwrap_or(0)
        .min(MAX_SEQ_LENGTH);

    let mut ids = Vec::with_capacity(encodings.len() * width);
    let mut mask = Vec::with_capacity(encodings.len() * width);
    for encoding in encodings {
        let row_ids = encoding.get_ids();
        let row_mask = encoding.get_attention_mask();
        let kept = row_ids.len().min(width);

        ids.extend_from_slice(&row_ids[..kept]);
        ids.extend(std::iter::repeat(0).take(width - kept));
        mask.extend_from_slice(&row_mask[..kept]);
        mask.extend(std::iter::repeat(0).take(width - kept));
    }

    let shape = (encodings.len(), width);
    Ok((
        Tensor::from_vec(ids, shape, device)?,
        Tensor::from_vec(mask, shape, device)?,
    ))
}

/// Average the token vectors that the attention mask keeps.
fn mean_pool(hidden: &Tensor, mask: &Tensor) -> Result<Tensor, EmbeddingError> {
    let weights = mask
        .to_dtype(DType::F32)?
        .unsqueeze(2)?
        .broadcast_as(hidden.shape())?;
    let summed = hidden.broadcast_mul(&weights)?.sum(1)?;
    let counts = weights.sum(1)?.clamp(1e-9, f64::MAX)?;
    Ok(summed.broadcast_div(&counts)?)
}

impl EmbeddingModel for CandleEmbedder {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.forward(&[text])?
            .pop()
            .ok_or_else(|| EmbeddingError::ProviderError("model returned no embedding".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = texts.len(), "LOCAL forward pass");
        self.forward(texts)
    }
}

/// Async face of [`CandleEmbedder`]. One forward pass at a time, on the
/// blocking pool.
pub struct LocalBackend {
    model: Arc<Mutex<CandleEmbedder>>,
    info: ModelInfo,
}

impl LocalBackend {
    pub async fn load(cache: ModelCache) -> Result<Self, EmbeddingError> {
        let embedder = tokio::task::spawn_blocking(move || CandleEmbedder::load(&cache))
            .await
            .map_err(|e| EmbeddingError::ProviderUnavailable(e.to_string()))??;

        Ok(Self::from_embedder(embedder))
    }

    pub fn from_embedder(embedder: CandleEmbedder) -> Self {
        let info = embedder.info().clone();
        Self {
            model: Arc::new(Mutex::new(embedder)),
            info,
        }
    }

    async fn run<T, F>(&self, f: F) -> Result<T, EmbeddingError>
    where
        F: FnOnce(&CandleEmbedder) -> Result<T, EmbeddingError> + Send + 'static,
        T: Send + 'static,
    {
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || {
            let guard = model
                .lock()
                .map_err(|_| EmbeddingError::ProviderError("local model lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| EmbeddingError::ProviderError(e.to_string()))?
    }
}

#[async_trait]
impl EmbeddingBackend for LocalBackend {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let text = text.to_string();
        self.run(move |model| model.embed(&text)).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(DEFAULT_BATCH_SIZE) {
            let chunk = chunk.to_vec();
            let embedded = self
                .run(move |model| {
                    let refs: Vec<&str> = chunk.iter().map(String::as_str).collect();
                    model.embed_batch(&refs)
                })
                .await?;
            out.extend(embedded);
        }
        Ok(out)
    }
}
