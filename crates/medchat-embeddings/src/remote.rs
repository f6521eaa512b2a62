//! Remote embeddings via an OpenAI-compatible `/embeddings` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use medchat_types::{EmbeddingMode, EmbeddingSettings};

use crate::error::EmbeddingError;
use crate::model::{Embedding, EmbeddingBackend, ModelInfo};

/// Configuration for the remote embedder.
#[derive(Debug, Clone)]
pub struct RemoteEmbedderConfig {
    /// API base URL (e.g., "https://api.openai.com/v1")
    pub base_url: String,

    /// Model to use (e.g., "text-embedding-3-small")
    pub model: String,

    pub api_key: SecretString,

    /// Per-request timeout
    pub timeout: Duration,

    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Expected vector length
    pub dimension: usize,
}

impl RemoteEmbedderConfig {
    /// Config for OpenAI's text-embedding-3-small.
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: SecretString::from(api_key.into()),
            timeout: Duration::from_secs(30),
            max_retries: 2,
            dimension: EmbeddingMode::Remote.dimension(),
        }
    }

    /// Build from settings; the API key is mandatory.
    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self, EmbeddingError> {
        let api_key = settings.remote_api_key.clone().ok_or_else(|| {
            EmbeddingError::ProviderUnavailable(
                "REMOTE embedding mode requires an API key (embedding.remote_api_key or OPENAI_API_KEY)"
                    .to_string(),
            )
        })?;

        Ok(Self {
            base_url: settings.remote_base_url.trim_end_matches('/').to_string(),
            model: settings.remote_model.clone(),
            api_key: SecretString::from(api_key),
            timeout: Duration::from_secs(settings.timeout_secs),
            max_retries: settings.max_retries,
            dimension: EmbeddingMode::Remote.dimension(),
        })
    }
}

/// REMOTE mode backend. Stateless apart from the pooled HTTP client, so
/// concurrent calls are not serialized.
pub struct RemoteEmbedder {
    client: Client,
    config: RemoteEmbedderConfig,
    info: ModelInfo,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl RemoteEmbedder {
    pub fn new(config: RemoteEmbedderConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmbeddingError::ProviderUnavailable(e.to_string()))?;

        let info = ModelInfo {
            name: config.model.clone(),
            dimension: config.dimension,
            max_sequence_length: EmbeddingMode::Remote.max_tokens(),
        };

        Ok(Self {
            client,
            config,
            info,
        })
    }

    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self, EmbeddingError> {
        Self::new(RemoteEmbedderConfig::from_settings(settings)?)
    }

    /// Call the API with bounded retry.
    async fn call_api(&self, input: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        };

        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(attempt = attempts, count = input.len(), "Calling embeddings API");

            match self.make_request(input).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(e) => {
                    if attempts > self.config.max_retries {
                        error!(error = %e, attempts, "Max retries exceeded");
                        return Err(e);
                    }

                    match backoff.next_backoff() {
                        Some(duration) => {
                            warn!(
                                error = %e,
                                retry_in_ms = duration.as_millis(),
                                "Embeddings call failed, retrying"
                            );
                            tokio::time::sleep(duration).await;
                        }
                        None => {
                            error!(error = %e, "Backoff exhausted");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    async fn make_request(&self, input: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input,
        };

        let url = format!("{}/embeddings", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.config.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::ProviderError(e.to_string()))?;

        if response.status() == 429 {
            return Err(EmbeddingError::ProviderError(
                "rate limit exceeded".to_string(),
            ));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ProviderError(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let mut body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::ProviderError(format!("malformed response: {}", e)))?;

        if body.data.len() != input.len() {
            return Err(EmbeddingError::ProviderError(format!(
                "expected {} embeddings, got {}",
                input.len(),
                body.data.len()
            )));
        }

        body.data.sort_by_key(|d| d.index);

        body.data
            .into_iter()
            .map(|d| {
                if d.embedding.len() != self.config.dimension {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: self.config.dimension,
                        actual: d.embedding.len(),
                    });
                }
                Ok(Embedding::new(d.embedding))
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingBackend for RemoteEmbedder {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.call_api(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::ProviderError("empty embeddings response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.call_api(texts).await
    }
}
