//! Perplexity chat-completions client.
//!
//! The endpoint is OpenAI-compatible with two extra top-level response
//! fields, `citations` and `search_results`.

use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, error, warn};

use medchat_types::{ChatSettings, SearchResult, TokenUsage};

use crate::error::ChatError;
use crate::model::{ChatModel, ChatRequest, ChatResponse};

/// Configuration for the Perplexity client.
#[derive(Debug, Clone)]
pub struct PerplexityConfig {
    /// API base URL (e.g., "https://api.perplexity.ai")
    pub base_url: String,

    pub api_key: SecretString,

    /// Per-request timeout
    pub timeout: Duration,

    /// Retries after the first failed attempt
    pub max_retries: u32,
}

impl PerplexityConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.perplexity.ai".to_string(),
            api_key: SecretString::from(api_key.into()),
            timeout: Duration::from_secs(60),
            max_retries: 2,
        }
    }

    /// Build from settings; the API key is mandatory.
    pub fn from_settings(settings: &ChatSettings) -> Result<Self, ChatError> {
        let api_key = settings.api_key.clone().ok_or_else(|| {
            ChatError::Config(
                "chat requires an API key (chat.api_key or PERPLEXITY_API_KEY)".to_string(),
            )
        })?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: SecretString::from(api_key),
            timeout: Duration::from_secs(settings.timeout_secs),
            max_retries: settings.max_retries,
        })
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    citations: Vec<String>,
    #[serde(default)]
    search_results: Vec<RawSearchResult>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct RawSearchResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// HTTP client for Perplexity's chat completions.
pub struct PerplexityClient {
    client: Client,
    config: PerplexityConfig,
}

impl PerplexityClient {
    pub fn new(config: PerplexityConfig) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChatError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn from_settings(settings: &ChatSettings) -> Result<Self, ChatError> {
        Self::new(PerplexityConfig::from_settings(settings)?)
    }

    /// Call the API with bounded retry.
    async fn call_api(&self, request: &ChatRequest) -> Result<ChatResponse, ChatError> {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(250),
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        };

        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(attempt = attempts, model = %request.model, "Calling chat API");

            match self.make_request(request).await {
                Ok(response) => return Ok(response),
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
                                "Chat call failed, retrying"
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

    async fn make_request(&self, request: &ChatRequest) -> Result<ChatResponse, ChatError> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.config.api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| ChatError::ModelCallFailed(e.to_string()))?;

        if response.status() == 429 {
            return Err(ChatError::RateLimited);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::ModelCallFailed(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ChatError::InvalidResponse(e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::InvalidResponse("No choices in response".to_string()))?
            .message
            .content
            .unwrap_or_default();

        Ok(ChatResponse {
            content,
            citations: body.citations,
            search_results: body
                .search_results
                .into_iter()
                .map(|r| SearchResult {
                    title: r.title.unwrap_or_default(),
                    url: r.url.unwrap_or_default(),
                    snippet: r.snippet,
                    date: r.date,
                })
                .collect(),
            usage: body.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }
}

#[async_trait]
impl ChatModel for PerplexityClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ChatError> {
        self.call_api(request).await
    }
}
