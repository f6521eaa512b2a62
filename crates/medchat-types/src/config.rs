//! Configuration loading for medchat.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/medchat/config.toml.

use std::path::PathBuf;
use std::str::FromStr;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::MedchatError;

/// Embedding backend selector. Fixed for the lifetime of a process.
///
/// Changing the mode changes the vector dimension, so every stored
/// embedding has to be regenerated afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmbeddingMode {
    /// all-MiniLM-L6-v2 via Candle, 384 dimensions
    #[default]
    #[serde(rename = "LOCAL", alias = "local")]
    Local,
    /// OpenAI-compatible embeddings endpoint, 1536 dimensions
    #[serde(rename = "REMOTE", alias = "remote", alias = "OPENAI", alias = "openai")]
    Remote,
}

impl EmbeddingMode {
    /// Vector length produced in this mode.
    pub fn dimension(&self) -> usize {
        match self {
            EmbeddingMode::Local => 384,
            EmbeddingMode::Remote => 1536,
        }
    }

    /// Token limit of the underlying model.
    pub fn max_tokens(&self) -> usize {
        match self {
            EmbeddingMode::Local => 512,
            EmbeddingMode::Remote => 8191,
        }
    }

    /// Input is truncated to this many characters (4 chars per token).
    pub fn max_input_chars(&self) -> usize {
        self.max_tokens() * 4
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingMode::Local => "LOCAL",
            EmbeddingMode::Remote => "REMOTE",
        }
    }
}

impl std::fmt::Display for EmbeddingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingMode {
    type Err = MedchatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOCAL" => Ok(EmbeddingMode::Local),
            "REMOTE" | "OPENAI" => Ok(EmbeddingMode::Remote),
            other => Err(MedchatError::Config(format!(
                "unknown embedding mode '{}', expected LOCAL or REMOTE",
                other
            ))),
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default)]
    pub mode: EmbeddingMode,

    /// Where local model files are cached
    #[serde(default = "default_model_cache_dir")]
    pub cache_dir: String,

    #[serde(default = "default_remote_base_url")]
    pub remote_base_url: String,

    #[serde(default = "default_remote_model")]
    pub remote_model: String,

    /// Falls back to OPENAI_API_KEY when unset
    #[serde(default)]
    pub remote_api_key: Option<String>,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_model_cache_dir() -> String {
    ProjectDirs::from("", "", "medchat")
        .map(|p| p.cache_dir().join("models"))
        .unwrap_or_else(|| PathBuf::from(".cache/models"))
        .to_string_lossy()
        .to_string()
}

fn default_remote_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_remote_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            mode: EmbeddingMode::default(),
            cache_dir: default_model_cache_dir(),
            remote_base_url: default_remote_base_url(),
            remote_model: default_remote_model(),
            remote_api_key: None,
            timeout_secs: default_embedding_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

/// Chat model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_chat_base_url")]
    pub base_url: String,

    /// Falls back to PERPLEXITY_API_KEY when unset
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_chat_model")]
    pub default_model: String,

    #[serde(default = "default_chat_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Number of prior turns sent with each request
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_chat_base_url() -> String {
    "https://api.perplexity.ai".to_string()
}

fn default_chat_model() -> String {
    "sonar-pro".to_string()
}

fn default_chat_timeout() -> u64 {
    60
}

fn default_history_window() -> usize {
    5
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            base_url: default_chat_base_url(),
            api_key: None,
            default_model: default_chat_model(),
            timeout_secs: default_chat_timeout(),
            max_retries: default_max_retries(),
            history_window: default_history_window(),
        }
    }
}

/// Similarity search and context assembly configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    /// Minimum similarity for a memory to reach the prompt.
    /// Range: 0.0-1.0
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default = "default_memory_match_count")]
    pub memory_match_count: usize,

    #[serde(default = "default_message_match_count")]
    pub message_match_count: usize,

    /// Search calls exceeding this are abandoned (empty result)
    #[serde(default = "default_search_timeout")]
    pub search_timeout_ms: u64,

    #[serde(default = "default_max_context_entries")]
    pub max_context_entries: usize,

    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

fn default_similarity_threshold() -> f32 {
    0.7
}

fn default_memory_match_count() -> usize {
    5
}

fn default_message_match_count() -> usize {
    10
}

fn default_search_timeout() -> u64 {
    2000
}

fn default_max_context_entries() -> usize {
    5
}

fn default_max_context_chars() -> usize {
    4000
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            memory_match_count: default_memory_match_count(),
            message_match_count: default_message_match_count(),
            search_timeout_ms: default_search_timeout(),
            max_context_entries: default_max_context_entries(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

/// Background persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    /// Compute message embeddings when persisting chat turns.
    /// Off by default; the backfill job fills them in later.
    #[serde(default)]
    pub embed_messages: bool,

    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// How long shutdown waits for in-flight writes
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_max_concurrent_jobs() -> usize {
    8
}

fn default_shutdown_grace() -> u64 {
    10
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            embed_messages: false,
            max_concurrent_jobs: default_max_concurrent_jobs(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

/// Periodic embedding backfill configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 6-field cron expression (sec min hour day month weekday)
    #[serde(default = "default_backfill_schedule")]
    pub schedule: String,

    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_backfill_schedule() -> String {
    "0 */15 * * * *".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_batch_size() -> usize {
    100
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: default_backfill_schedule(),
            timezone: default_timezone(),
            batch_size: default_batch_size(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub embedding: EmbeddingSettings,

    #[serde(default)]
    pub chat: ChatSettings,

    #[serde(default)]
    pub retrieval: RetrievalSettings,

    #[serde(default)]
    pub persistence: PersistenceSettings,

    #[serde(default)]
    pub backfill: BackfillSettings,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            embedding: EmbeddingSettings::default(),
            chat: ChatSettings::default(),
            retrieval: RetrievalSettings::default(),
            persistence: PersistenceSettings::default(),
            backfill: BackfillSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/medchat/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (MEDCHAT_*, nested with `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, MedchatError> {
        let config_dir = ProjectDirs::from("", "", "medchat")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())?
            .set_default("embedding.mode", EmbeddingMode::default().as_str())?
            .set_default("chat.base_url", default_chat_base_url())?
            .set_default("chat.default_model", default_chat_model())?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // MEDCHAT_LOG_LEVEL, MEDCHAT_CHAT__DEFAULT_MODEL, MEDCHAT_EMBEDDING__MODE, ...
        builder = builder.add_source(
            Environment::with_prefix("MEDCHAT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut settings: Settings = builder.build()?.try_deserialize()?;

        if settings.chat.api_key.is_none() {
            settings.chat.api_key = non_empty_env("PERPLEXITY_API_KEY");
        }
        if settings.embedding.remote_api_key.is_none() {
            settings.embedding.remote_api_key = non_empty_env("OPENAI_API_KEY");
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), MedchatError> {
        let r = &self.retrieval;
        if !(0.0..=1.0).contains(&r.similarity_threshold) {
            return Err(MedchatError::Config(format!(
                "retrieval.similarity_threshold must be 0.0-1.0, got {}",
                r.similarity_threshold
            )));
        }
        if !(1..=50).contains(&r.memory_match_count) {
            return Err(MedchatError::Config(format!(
                "retrieval.memory_match_count must be 1-50, got {}",
                r.memory_match_count
            )));
        }
        if !(1..=100).contains(&r.message_match_count) {
            return Err(MedchatError::Config(format!(
                "retrieval.message_match_count must be 1-100, got {}",
                r.message_match_count
            )));
        }
        if r.search_timeout_ms == 0 {
            return Err(MedchatError::Config(
                "retrieval.search_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.chat.timeout_secs == 0 || self.embedding.timeout_secs == 0 {
            return Err(MedchatError::Config("timeout_secs must be > 0".to_string()));
        }
        if self.persistence.max_concurrent_jobs == 0 {
            return Err(MedchatError::Config(
                "persistence.max_concurrent_jobs must be > 0".to_string(),
            ));
        }
        if !(1..=500).contains(&self.backfill.batch_size) {
            return Err(MedchatError::Config(format!(
                "backfill.batch_size must be 1-500, got {}",
                self.backfill.batch_size
            )));
        }
        Ok(())
    }

    /// Render the effective settings as TOML with secrets masked.
    pub fn to_redacted_toml(&self) -> Result<String, MedchatError> {
        let mut redacted = self.clone();
        if redacted.chat.api_key.is_some() {
            redacted.chat.api_key = Some("********".to_string());
        }
        if redacted.embedding.remote_api_key.is_some() {
            redacted.embedding.remote_api_key = Some("********".to_string());
        }
        Ok(toml::to_string_pretty(&redacted)?)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
