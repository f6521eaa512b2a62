//! LOCAL mode weights on disk.
//!
//! Files live in a HuggingFace Hub cache rooted at the configured
//! `embedding.cache_dir`; the first start fetches them, later starts
//! resolve them offline.

use std::path::{Path, PathBuf};

use hf_hub::api::sync::ApiBuilder;
use hf_hub::Cache;
use tracing::{debug, info};

use crate::error::EmbeddingError;

pub const DEFAULT_MODEL_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";

#[derive(Debug, Clone)]
pub struct ModelCache {
    root: PathBuf,
    repo_id: String,
}

impl Default for ModelCache {
    fn default() -> Self {
        let root = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("medchat")
            .join("models");
        Self::for_default_model(root)
    }
}

impl ModelCache {
    pub fn new(root: impl Into<PathBuf>, repo_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            repo_id: repo_id.into(),
        }
    }

    pub fn for_default_model(root: impl Into<PathBuf>) -> Self {
        Self::new(root, DEFAULT_MODEL_REPO)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    /// Resolve the three model files without touching the network.
    /// `None` unless all of them are present.
    pub fn cached(&self) -> Option<ModelPaths> {
        let repo = Cache::new(self.root.clone()).model(self.repo_id.clone());
        Some(ModelPaths {
            config: repo.get(CONFIG_FILE)?,
            tokenizer: repo.get(TOKENIZER_FILE)?,
            weights: repo.get(WEIGHTS_FILE)?,
        })
    }

    /// Cached files, or a download into the cache root.
    ///
    /// Blocking; LOCAL backends call it from `spawn_blocking`.
    pub fn fetch(&self) -> Result<ModelPaths, EmbeddingError> {
        if let Some(paths) = self.cached() {
            debug!(repo = %self.repo_id, "Embedding model already cached");
            return Ok(paths);
        }

        info!(repo = %self.repo_id, root = ?self.root, "Fetching embedding model");
        std::fs::create_dir_all(&self.root)?;
        let api = ApiBuilder::new()
            .with_cache_dir(self.root.clone())
            .with_progress(false)
            .build()
            .map_err(|e| EmbeddingError::Download(e.to_string()))?;
        let repo = api.model(self.repo_id.clone());

        let get = |file: &str| {
            repo.get(file)
                .map_err(|e| EmbeddingError::Download(format!("{}: {}", file, e)))
        };
        Ok(ModelPaths {
            config: get(CONFIG_FILE)?,
            tokenizer: get(TOKENIZER_FILE)?,
            weights: get(WEIGHTS_FILE)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelPaths {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Lay files out the way the hub cache does for revision `main`.
    fn seed_snapshot(root: &Path, repo_id: &str, files: &[&str]) -> PathBuf {
        let repo_dir = root.join(format!("models--{}", repo_id.replace('/', "--")));
        std::fs::create_dir_all(repo_dir.join("refs")).unwrap();
        std::fs::write(repo_dir.join("refs").join("main"), "0a1b2c").unwrap();

        let snapshot = repo_dir.join("snapshots").join("0a1b2c");
        std::fs::create_dir_all(&snapshot).unwrap();
        for file in files {
            std::fs::write(snapshot.join(file), "{}").unwrap();
        }
        snapshot
    }

    #[test]
    fn test_default_root_is_medchat_scoped() {
        let cache = ModelCache::default();
        assert!(cache.root().to_string_lossy().contains("medchat"));
        assert_eq!(cache.repo_id(), DEFAULT_MODEL_REPO);
    }

    #[test]
    fn test_empty_root_has_nothing_cached() {
        let temp = TempDir::new().unwrap();
        assert!(ModelCache::for_default_model(temp.path()).cached().is_none());
    }

    #[test]
    fn test_partial_snapshot_is_not_cached() {
        let temp = TempDir::new().unwrap();
        seed_snapshot(temp.path(), "acme/mini", &[CONFIG_FILE, TOKENIZER_FILE]);
        assert!(ModelCache::new(temp.path(), "acme/mini").cached().is_none());
    }

    #[test]
    fn test_full_snapshot_resolves_offline() {
        let temp = TempDir::new().unwrap();
        let snapshot = seed_snapshot(
            temp.path(),
            "acme/mini",
            &[CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE],
        );

        let cache = ModelCache::new(temp.path(), "acme/mini");
        let paths = cache.cached().unwrap();
        assert_eq!(paths.weights, snapshot.join(WEIGHTS_FILE));
        assert_eq!(cache.fetch().unwrap(), paths);
    }
}
