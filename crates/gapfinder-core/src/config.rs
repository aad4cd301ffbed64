//! Engine configuration: embedding service, thresholds, ranking.
//!
//! Loaded from an optional JSON file, then overridden from the environment.
//! Every field has a default so a missing file yields a usable configuration
//! (apart from the API key, which only the HTTP embedder needs).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_DATABASE_PATH: &str = "data/pages.db";

/// Embedding service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model identifier passed through on every request.
    pub model_id: String,
    /// Base URL of an OpenAI-compatible API (`{base_url}/embeddings`).
    pub base_url: String,
    /// Bearer credential. Never serialized back out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Requested output dimensionality, if the model supports truncation.
    pub dimensions: Option<usize>,
    /// Maximum texts per request.
    pub batch_size: usize,
    /// Total attempts per batch, first try included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Backoff multiplier applied on rate-limit responses.
    pub rate_limit_multiplier: f64,
    pub rate_limit_max_delay_ms: u64,
    /// Timeout for a single external call.
    pub request_timeout_secs: u64,
    /// Maximum simultaneous external calls.
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_EMBEDDING_MODEL.into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: None,
            dimensions: None,
            batch_size: 100,
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            rate_limit_multiplier: 2.0,
            rate_limit_max_delay_ms: 60_000,
            request_timeout_secs: 30,
            concurrency: 10,
        }
    }
}

impl EmbeddingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Classification thresholds used by the gap detector and clustering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Below this page similarity a competitor page counts as missing content.
    pub similarity_threshold: f32,
    /// Competitor/primary word-count ratio at which a page counts as thin.
    pub thin_ratio: f64,
    /// DBSCAN minimum neighbourhood size (the point itself included).
    pub cluster_min_samples: usize,
    /// Also emit missing_content for competitor pages that have no embeddings.
    pub treat_unembedded_as_missing: bool,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.45,
            thin_ratio: 3.0,
            cluster_min_samples: 2,
            treat_unembedded_as_missing: false,
        }
    }
}

/// Recommender settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Cap on the quick-win subset. `None` keeps all of them.
    pub quick_win_limit: Option<usize>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            quick_win_limit: Some(10),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite database file.
    pub database_path: PathBuf,
    pub embedding: EmbeddingConfig,
    pub thresholds: Thresholds,
    pub ranking: RankingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            embedding: EmbeddingConfig::default(),
            thresholds: Thresholds::default(),
            ranking: RankingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load config from an optional JSON file, apply environment overrides,
    /// and validate the result.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Override fields from `GAPFINDER_*` and `OPENAI_API_KEY` variables.
    pub fn apply_env(&mut self) {
        if let Ok(db) = std::env::var("GAPFINDER_DB") {
            self.database_path = PathBuf::from(db);
        }
        if let Ok(model) = std::env::var("GAPFINDER_EMBEDDING_MODEL") {
            if !model.trim().is_empty() {
                self.embedding.model_id = model;
            }
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                self.embedding.api_key = Some(key);
            }
        }
        if let Ok(raw) = std::env::var("GAPFINDER_CONCURRENCY") {
            match raw.parse() {
                Ok(n) => self.embedding.concurrency = n,
                Err(_) => warn!("Ignoring invalid GAPFINDER_CONCURRENCY={}", raw),
            }
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        if !(t.similarity_threshold > 0.0 && t.similarity_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "similarity_threshold must be in (0, 1], got {}",
                t.similarity_threshold
            )));
        }
        if t.thin_ratio < 1.0 {
            return Err(Error::Config(format!(
                "thin_ratio must be >= 1.0, got {}",
                t.thin_ratio
            )));
        }
        if t.cluster_min_samples == 0 {
            return Err(Error::Config("cluster_min_samples must be >= 1".into()));
        }

        let e = &self.embedding;
        if e.model_id.trim().is_empty() {
            return Err(Error::Config("embedding.model_id is empty".into()));
        }
        if e.batch_size == 0 {
            return Err(Error::Config("embedding.batch_size must be >= 1".into()));
        }
        if e.max_attempts == 0 {
            return Err(Error::Config("embedding.max_attempts must be >= 1".into()));
        }
        if e.concurrency == 0 {
            return Err(Error::Config("embedding.concurrency must be >= 1".into()));
        }
        if e.rate_limit_multiplier < 1.0 {
            return Err(Error::Config(
                "embedding.rate_limit_multiplier must be >= 1.0".into(),
            ));
        }
        if e.dimensions == Some(0) {
            return Err(Error::Config("embedding.dimensions must be > 0".into()));
        }
        Ok(())
    }
}
