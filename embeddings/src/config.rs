//! Configuration for the embeddings service.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::ModelDescriptor;
use crate::error::{EmbeddingError, Result};

/// Environment variable consulted when `remote.api_key` is not set.
pub const API_KEY_ENV: &str = "STRATA_EMBEDDINGS_API_KEY";

/// Configuration for the embeddings service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    /// Model used when a request names none.
    pub default_model: String,

    /// Default number of texts sent to a backend per call.
    pub batch_size: usize,

    /// Embedding cache configuration.
    pub cache: CacheConfig,

    /// Remote embedding endpoint configuration.
    pub remote: RemoteConfig,

    /// Similarity index configuration.
    pub index: IndexConfig,

    /// Additional model descriptors registered at startup.
    pub models: Vec<ModelDescriptor>,
}

impl EmbeddingsConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Set the default model.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Set the similarity backend preference.
    pub fn with_index_backend(mut self, backend: IndexPreference) -> Self {
        self.index.backend = backend;
        self
    }

    /// Register an extra model descriptor.
    pub fn with_model(mut self, descriptor: ModelDescriptor) -> Self {
        self.models.push(descriptor);
        self
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.default_model.trim().is_empty() {
            return Err(EmbeddingError::Config("default_model is empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(EmbeddingError::Config("batch_size must be at least 1".to_string()));
        }
        if self.cache.max_entries == 0 || self.cache.shards == 0 {
            return Err(EmbeddingError::Config(
                "cache.max_entries and cache.shards must be at least 1".to_string(),
            ));
        }
        if self.remote.timeout_secs == 0 {
            return Err(EmbeddingError::Config(
                "remote.timeout_secs must be at least 1".to_string(),
            ));
        }
        for model in &self.models {
            if model.dimension == 0 {
                return Err(EmbeddingError::Config(format!(
                    "model {} has dimension 0",
                    model.id
                )));
            }
        }
        Ok(())
    }
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            default_model: crate::catalog::DEFAULT_MODEL.to_string(),
            batch_size: 32,
            cache: CacheConfig::default(),
            remote: RemoteConfig::default(),
            index: IndexConfig::default(),
            models: Vec::new(),
        }
    }
}

/// Configuration for the embedding cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached vectors across all shards.
    pub max_entries: usize,

    /// Number of independently locked shards.
    pub shards: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            shards: 16,
        }
    }
}

/// Configuration for the remote embedding endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of an OpenAI-compatible API (without `/embeddings`).
    pub base_url: String,

    /// Bearer token, if the endpoint needs one.
    pub api_key: Option<String>,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// API key from config, falling back to the environment.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Configuration for similarity indexes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Which similarity backend collections use.
    pub backend: IndexPreference,
}

/// Preferred similarity backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexPreference {
    /// Optimized index when compiled in, brute force otherwise.
    #[default]
    Auto,
    /// Optimized index; falls back to brute force when not compiled in.
    Optimized,
    /// Always the linear scan.
    BruteForce,
}
