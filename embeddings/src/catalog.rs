//! Catalog of known embedding models.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{EmbeddingError, Result};
use crate::provider::BackendSet;

/// Model used when neither the request nor the configuration names one.
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Which backend turns text into vectors for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Encoder running inside this process.
    LocalEncoder,
    /// Remote embedding-capable model endpoint.
    RemoteEmbedder,
}

/// A known embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model identifier.
    pub id: String,

    /// Length of the vectors the model produces.
    pub dimension: usize,

    /// Maximum number of input tokens the model considers.
    pub max_input_length: usize,

    /// Backend serving the model.
    pub backend: BackendKind,

    /// Whether the backend has initialized the model.
    #[serde(default)]
    pub is_loaded: bool,

    /// How long the last successful load took.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_time_ms: Option<u64>,
}

impl ModelDescriptor {
    /// Create a descriptor that has not been loaded yet.
    pub fn new(
        id: impl Into<String>,
        dimension: usize,
        max_input_length: usize,
        backend: BackendKind,
    ) -> Self {
        Self {
            id: id.into(),
            dimension,
            max_input_length,
            backend,
            is_loaded: false,
            load_time_ms: None,
        }
    }
}

/// Registry of model descriptors and their load state.
pub struct ModelCatalog {
    models: RwLock<BTreeMap<String, ModelDescriptor>>,
    backends: BackendSet,
    default_model: String,
}

impl ModelCatalog {
    /// Create a catalog holding the built-in models plus `extra`.
    ///
    /// Extra descriptors replace built-in ones with the same id.
    pub fn new(
        backends: BackendSet,
        default_model: impl Into<String>,
        extra: impl IntoIterator<Item = ModelDescriptor>,
    ) -> Self {
        let mut models = BTreeMap::new();
        for descriptor in Self::builtin_models().into_iter().chain(extra) {
            models.insert(
                descriptor.id.clone(),
                ModelDescriptor {
                    is_loaded: false,
                    load_time_ms: None,
                    ..descriptor
                },
            );
        }

        Self {
            models: RwLock::new(models),
            backends,
            default_model: default_model.into(),
        }
    }

    /// Descriptors compiled into the catalog.
    pub fn builtin_models() -> Vec<ModelDescriptor> {
        vec![
            ModelDescriptor::new(DEFAULT_MODEL, 384, 256, BackendKind::LocalEncoder),
            ModelDescriptor::new("all-mpnet-base-v2", 768, 384, BackendKind::LocalEncoder),
            ModelDescriptor::new("nomic-embed-text", 768, 8192, BackendKind::RemoteEmbedder),
            ModelDescriptor::new("mxbai-embed-large", 1024, 512, BackendKind::RemoteEmbedder),
        ]
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    /// Look up a descriptor.
    pub async fn get(&self, model_id: &str) -> Result<ModelDescriptor> {
        self.models
            .read()
            .await
            .get(model_id)
            .cloned()
            .ok_or_else(|| EmbeddingError::UnknownModel(model_id.to_string()))
    }

    /// Add or replace a descriptor. It starts out unloaded.
    pub async fn register(&self, descriptor: ModelDescriptor) {
        info!(
            "Registered model {} ({} dimensions, {:?})",
            descriptor.id, descriptor.dimension, descriptor.backend
        );
        self.models.write().await.insert(
            descriptor.id.clone(),
            ModelDescriptor {
                is_loaded: false,
                load_time_ms: None,
                ..descriptor
            },
        );
    }

    /// All descriptors, reachable or not.
    pub async fn list(&self) -> Vec<ModelDescriptor> {
        self.models.read().await.values().cloned().collect()
    }

    /// Descriptors whose backend is currently reachable.
    pub async fn list_available(&self) -> Vec<ModelDescriptor> {
        let mut available = Vec::new();
        for descriptor in self.list().await {
            let backend = self.backends.get(descriptor.backend);
            if backend.is_available(&descriptor).await {
                available.push(descriptor);
            } else {
                debug!("Model {} is not reachable", descriptor.id);
            }
        }
        available
    }

    /// Initialize a model's backend.
    ///
    /// Returns `Ok(false)` when the backend is unreachable so the caller can
    /// fall back to another model.
    pub async fn load(&self, model_id: &str) -> Result<bool> {
        let descriptor = self.get(model_id).await?;
        if descriptor.is_loaded {
            return Ok(true);
        }

        let started = Instant::now();
        let backend = self.backends.get(descriptor.backend);
        if let Err(err) = backend.load(&descriptor).await {
            warn!("Failed to load model {model_id}: {err}");
            return Ok(false);
        }
        let elapsed = started.elapsed();

        if let Some(entry) = self.models.write().await.get_mut(model_id) {
            entry.is_loaded = true;
            entry.load_time_ms = Some(elapsed.as_millis() as u64);
        }

        info!("Loaded model {model_id} in {}ms", elapsed.as_millis());
        Ok(true)
    }

    /// Release a model's backend resources.
    pub async fn unload(&self, model_id: &str) -> Result<bool> {
        let descriptor = self.get(model_id).await?;
        if !descriptor.is_loaded {
            return Ok(false);
        }

        self.backends.get(descriptor.backend).unload(model_id).await;

        if let Some(entry) = self.models.write().await.get_mut(model_id) {
            entry.is_loaded = false;
        }

        info!("Unloaded model {model_id}");
        Ok(true)
    }
}
