//! Cached, batched embedding generation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Embedding;
use crate::cache::EmbeddingCache;
use crate::catalog::{ModelCatalog, ModelDescriptor};
use crate::error::{EmbeddingError, Result};
use crate::similarity::normalize;

/// Default number of texts per backend call.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Request for generating embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Texts to embed, in the order results are wanted.
    pub texts: Vec<String>,

    /// Model to use; the catalog default when absent.
    #[serde(default)]
    pub model_id: Option<String>,

    /// Scale every vector to unit length.
    #[serde(default = "default_normalize")]
    pub normalize: bool,

    /// Texts per backend call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_normalize() -> bool {
    true
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl EmbeddingRequest {
    /// Create a new embedding request.
    pub fn new<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            texts: texts.into_iter().map(Into::into).collect(),
            model_id: None,
            normalize: true,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_id = Some(model.into());
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Outcome of an embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResult {
    /// One vector per request text, in request order.
    pub embeddings: Vec<Embedding>,

    /// Model used to generate the embeddings.
    pub model_id: String,

    pub dimension: usize,

    /// Wall time spent on the request.
    pub elapsed: Duration,

    /// Whitespace-delimited tokens across all inputs.
    pub token_count: usize,

    /// How many texts were answered from the cache.
    pub cache_hits: usize,

    /// Positions that failed to embed and hold zero vectors.
    pub degraded: Vec<usize>,
}

/// Orchestrates model resolution, caching, batching and normalization.
pub struct EmbeddingGenerator {
    catalog: Arc<ModelCatalog>,
    cache: Arc<EmbeddingCache>,
}

impl EmbeddingGenerator {
    pub fn new(catalog: Arc<ModelCatalog>, cache: Arc<EmbeddingCache>) -> Self {
        Self { catalog, cache }
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    /// Resolve a model id (or the default) and make sure it is loaded.
    pub async fn resolve_model(&self, model_id: Option<&str>) -> Result<ModelDescriptor> {
        let model_id = model_id.unwrap_or_else(|| self.catalog.default_model());
        let descriptor = self.catalog.get(model_id).await?;
        if descriptor.is_loaded {
            return Ok(descriptor);
        }

        if !self.catalog.load(model_id).await? {
            return Err(EmbeddingError::ModelUnavailable(model_id.to_string()));
        }
        self.catalog.get(model_id).await
    }

    /// Generate embeddings for a request.
    ///
    /// Results are aligned with `request.texts`. Cache writes happen only
    /// once every backend call has succeeded, so a failed request leaves the
    /// cache as it found it.
    pub async fn generate(&self, request: EmbeddingRequest) -> Result<EmbeddingResult> {
        let started = Instant::now();
        let model = self.resolve_model(request.model_id.as_deref()).await?;
        let batch_size = request.batch_size.max(1);

        let mut embeddings: Vec<Option<Embedding>> = vec![None; request.texts.len()];
        let mut cache_hits = 0;

        // Distinct missing texts, and which request positions wait on each.
        let mut misses: Vec<&str> = Vec::new();
        let mut waiting: HashMap<&str, Vec<usize>> = HashMap::new();

        for (position, text) in request.texts.iter().enumerate() {
            let text = text.as_str();
            if let Some(positions) = waiting.get_mut(text) {
                positions.push(position);
                cache_hits += 1;
                continue;
            }

            match self.cache.get_valid(&model.id, text, model.dimension).await {
                Some(vector) => {
                    embeddings[position] = Some(vector);
                    cache_hits += 1;
                }
                None => {
                    misses.push(text);
                    waiting.insert(text, vec![position]);
                }
            }
        }

        debug!(
            "Embedding {} texts with {}: {cache_hits} cached, {} to generate",
            request.texts.len(),
            model.id,
            misses.len()
        );

        let backend = self.catalog.backends().get(model.backend);
        let mut generated: Vec<Embedding> = Vec::with_capacity(misses.len());
        let mut failed: Vec<bool> = Vec::with_capacity(misses.len());

        for batch in misses.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|t| String::from(*t)).collect();
            let output = backend.embed(&texts, &model).await?;

            if output.vectors.len() != texts.len() {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "backend returned {} vectors for {} texts",
                    output.vectors.len(),
                    texts.len()
                )));
            }
            if let Some(bad) = output.vectors.iter().find(|v| v.len() != model.dimension) {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: model.dimension,
                    actual: bad.len(),
                });
            }

            let offset = failed.len();
            failed.resize(offset + texts.len(), false);
            for position in output.degraded {
                if let Some(flag) = failed.get_mut(offset + position) {
                    *flag = true;
                }
            }
            generated.extend(output.vectors);
        }

        let mut degraded = Vec::new();
        for ((text, vector), failed) in misses.iter().zip(generated).zip(failed) {
            if failed {
                degraded.extend(waiting.get(text).into_iter().flatten().copied());
            } else {
                self.cache.put(&model.id, text, vector.clone()).await;
            }
            for &position in waiting.get(text).into_iter().flatten() {
                embeddings[position] = Some(vector.clone());
            }
        }
        degraded.sort_unstable();

        let mut embeddings: Vec<Embedding> = embeddings
            .into_iter()
            .map(|v| v.unwrap_or_else(|| vec![0.0; model.dimension]))
            .collect();

        if request.normalize {
            for vector in &mut embeddings {
                normalize(vector);
            }
        }

        let token_count = request
            .texts
            .iter()
            .map(|t| t.split_whitespace().count())
            .sum();

        Ok(EmbeddingResult {
            embeddings,
            model_id: model.id,
            dimension: model.dimension,
            elapsed: started.elapsed(),
            token_count,
            cache_hits,
            degraded,
        })
    }
}
