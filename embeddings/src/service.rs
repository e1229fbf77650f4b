//! The embeddings service: the single entry point for callers.
//!
//! One [`EmbeddingsService`] owns the model catalog, the embedding cache and
//! the collection registry. Construct it once and share it behind an `Arc`;
//! every operation takes `&self`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Embedding;
use crate::cache::{CacheStats, EmbeddingCache};
use crate::catalog::{ModelCatalog, ModelDescriptor};
use crate::config::EmbeddingsConfig;
use crate::error::{EmbeddingError, Result};
use crate::generator::{EmbeddingGenerator, EmbeddingRequest, EmbeddingResult};
use crate::index::IndexBackendKind;
use crate::provider::BackendSet;
use crate::registry::{Collection, CollectionRegistry, CollectionStats};
use crate::similarity::SimilarityResult;

/// Default number of search results.
pub const DEFAULT_TOP_K: usize = 5;

/// Arguments for [`EmbeddingsService::add_to_collection`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddRequest {
    pub texts: Vec<String>,

    /// Precomputed vectors; generated from `texts` when absent.
    #[serde(default)]
    pub vectors: Option<Vec<Embedding>>,

    /// One metadata value per text.
    #[serde(default)]
    pub metadata: Option<Vec<serde_json::Value>>,

    #[serde(default)]
    pub model_id: Option<String>,
}

impl AddRequest {
    pub fn new<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            texts: texts.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_vectors(mut self, vectors: Vec<Embedding>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    pub fn with_metadata(mut self, metadata: Vec<serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_id = Some(model.into());
        self
    }
}

/// Arguments for [`EmbeddingsService::search_collection`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query_text: String,

    #[serde(default = "default_top_k")]
    pub k: usize,

    #[serde(default)]
    pub threshold: f32,

    #[serde(default)]
    pub model_id: Option<String>,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl SearchRequest {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            k: DEFAULT_TOP_K,
            threshold: 0.0,
            model_id: None,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_id = Some(model.into());
        self
    }
}

/// Aggregate statistics over every collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub collections: BTreeMap<String, CollectionStats>,
    pub total_vectors: usize,
    pub index_backend: IndexBackendKind,
    pub cache: CacheStats,
}

/// Embedding generation plus named similarity collections.
pub struct EmbeddingsService {
    config: EmbeddingsConfig,
    generator: EmbeddingGenerator,
    registry: CollectionRegistry,
}

impl EmbeddingsService {
    /// Build a service with the local encoder and the configured remote endpoint.
    pub fn new(config: EmbeddingsConfig) -> Result<Self> {
        let backends = BackendSet::from_config(&config.remote)?;
        Self::with_backends(config, backends)
    }

    /// Build a service around caller-provided backends.
    pub fn with_backends(config: EmbeddingsConfig, backends: BackendSet) -> Result<Self> {
        config.validate()?;

        let known = ModelCatalog::builtin_models()
            .iter()
            .chain(&config.models)
            .any(|m| m.id == config.default_model);
        if !known {
            return Err(EmbeddingError::UnknownModel(config.default_model.clone()));
        }

        let catalog = ModelCatalog::new(
            backends,
            config.default_model.clone(),
            config.models.clone(),
        );
        let cache = EmbeddingCache::from_config(&config.cache);
        let backend = IndexBackendKind::select(config.index.backend);

        info!(
            "Embeddings service ready: default model {}, {:?} index, cache of {} entries",
            config.default_model, backend, config.cache.max_entries
        );

        Ok(Self {
            generator: EmbeddingGenerator::new(Arc::new(catalog), Arc::new(cache)),
            registry: CollectionRegistry::new(backend),
            config,
        })
    }

    pub fn config(&self) -> &EmbeddingsConfig {
        &self.config
    }

    pub fn generator(&self) -> &EmbeddingGenerator {
        &self.generator
    }

    /// Generate embeddings for arbitrary texts.
    pub async fn generate_embeddings(&self, request: EmbeddingRequest) -> Result<EmbeddingResult> {
        self.generator.generate(request).await
    }

    /// Models whose backend is currently reachable.
    pub async fn list_models(&self) -> Vec<ModelDescriptor> {
        self.generator.catalog().list_available().await
    }

    pub async fn load_model(&self, model_id: &str) -> Result<bool> {
        self.generator.catalog().load(model_id).await
    }

    pub async fn unload_model(&self, model_id: &str) -> Result<bool> {
        self.generator.catalog().unload(model_id).await
    }

    /// Create a collection; its dimension defaults to the default model's.
    pub async fn create_collection(
        &self,
        name: &str,
        dimension: Option<usize>,
    ) -> Result<CollectionStats> {
        let dimension = match dimension {
            Some(dimension) => dimension,
            None => {
                self.generator
                    .catalog()
                    .get(&self.config.default_model)
                    .await?
                    .dimension
            }
        };

        let collection = self.registry.create(name, dimension).await?;
        Ok(collection.stats().await)
    }

    /// Pick the model for a collection operation: explicit, then bound, then default.
    async fn model_for(&self, collection: &Collection, requested: Option<&str>) -> String {
        match requested {
            Some(model_id) => model_id.to_string(),
            None => collection
                .model_id()
                .await
                .unwrap_or_else(|| self.config.default_model.clone()),
        }
    }

    /// Append texts to a collection.
    ///
    /// Returns `Ok(None)` when the collection does not exist. Without
    /// `vectors` the texts are embedded first; nothing is stored unless the
    /// whole batch is valid.
    pub async fn add_to_collection(&self, name: &str, request: AddRequest) -> Result<Option<usize>> {
        let Some(collection) = self.registry.get(name).await else {
            debug!("Add to unknown collection {name}");
            return Ok(None);
        };

        let AddRequest {
            texts,
            vectors,
            metadata,
            model_id,
        } = request;

        let added = match vectors {
            Some(vectors) => {
                if let Some(model_id) = model_id.as_deref() {
                    self.generator.catalog().get(model_id).await?;
                }
                collection
                    .add(texts, vectors, metadata, model_id.as_deref())
                    .await?
            }
            None => {
                let model_id = self.model_for(&collection, model_id.as_deref()).await;
                collection.check_model(&model_id).await?;

                let result = self
                    .generator
                    .generate(
                        EmbeddingRequest::new(texts.iter().cloned())
                            .with_model(model_id)
                            .with_batch_size(self.config.batch_size),
                    )
                    .await?;

                collection
                    .add(texts, result.embeddings, metadata, Some(&result.model_id))
                    .await?
            }
        };

        Ok(Some(added))
    }

    /// Search a collection with a text query.
    ///
    /// Unknown collections yield no results.
    pub async fn search_collection(
        &self,
        name: &str,
        request: SearchRequest,
    ) -> Result<Vec<SimilarityResult>> {
        let Some(collection) = self.registry.get(name).await else {
            debug!("Search in unknown collection {name}");
            return Ok(Vec::new());
        };

        let model_id = self
            .model_for(&collection, request.model_id.as_deref())
            .await;
        collection.check_model(&model_id).await?;

        let result = self
            .generator
            .generate(
                EmbeddingRequest::new([request.query_text])
                    .with_model(model_id)
                    .with_batch_size(self.config.batch_size),
            )
            .await?;
        let query = result.embeddings.into_iter().next().ok_or_else(|| {
            EmbeddingError::InvalidResponse("no embedding for query".to_string())
        })?;

        collection.search(&query, request.k, request.threshold).await
    }

    /// Search a collection with a precomputed query vector.
    pub async fn search_collection_by_vector(
        &self,
        name: &str,
        query: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<SimilarityResult>> {
        match self.registry.get(name).await {
            Some(collection) => collection.search(query, k, threshold).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn collection_stats(&self, name: &str) -> Option<CollectionStats> {
        match self.registry.get(name).await {
            Some(collection) => Some(collection.stats().await),
            None => None,
        }
    }

    pub async fn all_collection_stats(&self) -> ServiceStats {
        let collections = self.registry.stats().await;
        ServiceStats {
            total_vectors: collections.values().map(|s| s.count).sum(),
            collections,
            index_backend: self.registry.backend(),
            cache: self.generator.cache().stats().await,
        }
    }

    /// Delete a collection. Unknown names return `false`.
    pub async fn delete_collection(&self, name: &str) -> bool {
        self.registry.delete(name).await
    }

    pub async fn list_collections(&self) -> Vec<String> {
        self.registry.names().await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.generator.cache().stats().await
    }

    pub async fn clear_cache(&self) {
        self.generator.cache().clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::BackendKind;
    use crate::config::RemoteConfig;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn service() -> EmbeddingsService {
        let config = EmbeddingsConfig {
            remote: RemoteConfig {
                base_url: "http://127.0.0.1:9/v1".to_string(),
                api_key: None,
                timeout_secs: 1,
            },
            ..EmbeddingsConfig::default()
        }
        .with_model(ModelDescriptor::new("mini", 16, 64, BackendKind::LocalEncoder))
        .with_model(ModelDescriptor::new("other", 16, 64, BackendKind::LocalEncoder))
        .with_default_model("mini");
        EmbeddingsService::new(config).unwrap()
    }

    #[test]
    fn test_unknown_default_model_is_rejected() {
        let config = EmbeddingsConfig::default().with_default_model("does-not-exist");
        let result = EmbeddingsService::new(config);
        assert!(matches!(result, Err(EmbeddingError::UnknownModel(_))));
    }

    #[tokio::test]
    async fn test_create_collection_defaults_dimension() {
        let service = service();
        let stats = service.create_collection("docs", None).await.unwrap();
        assert_eq!(stats.dimension, 16);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.model_id, None);

        let again = service.create_collection("docs", Some(8)).await;
        assert!(matches!(again, Err(EmbeddingError::CollectionExists(_))));
    }

    #[tokio::test]
    async fn test_add_and_search_text() {
        let service = service();
        service.create_collection("docs", None).await.unwrap();

        let added = service
            .add_to_collection(
                "docs",
                AddRequest::new(["rust borrow checker", "banana bread recipe"])
                    .with_metadata(vec![json!({"id": 1}), json!({"id": 2})]),
            )
            .await
            .unwrap();
        assert_eq!(added, Some(2));

        let results = service
            .search_collection("docs", SearchRequest::new("rust borrow checker").with_k(1))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "rust borrow checker");
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[0].metadata, Some(json!({"id": 1})));
        assert!((results[0].score - 1.0).abs() < 1e-5);

        let stats = service.collection_stats("docs").await.unwrap();
        assert_eq!(stats.model_id.as_deref(), Some("mini"));
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let service = service();
        assert_eq!(
            service
                .add_to_collection("missing", AddRequest::new(["x"]))
                .await
                .unwrap(),
            None
        );
        assert!(
            service
                .search_collection("missing", SearchRequest::new("x"))
                .await
                .unwrap()
                .is_empty()
        );
        assert!(service.collection_stats("missing").await.is_none());
        assert!(!service.delete_collection("missing").await);
    }

    #[tokio::test]
    async fn test_model_mismatch_is_rejected() {
        let service = service();
        service.create_collection("docs", None).await.unwrap();
        service
            .add_to_collection("docs", AddRequest::new(["first"]))
            .await
            .unwrap();

        let add = service
            .add_to_collection("docs", AddRequest::new(["second"]).with_model("other"))
            .await;
        assert!(matches!(add, Err(EmbeddingError::ModelMismatch { .. })));

        let search = service
            .search_collection("docs", SearchRequest::new("first").with_model("other"))
            .await;
        assert!(matches!(search, Err(EmbeddingError::ModelMismatch { .. })));
        assert_eq!(service.collection_stats("docs").await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_add_precomputed_vectors() {
        let service = service();
        service.create_collection("raw", Some(2)).await.unwrap();

        let added = service
            .add_to_collection(
                "raw",
                AddRequest::new(["x", "y"]).with_vectors(vec![vec![1.0, 0.0], vec![0.0, 3.0]]),
            )
            .await
            .unwrap();
        assert_eq!(added, Some(2));

        let results = service
            .search_collection_by_vector("raw", &[0.0, 1.0], 5, 0.5)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "y");
        assert_eq!(results[0].vector, vec![0.0, 1.0]);

        let wrong = service
            .add_to_collection("raw", AddRequest::new(["z"]).with_vectors(vec![vec![1.0]]))
            .await;
        assert!(matches!(wrong, Err(EmbeddingError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_precomputed_vectors_with_unknown_model_are_rejected() {
        let service = service();
        service.create_collection("raw", Some(2)).await.unwrap();

        let result = service
            .add_to_collection(
                "raw",
                AddRequest::new(["x"])
                    .with_vectors(vec![vec![1.0, 0.0]])
                    .with_model("no-such-model"),
            )
            .await;
        assert!(matches!(result, Err(EmbeddingError::UnknownModel(id)) if id == "no-such-model"));

        let stats = service.collection_stats("raw").await.unwrap();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.model_id, None);
    }

    #[tokio::test]
    async fn test_empty_add_leaves_collection_unbound() {
        let service = service();
        service.create_collection("docs", None).await.unwrap();

        let added = service
            .add_to_collection("docs", AddRequest::new(Vec::<String>::new()).with_model("other"))
            .await
            .unwrap();
        assert_eq!(added, Some(0));
        assert_eq!(service.collection_stats("docs").await.unwrap().model_id, None);

        service
            .add_to_collection("docs", AddRequest::new(["first"]))
            .await
            .unwrap();
        assert_eq!(
            service.collection_stats("docs").await.unwrap().model_id.as_deref(),
            Some("mini")
        );
    }

    #[tokio::test]
    async fn test_all_collection_stats() {
        let service = service();
        service.create_collection("a", Some(2)).await.unwrap();
        service.create_collection("b", None).await.unwrap();
        service
            .add_to_collection("a", AddRequest::new(["x"]).with_vectors(vec![vec![1.0, 1.0]]))
            .await
            .unwrap();
        service
            .add_to_collection("b", AddRequest::new(["one", "two"]))
            .await
            .unwrap();

        let stats = service.all_collection_stats().await;
        assert_eq!(stats.total_vectors, 3);
        assert_eq!(stats.collections.len(), 2);
        assert_eq!(stats.cache.entries, 2);
        assert_eq!(service.list_collections().await, vec!["a", "b"]);

        service.clear_cache().await;
        assert_eq!(service.cache_stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_list_and_load_models() {
        let service = service();
        let ids: Vec<String> = service.list_models().await.into_iter().map(|m| m.id).collect();
        assert!(ids.contains(&"mini".to_string()));
        assert!(!ids.contains(&"nomic-embed-text".to_string()));

        assert!(service.load_model("mini").await.unwrap());
        assert!(service.unload_model("mini").await.unwrap());
        assert!(!service.unload_model("mini").await.unwrap());
        assert!(!service.load_model("nomic-embed-text").await.unwrap());
        assert!(service.load_model("nope").await.is_err());
    }
}
