//! Named collections of similarity indexes.
//!
//! The registry map and each collection have their own locks: creating or
//! deleting a collection briefly locks the map, while adds and searches only
//! lock the collection they touch.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::index::{IndexBackendKind, SimilarityIndex};
use crate::similarity::SimilarityResult;

/// Snapshot of one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub name: String,
    pub count: usize,
    pub dimension: usize,
    pub backend: IndexBackendKind,

    /// Model the collection was populated with, if any.
    pub model_id: Option<String>,
}

struct CollectionState {
    index: SimilarityIndex,
    model_id: Option<String>,
}

/// A named, dimension-fixed similarity index.
pub struct Collection {
    name: String,
    dimension: usize,
    state: RwLock<CollectionState>,
}

impl Collection {
    fn new(name: String, dimension: usize, backend: IndexBackendKind) -> Self {
        Self {
            name,
            dimension,
            state: RwLock::new(CollectionState {
                index: SimilarityIndex::new(dimension, backend),
                model_id: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Model recorded by the first generated add.
    pub async fn model_id(&self) -> Option<String> {
        self.state.read().await.model_id.clone()
    }

    /// Fail when the collection is bound to a model other than `model_id`.
    pub async fn check_model(&self, model_id: &str) -> Result<()> {
        let state = self.state.read().await;
        Self::ensure_model(&self.name, state.model_id.as_deref(), model_id)
    }

    fn ensure_model(collection: &str, bound: Option<&str>, requested: &str) -> Result<()> {
        match bound {
            Some(bound) if bound != requested => {
                warn!("Rejecting model {requested} for collection {collection} bound to {bound}");
                Err(EmbeddingError::ModelMismatch {
                    collection: collection.to_string(),
                    bound: bound.to_string(),
                    requested: requested.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Append vectors produced elsewhere.
    ///
    /// With `model_id` set, the collection is bound to that model once it
    /// holds at least one vector, and the add fails if it is already bound to
    /// another one.
    pub async fn add(
        &self,
        texts: Vec<String>,
        vectors: Vec<Embedding>,
        metadata: Option<Vec<serde_json::Value>>,
        model_id: Option<&str>,
    ) -> Result<usize> {
        let mut state = self.state.write().await;
        if let Some(model_id) = model_id {
            Self::ensure_model(&self.name, state.model_id.as_deref(), model_id)?;
        }

        let added = state.index.add(texts, vectors, metadata)?;

        let bind = state.model_id.is_none() && added > 0;
        if let (Some(model_id), true) = (model_id, bind) {
            info!("Collection {} bound to model {model_id}", self.name);
            state.model_id = Some(model_id.to_string());
        }
        Ok(added)
    }

    pub async fn search(
        &self,
        query: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<SimilarityResult>> {
        self.state.read().await.index.search(query, k, threshold)
    }

    pub async fn stats(&self) -> CollectionStats {
        let state = self.state.read().await;
        let index = state.index.stats();
        CollectionStats {
            name: self.name.clone(),
            count: index.count,
            dimension: index.dimension,
            backend: index.backend,
            model_id: state.model_id.clone(),
        }
    }
}

/// Map of collection names to collections.
pub struct CollectionRegistry {
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    backend: IndexBackendKind,
}

impl CollectionRegistry {
    /// Create a registry whose collections use `backend`.
    pub fn new(backend: IndexBackendKind) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            backend,
        }
    }

    pub fn backend(&self) -> IndexBackendKind {
        self.backend
    }

    /// Create an empty collection.
    pub async fn create(&self, name: &str, dimension: usize) -> Result<Arc<Collection>> {
        if name.is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "collection name is empty".to_string(),
            ));
        }
        if dimension == 0 {
            return Err(EmbeddingError::InvalidInput(
                "collection dimension must be at least 1".to_string(),
            ));
        }

        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Err(EmbeddingError::CollectionExists(name.to_string()));
        }

        let collection = Arc::new(Collection::new(name.to_string(), dimension, self.backend));
        collections.insert(name.to_string(), Arc::clone(&collection));
        info!("Created collection {name} (dimension {dimension})");
        Ok(collection)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.read().await.get(name).cloned()
    }

    /// Remove a collection. Returns `false` when it did not exist.
    pub async fn delete(&self, name: &str) -> bool {
        let removed = self.collections.write().await.remove(name).is_some();
        if removed {
            info!("Deleted collection {name}");
        }
        removed
    }

    /// Collection names in sorted order.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stats for every collection.
    pub async fn stats(&self) -> BTreeMap<String, CollectionStats> {
        // Snapshot the map first so no collection lock is taken under it.
        let collections: Vec<Arc<Collection>> =
            self.collections.read().await.values().cloned().collect();

        let mut stats = BTreeMap::new();
        for collection in collections {
            stats.insert(collection.name.clone(), collection.stats().await);
        }
        stats
    }
}
