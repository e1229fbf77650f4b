//! Similarity index for fast embedding lookups.
//!
//! A [`SimilarityIndex`] keeps texts and metadata in insertion order and
//! delegates vector storage and scoring to a [`SimilarityBackend`]. Two
//! backends exist and must rank identically:
//!
//! - [`OptimizedIndex`]: one contiguous row-major matrix, scored with a single
//!   matrix-vector product (requires the `optimized-index` feature).
//! - [`BruteForceIndex`]: a plain linear scan of dot products.
//!
//! Stored vectors are unit length, so the inner product is the cosine
//! similarity.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::Embedding;
use crate::config::IndexPreference;
use crate::error::{EmbeddingError, Result};
use crate::similarity::{SimilarityResult, normalize, normalized, rank_top_k};

/// Which similarity backend an index runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackendKind {
    Optimized,
    BruteForce,
}

impl IndexBackendKind {
    /// Resolve a preference against what this build provides.
    pub fn select(preference: IndexPreference) -> Self {
        match preference {
            IndexPreference::BruteForce => Self::BruteForce,
            IndexPreference::Auto | IndexPreference::Optimized => {
                if cfg!(feature = "optimized-index") {
                    Self::Optimized
                } else {
                    if preference == IndexPreference::Optimized {
                        warn!("Optimized index not compiled in, using brute-force scan");
                    }
                    Self::BruteForce
                }
            }
        }
    }

    /// Create an empty backend of this kind.
    pub fn build(self, dimension: usize) -> Box<dyn SimilarityBackend> {
        match self {
            Self::BruteForce => Box::new(BruteForceIndex::new(dimension)),
            #[cfg(feature = "optimized-index")]
            Self::Optimized => Box::new(OptimizedIndex::new(dimension)),
            #[cfg(not(feature = "optimized-index"))]
            Self::Optimized => Box::new(BruteForceIndex::new(dimension)),
        }
    }
}

/// Vector storage and scoring strategy.
pub trait SimilarityBackend: Send + Sync {
    fn kind(&self) -> IndexBackendKind;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append vectors. Callers validate dimensions beforehand.
    fn insert(&mut self, vectors: &[Embedding]) -> Result<()>;

    /// Copy of the vector stored at `position`.
    fn vector(&self, position: usize) -> Option<Embedding>;

    /// Inner product of `query` with every stored vector, in insertion order.
    fn scores(&self, query: &[f32]) -> Vec<f32>;
}

/// Linear scan over stored vectors.
pub struct BruteForceIndex {
    dimension: usize,
    vectors: Vec<Embedding>,
}

impl BruteForceIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }
}

impl SimilarityBackend for BruteForceIndex {
    fn kind(&self) -> IndexBackendKind {
        IndexBackendKind::BruteForce
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn insert(&mut self, vectors: &[Embedding]) -> Result<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        self.vectors.extend_from_slice(vectors);
        Ok(())
    }

    fn vector(&self, position: usize) -> Option<Embedding> {
        self.vectors.get(position).cloned()
    }

    fn scores(&self, query: &[f32]) -> Vec<f32> {
        self.vectors
            .iter()
            .map(|v| v.iter().zip(query).map(|(a, b)| a * b).sum())
            .collect()
    }
}

/// Contiguous matrix of stored vectors.
#[cfg(feature = "optimized-index")]
pub struct OptimizedIndex {
    dimension: usize,
    matrix: ndarray::Array2<f32>,
}

#[cfg(feature = "optimized-index")]
impl OptimizedIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            matrix: ndarray::Array2::zeros((0, dimension)),
        }
    }
}

#[cfg(feature = "optimized-index")]
impl SimilarityBackend for OptimizedIndex {
    fn kind(&self) -> IndexBackendKind {
        IndexBackendKind::Optimized
    }

    fn len(&self) -> usize {
        self.matrix.nrows()
    }

    fn insert(&mut self, vectors: &[Embedding]) -> Result<()> {
        let flat: Vec<f32> = vectors.iter().flatten().copied().collect();
        let rows = ndarray::Array2::from_shape_vec((vectors.len(), self.dimension), flat)
            .map_err(|e| EmbeddingError::Index(e.to_string()))?;
        self.matrix
            .append(ndarray::Axis(0), rows.view())
            .map_err(|e| EmbeddingError::Index(e.to_string()))
    }

    fn vector(&self, position: usize) -> Option<Embedding> {
        (position < self.matrix.nrows()).then(|| self.matrix.row(position).to_vec())
    }

    fn scores(&self, query: &[f32]) -> Vec<f32> {
        self.matrix.dot(&ndarray::ArrayView1::from(query)).to_vec()
    }
}

/// Text and metadata stored alongside a vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub text: String,

    /// Associated metadata.
    pub metadata: Option<serde_json::Value>,
}

/// Lifecycle of an index. There is no way back to `Empty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Empty,
    Populated,
}

/// Snapshot of an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub count: usize,
    pub dimension: usize,
    pub backend: IndexBackendKind,
}

/// A similarity index over normalized vectors of one fixed dimension.
pub struct SimilarityIndex {
    /// Expected dimension of embeddings.
    dimension: usize,

    /// Stored entries, parallel to the backend's vectors.
    entries: Vec<IndexEntry>,

    backend: Box<dyn SimilarityBackend>,
}

impl SimilarityIndex {
    /// Create a new similarity index.
    pub fn new(dimension: usize, kind: IndexBackendKind) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
            backend: kind.build(dimension),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Get the number of entries in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state(&self) -> IndexState {
        if self.entries.is_empty() {
            IndexState::Empty
        } else {
            IndexState::Populated
        }
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            count: self.entries.len(),
            dimension: self.dimension,
            backend: self.backend.kind(),
        }
    }

    /// Add a batch of texts with their vectors.
    ///
    /// Either the whole batch is stored or, on any error, nothing is.
    pub fn add(
        &mut self,
        texts: Vec<String>,
        vectors: Vec<Embedding>,
        metadata: Option<Vec<serde_json::Value>>,
    ) -> Result<usize> {
        if texts.len() != vectors.len() {
            return Err(EmbeddingError::InvalidInput(format!(
                "{} texts but {} vectors",
                texts.len(),
                vectors.len()
            )));
        }
        if let Some(metadata) = metadata.as_ref().filter(|m| m.len() != texts.len()) {
            return Err(EmbeddingError::InvalidInput(format!(
                "{} texts but {} metadata entries",
                texts.len(),
                metadata.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        let mut vectors = vectors;
        for vector in &mut vectors {
            normalize(vector);
        }
        self.backend.insert(&vectors)?;

        let count = texts.len();
        let metadata = metadata
            .map(|m| m.into_iter().map(Some).collect())
            .unwrap_or_else(|| vec![None; count]);
        self.entries.extend(
            texts
                .into_iter()
                .zip(metadata)
                .map(|(text, metadata)| IndexEntry { text, metadata }),
        );

        debug!("Added {count} vectors to index ({} total)", self.entries.len());
        Ok(count)
    }

    /// Search for the `k` most similar entries scoring at least `threshold`.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<SimilarityResult>> {
        if query.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let query = normalized(query);
        let scores = self.backend.scores(&query);

        let results = rank_top_k(&scores, k, threshold)
            .into_iter()
            .enumerate()
            .filter_map(|(i, (position, score))| {
                let entry = self.entries.get(position)?;
                Some(SimilarityResult {
                    text: entry.text.clone(),
                    vector: self.backend.vector(position)?,
                    score,
                    rank: i + 1,
                    metadata: entry.metadata.clone(),
                })
            })
            .collect();

        Ok(results)
    }

    /// Search for the single most similar entry.
    pub fn search_one(&self, query: &[f32], threshold: f32) -> Result<Option<SimilarityResult>> {
        let results = self.search(query, 1, threshold)?;
        Ok(results.into_iter().next())
    }
}
