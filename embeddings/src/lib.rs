//! # Embeddings
//!
//! Embedding generation, caching and similarity search.
//!
//! ## Features
//!
//! - **Model catalog**: built-in and configured models, each served by a
//!   local feature-hashing encoder or an OpenAI-compatible remote endpoint
//! - **Caching**: bounded, content-addressed cache of raw vectors
//! - **Collections**: named indexes searched by cosine similarity
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    EmbeddingsService                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingGenerator ──────────────► CollectionRegistry         │
//! │   │            │                          │                     │
//! │   ▼            ▼                          ▼                     │
//! │  ModelCatalog  EmbeddingCache        SimilarityIndex           │
//! │   │                                       │                     │
//! │   ▼                                       ▼                     │
//! │  LocalEncoder / RemoteEmbedder     BruteForce / Optimized      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod generator;
pub mod index;
pub mod provider;
pub mod registry;
pub mod service;
pub mod similarity;

pub use cache::{CacheStats, EmbeddingCache};
pub use catalog::{BackendKind, DEFAULT_MODEL, ModelCatalog, ModelDescriptor};
pub use config::{EmbeddingsConfig, IndexPreference};
pub use error::{EmbeddingError, Result};
pub use generator::{EmbeddingGenerator, EmbeddingRequest, EmbeddingResult};
pub use index::{IndexBackendKind, SimilarityIndex};
pub use provider::{BackendOutput, BackendSet, EmbeddingBackend, LocalEncoder, RemoteEmbedder};
pub use registry::{Collection, CollectionRegistry, CollectionStats};
pub use service::{AddRequest, EmbeddingsService, SearchRequest, ServiceStats};
pub use similarity::{SimilarityResult, cosine_similarity};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
