//! Embedding cache for efficient retrieval.
//!
//! Entries are keyed by a SHA-256 digest of the model id and the exact
//! text, and spread over independently locked LRU shards so lookups for
//! unrelated keys do not contend.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::Embedding;
use crate::config::CacheConfig;

/// Content address of a cached vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Derive the key for `text` embedded with `model_id`.
    pub fn new(model_id: &str, text: &str) -> Self {
        let mut hasher = Sha256::new();
        // Length prefix keeps ("ab", "c") and ("a", "bc") apart.
        hasher.update((model_id.len() as u64).to_le_bytes());
        hasher.update(model_id.as_bytes());
        hasher.update(text.as_bytes());
        Self(hasher.finalize().into())
    }

    fn shard(&self, shards: usize) -> usize {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[..8]);
        (u64::from_le_bytes(prefix) % shards as u64) as usize
    }

    /// Hex form of the key.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Cache entry for an embedding.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Raw (unnormalized) vector.
    pub vector: Embedding,
}

/// Bounded cache of raw embeddings.
pub struct EmbeddingCache {
    shards: Vec<Mutex<LruCache<CacheKey, CacheEntry>>>,

    /// Maximum cache size.
    max_entries: usize,

    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// Create a cache holding at most `max_entries` vectors over `shards` shards.
    pub fn new(max_entries: usize, shards: usize) -> Self {
        let shards = shards.max(1);
        let per_shard = NonZeroUsize::new(max_entries.div_ceil(shards)).unwrap_or(NonZeroUsize::MIN);

        Self {
            shards: (0..shards).map(|_| Mutex::new(LruCache::new(per_shard))).collect(),
            max_entries: per_shard.get() * shards,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, config.shards)
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<LruCache<CacheKey, CacheEntry>> {
        &self.shards[key.shard(self.shards.len())]
    }

    /// Get an embedding from the cache.
    pub async fn get(&self, model_id: &str, text: &str) -> Option<Embedding> {
        let key = CacheKey::new(model_id, text);
        let found = self
            .shard(&key)
            .lock()
            .await
            .get(&key)
            .map(|e| e.vector.clone());
        self.record(found.is_some());
        found
    }

    /// Get an embedding of exactly `dimension` elements.
    ///
    /// An entry of any other length is malformed: it is dropped and the
    /// lookup counts as a miss.
    pub async fn get_valid(&self, model_id: &str, text: &str, dimension: usize) -> Option<Embedding> {
        let key = CacheKey::new(model_id, text);
        let mut shard = self.shard(&key).lock().await;

        let found = match shard.get(&key).map(|e| e.vector.clone()) {
            Some(vector) if vector.len() == dimension => Some(vector),
            Some(vector) => {
                warn!(
                    "Discarding cached vector of length {} for model {model_id} (expected {dimension})",
                    vector.len()
                );
                shard.pop(&key);
                None
            }
            None => None,
        };
        drop(shard);

        self.record(found.is_some());
        found
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Put an embedding in the cache.
    pub async fn put(&self, model_id: &str, text: &str, vector: Embedding) {
        let key = CacheKey::new(model_id, text);
        let entry = CacheEntry { vector };
        self.shard(&key).lock().await.put(key, entry);
        debug!("Cached embedding {} (model: {model_id})", key.to_hex());
    }

    /// Drop an entry, for instance one found to be malformed.
    pub async fn remove(&self, model_id: &str, text: &str) {
        let key = CacheKey::new(model_id, text);
        self.shard(&key).lock().await.pop(&key);
    }

    /// Number of cached vectors.
    pub async fn size(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.lock().await.len();
        }
        total
    }

    /// Clear the entire cache.
    pub async fn clear(&self) {
        for shard in &self.shards {
            shard.lock().await.clear();
        }
        info!("Cleared embedding cache");
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.size().await,
            max_entries: self.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Statistics about the embedding cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries in cache.
    pub entries: usize,

    /// Maximum cache size.
    pub max_entries: usize,

    /// Lookups answered from the cache.
    pub hits: u64,

    /// Lookups that found nothing.
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_cache_put_get() {
        let cache = EmbeddingCache::new(100, 4);
        let embedding = vec![1.0, 2.0, 3.0];

        cache.put("model-1", "hello", embedding.clone()).await;

        assert_eq!(cache.get("model-1", "hello").await, Some(embedding));
        assert_eq!(cache.get("model-2", "hello").await, None);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let cache = EmbeddingCache::new(100, 4);
        let result = cache.get("model-1", "not cached").await;
        assert!(result.is_none());
    }

    #[test]
    fn test_key_is_stable_and_unambiguous() {
        assert_eq!(CacheKey::new("m", "text"), CacheKey::new("m", "text"));
        assert_ne!(CacheKey::new("ab", "c"), CacheKey::new("a", "bc"));
        assert_ne!(CacheKey::new("m", "text"), CacheKey::new("m", "text "));
        assert_eq!(CacheKey::new("m", "text").to_hex().len(), 64);
    }

    #[tokio::test]
    async fn test_cache_eviction() {
        let cache = EmbeddingCache::new(2, 1);

        cache.put("model", "a", vec![1.0]).await;
        cache.put("model", "b", vec![2.0]).await;
        // Touch "a" so "b" is the least recently used.
        assert!(cache.get("model", "a").await.is_some());
        cache.put("model", "c", vec![3.0]).await;

        assert_eq!(cache.size().await, 2);
        assert!(cache.get("model", "b").await.is_none());
        assert!(cache.get("model", "a").await.is_some());
    }

    #[tokio::test]
    async fn test_clear_and_remove() {
        let cache = EmbeddingCache::new(10, 2);
        cache.put("model", "a", vec![1.0]).await;
        cache.put("model", "b", vec![2.0]).await;

        cache.remove("model", "a").await;
        assert_eq!(cache.size().await, 1);

        cache.clear().await;
        assert_eq!(cache.size().await, 0);
    }

    #[tokio::test]
    async fn test_wrong_length_entry_counts_as_miss() {
        let cache = EmbeddingCache::new(10, 2);
        cache.put("model", "short", vec![1.0, 2.0]).await;
        cache.put("model", "exact", vec![1.0, 2.0, 3.0]).await;

        assert_eq!(cache.get_valid("model", "short", 3).await, None);
        assert_eq!(
            cache.get_valid("model", "exact", 3).await,
            Some(vec![1.0, 2.0, 3.0])
        );

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        // The malformed entry is gone.
        assert_eq!(stats.entries, 1);
    }
}
