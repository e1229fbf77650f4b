//! Embedding backends.
//!
//! Every model in the catalog is served by exactly one [`BackendKind`]. The
//! [`BackendSet`] holds one backend per kind and resolves a kind with an
//! exhaustive match, so a new kind cannot be added without wiring it here.
//!
//! Backends return raw vectors. Normalization and caching belong to the
//! generator.

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::Embedding;
use crate::catalog::{BackendKind, ModelDescriptor};
use crate::config::RemoteConfig;
use crate::error::{EmbeddingError, Result};

/// Vectors produced for one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendOutput {
    /// One raw vector per input text, in input order.
    pub vectors: Vec<Embedding>,

    /// Positions whose text failed to embed and hold an all-zero vector.
    pub degraded: Vec<usize>,
}

/// Trait for embedding backends.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Which kind of backend this is.
    fn kind(&self) -> BackendKind;

    /// Whether the backend can currently serve `model`.
    async fn is_available(&self, model: &ModelDescriptor) -> bool;

    /// Prepare the backend to serve `model`.
    async fn load(&self, model: &ModelDescriptor) -> Result<()>;

    /// Release whatever `load` acquired.
    async fn unload(&self, model_id: &str);

    /// Embed a batch of texts.
    ///
    /// Must return exactly one vector per text. A text that fails on its own
    /// yields a zero vector and is listed in [`BackendOutput::degraded`]; only
    /// failures that affect the whole call (such as a timeout) are errors.
    async fn embed(&self, texts: &[String], model: &ModelDescriptor) -> Result<BackendOutput>;
}

/// One backend per [`BackendKind`].
#[derive(Clone)]
pub struct BackendSet {
    local: Arc<dyn EmbeddingBackend>,
    remote: Arc<dyn EmbeddingBackend>,
}

impl BackendSet {
    pub fn new(local: Arc<dyn EmbeddingBackend>, remote: Arc<dyn EmbeddingBackend>) -> Self {
        Self { local, remote }
    }

    /// The in-process encoder plus an HTTP embedder for `remote`.
    pub fn from_config(remote: &RemoteConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(LocalEncoder::new()),
            Arc::new(RemoteEmbedder::new(remote)?),
        ))
    }

    pub fn get(&self, kind: BackendKind) -> &Arc<dyn EmbeddingBackend> {
        match kind {
            BackendKind::LocalEncoder => &self.local,
            BackendKind::RemoteEmbedder => &self.remote,
        }
    }
}

/// In-process encoder based on signed feature hashing.
///
/// Each lowercased word and each character trigram of the word is hashed
/// into one of `dimension` buckets with a sign taken from the hash. Texts
/// sharing vocabulary land close together; identical texts always produce
/// identical vectors. Only the first `max_input_length` words are used.
#[derive(Debug, Default)]
pub struct LocalEncoder {
    loaded: RwLock<HashSet<String>>,
}

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

impl LocalEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a single text.
    pub fn encode(text: &str, model: &ModelDescriptor) -> Embedding {
        let mut vector = vec![0.0f32; model.dimension];
        if vector.is_empty() {
            return vector;
        }

        let words = text
            .split_whitespace()
            .take(model.max_input_length)
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| !w.is_empty());

        for word in words {
            accumulate(&mut vector, &model.id, &word, WORD_WEIGHT);

            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                accumulate(&mut vector, &model.id, &gram, TRIGRAM_WEIGHT);
            }
        }

        vector
    }
}

fn accumulate(vector: &mut [f32], seed: &str, feature: &str, weight: f32) {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    feature.hash(&mut hasher);
    let h = hasher.finish();

    let bucket = (h % vector.len() as u64) as usize;
    let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
    vector[bucket] += sign * weight;
}

#[async_trait]
impl EmbeddingBackend for LocalEncoder {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalEncoder
    }

    async fn is_available(&self, _model: &ModelDescriptor) -> bool {
        true
    }

    async fn load(&self, model: &ModelDescriptor) -> Result<()> {
        self.loaded.write().await.insert(model.id.clone());
        debug!("Local encoder ready for {}", model.id);
        Ok(())
    }

    async fn unload(&self, model_id: &str) {
        self.loaded.write().await.remove(model_id);
    }

    async fn embed(&self, texts: &[String], model: &ModelDescriptor) -> Result<BackendOutput> {
        if !self.loaded.read().await.contains(&model.id) {
            return Err(EmbeddingError::ModelUnavailable(model.id.clone()));
        }

        debug!(
            "Encoding {} texts locally with model: {}",
            texts.len(),
            model.id
        );

        Ok(BackendOutput {
            vectors: texts.iter().map(|t| Self::encode(t, model)).collect(),
            degraded: Vec::new(),
        })
    }
}

/// Embedder calling an OpenAI-compatible HTTP API.
///
/// Works with OpenAI itself and with local servers exposing the same
/// routes (Ollama, LM Studio, vLLM, text-embeddings-inference).
pub struct RemoteEmbedder {
    /// HTTP client with the request timeout applied.
    client: reqwest::Client,

    /// API base URL.
    base_url: String,

    /// Bearer token.
    api_key: Option<String>,

    timeout: Duration,
}

impl RemoteEmbedder {
    /// Create a remote embedder.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        info!(
            "Remote embedder configured: base_url={}, timeout={}s",
            config.base_url, config.timeout_secs
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.resolved_api_key(),
            timeout: config.timeout(),
        })
    }

    fn map_error(&self, err: reqwest::Error) -> EmbeddingError {
        if err.is_timeout() {
            EmbeddingError::BackendTimeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            EmbeddingError::Http(err)
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Model ids the endpoint advertises.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .authorize(self.client.get(format!("{}/models", self.base_url)))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::ApiRequest(format!(
                "model listing returned {}",
                response.status()
            )));
        }

        let listing: ModelListResponse = response.json().await.map_err(|e| self.map_error(e))?;
        Ok(listing.data.into_iter().map(|m| m.id).collect())
    }

    async fn request(&self, texts: &[&str], model: &str) -> Result<OpenAIEmbeddingResponse> {
        let body = serde_json::json!({
            "input": texts,
            "model": model,
            "encoding_format": "float"
        });

        let response = self
            .authorize(self.client.post(format!("{}/embeddings", self.base_url)))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiRequest(format!(
                "API error ({status}): {error_text}"
            )));
        }

        response.json().await.map_err(|e| self.map_error(e))
    }

    /// Place response items by their `index`, zero-filling anything missing
    /// or of the wrong length.
    fn assemble(
        response: OpenAIEmbeddingResponse,
        count: usize,
        model: &ModelDescriptor,
    ) -> BackendOutput {
        let mut slots: Vec<Option<Embedding>> = vec![None; count];
        for item in response.data {
            if item.index < count && item.embedding.len() == model.dimension {
                slots[item.index] = Some(item.embedding);
            }
        }

        let mut output = BackendOutput::default();
        for (position, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(vector) => output.vectors.push(vector),
                None => {
                    warn!("No usable embedding for element {position} (model: {})", model.id);
                    output.vectors.push(vec![0.0; model.dimension]);
                    output.degraded.push(position);
                }
            }
        }
        output
    }
}

#[async_trait]
impl EmbeddingBackend for RemoteEmbedder {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteEmbedder
    }

    async fn is_available(&self, model: &ModelDescriptor) -> bool {
        match self.list_models().await {
            Ok(ids) => ids.iter().any(|id| {
                id == &model.id || id.strip_suffix(":latest") == Some(model.id.as_str())
            }),
            Err(err) => {
                debug!("Remote endpoint unreachable: {err}");
                false
            }
        }
    }

    async fn load(&self, model: &ModelDescriptor) -> Result<()> {
        if self.is_available(model).await {
            Ok(())
        } else {
            Err(EmbeddingError::ModelUnavailable(model.id.clone()))
        }
    }

    async fn unload(&self, model_id: &str) {
        debug!("Remote model {model_id} released");
    }

    async fn embed(&self, texts: &[String], model: &ModelDescriptor) -> Result<BackendOutput> {
        if texts.is_empty() {
            return Ok(BackendOutput::default());
        }

        debug!(
            "Requesting {} remote embeddings with model: {}",
            texts.len(),
            model.id
        );

        let batch: Vec<&str> = texts.iter().map(String::as_str).collect();
        match self.request(&batch, &model.id).await {
            Ok(response) => return Ok(Self::assemble(response, texts.len(), model)),
            Err(err @ EmbeddingError::BackendTimeout { .. }) => return Err(err),
            Err(err) if texts.len() > 1 => {
                warn!("Batch embedding failed, retrying per text: {err}");
            }
            Err(err) => {
                warn!("Embedding failed for element 0 (model: {}): {err}", model.id);
                return Ok(BackendOutput {
                    vectors: vec![vec![0.0; model.dimension]],
                    degraded: vec![0],
                });
            }
        }

        let mut output = BackendOutput::default();
        for (position, text) in texts.iter().enumerate() {
            let single = match self.request(&[text.as_str()], &model.id).await {
                Ok(response) => Self::assemble(response, 1, model),
                Err(err @ EmbeddingError::BackendTimeout { .. }) => return Err(err),
                Err(err) => {
                    warn!(
                        "Embedding failed for element {position} (model: {}): {err}",
                        model.id
                    );
                    BackendOutput {
                        vectors: vec![vec![0.0; model.dimension]],
                        degraded: vec![0],
                    }
                }
            };

            if !single.degraded.is_empty() {
                output.degraded.push(position);
            }
            output.vectors.extend(single.vectors);
        }

        Ok(output)
    }
}

/// OpenAI API response format.
#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ModelListResponse {
    data: Vec<ModelListEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelListEntry {
    id: String,
}
