//! Request handlers. Each one forwards to a single service operation.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strata_embeddings::service::DEFAULT_TOP_K;
use strata_embeddings::{
    AddRequest, CacheStats, CollectionStats, EmbeddingRequest, EmbeddingsService,
    ModelDescriptor, SearchRequest, ServiceStats, SimilarityResult,
};
use tracing::debug;

use crate::error::{ServerError, ServerResult};

pub type AppState = Arc<EmbeddingsService>;

/// Embedding response; `elapsed` flattened to milliseconds.
#[derive(Debug, Serialize, Deserialize)]
pub struct EmbeddingsResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub model_id: String,
    pub dimension: usize,
    pub elapsed_ms: u64,
    pub token_count: usize,
    pub cache_hits: usize,
    pub degraded: Vec<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelDescriptor>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCollectionRequest {
    pub name: String,

    /// Defaults to the default model's dimension.
    #[serde(default)]
    pub dimension: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddResponse {
    pub added: usize,
}

/// Text or vector query against a collection.
#[derive(Debug, Deserialize)]
pub struct SearchBody {
    #[serde(default)]
    pub query_text: Option<String>,

    #[serde(default)]
    pub vector: Option<Vec<f32>>,

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

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SimilarityResult>,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn create_embeddings(
    State(service): State<AppState>,
    Json(request): Json<EmbeddingRequest>,
) -> ServerResult<Json<EmbeddingsResponse>> {
    debug!("Embedding request for {} texts", request.texts.len());
    let result = service.generate_embeddings(request).await?;

    Ok(Json(EmbeddingsResponse {
        embeddings: result.embeddings,
        model_id: result.model_id,
        dimension: result.dimension,
        elapsed_ms: result.elapsed.as_millis() as u64,
        token_count: result.token_count,
        cache_hits: result.cache_hits,
        degraded: result.degraded,
    }))
}

pub async fn list_models(State(service): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: service.list_models().await,
    })
}

pub async fn load_model(
    State(service): State<AppState>,
    Path(model_id): Path<String>,
) -> ServerResult<Json<Value>> {
    let loaded = service.load_model(&model_id).await?;
    Ok(Json(json!({ "model_id": model_id, "loaded": loaded })))
}

pub async fn unload_model(
    State(service): State<AppState>,
    Path(model_id): Path<String>,
) -> ServerResult<Json<Value>> {
    let unloaded = service.unload_model(&model_id).await?;
    Ok(Json(json!({ "model_id": model_id, "unloaded": unloaded })))
}

pub async fn list_collections(State(service): State<AppState>) -> Json<Value> {
    Json(json!({ "collections": service.list_collections().await }))
}

pub async fn create_collection(
    State(service): State<AppState>,
    Json(request): Json<CreateCollectionRequest>,
) -> ServerResult<(StatusCode, Json<CollectionStats>)> {
    let stats = service
        .create_collection(&request.name, request.dimension)
        .await?;
    Ok((StatusCode::CREATED, Json(stats)))
}

pub async fn add_to_collection(
    State(service): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<AddRequest>,
) -> ServerResult<Json<AddResponse>> {
    match service.add_to_collection(&name, request).await? {
        Some(added) => Ok(Json(AddResponse { added })),
        None => Err(ServerError::NotFound(format!("collection {name}"))),
    }
}

pub async fn search_collection(
    State(service): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SearchBody>,
) -> ServerResult<Json<SearchResponse>> {
    let results = match (body.vector, body.query_text) {
        (Some(vector), _) => {
            service
                .search_collection_by_vector(&name, &vector, body.k, body.threshold)
                .await?
        }
        (None, Some(query_text)) => {
            let mut request = SearchRequest::new(query_text)
                .with_k(body.k)
                .with_threshold(body.threshold);
            request.model_id = body.model_id;
            service.search_collection(&name, request).await?
        }
        (None, None) => {
            return Err(ServerError::BadRequest(
                "either query_text or vector is required".to_string(),
            ));
        }
    };

    Ok(Json(SearchResponse { results }))
}

pub async fn all_collection_stats(State(service): State<AppState>) -> Json<ServiceStats> {
    Json(service.all_collection_stats().await)
}

pub async fn collection_stats(
    State(service): State<AppState>,
    Path(name): Path<String>,
) -> ServerResult<Json<CollectionStats>> {
    service
        .collection_stats(&name)
        .await
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("collection {name}")))
}

pub async fn delete_collection(
    State(service): State<AppState>,
    Path(name): Path<String>,
) -> Json<Value> {
    let deleted = service.delete_collection(&name).await;
    Json(json!({ "name": name, "deleted": deleted }))
}

pub async fn cache_stats(State(service): State<AppState>) -> Json<CacheStats> {
    Json(service.cache_stats().await)
}

pub async fn clear_cache(State(service): State<AppState>) -> StatusCode {
    service.clear_cache().await;
    StatusCode::NO_CONTENT
}
