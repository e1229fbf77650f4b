//! HTTP surface for the embeddings service.
//!
//! Routes map one-to-one onto [`EmbeddingsService`] operations and add no
//! behavior of their own beyond translating errors into status codes.

pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use strata_embeddings::EmbeddingsService;
use tokio::net::TcpListener;
use tracing::info;

pub use error::{ServerError, ServerResult};

/// Build the router over a shared service.
pub fn router(service: Arc<EmbeddingsService>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/v1/embeddings", post(routes::create_embeddings))
        .route("/v1/models", get(routes::list_models))
        .route("/v1/models/{model_id}/load", post(routes::load_model))
        .route("/v1/models/{model_id}/unload", post(routes::unload_model))
        .route(
            "/v1/collections",
            get(routes::list_collections).post(routes::create_collection),
        )
        .route("/v1/stats", get(routes::all_collection_stats))
        .route("/v1/collections/{name}", delete(routes::delete_collection))
        .route("/v1/collections/{name}/add", post(routes::add_to_collection))
        .route(
            "/v1/collections/{name}/search",
            post(routes::search_collection),
        )
        .route("/v1/collections/{name}/stats", get(routes::collection_stats))
        .route(
            "/v1/cache",
            get(routes::cache_stats).delete(routes::clear_cache),
        )
        .with_state(service)
}

/// Serve until Ctrl+C.
pub async fn serve(listener: TcpListener, service: Arc<EmbeddingsService>) -> std::io::Result<()> {
    info!("Embeddings server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    info!("Shutting down");
}
