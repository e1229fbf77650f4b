use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use strata_embeddings::EmbeddingError;

pub type ServerResult<T> = Result<T, ServerError>;

/// Errors a handler can answer with.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Embeddings(#[from] EmbeddingError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// API error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Embeddings(err) => match err {
                EmbeddingError::UnknownModel(_) => StatusCode::NOT_FOUND,
                EmbeddingError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                EmbeddingError::BackendTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                EmbeddingError::CollectionExists(_) => StatusCode::CONFLICT,
                EmbeddingError::DimensionMismatch { .. } | EmbeddingError::ModelMismatch { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                EmbeddingError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                EmbeddingError::ApiRequest(_)
                | EmbeddingError::InvalidResponse(_)
                | EmbeddingError::Http(_) => StatusCode::BAD_GATEWAY,
                EmbeddingError::Index(_)
                | EmbeddingError::Config(_)
                | EmbeddingError::Serialization(_)
                | EmbeddingError::Toml(_)
                | EmbeddingError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServerError::BadRequest(_) => "BAD_REQUEST",
            ServerError::NotFound(_) => "NOT_FOUND",
            ServerError::Embeddings(err) => match err {
                EmbeddingError::UnknownModel(_) => "UNKNOWN_MODEL",
                EmbeddingError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
                EmbeddingError::BackendTimeout { .. } => "BACKEND_TIMEOUT",
                EmbeddingError::CollectionExists(_) => "COLLECTION_EXISTS",
                EmbeddingError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
                EmbeddingError::ModelMismatch { .. } => "MODEL_MISMATCH",
                EmbeddingError::InvalidInput(_) => "INVALID_INPUT",
                EmbeddingError::ApiRequest(_)
                | EmbeddingError::InvalidResponse(_)
                | EmbeddingError::Http(_) => "BACKEND_ERROR",
                EmbeddingError::Index(_) => "INDEX_ERROR",
                EmbeddingError::Config(_) | EmbeddingError::Toml(_) => "CONFIG_ERROR",
                EmbeddingError::Serialization(_) | EmbeddingError::Io(_) => "INTERNAL_ERROR",
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!("Request failed with {status}: {self}");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
            },
        });

        (status, body).into_response()
    }
}
