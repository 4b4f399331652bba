use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy shared by the pipelines and the HTTP layer.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("empty input: {0}")]
    EmptyInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("provider failure: {0}")]
    Provider(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn provider<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Provider(err.to_string())
    }

    pub fn persistence<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Persistence(err.to_string())
    }

    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ApiError::InvalidConfig(_) | ApiError::EmptyInput(_) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Provider(_) => StatusCode::BAD_GATEWAY,
            ApiError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
