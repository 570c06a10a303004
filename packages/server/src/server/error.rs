//! Mapping of pipeline errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use niche_discovery::DiscoveryError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Discovery(e) => match e {
                DiscoveryError::Config(_)
                | DiscoveryError::InvalidTransition(_)
                | DiscoveryError::Extraction(_) => StatusCode::BAD_REQUEST,
                DiscoveryError::JobNotFound(_) | DiscoveryError::UrlNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                DiscoveryError::Cancelled(_) => StatusCode::CONFLICT,
                DiscoveryError::Provider(_) => StatusCode::BAD_GATEWAY,
                DiscoveryError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Discovery(e) => match e {
                DiscoveryError::Config(_) => "invalid_config",
                DiscoveryError::InvalidTransition(_) => "invalid_transition",
                DiscoveryError::Extraction(_) => "extraction",
                DiscoveryError::JobNotFound(_) | DiscoveryError::UrlNotFound(_) => "not_found",
                DiscoveryError::Cancelled(_) => "cancelled",
                DiscoveryError::Provider(_) => "provider",
                DiscoveryError::Persistence(_) => "storage",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
