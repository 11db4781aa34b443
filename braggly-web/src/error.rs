//! Error types for braggly-web

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::backend::BackendError;
use crate::i18n::I18nError;
use crate::oauth::OAuthError;
use crate::payments::PaymentError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or rejected session token (401)
    #[error("Not authenticated")]
    Unauthorized,

    /// Access denied (403)
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Well-formed request that cannot be processed (422)
    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    /// Backend or third-party service failed (502)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// braggly-common error
    #[error("Common error: {0}")]
    Common(#[from] braggly_common::Error),
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unauthorized => ApiError::Unauthorized,
            BackendError::Forbidden => ApiError::Forbidden("backend refused access".to_string()),
            BackendError::NotFound(path) => ApiError::NotFound(path),
            BackendError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            BackendError::Unconfigured => ApiError::Internal(err.to_string()),
            BackendError::Status { status, ref body } if status == 400 || status == 422 => {
                ApiError::BadRequest(if body.is_empty() { err.to_string() } else { body.clone() })
            }
            BackendError::Network(_) | BackendError::Status { .. } | BackendError::Parse(_) => {
                ApiError::Upstream(err.to_string())
            }
        }
    }
}

impl From<OAuthError> for ApiError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::NotConfigured => ApiError::Internal(err.to_string()),
            OAuthError::Rejected { .. } => ApiError::Unauthorized,
            OAuthError::Network(_) | OAuthError::Parse(_) => ApiError::Upstream(err.to_string()),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::NotConfigured => ApiError::Internal(err.to_string()),
            PaymentError::InvalidAmount(_) | PaymentError::Signature(_) => {
                ApiError::BadRequest(err.to_string())
            }
            PaymentError::Stripe { .. } | PaymentError::Network(_) | PaymentError::Parse(_) => {
                ApiError::Upstream(err.to_string())
            }
        }
    }
}

impl From<I18nError> for ApiError {
    fn from(err: I18nError) -> Self {
        match err {
            I18nError::InvalidLocale(_) => ApiError::BadRequest(err.to_string()),
            I18nError::NotFound(_) => ApiError::NotFound(err.to_string()),
            I18nError::Malformed { .. } | I18nError::Io(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Not authenticated".to_string(),
            ),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "UNPROCESSABLE", msg)
            }
            ApiError::Upstream(msg) => {
                warn!("Upstream failure: {}", msg);
                (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg)
            }
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
