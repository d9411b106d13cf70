//! Top-level API error type: maps `StoreError` and request-parsing failures
//! onto the HTTP status codes and bodies the protocol returns.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("stream not found: {0}")]
    NotFound(String),
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("{0}")]
    Conflict(String),
    #[error("offset gone")]
    Gone,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::MethodNotAllowed => "method_not_allowed",
            ApiError::Conflict(_) => "conflict",
            ApiError::Gone => "gone",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Gone => StatusCode::GONE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let body = ErrorBody { error: self.code(), message: self.to_string() };
        (self.status(), axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(p) => ApiError::NotFound(p),
            StoreError::ConfigMismatch => ApiError::Conflict(e.to_string()),
            StoreError::ContentTypeMismatch { .. } => ApiError::Conflict(e.to_string()),
            StoreError::SequenceConflict(_) => ApiError::Conflict(e.to_string()),
            StoreError::StaleEpoch { .. } => ApiError::Forbidden(e.to_string()),
            StoreError::SequenceGap { .. } => ApiError::Conflict(e.to_string()),
            StoreError::InvalidJson => ApiError::BadRequest(e.to_string()),
            StoreError::EmptyJsonArray => ApiError::BadRequest(e.to_string()),
            StoreError::InvalidOffset => ApiError::BadRequest(e.to_string()),
            StoreError::OffsetGone => ApiError::Gone,
            StoreError::TtlConflict => ApiError::BadRequest(e.to_string()),
            StoreError::InvalidTtl => ApiError::BadRequest(e.to_string()),
            StoreError::InvalidExpiresAt => ApiError::BadRequest(e.to_string()),
            StoreError::StreamClosed => ApiError::Conflict(e.to_string()),
            StoreError::AlreadyClosed => ApiError::Conflict(e.to_string()),
            StoreError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}
