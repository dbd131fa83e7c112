//! HTTP error envelope (spec.md §6, §7). Directly grounded on the teacher's
//! `api-server/src/error.rs::ApiError`, generalized from its `{error,
//! message}` body to the spec's `{success:false, error:{type,message,...}}`
//! shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// spec.md §7's fourteen error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum ErrorKind {
    Unknown,
    Validation,
    NotFound,
    PermissionDenied,
    Network,
    Server,
    Timeout,
    Unauthorized,
    Config,
    #[serde(rename = "LLM")]
    Llm,
    DataWrite,
    DataRead,
    Crypto,
    QuotaExceeded,
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub status_code: StatusCode,
}

#[derive(Serialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: ErrorKind,
    message: String,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: ErrorBody,
}

impl ApiError {
    fn new(kind: ErrorKind, status_code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, StatusCode::NOT_FOUND, message)
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, StatusCode::TOO_MANY_REQUESTS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            success: false,
            error: ErrorBody {
                kind: self.kind,
                message: self.message,
            },
        };
        (self.status_code, axum::Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "unhandled internal error");
        ApiError::internal("an internal error occurred")
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => ApiError::not_found("resource not found"),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                ApiError::new(ErrorKind::Validation, StatusCode::CONFLICT, "resource already exists")
            }
            sqlx::Error::PoolTimedOut => {
                ApiError::new(ErrorKind::Server, StatusCode::SERVICE_UNAVAILABLE, "database pool exhausted")
            }
            other => {
                tracing::error!(error = %other, "database error");
                ApiError::new(ErrorKind::DataRead, StatusCode::INTERNAL_SERVER_ERROR, "a database error occurred")
            }
        }
    }
}
