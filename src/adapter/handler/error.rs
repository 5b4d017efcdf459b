use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::ErrorResponse;
use crate::domain::service::JobStoreError;
use crate::usecase::{CancelImportError, PreviewError, RetryError, StartImportError};

/// ImportApiError はインポート管理 API のエラー型。
#[derive(Debug, thiserror::Error)]
pub enum ImportApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ImportApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ImportApiError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, "FOLK_IMPORT_NOT_FOUND", msg.as_str())
            }
            ImportApiError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "FOLK_IMPORT_VALIDATION_ERROR",
                msg.as_str(),
            ),
            ImportApiError::Conflict(msg) => {
                (StatusCode::CONFLICT, "FOLK_IMPORT_CONFLICT", msg.as_str())
            }
            ImportApiError::Upstream(msg) => (
                StatusCode::BAD_GATEWAY,
                "FOLK_IMPORT_UPSTREAM_ERROR",
                msg.as_str(),
            ),
            ImportApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "FOLK_IMPORT_INTERNAL_ERROR",
                msg.as_str(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(code = code, error = %message, "request failed");
        }
        let body = ErrorResponse::new(code, message);
        (status, Json(body)).into_response()
    }
}

impl From<JobStoreError> for ImportApiError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::RunNotFound(_) | JobStoreError::RecordNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            JobStoreError::InvalidInput(_) => Self::Validation(err.to_string()),
            JobStoreError::InvalidTransition { .. } | JobStoreError::Conflict(_) => {
                Self::Conflict(err.to_string())
            }
            JobStoreError::Internal(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<StartImportError> for ImportApiError {
    fn from(err: StartImportError) -> Self {
        match err {
            StartImportError::Validation(msg) => Self::Validation(msg),
            StartImportError::Internal(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<CancelImportError> for ImportApiError {
    fn from(err: CancelImportError) -> Self {
        match err {
            CancelImportError::NotFound(_) => Self::NotFound(err.to_string()),
            CancelImportError::AlreadyTerminal(_) => Self::Conflict(err.to_string()),
            CancelImportError::Internal(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<RetryError> for ImportApiError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::RunNotFound(_) | RetryError::RecordNotFound { .. } => {
                Self::NotFound(err.to_string())
            }
            RetryError::InvalidInput(msg) => Self::Validation(msg),
            RetryError::Internal(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<PreviewError> for ImportApiError {
    fn from(err: PreviewError) -> Self {
        match err {
            PreviewError::Validation(msg) => Self::Validation(msg),
            PreviewError::Source(_) => Self::Upstream(err.to_string()),
        }
    }
}
