use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::{IngestError, StorageError};

/// Errors returned by the HTTP handlers, rendered as JSON.
#[derive(Debug, Clone)]
pub enum ApiError {
    NotFound(String),
    RunInProgress(String),
    InternalError(String),
}

impl ApiError {
    fn code(&self) -> &str {
        match self {
            ApiError::NotFound(_) => "NotFound",
            ApiError::RunInProgress(_) => "RunInProgress",
            ApiError::InternalError(_) => "InternalError",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RunInProgress(_) => StatusCode::CONFLICT,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::NotFound(m) | ApiError::RunInProgress(m) | ApiError::InternalError(m) => m,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::InternalError(m) = &self {
            tracing::error!("Request failed: {}", m);
        }
        let body = json!({
            "success": false,
            "error": { "code": self.code(), "message": self.message() },
        });
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::AlreadyRunning => ApiError::RunInProgress(err.to_string()),
            IngestError::Accounts(_) => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(err: sea_orm::DbErr) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io { ref source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ApiError::NotFound("stored file is missing".to_string())
            }
            other => ApiError::InternalError(other.to_string()),
        }
    }
}
