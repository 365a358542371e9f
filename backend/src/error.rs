//! Error handling for the LIMS platform
//!
//! Every failure leaves the API as `{ "error": { "code", "message", "field"? } }`

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Business logic errors
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("{0}")]
    DeleteBlocked(String),

    // External service errors
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a field-level validation failure
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Turn a missing referenced row into a validation error on `field`
    pub fn not_found_as(self, field: &str, message: &str) -> Self {
        match self {
            AppError::NotFound(_) => AppError::validation(field, message),
            other => other,
        }
    }

    /// Report a unique-constraint violation as a conflict; other errors pass through
    pub fn unique_as_conflict(self, message: impl Into<String>) -> Self {
        match self {
            AppError::DatabaseError(sqlx::Error::Database(ref db)) if db.is_unique_violation() => {
                AppError::Conflict(message.into())
            }
            other => other,
        }
    }

    /// Machine-readable code and HTTP status of the error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            AppError::TokenExpired => (StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED"),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::InsufficientPermissions => {
                (StatusCode::FORBIDDEN, "INSUFFICIENT_PERMISSIONS")
            }
            AppError::Validation { .. } | AppError::ValidationError(_) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            AppError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::InvalidStateTransition(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_STATE_TRANSITION")
            }
            AppError::DeleteBlocked(_) => (StatusCode::CONFLICT, "DELETE_BLOCKED"),
            AppError::StorageError(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_ERROR"),
            AppError::ExternalService(_) => (StatusCode::BAD_GATEWAY, "EXTERNAL_SERVICE_ERROR"),
            AppError::Configuration(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_ERROR")
            }
            AppError::DatabaseError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            AppError::Internal(_) | AppError::InternalError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.into(),
                field: None,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let (message, field) = match &self {
            AppError::InvalidCredentials => ("Invalid email or password".to_string(), None),
            AppError::TokenExpired => ("Token has expired".to_string(), None),
            AppError::InvalidToken => ("Invalid token".to_string(), None),
            AppError::InsufficientPermissions => (
                "You do not have permission to perform this action".to_string(),
                None,
            ),
            AppError::Unauthorized(msg) => (msg.clone(), None),
            AppError::Validation { field, message } => (message.clone(), Some(field.clone())),
            AppError::ValidationError(msg) => (msg.clone(), None),
            AppError::Conflict(msg) => (msg.clone(), None),
            AppError::NotFound(resource) => (format!("{} not found", resource), None),
            AppError::InvalidStateTransition(msg) => (msg.clone(), None),
            AppError::DeleteBlocked(msg) => (msg.clone(), None),
            AppError::StorageError(msg) => (format!("Storage error: {}", msg), None),
            AppError::ExternalService(msg) => (format!("External service error: {}", msg), None),
            AppError::Configuration(msg) => (format!("Configuration error: {}", msg), None),
            AppError::DatabaseError(_) => ("A database error occurred".to_string(), None),
            AppError::Internal(msg) => (msg.clone(), None),
            AppError::InternalError(_) => ("An internal server error occurred".to_string(), None),
        };

        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, errs)| {
                let detail = errs
                    .iter()
                    .filter_map(|e| e.message.as_ref().map(|m| m.to_string()))
                    .next()
                    .unwrap_or_else(|| "is invalid".to_string());
                format!("{}: {}", field, detail)
            })
            .collect::<Vec<_>>()
            .join("; ");
        AppError::ValidationError(message)
    }
}

impl From<shared::TransitionError> for AppError {
    fn from(err: shared::TransitionError) -> Self {
        AppError::InvalidStateTransition(err.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::ValidationError(format!("Invalid CSV: {}", err))
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::InsufficientPermissions.status_and_code().0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::DeleteBlocked("x".into()).status_and_code(),
            (StatusCode::CONFLICT, "DELETE_BLOCKED")
        );
        assert_eq!(
            AppError::InvalidStateTransition("x".into()).status_and_code().0,
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_unique_as_conflict_keeps_other_errors() {
        let err = AppError::NotFound("Report".into()).unique_as_conflict("taken");
        assert!(matches!(err, AppError::NotFound(_)));
        let err = AppError::DatabaseError(sqlx::Error::RowNotFound).unique_as_conflict("taken");
        assert!(matches!(err, AppError::DatabaseError(_)));
    }

    #[test]
    fn test_transition_error_conversion() {
        let err: AppError = shared::TransitionError::new("sample", "draft", "completed").into();
        assert_eq!(
            err.to_string(),
            "Invalid state transition: Cannot move sample from draft to completed"
        );
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = AppError::validation("prefix", "too long").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["field"], "prefix");
        assert_eq!(body["error"]["message"], "too long");
    }
}
