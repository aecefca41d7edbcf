use serde::Serialize;
use uuid::Uuid;

/// Application-wide Result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Main application error type
///
/// Each variant is one of the error kinds the engine propagates. The job
/// fabric decides retry vs. dead-letter from `is_retryable`.
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    /// A validation rule failed; recorded on the Validation entity
    #[error("Validation error: {0}")]
    Validation(String),

    /// Optimistic-concurrency mismatch; caller retries the step
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Idempotency or content-hash collision; caller returns the prior result
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// Transient external dependency failure; retried per policy
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Soft or hard timeout; soft is cancellable, hard forfeits the lease
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Caller's role or policy disallows the action; never retried
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Malformed input (bad file type, oversize, malformed payload); never retried
    #[error("Invalid input [{code}]: {message}")]
    Invalid { code: String, message: String },

    /// Cooperative cancellation observed
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal errors (bugs); logged with context, job goes to DLQ
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        AppError::Duplicate(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        AppError::Unavailable(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        AppError::Timeout(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        AppError::PermissionDenied(msg.into())
    }

    pub fn invalid(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Invalid {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        AppError::Cancelled(msg.into())
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        AppError::NotFound(resource.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    /// Stable kind tag for the caller boundary and the job fabric
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Conflict(_) => "conflict",
            AppError::Duplicate(_) => "duplicate",
            AppError::Unavailable(_) => "unavailable",
            AppError::Timeout(_) => "timeout",
            AppError::PermissionDenied(_) => "permission_denied",
            AppError::Invalid { .. } => "invalid",
            AppError::Cancelled(_) => "cancelled",
            AppError::NotFound(_) => "not_found",
            AppError::Json(_) => "invalid",
            AppError::Internal(_) => "internal",
        }
    }

    /// Whether the job fabric should retry this failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Unavailable(_) | AppError::Timeout(_) | AppError::Conflict(_)
        )
    }

    /// Structured error for the caller boundary.
    ///
    /// Internal detail is sanitized out of `message`; the full error is
    /// logged separately with the correlation id.
    pub fn to_body(&self, correlation_id: Uuid) -> ErrorBody {
        let (code, message) = match self {
            AppError::Invalid { code, message } => (code.clone(), message.clone()),
            AppError::Internal(_) => (
                "internal".to_string(),
                "An internal error occurred".to_string(),
            ),
            AppError::Json(e) => ("malformed_payload".to_string(), format!("Invalid JSON: {}", e)),
            other => (other.kind().to_string(), other.to_string()),
        };

        if matches!(self, AppError::Internal(_)) {
            tracing::error!(error = %self, correlation_id = %correlation_id, "Internal error surfaced at boundary");
        }

        ErrorBody {
            kind: self.kind().to_string(),
            code,
            message,
            details: serde_json::Value::Null,
            correlation_id,
        }
    }
}

/// Error payload returned across the caller boundary.
///
/// Never carries stack traces or internal state.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
    pub correlation_id: Uuid,
}
