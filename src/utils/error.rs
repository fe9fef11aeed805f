//! Error handling module
//!
//! Defines the call-level error type, the per-item failure taxonomy and the
//! normalizer that turns any failure into a status code and message

use crate::services::resolver::ReferenceError;
use crate::storage::StorageError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message used for failures whose detail must not reach the caller
pub const GENERIC_FAILURE_MESSAGE: &str = "An unexpected error occurred while processing the request";

/// Call-level errors: these abort the whole batch call before any dispatch
#[derive(Error, Debug)]
pub enum AppError {
    /// Authentication error
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The batch payload could not be decoded
    #[error("Malformed batch request: {0}")]
    MalformedBatchRequest(String),

    /// Payload too large
    #[error("Payload too large")]
    PayloadTooLarge,

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub error_type: String,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

impl AppError {
    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::MalformedBatchRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error type string
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Authentication(_) => "authentication_error",
            AppError::MalformedBatchRequest(_) => "invalid_request_error",
            AppError::PayloadTooLarge => "invalid_request_error",
            AppError::Internal(_) => "api_error",
        }
    }

    /// Whether detailed error information should be logged
    pub fn should_log_details(&self) -> bool {
        !matches!(self, AppError::Authentication(_))
    }

    /// Convert to the JSON error envelope
    pub fn to_error_response(&self) -> ErrorResponse {
        let message = match self {
            // Internal details stay in the logs
            AppError::Internal(_) => GENERIC_FAILURE_MESSAGE.to_string(),
            _ => self.to_string(),
        };

        ErrorResponse {
            error_type: "error".to_string(),
            error: ErrorDetail {
                error_type: self.error_type().to_string(),
                message,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if self.should_log_details() {
            tracing::error!("Application error: {} - Status code: {}", self, status);
        } else {
            tracing::warn!("Client error: {} - Status code: {}", self.error_type(), status);
        }

        (status, Json(self.to_error_response())).into_response()
    }
}

/// Result type alias
pub type AppResult<T> = Result<T, AppError>;

/// Failure of a single sub-request
///
/// Produced by reference resolution, the coordinator's own checks, the
/// dispatcher and the internal handlers. Never escapes the coordinator: it is
/// always normalized into an [`ErrorInfo`] first.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ItemFailure {
    /// Placeholder substitution failed
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// Another item in the batch already used this requestId
    #[error("Duplicate requestId {0} in batch")]
    DuplicateRequestId(i64),

    /// The handler rejected the input
    #[error("Validation failed: {0}")]
    DomainValidation(String),

    /// The caller may not perform this operation
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// The addressed resource or route does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The unit-of-work could not be opened or finalized
    #[error("Unit of work failure: {0}")]
    UnitOfWork(String),

    /// Anything else, including handler panics
    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

impl From<StorageError> for ItemFailure {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ClientNotFound(_) | StorageError::LoanNotFound(_) => {
                ItemFailure::NotFound(err.to_string())
            }
            StorageError::InvalidState(_) => ItemFailure::DomainValidation(err.to_string()),
            StorageError::UnknownTransaction(_) => ItemFailure::UnitOfWork(err.to_string()),
        }
    }
}

/// Normalized failure shape, serialized as the body of a failed sub-response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub status_code: u16,
    pub error_code: String,
    pub message: String,
}

impl ErrorInfo {
    fn new(status: StatusCode, error_code: &str, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            error_code: error_code.to_string(),
            message: message.into(),
        }
    }

    /// Normalize any error value
    ///
    /// Walks the source chain looking for a known failure; anything
    /// unrecognized becomes a generic 500.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(failure) = cause.downcast_ref::<ItemFailure>() {
                return normalize(failure);
            }
            if let Some(storage) = cause.downcast_ref::<StorageError>() {
                return normalize(&ItemFailure::from(storage.clone()));
            }
            if let Some(reference) = cause.downcast_ref::<ReferenceError>() {
                return normalize(&ItemFailure::Reference(reference.clone()));
            }
        }

        tracing::error!("Unrecognized failure normalized to 500: {:#}", err);
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "error.msg.unexpected",
            GENERIC_FAILURE_MESSAGE,
        )
    }

    /// Render as a sub-response body
    pub fn to_body(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
    }
}

impl From<&ItemFailure> for ErrorInfo {
    fn from(failure: &ItemFailure) -> Self {
        normalize(failure)
    }
}

/// Map a failure to its status code and caller-facing message
pub fn normalize(failure: &ItemFailure) -> ErrorInfo {
    match failure {
        ItemFailure::DomainValidation(detail) => ErrorInfo::new(
            StatusCode::BAD_REQUEST,
            "validation.msg.domain.rule.violation",
            detail.clone(),
        ),
        ItemFailure::DuplicateRequestId(_) => ErrorInfo::new(
            StatusCode::BAD_REQUEST,
            "validation.msg.batch.duplicate.request.id",
            failure.to_string(),
        ),
        ItemFailure::Reference(ReferenceError::ParentFailed { .. }) => ErrorInfo::new(
            StatusCode::CONFLICT,
            "error.msg.batch.parent.failed",
            failure.to_string(),
        ),
        ItemFailure::Reference(ReferenceError::Unresolved { .. }) => ErrorInfo::new(
            StatusCode::BAD_REQUEST,
            "error.msg.batch.unresolved.reference",
            failure.to_string(),
        ),
        ItemFailure::Reference(ReferenceError::UnknownPath { .. }) => ErrorInfo::new(
            StatusCode::BAD_REQUEST,
            "error.msg.batch.unknown.placeholder.path",
            failure.to_string(),
        ),
        ItemFailure::Authorization(detail) => ErrorInfo::new(
            StatusCode::FORBIDDEN,
            "error.msg.not.authorized",
            format!("User has no authority to: {}", detail),
        ),
        ItemFailure::NotFound(detail) => ErrorInfo::new(
            StatusCode::NOT_FOUND,
            "error.msg.resource.not.found",
            detail.clone(),
        ),
        ItemFailure::UnitOfWork(detail) => {
            tracing::error!("Unit of work failure: {}", detail);
            ErrorInfo::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "error.msg.transaction.failed",
                GENERIC_FAILURE_MESSAGE,
            )
        }
        ItemFailure::Unexpected(detail) => {
            tracing::error!("Unexpected sub-request failure: {}", detail);
            ErrorInfo::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "error.msg.unexpected",
                GENERIC_FAILURE_MESSAGE,
            )
        }
    }
}

/// Item failure constructors
pub mod helpers {
    use super::*;

    /// Create domain validation failure
    pub fn validation_failure(message: impl Into<String>) -> ItemFailure {
        ItemFailure::DomainValidation(message.into())
    }

    /// Create authorization failure
    pub fn authorization_failure(message: impl Into<String>) -> ItemFailure {
        ItemFailure::Authorization(message.into())
    }

    /// Create not found failure
    pub fn not_found_failure(message: impl Into<String>) -> ItemFailure {
        ItemFailure::NotFound(message.into())
    }

    /// Create unexpected failure
    pub fn unexpected_failure(message: impl Into<String>) -> ItemFailure {
        ItemFailure::Unexpected(message.into())
    }
}

/// Error context extension trait
pub trait ErrorContext<T> {
    /// Add validation failure context
    fn validation_context(self, message: &str) -> Result<T, ItemFailure>;

    /// Add unexpected failure context
    fn unexpected_context(self, message: &str) -> Result<T, ItemFailure>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn validation_context(self, message: &str) -> Result<T, ItemFailure> {
        self.map_err(|e| ItemFailure::DomainValidation(format!("{}: {}", message, e)))
    }

    fn unexpected_context(self, message: &str) -> Result<T, ItemFailure> {
        self.map_err(|e| ItemFailure::Unexpected(format!("{}: {}", message, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(AppError::Authentication("test".to_string()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::MalformedBatchRequest("test".to_string()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::PayloadTooLarge.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(AppError::Internal("test".to_string()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_internal_detail_hidden() {
        let response = AppError::Internal("pool exhausted at db.rs:42".to_string()).to_error_response();
        assert_eq!(response.error.message, GENERIC_FAILURE_MESSAGE);
        assert_eq!(response.error.error_type, "api_error");
    }

    #[test]
    fn test_normalize_priority() {
        assert_eq!(normalize(&helpers::validation_failure("bad")).status_code, 400);
        assert_eq!(normalize(&helpers::authorization_failure("CREATE_LOAN")).status_code, 403);
        assert_eq!(normalize(&helpers::not_found_failure("loan 9")).status_code, 404);
        assert_eq!(normalize(&helpers::unexpected_failure("boom")).status_code, 500);
        assert_eq!(normalize(&ItemFailure::DuplicateRequestId(1)).status_code, 400);
    }

    #[test]
    fn test_validation_message_is_detail() {
        let info = normalize(&helpers::validation_failure("principal must be positive"));
        assert_eq!(info.message, "principal must be positive");
    }

    #[test]
    fn test_unexpected_does_not_leak() {
        let info = normalize(&helpers::unexpected_failure("index out of bounds at ledger.rs:10"));
        assert_eq!(info.message, GENERIC_FAILURE_MESSAGE);
        assert!(!info.to_body().contains("ledger.rs"));
    }

    #[test]
    fn test_from_anyhow_finds_wrapped_failure() {
        let err = anyhow::Error::new(helpers::not_found_failure("client 7")).context("while dispatching");
        assert_eq!(ErrorInfo::from_anyhow(&err).status_code, 404);

        let foreign = anyhow::anyhow!("socket closed");
        assert_eq!(ErrorInfo::from_anyhow(&foreign).status_code, 500);
    }

    #[test]
    fn test_error_context() {
        let result: Result<serde_json::Value, serde_json::Error> = serde_json::from_str("{oops");
        match result.validation_context("Invalid client payload") {
            Err(ItemFailure::DomainValidation(msg)) => assert!(msg.starts_with("Invalid client payload")),
            other => panic!("Expected validation failure, got {:?}", other),
        }
    }
}
