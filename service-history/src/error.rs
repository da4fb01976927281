//! Error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Stable classification of an [`Error`], independent of its message
///
/// Transport adapters map the kind to a status code; the message is only
/// meant for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Destination could not be resolved from remote configuration
    ConfigUnavailable,
    /// Identifier missing or empty
    InvalidId,
    /// Malformed time bound or `start > end`
    InvalidTimeRange,
    /// Create payload is not a flat map of scalars
    InvalidPayload,
    /// Append to the destination failed
    WriteFailure,
    /// Poll budget or invocation budget exhausted
    QueryTimeout,
    /// Backend reported the query as failed
    QueryFailed,
    /// Update or delete intent
    ImmutableOperationRejected,
    /// Request shape or method not understood
    UnsupportedOperation,
    /// Local service configuration, I/O or other internal error
    Internal,
}

impl ErrorKind {
    /// Error code used in response bodies
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ConfigUnavailable => "CONFIG_UNAVAILABLE",
            Self::InvalidId => "INVALID_ID",
            Self::InvalidTimeRange => "INVALID_TIME_RANGE",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::WriteFailure => "WRITE_FAILURE",
            Self::QueryTimeout => "QUERY_TIMEOUT",
            Self::QueryFailed => "QUERY_FAILED",
            Self::ImmutableOperationRejected => "IMMUTABLE_OPERATION_REJECTED",
            Self::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code the kind maps to
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidId
            | Self::InvalidTimeRange
            | Self::InvalidPayload
            | Self::UnsupportedOperation => StatusCode::BAD_REQUEST,
            Self::ImmutableOperationRejected => StatusCode::METHOD_NOT_ALLOWED,
            Self::ConfigUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::WriteFailure | Self::QueryFailed => StatusCode::BAD_GATEWAY,
            Self::QueryTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// Remote configuration unreachable or missing the destination key
    #[error("Configuration unavailable: {0}")]
    ConfigUnavailable(String),

    /// Missing or empty identifier
    #[error("Invalid id: {0}")]
    InvalidId(String),

    /// Malformed time bound or inverted window
    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    /// Create payload could not be accepted
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Append to the destination failed
    #[error("Write failed: {0}")]
    WriteFailure(String),

    /// Query did not complete within its budget
    #[error("Query timed out after {attempts} poll attempt(s)")]
    QueryTimeout {
        /// Poll calls made before giving up
        attempts: u32,
    },

    /// Query submission or execution failed on the backend
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Update and delete are never supported
    #[error("Method not allowed. Update and Delete operations are not supported.")]
    ImmutableOperationRejected,

    /// Unknown method or request shape
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Local configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl Error {
    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigUnavailable(_) => ErrorKind::ConfigUnavailable,
            Self::InvalidId(_) => ErrorKind::InvalidId,
            Self::InvalidTimeRange(_) => ErrorKind::InvalidTimeRange,
            Self::InvalidPayload(_) => ErrorKind::InvalidPayload,
            Self::WriteFailure(_) => ErrorKind::WriteFailure,
            Self::QueryTimeout { .. } => ErrorKind::QueryTimeout,
            Self::QueryFailed(_) => ErrorKind::QueryFailed,
            Self::ImmutableOperationRejected => ErrorKind::ImmutableOperationRejected,
            Self::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable message
    pub message: String,

    /// Stable error code
    pub code: String,

    /// Always `false`
    pub success: bool,
}

impl ErrorResponse {
    /// Create an error response for the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: kind.code().to_string(),
            success: false,
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let kind = self.kind();

        // Backend and internal details stay in the logs
        let message = match &self {
            Error::ConfigUnavailable(msg) => {
                tracing::error!(error = %msg, "Destination resolution failed");
                "Service configuration unavailable".to_string()
            }
            Error::WriteFailure(msg) => {
                tracing::error!(error = %msg, "Write to log store failed");
                "Failed to record data".to_string()
            }
            Error::QueryFailed(msg) => {
                tracing::error!(error = %msg, "History query failed");
                "History query failed".to_string()
            }
            Error::QueryTimeout { attempts } => {
                tracing::warn!(attempts, "History query timed out");
                self.to_string()
            }
            Error::Config(_) | Error::Io(_) | Error::Internal(_) => {
                tracing::error!("Internal error: {}", self);
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        (kind.status(), Json(ErrorResponse::new(kind, message))).into_response()
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_status_mapping() {
        assert_eq!(
            Error::ImmutableOperationRejected.kind().status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            Error::QueryTimeout { attempts: 30 }.kind().status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            Error::InvalidTimeRange("start after end".into()).kind().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::ConfigUnavailable("missing key".into()).kind().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_internal_errors_share_kind() {
        let io = Error::Io(std::io::Error::other("disk"));
        assert_eq!(io.kind(), ErrorKind::Internal);
        assert_eq!(Error::Internal("x".into()).kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_into_response_hides_backend_detail() {
        let response = Error::WriteFailure("AccessDenied for arn:secret".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.code, "WRITE_FAILURE");
        assert!(!parsed.success);
        assert!(!parsed.message.contains("arn:secret"));
    }
}
