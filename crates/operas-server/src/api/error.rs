//! API error types and response handling.
//!
//! Every handler error becomes an [`ApiError`], which renders as a JSON
//! [`ErrorResponse`] with a matching HTTP status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 403 Forbidden - The capability gate refused the operation.
    Forbidden {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Names of the gates that are closed.
        closed_gates: Vec<String>,
    },

    /// 404 Not Found - Resource does not exist.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional details.
        details: Option<String>,
    },

    /// 503 Service Unavailable - The radio is unavailable.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional additional details.
        details: Option<String>,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "invalid_id_length",
    "message": "Invalid beacon data: Identifier must be 40 hex characters, got 12",
    "details": null
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "permission_denied").
    #[schema(example = "invalid_id_length")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Invalid beacon data: Identifier must be 40 hex characters, got 12")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::BadRequest { error_code, message } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::Forbidden {
                error_code,
                message,
                closed_gates,
            } => (
                StatusCode::FORBIDDEN,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: Some(serde_json::json!({ "closed_gates": closed_gates })),
                },
            ),

            Self::NotFound { error_code, message } => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: error_code,
                        message,
                        details: details.map(|d| serde_json::json!(d)),
                    },
                )
            }

            Self::ServiceUnavailable {
                error_code,
                message,
                details,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: details.map(|d| serde_json::json!(d)),
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::Forbidden { message, .. } => write!(f, "Forbidden: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::InternalError { message, .. } => write!(f, "Internal Error: {message}"),
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// Attaches the names of the closed gates to a `Forbidden` error.
    #[must_use]
    pub fn with_closed_gates(self, gates: &[&str]) -> Self {
        match self {
            Self::Forbidden {
                error_code,
                message,
                ..
            } => Self::Forbidden {
                error_code,
                message,
                closed_gates: gates.iter().map(ToString::to_string).collect(),
            },
            other => other,
        }
    }
}

/// Convert from operas_core errors.
impl From<operas_core::OperasError> for ApiError {
    fn from(err: operas_core::OperasError) -> Self {
        use operas_core::OperasError;

        let error_code = err.error_code().to_ascii_lowercase();
        match &err {
            OperasError::Encoding(_) => Self::BadRequest {
                error_code,
                message: err.to_string(),
            },
            OperasError::PermissionDenied => Self::Forbidden {
                error_code,
                message: err.to_string(),
                closed_gates: Vec::new(),
            },
            OperasError::RadioAdapterNotFound
            | OperasError::RadioAdapterPoweredOff
            | OperasError::RadioUnavailable(_) => Self::ServiceUnavailable {
                error_code,
                message: err.to_string(),
                details: None,
            },
            OperasError::ConfigNotFound(_)
            | OperasError::ConfigParseError(_)
            | OperasError::ConfigValidationError(_)
            | OperasError::PersistenceError(_)
            | OperasError::IoError(_) => Self::InternalError {
                error_code,
                message: err.to_string(),
                details: None,
            },
        }
    }
}

impl From<operas_core::EncodingError> for ApiError {
    fn from(err: operas_core::EncodingError) -> Self {
        Self::from(operas_core::OperasError::from(err))
    }
}
