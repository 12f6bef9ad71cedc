//! Pipeline error types with HTTP status code mapping.
//!
//! [`PipelineError`] is the central error type for every service. Each
//! variant maps to a specific HTTP status code and structured JSON error
//! response, so the same value can be logged by a background loop or
//! returned from an Axum handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::broker::BrokerError;
use crate::fetch::FetchError;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid request: threshold must be positive",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see [`PipelineError`] for the ranges).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category         | HTTP Status                 |
/// |-----------|------------------|-----------------------------|
/// | 1000–1999 | Validation       | 400 Bad Request             |
/// | 2000–2999 | Not Found        | 404 Not Found               |
/// | 3000–3999 | Server/Upstream  | 500 / 502                   |
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Priority band outside `0..=10`.
    #[error("invalid priority {0}: must be between 0 and 10")]
    InvalidPriority(i64),

    /// Item with the given external identifier was not found.
    #[error("item not found: {0}")]
    ItemNotFound(String),

    /// Item with the given internal id was not found.
    #[error("item not found: #{0}")]
    ItemIdNotFound(i64),

    /// Variant with the given internal id was not found.
    #[error("variant not found: #{0}")]
    VariantNotFound(i64),

    /// User with the given id was not found.
    #[error("user not found: #{0}")]
    UserNotFound(i64),

    /// Category with the given external identifier was not found.
    #[error("category not found: {0}")]
    CategoryNotFound(String),

    /// Notification with the given id was not found.
    #[error("notification not found: #{0}")]
    NotificationNotFound(i64),

    /// No alert rule exists for the (user, item) pair.
    #[error("price alert not found for user #{user_id} and item #{item_id}")]
    AlertNotFound {
        /// User the rule would belong to.
        user_id: i64,
        /// Item the rule would watch.
        item_id: i64,
    },

    /// Upstream catalog fetch failed.
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Message broker failure.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::InvalidPriority(_) => 1002,
            Self::ItemNotFound(_) | Self::ItemIdNotFound(_) => 2001,
            Self::VariantNotFound(_) => 2002,
            Self::UserNotFound(_) => 2003,
            Self::CategoryNotFound(_) => 2004,
            Self::NotificationNotFound(_) => 2005,
            Self::AlertNotFound { .. } => 2006,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::Broker(_) => 3002,
            Self::Fetch(_) => 3003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::InvalidPriority(_) => StatusCode::BAD_REQUEST,
            Self::ItemNotFound(_)
            | Self::ItemIdNotFound(_)
            | Self::VariantNotFound(_)
            | Self::UserNotFound(_)
            | Self::CategoryNotFound(_)
            | Self::NotificationNotFound(_)
            | Self::AlertNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Fetch(_) => StatusCode::BAD_GATEWAY,
            Self::Broker(_) | Self::PersistenceError(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
