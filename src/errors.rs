use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Stable machine-readable code (e.g., "empty_cart")
    pub code: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(
        "Invalid quantity: {0} (a cart line holds 1 to {max})",
        max = crate::services::commerce::cart_service::MAX_LINE_QUANTITY
    )]
    InvalidQuantity(i32),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Service no longer available: {0}")]
    ServiceUnavailable(String),

    #[error("Cart item {0} not found")]
    ItemNotFound(Uuid),

    #[error("Cart is empty for session {0}")]
    EmptyCart(String),

    #[error("Concurrent checkout: {0}")]
    ConcurrentCheckout(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid transition from '{from}' to '{to}' via {trigger}")]
    InvalidTransition {
        from: String,
        to: String,
        trigger: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Catalog error: {0}")]
    CatalogError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Stable machine-readable code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::UnknownService(_) => "unknown_service",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::ItemNotFound(_) => "item_not_found",
            Self::EmptyCart(_) => "empty_cart",
            Self::ConcurrentCheckout(_) => "concurrent_checkout",
            Self::Conflict(_) => "conflict",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::CatalogError(_) => "catalog_error",
            Self::DatabaseError(_) | Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidQuantity(_) | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::UnknownService(_) | Self::ItemNotFound(_) | Self::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::ServiceUnavailable(_) | Self::EmptyCart(_) | Self::InvalidTransition { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::ConcurrentCheckout(_) | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::CatalogError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            Self::CatalogError(_) => "Service catalog temporarily unavailable".to_string(),
            _ => self.to_string(),
        }
    }

    /// Whether a single internal retry may succeed where this attempt failed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::CatalogError(_) => true,
            Self::DatabaseError(err) => matches!(
                err,
                DbErr::ConnectionAcquire(_) | DbErr::Conn(_)
            ),
            _ => false,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

/// API Error type for HTTP responses
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::ServiceError(service_error) => return service_error.into_response(),
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
        };

        let error_response = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            code: code.to_string(),
            message,
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(error_response)).into_response()
    }
}

/// Returns true when the database rejected a write on a unique index.
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(
        err.sql_err(),
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
    )
}
