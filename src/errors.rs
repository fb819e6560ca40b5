use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Machine-readable reason (e.g., "stock_unavailable")
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Out of stock: product {product_id} (requested {requested}, available {available})")]
    OutOfStock {
        product_id: String,
        requested: u32,
        available: u32,
    },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i64),

    #[error("Cart is empty")]
    CartEmpty,

    #[error("Session not found or expired: {0}")]
    SessionNotFound(String),

    #[error("Stock unavailable for product {0}")]
    StockUnavailable(String),

    #[error("Payment gateway error: {0}")]
    GatewayError(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Order not found: {0}")]
    UnknownOrder(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Order already finalized: {0}")]
    AlreadyFinalized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout(op) => ServiceError::Timeout(op),
            StoreError::Serialization(msg) => ServiceError::SerializationError(msg),
            StoreError::Backend(msg) => ServiceError::StoreError(msg),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidQuantity(_)
            | Self::CartEmpty
            | Self::InvalidInput(_)
            | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            Self::SessionNotFound(_) | Self::UnknownOrder(_) | Self::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::OutOfStock { .. } | Self::StockUnavailable(_) => StatusCode::CONFLICT,
            Self::InvalidTransition(_)
            | Self::AlreadyFinalized(_)
            | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::GatewayError(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::StoreError(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::SerializationError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable reason code rendered in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::OutOfStock { .. } => "out_of_stock",
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::CartEmpty => "cart_empty",
            Self::SessionNotFound(_) => "session_not_found",
            Self::StockUnavailable(_) => "stock_unavailable",
            Self::GatewayError(_) => "gateway_error",
            Self::InvalidSignature(_) => "invalid_signature",
            Self::UnknownOrder(_) => "order_not_found",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::AlreadyFinalized(_) => "already_finalized",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::ValidationError(_) => "validation_error",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::Timeout(_) => "timeout",
            Self::StoreError(_) => "store_unavailable",
            Self::SerializationError(_) | Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Infrastructure errors return generic messages to avoid leaking store details.
    pub fn response_message(&self) -> String {
        match self {
            Self::StoreError(_) => "Storage temporarily unavailable".to_string(),
            Self::Timeout(_) => "Operation timed out".to_string(),
            Self::SerializationError(_) | Self::InternalError(_) => {
                "Internal server error".to_string()
            }
            Self::GatewayError(_) => "Payment provider unavailable".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

/// Route-level error: either a domain failure or a malformed request.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Bad request: {message}")]
    BadRequest {
        message: String,
        error_code: Option<String>,
    },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::ServiceError(service_error) => return service_error.into_response(),
            ApiError::BadRequest {
                message,
                error_code,
            } => (
                StatusCode::BAD_REQUEST,
                error_code.unwrap_or_else(|| "invalid_request".to_string()),
                message,
            ),
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, "not_found".to_string(), message)
            }
        };

        let error_response = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            code,
            message,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(error_response)).into_response()
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            error_code: None,
        }
    }
}
