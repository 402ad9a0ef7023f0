//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use inventory::InventoryError;
use saga::{PlaceOrderError, RepositoryError, SagaError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Order placement failed.
    PlaceOrder(PlaceOrderError),
    /// Stock operation failed.
    Inventory(InventoryError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::PlaceOrder(err) => (place_order_status(&err), err.kind(), err.to_string()),
            ApiError::Inventory(err) => (inventory_status(&err), "inventory", err.to_string()),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
            }
        };

        let body = serde_json::json!({ "error": message, "kind": kind });
        (status, axum::Json(body)).into_response()
    }
}

fn place_order_status(err: &PlaceOrderError) -> StatusCode {
    match err {
        PlaceOrderError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        PlaceOrderError::CustomerNotFound(_) | PlaceOrderError::ProductNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        PlaceOrderError::DuplicateOrder(_)
        | PlaceOrderError::CustomerInactive(_)
        | PlaceOrderError::ProductUnavailable(_)
        | PlaceOrderError::InsufficientStock(_)
        | PlaceOrderError::ReservationExpired(_) => StatusCode::CONFLICT,
        PlaceOrderError::PaymentDeclined(_) => StatusCode::PAYMENT_REQUIRED,
        PlaceOrderError::PaymentGatewayError(_)
        | PlaceOrderError::DirectoryUnavailable(_)
        | PlaceOrderError::Inventory(_) => StatusCode::BAD_GATEWAY,
        PlaceOrderError::OrderPersistenceFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn inventory_status(err: &InventoryError) -> StatusCode {
    match err {
        InventoryError::InvalidQuantity { .. } | InventoryError::InvalidAdjustment { .. } => {
            StatusCode::BAD_REQUEST
        }
        InventoryError::ReservationNotFound(_) => StatusCode::NOT_FOUND,
        InventoryError::InsufficientStock { .. }
        | InventoryError::ReservationNotActive { .. }
        | InventoryError::ReservationExpired(_) => StatusCode::CONFLICT,
        InventoryError::Unavailable(_) => StatusCode::BAD_GATEWAY,
    }
}

impl From<PlaceOrderError> for ApiError {
    fn from(err: PlaceOrderError) -> Self {
        ApiError::PlaceOrder(err)
    }
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        ApiError::Inventory(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
