//! Saga error types.

use common::{CustomerId, OrderId, ReservationId, Sku};
use thiserror::Error;

/// Why an order placement attempt failed.
///
/// Variants up to and including the product checks are raised before any
/// side effect. Later variants are returned after compensation for the
/// attempt has been enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceOrderError {
    /// Malformed request: no items, duplicate SKU or bad quantity.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The order ID was already used by an earlier attempt that did not
    /// confirm, or by one still running.
    #[error("Order {0} was already submitted")]
    DuplicateOrder(OrderId),

    #[error("Customer not found: {0}")]
    CustomerNotFound(CustomerId),

    #[error("Customer is inactive: {0}")]
    CustomerInactive(CustomerId),

    #[error("Product not found: {0}")]
    ProductNotFound(Sku),

    #[error("Product unavailable: {0}")]
    ProductUnavailable(Sku),

    /// A customer or catalog lookup failed outright.
    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Insufficient stock for {0}")]
    InsufficientStock(Sku),

    /// The inventory backend failed for a reason other than stock levels.
    #[error("Inventory error: {0}")]
    Inventory(String),

    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    /// Gateway failures persisted across every retry.
    #[error("Payment gateway error: {0}")]
    PaymentGatewayError(String),

    #[error("Order persistence failed: {0}")]
    OrderPersistenceFailed(String),

    /// Only returned under [`CommitFailurePolicy::FailOrder`](crate::CommitFailurePolicy).
    #[error("Reservation expired before commit: {0}")]
    ReservationExpired(ReservationId),
}

impl PlaceOrderError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PlaceOrderError::InvalidInput(_) => "invalid_input",
            PlaceOrderError::DuplicateOrder(_) => "duplicate_order",
            PlaceOrderError::CustomerNotFound(_) => "customer_not_found",
            PlaceOrderError::CustomerInactive(_) => "customer_inactive",
            PlaceOrderError::ProductNotFound(_) => "product_not_found",
            PlaceOrderError::ProductUnavailable(_) => "product_unavailable",
            PlaceOrderError::DirectoryUnavailable(_) => "directory_unavailable",
            PlaceOrderError::InsufficientStock(_) => "insufficient_stock",
            PlaceOrderError::Inventory(_) => "inventory",
            PlaceOrderError::PaymentDeclined(_) => "payment_declined",
            PlaceOrderError::PaymentGatewayError(_) => "payment_gateway_error",
            PlaceOrderError::OrderPersistenceFailed(_) => "order_persistence_failed",
            PlaceOrderError::ReservationExpired(_) => "reservation_expired",
        }
    }
}

/// Errors from the saga journal.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The journal backend rejected a read or write.
    #[error("Saga journal unavailable: {0}")]
    Journal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga journal results.
pub type Result<T> = std::result::Result<T, SagaError>;
