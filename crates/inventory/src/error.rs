//! Inventory error types.

use common::{ReservationId, Sku};
use thiserror::Error;

use crate::reservation::ReservationStatus;

/// Errors returned by [`StockLedger`](crate::StockLedger) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    /// Not enough available units to satisfy a reservation.
    #[error("Insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock {
        sku: Sku,
        requested: u32,
        available: u64,
    },

    /// Reservation quantities must be positive.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// No reservation exists with the given ID.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// The reservation already reached a terminal status.
    #[error("Reservation {id} is not active (status: {status})")]
    ReservationNotActive {
        id: ReservationId,
        status: ReservationStatus,
    },

    /// The reservation's TTL passed before it was committed.
    #[error("Reservation expired: {0}")]
    ReservationExpired(ReservationId),

    /// The inventory backend could not be reached. Retryable.
    #[error("Inventory unavailable: {0}")]
    Unavailable(String),

    /// A stock adjustment would drive available stock below zero.
    #[error("Invalid adjustment for {sku}: {delta} with {available} available")]
    InvalidAdjustment {
        sku: Sku,
        delta: i64,
        available: u64,
    },
}

impl InventoryError {
    /// Returns true if the same call may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InventoryError::Unavailable(_))
    }
}
