//! Shared types for the order placement workspace.

mod ids;
mod money;

pub use ids::{CustomerId, OrderId, ReservationId, Sku};
pub use money::Money;
