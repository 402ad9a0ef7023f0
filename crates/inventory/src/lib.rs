//! Inventory reservation engine.
//!
//! The [`StockLedger`] is the sole owner of per-SKU stock counters and the
//! reservations taken against them. Every mutation goes through one of its
//! atomic operations:
//! - `reserve` moves units from `available` to `reserved`
//! - `commit` removes reserved units permanently
//! - `release` returns reserved units to `available`
//! - `expire_sweep` releases reservations whose TTL has passed
//!
//! Operations on one SKU are serialized; different SKUs proceed independently.

pub mod clock;
pub mod error;
pub mod ledger;
pub mod reservation;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::InventoryError;
pub use ledger::{
    DEFAULT_RESERVATION_TTL_SECS, DEFAULT_RESOLVED_RETENTION_SECS, StockLedger, StockLevel,
};
pub use reservation::{Reservation, ReservationStatus, ReservationStore};
pub use sweeper::spawn_expiry_sweeper;

/// Convenience type alias for inventory results.
pub type Result<T> = std::result::Result<T, InventoryError>;
