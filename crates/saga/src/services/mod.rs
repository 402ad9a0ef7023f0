//! External collaborator traits and in-memory implementations for saga steps.

pub mod directory;
pub mod inventory;
pub mod notification;
pub mod payment;
pub mod repository;

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use directory::{
    CatalogDirectory, Customer, CustomerDirectory, CustomerStatus, DirectoryError,
    InMemoryCatalog, InMemoryCustomerDirectory, Product,
};
pub use inventory::InventoryService;
pub use notification::{
    InMemoryNotificationQueue, NotificationError, NotificationQueue, OrderNotification,
};
pub use payment::{InMemoryPaymentGateway, PaymentError, PaymentGateway, PaymentMethod, PaymentRef};
pub use repository::{InMemoryOrderRepository, OrderRepository, RepositoryError};

// In-memory state is only mutated in short, panic-free sections, so a
// poisoned lock still guards consistent data.
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
