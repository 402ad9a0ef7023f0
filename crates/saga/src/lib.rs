//! Order placement saga.
//!
//! The [`OrderPlacementCoordinator`] turns a [`PlaceOrder`] request into a
//! Confirmed [`Order`] by running these steps:
//! 1. Validate the request
//! 2. Resolve the customer and each product, snapshotting prices
//! 3. Reserve stock for each line item
//! 4. Authorize payment for the total
//! 5. Persist the order
//! 6. Commit each reservation
//!
//! A failure after step 3 enqueues compensation (reservation release and,
//! after step 4, a refund) on the [`CompensationQueue`], which retries until
//! the action succeeds or escalates it as a reconciliation item.

pub mod aggregate;
pub mod compensation;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod journal;
pub mod order;
pub mod reconciliation;
pub mod services;
pub mod state;

pub use aggregate::SagaInstance;
pub use compensation::{CompensationError, CompensationQueue, CompensationTask};
pub use config::{CommitFailurePolicy, RetryPolicy, SagaConfig};
pub use coordinator::{Collaborators, OrderPlacementCoordinator, idempotency_key};
pub use error::{PlaceOrderError, SagaError};
pub use events::SagaEvent;
pub use journal::{InMemorySagaLog, SagaLog};
pub use order::{LineItem, Order, OrderLine, OrderStatus, PlaceOrder};
pub use reconciliation::{InMemoryReconciliationLog, ReconciliationEvent, ReconciliationSink};
pub use services::{
    CatalogDirectory, Customer, CustomerDirectory, CustomerStatus, DirectoryError,
    InMemoryCatalog, InMemoryCustomerDirectory, InMemoryNotificationQueue,
    InMemoryOrderRepository, InMemoryPaymentGateway, InventoryService, NotificationError,
    NotificationQueue, OrderNotification, OrderRepository, PaymentError, PaymentGateway,
    PaymentMethod, PaymentRef, Product, RepositoryError,
};
pub use state::SagaState;
