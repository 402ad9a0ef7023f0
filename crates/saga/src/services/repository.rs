//! Durable order persistence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::OrderId;
use thiserror::Error;

use super::{read, write};
use crate::order::{Order, OrderStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Trait for order storage.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Inserts or replaces the order record.
    async fn save(&self, order: &Order) -> Result<(), RepositoryError>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;
}

#[derive(Debug, Default)]
struct InMemoryRepositoryState {
    orders: HashMap<OrderId, Order>,
    fail_on_save: bool,
    fail_on_status: Option<OrderStatus>,
}

/// In-memory order repository for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    state: Arc<RwLock<InMemoryRepositoryState>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures every save to fail.
    pub fn set_fail_on_save(&self, fail: bool) {
        write(&self.state).fail_on_save = fail;
    }

    /// Configures saves of orders in `status` to fail.
    pub fn set_fail_on_status(&self, status: Option<OrderStatus>) {
        write(&self.state).fail_on_status = status;
    }

    pub fn order_count(&self) -> usize {
        read(&self.state).orders.len()
    }

    pub fn orders_with_status(&self, status: OrderStatus) -> Vec<Order> {
        read(&self.state)
            .orders
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn save(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut state = write(&self.state);
        if state.fail_on_save || state.fail_on_status == Some(order.status) {
            return Err(RepositoryError::Unavailable("write rejected".to_string()));
        }
        state.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(read(&self.state).orders.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::CustomerId;

    #[tokio::test]
    async fn test_save_and_get() {
        let repo = InMemoryOrderRepository::new();
        let mut order = Order::pending(OrderId::new(), CustomerId::new(), vec![]);
        repo.save(&order).await.unwrap();

        order.status = OrderStatus::Confirmed;
        repo.save(&order).await.unwrap();

        let stored = repo.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Confirmed);
        assert_eq!(repo.order_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_on_save() {
        let repo = InMemoryOrderRepository::new();
        repo.set_fail_on_save(true);
        let order = Order::pending(OrderId::new(), CustomerId::new(), vec![]);

        assert!(repo.save(&order).await.is_err());
        assert_eq!(repo.order_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_on_status() {
        let repo = InMemoryOrderRepository::new();
        repo.set_fail_on_status(Some(OrderStatus::Confirmed));
        let mut order = Order::pending(OrderId::new(), CustomerId::new(), vec![]);

        repo.save(&order).await.unwrap();
        order.status = OrderStatus::Confirmed;
        assert!(repo.save(&order).await.is_err());
        assert_eq!(repo.orders_with_status(OrderStatus::Pending).len(), 1);
    }
}
