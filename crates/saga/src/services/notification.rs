//! Customer notification hand-off.

use std::sync::{Arc, RwLock};

use common::{CustomerId, Money, OrderId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{read, write};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrderNotification {
    OrderConfirmed {
        order_id: OrderId,
        customer_id: CustomerId,
        total: Money,
    },
    OrderFailed {
        order_id: OrderId,
        customer_id: CustomerId,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("Notification queue rejected event: {0}")]
    Rejected(String),
}

/// Outbound notification queue.
///
/// `enqueue` is synchronous so it can never hold up a saga; delivery happens
/// elsewhere.
pub trait NotificationQueue: Send + Sync {
    fn enqueue(&self, notification: OrderNotification) -> Result<(), NotificationError>;
}

#[derive(Debug, Default)]
struct InMemoryNotificationState {
    sent: Vec<OrderNotification>,
    reject: bool,
}

/// In-memory notification queue for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationQueue {
    state: Arc<RwLock<InMemoryNotificationState>>,
}

impl InMemoryNotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reject(&self, reject: bool) {
        write(&self.state).reject = reject;
    }

    pub fn sent(&self) -> Vec<OrderNotification> {
        read(&self.state).sent.clone()
    }
}

impl NotificationQueue for InMemoryNotificationQueue {
    fn enqueue(&self, notification: OrderNotification) -> Result<(), NotificationError> {
        let mut state = write(&self.state);
        if state.reject {
            return Err(NotificationError::Rejected("queue full".to_string()));
        }
        state.sent.push(notification);
        Ok(())
    }
}
