//! Orders produced by the placement saga.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, ReservationId, Sku};
use serde::{Deserialize, Serialize};

use crate::error::PlaceOrderError;
use crate::services::payment::{PaymentMethod, PaymentRef};

/// A requested line: which SKU and how many.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: Sku,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(sku: impl Into<Sku>, quantity: u32) -> Self {
        Self {
            sku: sku.into(),
            quantity,
        }
    }
}

/// Input to [`OrderPlacementCoordinator::place_order`](crate::OrderPlacementCoordinator::place_order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub customer_id: CustomerId,
    pub items: Vec<LineItem>,
    pub payment_method: PaymentMethod,
    pub payment_token: String,
}

impl PlaceOrder {
    /// Checks the request shape: at least one item, no SKU twice, and every
    /// quantity in `1..=max_quantity`.
    pub fn validate(&self, max_quantity: u32) -> Result<(), PlaceOrderError> {
        if self.items.is_empty() {
            return Err(PlaceOrderError::InvalidInput(
                "order has no line items".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.items.len());
        for item in &self.items {
            if !seen.insert(&item.sku) {
                return Err(PlaceOrderError::InvalidInput(format!(
                    "duplicate SKU {}",
                    item.sku
                )));
            }
            if item.quantity == 0 || item.quantity > max_quantity {
                return Err(PlaceOrderError::InvalidInput(format!(
                    "quantity {} for {} must be between 1 and {max_quantity}",
                    item.quantity, item.sku
                )));
            }
        }
        Ok(())
    }
}

/// An order line with the unit price snapshotted at placement time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: Sku,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLine {
    /// quantity * unit_price
    pub fn total_price(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Sum of the line totals, or `None` if it does not fit in [`Money`].
pub fn checked_total(lines: &[OrderLine]) -> Option<Money> {
    lines.iter().try_fold(Money::zero(), |total, line| {
        total.checked_add(line.unit_price.checked_multiply(line.quantity)?)
    })
}

/// Lifecycle of an order record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Persisted, reservations not yet committed.
    Pending,
    /// Paid, persisted and committed (terminal).
    Confirmed,
    /// Abandoned after persistence (terminal).
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An order as produced by the saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub lines: Vec<OrderLine>,
    pub total: Money,
    pub status: OrderStatus,
    pub payment_ref: Option<PaymentRef>,
    /// One reservation per line, in line order.
    pub reservation_ids: Vec<ReservationId>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Creates a Pending order and computes its total from the line snapshots.
    pub fn pending(id: OrderId, customer_id: CustomerId, lines: Vec<OrderLine>) -> Self {
        let total = lines.iter().map(OrderLine::total_price).sum();
        Self {
            id,
            customer_id,
            lines,
            total,
            status: OrderStatus::Pending,
            payment_ref: None,
            reservation_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == OrderStatus::Confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(items: Vec<LineItem>) -> PlaceOrder {
        PlaceOrder {
            customer_id: CustomerId::new(),
            items,
            payment_method: PaymentMethod::Card,
            payment_token: "tok_visa".to_string(),
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_request() {
        let req = request(vec![LineItem::new("A", 1), LineItem::new("B", 10)]);
        assert!(req.validate(10).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty() {
        let err = request(vec![]).validate(10).unwrap_err();
        assert!(matches!(err, PlaceOrderError::InvalidInput(_)));
    }

    #[test]
    fn test_validate_rejects_duplicate_sku() {
        let req = request(vec![LineItem::new("A", 1), LineItem::new("A", 2)]);
        assert_eq!(
            req.validate(10).unwrap_err(),
            PlaceOrderError::InvalidInput("duplicate SKU A".to_string())
        );
    }

    #[test]
    fn test_validate_rejects_bad_quantities() {
        assert!(request(vec![LineItem::new("A", 0)]).validate(10).is_err());
        assert!(request(vec![LineItem::new("A", 11)]).validate(10).is_err());
    }

    #[test]
    fn test_pending_order_total() {
        let lines = vec![
            OrderLine {
                sku: Sku::new("A"),
                product_name: "Widget".to_string(),
                quantity: 2,
                unit_price: Money::from_cents(1000),
            },
            OrderLine {
                sku: Sku::new("B"),
                product_name: "Gadget".to_string(),
                quantity: 1,
                unit_price: Money::from_cents(2500),
            },
        ];
        let order = Order::pending(OrderId::new(), CustomerId::new(), lines);
        assert_eq!(order.total, Money::from_cents(4500));
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.payment_ref.is_none());
        assert!(!order.is_confirmed());
    }
}
