//! Inventory operations the saga needs, backed by the stock ledger.

use async_trait::async_trait;
use common::{OrderId, ReservationId, Sku};
use inventory::{InventoryError, StockLedger};

/// Trait for the stock operations used by the saga and its compensations.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Reserves `quantity` units of `sku` for an order.
    async fn reserve(
        &self,
        order_id: OrderId,
        sku: &Sku,
        quantity: u32,
    ) -> Result<ReservationId, InventoryError>;

    /// Permanently takes a reservation's units out of stock.
    async fn commit(&self, reservation_id: ReservationId) -> Result<(), InventoryError>;

    /// Returns a reservation's units to available stock. Succeeds without
    /// effect on Released or Expired reservations.
    async fn release(&self, reservation_id: ReservationId) -> Result<(), InventoryError>;

    /// Puts previously committed units back into available stock.
    async fn restock(&self, sku: &Sku, quantity: u32) -> Result<(), InventoryError>;
}

#[async_trait]
impl InventoryService for StockLedger {
    async fn reserve(
        &self,
        order_id: OrderId,
        sku: &Sku,
        quantity: u32,
    ) -> Result<ReservationId, InventoryError> {
        self.reserve_for_order(sku, quantity, Some(order_id)).await
    }

    async fn commit(&self, reservation_id: ReservationId) -> Result<(), InventoryError> {
        StockLedger::commit(self, reservation_id).await
    }

    async fn release(&self, reservation_id: ReservationId) -> Result<(), InventoryError> {
        StockLedger::release(self, reservation_id).await
    }

    async fn restock(&self, sku: &Sku, quantity: u32) -> Result<(), InventoryError> {
        StockLedger::restock(self, sku, quantity).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inventory::ReservationStatus;

    #[tokio::test]
    async fn test_ledger_reserve_links_order() {
        let ledger = StockLedger::new();
        let sku = Sku::new("SKU-001");
        ledger.restock(&sku, 3).await.unwrap();
        let order_id = OrderId::new();

        let service: &dyn InventoryService = &ledger;
        let id = service.reserve(order_id, &sku, 2).await.unwrap();

        let reservation = ledger.reservation(id).await.unwrap();
        assert_eq!(reservation.order_id, Some(order_id));

        service.commit(id).await.unwrap();
        assert_eq!(
            ledger.reservation(id).await.unwrap().status,
            ReservationStatus::Committed
        );

        service.restock(&sku, 2).await.unwrap();
        assert_eq!(ledger.stock_level(&sku).await.unwrap().available, 3);
    }
}
