//! The stock ledger: per-SKU counters plus their reservations.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::{OrderId, ReservationId, Sku};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::Result;
use crate::clock::{Clock, SystemClock};
use crate::error::InventoryError;
use crate::reservation::{Reservation, ReservationStatus, ReservationStore};

/// Default reservation time-to-live, in seconds.
pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 15 * 60;

/// Default time terminal reservations stay queryable before the sweep
/// drops them, in seconds.
pub const DEFAULT_RESOLVED_RETENTION_SECS: i64 = 24 * 60 * 60;

const INDEX_SHARDS: usize = 16;

type IndexShard = RwLock<HashMap<ReservationId, Sku>>;

/// Snapshot of a SKU's counters.
///
/// `available + reserved` is the stock owned for the SKU. Reserve and release
/// only move units between the two counters; commit removes reserved units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StockLevel {
    pub available: u64,
    pub reserved: u64,
}

impl StockLevel {
    /// Units owned, whether available or held by a reservation.
    pub fn on_hand(&self) -> u64 {
        self.available + self.reserved
    }
}

/// Counters and reservations for one SKU. Always accessed under its mutex.
#[derive(Debug, Default)]
struct SkuEntry {
    level: StockLevel,
    reservations: ReservationStore,
}

impl SkuEntry {
    fn snapshot(&self, id: ReservationId) -> Result<(ReservationStatus, u32, DateTime<Utc>)> {
        self.reservations
            .get(&id)
            .map(|r| (r.status, r.quantity, r.expires_at))
            .ok_or(InventoryError::ReservationNotFound(id))
    }

    fn return_units(&mut self, quantity: u32) {
        let quantity = u64::from(quantity);
        debug_assert!(self.level.reserved >= quantity);
        self.level.reserved = self.level.reserved.saturating_sub(quantity);
        self.level.available += quantity;
    }

    fn mark(&mut self, id: ReservationId, status: ReservationStatus, now: DateTime<Utc>) {
        self.reservations.resolve(id, status, now);
    }

    fn commit(&mut self, id: ReservationId, now: DateTime<Utc>) -> Result<()> {
        let (status, quantity, expires_at) = self.snapshot(id)?;
        match status {
            ReservationStatus::Active if now >= expires_at => {
                self.expire(id, now);
                Err(InventoryError::ReservationExpired(id))
            }
            ReservationStatus::Active => {
                let quantity = u64::from(quantity);
                debug_assert!(self.level.reserved >= quantity);
                self.level.reserved = self.level.reserved.saturating_sub(quantity);
                self.mark(id, ReservationStatus::Committed, now);
                Ok(())
            }
            ReservationStatus::Expired => Err(InventoryError::ReservationExpired(id)),
            ReservationStatus::Committed | ReservationStatus::Released => {
                Err(InventoryError::ReservationNotActive { id, status })
            }
        }
    }

    /// Returns true if the reservation moved to Released.
    fn release(&mut self, id: ReservationId, now: DateTime<Utc>) -> Result<bool> {
        let (status, quantity, _) = self.snapshot(id)?;
        match status {
            ReservationStatus::Active => {
                self.return_units(quantity);
                self.mark(id, ReservationStatus::Released, now);
                Ok(true)
            }
            ReservationStatus::Released | ReservationStatus::Expired => Ok(false),
            ReservationStatus::Committed => {
                Err(InventoryError::ReservationNotActive { id, status })
            }
        }
    }

    /// Returns true if the reservation moved to Expired.
    fn expire(&mut self, id: ReservationId, now: DateTime<Utc>) -> bool {
        match self.snapshot(id) {
            Ok((ReservationStatus::Active, quantity, _)) => {
                self.return_units(quantity);
                self.mark(id, ReservationStatus::Expired, now);
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug)]
struct LedgerInner {
    skus: RwLock<HashMap<Sku, Arc<Mutex<SkuEntry>>>>,
    /// Which SKU partition holds each reservation, sharded by ID.
    index: [IndexShard; INDEX_SHARDS],
    clock: Arc<dyn Clock>,
    ttl: Duration,
    retention: Duration,
}

/// Shared stock ledger. Clones share the same state.
///
/// Each SKU has its own mutex guarding both its counters and its
/// reservations. No operation ever holds more than one SKU lock, so
/// multi-item orders reserving SKUs in different orders cannot deadlock.
#[derive(Debug, Clone)]
pub struct StockLedger {
    inner: Arc<LedgerInner>,
}

impl Default for StockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl StockLedger {
    /// Creates an empty ledger using the system clock and the default TTL.
    pub fn new() -> Self {
        Self::with_clock(
            Arc::new(SystemClock),
            Duration::seconds(DEFAULT_RESERVATION_TTL_SECS),
        )
    }

    /// Creates an empty ledger with a custom clock and reservation TTL.
    pub fn with_clock(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self::with_retention(clock, ttl, Duration::seconds(DEFAULT_RESOLVED_RETENTION_SECS))
    }

    /// Creates an empty ledger that forgets terminal reservations once they
    /// have been resolved for longer than `retention`.
    pub fn with_retention(clock: Arc<dyn Clock>, ttl: Duration, retention: Duration) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                skus: RwLock::new(HashMap::new()),
                index: std::array::from_fn(|_| RwLock::new(HashMap::new())),
                clock,
                ttl,
                retention,
            }),
        }
    }

    /// The TTL applied to new reservations.
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Current time according to the ledger's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    async fn entry(&self, sku: &Sku) -> Option<Arc<Mutex<SkuEntry>>> {
        self.inner.skus.read().await.get(sku).cloned()
    }

    async fn entry_or_insert(&self, sku: &Sku) -> Arc<Mutex<SkuEntry>> {
        if let Some(entry) = self.entry(sku).await {
            return entry;
        }
        self.inner
            .skus
            .write()
            .await
            .entry(sku.clone())
            .or_default()
            .clone()
    }

    fn index_shard(&self, id: ReservationId) -> &IndexShard {
        let shard = id.as_uuid().as_u128() % INDEX_SHARDS as u128;
        &self.inner.index[shard as usize]
    }

    async fn locate(&self, id: ReservationId) -> Result<Arc<Mutex<SkuEntry>>> {
        let sku = self
            .index_shard(id)
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(InventoryError::ReservationNotFound(id))?;
        self.entry(&sku)
            .await
            .ok_or(InventoryError::ReservationNotFound(id))
    }

    /// Adds `quantity` units to a SKU's available stock, creating the record
    /// if needed.
    #[tracing::instrument(skip(self, sku), fields(sku = %sku))]
    pub async fn restock(&self, sku: &Sku, quantity: u32) -> Result<StockLevel> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity { quantity });
        }
        let slot = self.entry_or_insert(sku).await;
        let mut entry = slot.lock().await;
        entry.level.available += u64::from(quantity);
        tracing::info!(quantity, available = entry.level.available, "stock restocked");
        Ok(entry.level)
    }

    /// Corrects available stock by `delta` units. Refuses to go below zero.
    ///
    /// Only a positive delta creates a stock record for an unknown SKU.
    #[tracing::instrument(skip(self, sku), fields(sku = %sku))]
    pub async fn adjust(&self, sku: &Sku, delta: i64) -> Result<StockLevel> {
        let slot = if delta > 0 {
            self.entry_or_insert(sku).await
        } else {
            self.entry(sku)
                .await
                .ok_or_else(|| InventoryError::InvalidAdjustment {
                    sku: sku.clone(),
                    delta,
                    available: 0,
                })?
        };
        let mut entry = slot.lock().await;
        let available = entry.level.available;
        let adjusted = if delta >= 0 {
            available.checked_add(delta.unsigned_abs())
        } else {
            available.checked_sub(delta.unsigned_abs())
        };
        entry.level.available = adjusted.ok_or_else(|| InventoryError::InvalidAdjustment {
            sku: sku.clone(),
            delta,
            available,
        })?;
        tracing::info!(delta, available = entry.level.available, "stock adjusted");
        Ok(entry.level)
    }

    /// Current counters for a SKU, if it has a stock record.
    pub async fn stock_level(&self, sku: &Sku) -> Option<StockLevel> {
        let slot = self.entry(sku).await?;
        let entry = slot.lock().await;
        Some(entry.level)
    }

    /// Reserves `quantity` units of `sku` with no order linked yet.
    pub async fn reserve(&self, sku: &Sku, quantity: u32) -> Result<ReservationId> {
        self.reserve_for_order(sku, quantity, None).await
    }

    /// Reserves `quantity` units of `sku`.
    ///
    /// Checks and decrements `available`, increments `reserved` and records an
    /// Active reservation in one critical section for the SKU. Fails with
    /// [`InventoryError::InsufficientStock`] without side effects if fewer than
    /// `quantity` units are available.
    #[tracing::instrument(skip(self, sku), fields(sku = %sku))]
    pub async fn reserve_for_order(
        &self,
        sku: &Sku,
        quantity: u32,
        order_id: Option<OrderId>,
    ) -> Result<ReservationId> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity { quantity });
        }

        let insufficient = |available: u64| {
            metrics::counter!("inventory_insufficient_stock_total").increment(1);
            tracing::debug!(quantity, available, "insufficient stock");
            InventoryError::InsufficientStock {
                sku: sku.clone(),
                requested: quantity,
                available,
            }
        };

        let Some(slot) = self.entry(sku).await else {
            return Err(insufficient(0));
        };
        let mut entry = slot.lock().await;

        let requested = u64::from(quantity);
        if entry.level.available < requested {
            return Err(insufficient(entry.level.available));
        }

        let now = self.now();
        let reservation = Reservation::new(
            sku.clone(),
            quantity,
            order_id,
            now,
            now + self.inner.ttl,
        );
        let id = reservation.id;

        entry.level.available -= requested;
        entry.level.reserved += requested;
        entry.reservations.insert(reservation);
        drop(entry);
        // The ID is unknown to callers until we return, so indexing it after
        // releasing the SKU lock cannot race a commit or release.
        self.index_shard(id).write().await.insert(id, sku.clone());

        metrics::counter!("inventory_reservations_total").increment(1);
        tracing::debug!(reservation_id = %id, quantity, "stock reserved");
        Ok(id)
    }

    /// Permanently removes a reservation's units from stock.
    ///
    /// Fails with [`InventoryError::ReservationExpired`] if the TTL passed,
    /// even when the sweep has not yet run; in that case the units are
    /// returned to `available` first.
    #[tracing::instrument(skip(self))]
    pub async fn commit(&self, id: ReservationId) -> Result<()> {
        let slot = self.locate(id).await?;
        let mut entry = slot.lock().await;
        let result = entry.commit(id, self.now());
        match &result {
            Ok(()) => {
                metrics::counter!("inventory_reservations_committed_total").increment(1);
                tracing::debug!("reservation committed");
            }
            Err(InventoryError::ReservationExpired(_)) => {
                tracing::warn!("commit attempted on expired reservation");
            }
            Err(e) => tracing::warn!(error = %e, "commit rejected"),
        }
        result
    }

    /// Returns a reservation's units to available stock.
    ///
    /// Releasing an already Released or Expired reservation succeeds without
    /// effect, so compensation can release unconditionally.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, id: ReservationId) -> Result<()> {
        let slot = self.locate(id).await?;
        let mut entry = slot.lock().await;
        if entry.release(id, self.now())? {
            metrics::counter!("inventory_reservations_released_total").increment(1);
            tracing::debug!("reservation released");
        }
        Ok(())
    }

    /// Expires every Active reservation whose TTL has passed at `now`,
    /// returning their IDs. Terminal reservations resolved more than the
    /// retention window before `now` are dropped in the same pass.
    ///
    /// Locks one SKU at a time, so it can run alongside order placement.
    pub async fn expire_sweep(&self, now: DateTime<Utc>) -> Vec<ReservationId> {
        let slots: Vec<_> = self.inner.skus.read().await.values().cloned().collect();
        let cutoff = now.checked_sub_signed(self.inner.retention);

        let mut expired = Vec::new();
        let mut pruned = Vec::new();
        for slot in slots {
            let mut entry = slot.lock().await;
            for id in entry.reservations.due(now) {
                if entry.expire(id, now) {
                    expired.push(id);
                }
            }
            if let Some(cutoff) = cutoff {
                pruned.extend(entry.reservations.prune_resolved(cutoff));
            }
        }

        for id in &pruned {
            self.index_shard(*id).write().await.remove(id);
        }
        if !pruned.is_empty() {
            tracing::debug!(count = pruned.len(), "pruned resolved reservations");
        }

        if !expired.is_empty() {
            metrics::counter!("inventory_reservations_expired_total")
                .increment(expired.len() as u64);
            tracing::info!(count = expired.len(), "expired stale reservations");
        }
        expired
    }

    /// Links an active reservation to an order.
    pub async fn attach_order(&self, id: ReservationId, order_id: OrderId) -> Result<()> {
        let slot = self.locate(id).await?;
        let mut entry = slot.lock().await;
        let reservation = entry
            .reservations
            .get_mut(&id)
            .ok_or(InventoryError::ReservationNotFound(id))?;
        if reservation.status.is_terminal() {
            return Err(InventoryError::ReservationNotActive {
                id,
                status: reservation.status,
            });
        }
        reservation.order_id = Some(order_id);
        Ok(())
    }

    /// Looks up a reservation by ID.
    pub async fn reservation(&self, id: ReservationId) -> Option<Reservation> {
        let slot = self.locate(id).await.ok()?;
        let entry = slot.lock().await;
        entry.reservations.get(&id).cloned()
    }

    /// All reservations linked to an order, across SKUs.
    pub async fn reservations_for_order(&self, order_id: OrderId) -> Vec<Reservation> {
        let slots: Vec<_> = self.inner.skus.read().await.values().cloned().collect();
        let mut found = Vec::new();
        for slot in slots {
            let entry = slot.lock().await;
            found.extend(entry.reservations.for_order(order_id).cloned());
        }
        found
    }

    /// Number of reservations currently Active, across SKUs.
    pub async fn active_reservation_count(&self) -> usize {
        let slots: Vec<_> = self.inner.skus.read().await.values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            count += slot
                .lock()
                .await
                .reservations
                .count_with_status(ReservationStatus::Active);
        }
        count
    }
}
