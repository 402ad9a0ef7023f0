//! Reservation records and the per-SKU store that holds them.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use common::{OrderId, ReservationId, Sku};
use serde::{Deserialize, Serialize};

/// The status of a reservation in its lifecycle.
///
/// State transitions:
/// ```text
/// Active ──┬──► Committed
///          ├──► Released
///          └──► Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Units are held out of `available`.
    Active,

    /// Units were permanently removed from stock (terminal).
    Committed,

    /// Units were returned to `available` by the caller (terminal).
    Released,

    /// Units were returned to `available` by the expiry sweep (terminal).
    Expired,
}

impl ReservationStatus {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "Active",
            ReservationStatus::Committed => "Committed",
            ReservationStatus::Released => "Released",
            ReservationStatus::Expired => "Expired",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A hold on `quantity` units of one SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub sku: Sku,
    pub quantity: u32,
    /// The order this reservation was taken for, once known.
    pub order_id: Option<OrderId>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// When the reservation reached its terminal status.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Creates an active reservation.
    pub fn new(
        sku: Sku,
        quantity: u32,
        order_id: Option<OrderId>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            sku,
            quantity,
            order_id,
            status: ReservationStatus::Active,
            created_at,
            expires_at,
            resolved_at: None,
        }
    }

    /// Returns true if the reservation is active and its TTL has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && now >= self.expires_at
    }

    /// Moves an active reservation to a terminal status.
    ///
    /// Terminal reservations are immutable; calling this on one is a no-op
    /// and returns false.
    pub(crate) fn resolve(&mut self, status: ReservationStatus, at: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.resolved_at = Some(at);
        true
    }
}

/// Reservations held against a single SKU, keyed by reservation ID.
///
/// The ledger keeps one store per SKU inside the same critical section as
/// that SKU's counters, so a reservation record and the units it holds always
/// change together.
///
/// Active reservations are also ordered by expiry and terminal ones by
/// resolution time, so the sweep only touches records it acts on.
#[derive(Debug, Clone, Default)]
pub struct ReservationStore {
    records: HashMap<ReservationId, Reservation>,
    expiries: BTreeSet<(DateTime<Utc>, ReservationId)>,
    resolved: BTreeSet<(DateTime<Utc>, ReservationId)>,
}

impl ReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reservation: Reservation) {
        if let Some(previous) = self.records.remove(&reservation.id) {
            self.forget(&previous);
        }
        match reservation.resolved_at {
            Some(at) if reservation.status.is_terminal() => {
                self.resolved.insert((at, reservation.id));
            }
            _ => {
                self.expiries.insert((reservation.expires_at, reservation.id));
            }
        }
        self.records.insert(reservation.id, reservation);
    }

    pub fn get(&self, id: &ReservationId) -> Option<&Reservation> {
        self.records.get(id)
    }

    /// Mutable access for fields outside the lifecycle. Status changes go
    /// through [`ReservationStore::resolve`].
    pub(crate) fn get_mut(&mut self, id: &ReservationId) -> Option<&mut Reservation> {
        self.records.get_mut(id)
    }

    /// Moves an active reservation to a terminal status. Returns false if it
    /// is unknown or already terminal.
    pub fn resolve(
        &mut self,
        id: ReservationId,
        status: ReservationStatus,
        at: DateTime<Utc>,
    ) -> bool {
        let Some(reservation) = self.records.get_mut(&id) else {
            return false;
        };
        if !reservation.resolve(status, at) {
            return false;
        }
        self.expiries.remove(&(reservation.expires_at, id));
        self.resolved.insert((at, id));
        true
    }

    /// IDs of active reservations whose expiry is at or before `now`.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<ReservationId> {
        self.expiries
            .iter()
            .take_while(|(expires_at, _)| *expires_at <= now)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Drops terminal reservations resolved before `cutoff`, returning
    /// their IDs.
    pub fn prune_resolved(&mut self, cutoff: DateTime<Utc>) -> Vec<ReservationId> {
        let stale: Vec<_> = self
            .resolved
            .iter()
            .take_while(|(at, _)| *at < cutoff)
            .copied()
            .collect();
        for key in &stale {
            self.resolved.remove(key);
            self.records.remove(&key.1);
        }
        stale.into_iter().map(|(_, id)| id).collect()
    }

    /// All reservations linked to `order_id`.
    pub fn for_order(&self, order_id: OrderId) -> impl Iterator<Item = &Reservation> {
        self.records
            .values()
            .filter(move |r| r.order_id == Some(order_id))
    }

    /// Number of reservations in the given status.
    pub fn count_with_status(&self, status: ReservationStatus) -> usize {
        match status {
            ReservationStatus::Active => self.expiries.len(),
            _ => self.records.values().filter(|r| r.status == status).count(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn forget(&mut self, reservation: &Reservation) {
        self.expiries.remove(&(reservation.expires_at, reservation.id));
        if let Some(at) = reservation.resolved_at {
            self.resolved.remove(&(at, reservation.id));
        }
    }
}
