//! Items that need out-of-band reconciliation.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use common::{OrderId, ReservationId};
use serde::{Deserialize, Serialize};

use crate::compensation::CompensationTask;
use crate::order::OrderStatus;
use crate::services::{read, write};

/// A state the saga could not settle on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReconciliationEvent {
    /// A reservation could not be committed after its order was persisted
    /// and paid for.
    CommitFailed {
        order_id: OrderId,
        reservation_id: ReservationId,
        reason: String,
        at: DateTime<Utc>,
    },

    /// The order record could not be moved to its final status.
    StatusUpdateFailed {
        order_id: OrderId,
        status: OrderStatus,
        reason: String,
        at: DateTime<Utc>,
    },

    /// A release or refund failed after every retry. Stock or money is
    /// stranded until an operator steps in.
    CompensationFailed {
        task: CompensationTask,
        attempts: u32,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl ReconciliationEvent {
    pub fn commit_failed(
        order_id: OrderId,
        reservation_id: ReservationId,
        reason: impl Into<String>,
    ) -> Self {
        ReconciliationEvent::CommitFailed {
            order_id,
            reservation_id,
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    pub fn status_update_failed(
        order_id: OrderId,
        status: OrderStatus,
        reason: impl Into<String>,
    ) -> Self {
        ReconciliationEvent::StatusUpdateFailed {
            order_id,
            status,
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    pub fn compensation_failed(
        task: CompensationTask,
        attempts: u32,
        reason: impl Into<String>,
    ) -> Self {
        ReconciliationEvent::CompensationFailed {
            task,
            attempts,
            reason: reason.into(),
            at: Utc::now(),
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconciliationEvent::CommitFailed { .. } => "commit_failed",
            ReconciliationEvent::StatusUpdateFailed { .. } => "status_update_failed",
            ReconciliationEvent::CompensationFailed { .. } => "compensation_failed",
        }
    }
}

/// Consumer of reconciliation events, e.g. a reconciler's inbox.
pub trait ReconciliationSink: Send + Sync {
    fn record(&self, event: ReconciliationEvent);
}

/// Counts the event and hands it to the sink.
pub(crate) fn emit(sink: &dyn ReconciliationSink, event: ReconciliationEvent) {
    metrics::counter!("reconciliation_events_total", "kind" => event.kind()).increment(1);
    sink.record(event);
}

/// In-memory reconciliation log for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReconciliationLog {
    events: Arc<RwLock<Vec<ReconciliationEvent>>>,
}

impl InMemoryReconciliationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReconciliationEvent> {
        read(&self.events).clone()
    }

    pub fn commit_failures(&self) -> Vec<ReconciliationEvent> {
        self.of_kind("commit_failed")
    }

    pub fn compensation_failures(&self) -> Vec<ReconciliationEvent> {
        self.of_kind("compensation_failed")
    }

    fn of_kind(&self, kind: &str) -> Vec<ReconciliationEvent> {
        read(&self.events)
            .iter()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect()
    }
}

impl ReconciliationSink for InMemoryReconciliationLog {
    fn record(&self, event: ReconciliationEvent) {
        write(&self.events).push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filters_by_kind() {
        let log = InMemoryReconciliationLog::new();
        let order_id = OrderId::new();
        emit(
            &log,
            ReconciliationEvent::commit_failed(order_id, ReservationId::new(), "expired"),
        );
        emit(
            &log,
            ReconciliationEvent::status_update_failed(order_id, OrderStatus::Confirmed, "down"),
        );

        assert_eq!(log.events().len(), 2);
        assert_eq!(log.commit_failures().len(), 1);
        assert!(log.compensation_failures().is_empty());
    }

    #[test]
    fn test_serializes_with_type_tag() {
        let event = ReconciliationEvent::commit_failed(OrderId::new(), ReservationId::new(), "x");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "CommitFailed");
    }
}
