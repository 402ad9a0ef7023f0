//! Saga journal events.

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, ReservationId, Sku};
use serde::{Deserialize, Serialize};

use crate::compensation::CompensationTask;
use crate::order::OrderStatus;
use crate::services::payment::PaymentRef;
use crate::state::SagaState;

/// Events recorded while an order placement saga runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// Saga execution started.
    SagaStarted(SagaStartedData),

    /// A saga step started execution.
    StepStarted(StepData),

    /// A line item's units were reserved.
    ItemReserved(ItemReservedData),

    /// The payment was authorized and captured.
    PaymentAuthorized(PaymentAuthorizedData),

    /// The order record was written.
    OrderPersisted(OrderPersistedData),

    /// A saga step failed.
    StepFailed(StepFailedData),

    /// A compensating action was handed to the compensation queue.
    CompensationEnqueued(CompensationData),

    /// A reservation commit failed and was left for reconciliation.
    CommitReconciled(CommitReconciledData),

    /// Saga ended with a confirmed order.
    SagaConfirmed(SagaCompletedData),

    /// Saga ended without a confirmed order.
    SagaFailed(SagaFailedData),
}

impl SagaEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::StepStarted(_) => "StepStarted",
            SagaEvent::ItemReserved(_) => "ItemReserved",
            SagaEvent::PaymentAuthorized(_) => "PaymentAuthorized",
            SagaEvent::OrderPersisted(_) => "OrderPersisted",
            SagaEvent::StepFailed(_) => "StepFailed",
            SagaEvent::CompensationEnqueued(_) => "CompensationEnqueued",
            SagaEvent::CommitReconciled(_) => "CommitReconciled",
            SagaEvent::SagaConfirmed(_) => "SagaConfirmed",
            SagaEvent::SagaFailed(_) => "SagaFailed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepData {
    pub step: SagaState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReservedData {
    pub sku: Sku,
    pub quantity: u32,
    pub reservation_id: ReservationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAuthorizedData {
    pub payment_ref: PaymentRef,
    pub amount: Money,
    /// Gateway calls it took, including retries.
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPersistedData {
    pub status: OrderStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailedData {
    pub step: SagaState,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationData {
    pub task: CompensationTask,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReconciledData {
    pub reservation_id: ReservationId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaCompletedData {
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaFailedData {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

// Convenience constructors
impl SagaEvent {
    pub fn saga_started(order_id: OrderId, customer_id: CustomerId) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            order_id,
            customer_id,
            started_at: Utc::now(),
        })
    }

    pub fn step_started(step: SagaState) -> Self {
        SagaEvent::StepStarted(StepData { step })
    }

    pub fn item_reserved(sku: Sku, quantity: u32, reservation_id: ReservationId) -> Self {
        SagaEvent::ItemReserved(ItemReservedData {
            sku,
            quantity,
            reservation_id,
        })
    }

    pub fn payment_authorized(payment_ref: PaymentRef, amount: Money, attempts: u32) -> Self {
        SagaEvent::PaymentAuthorized(PaymentAuthorizedData {
            payment_ref,
            amount,
            attempts,
        })
    }

    pub fn order_persisted(status: OrderStatus) -> Self {
        SagaEvent::OrderPersisted(OrderPersistedData { status })
    }

    pub fn step_failed(step: SagaState, error: impl Into<String>) -> Self {
        SagaEvent::StepFailed(StepFailedData {
            step,
            error: error.into(),
        })
    }

    pub fn compensation_enqueued(task: CompensationTask) -> Self {
        SagaEvent::CompensationEnqueued(CompensationData { task })
    }

    pub fn commit_reconciled(reservation_id: ReservationId, reason: impl Into<String>) -> Self {
        SagaEvent::CommitReconciled(CommitReconciledData {
            reservation_id,
            reason: reason.into(),
        })
    }

    pub fn saga_confirmed() -> Self {
        SagaEvent::SagaConfirmed(SagaCompletedData {
            completed_at: Utc::now(),
        })
    }

    pub fn saga_failed(reason: impl Into<String>) -> Self {
        SagaEvent::SagaFailed(SagaFailedData {
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }
}
