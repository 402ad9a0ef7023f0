//! Saga instance rebuilt from its journal.

use common::{CustomerId, OrderId, ReservationId};
use serde::{Deserialize, Serialize};

use crate::compensation::CompensationTask;
use crate::events::SagaEvent;
use crate::services::payment::PaymentRef;
use crate::state::SagaState;

/// An order placement saga as seen through its recorded events.
///
/// Tracks how far the saga got and what it left behind: reservations taken,
/// the payment captured, compensations enqueued and commits left for
/// reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaInstance {
    order_id: Option<OrderId>,
    customer_id: Option<CustomerId>,
    state: SagaState,
    reservations: Vec<ReservationId>,
    payment_ref: Option<PaymentRef>,
    persisted: bool,
    compensations: Vec<CompensationTask>,
    reconciled_commits: Vec<ReservationId>,
    failed_step: Option<SagaState>,
    failure_reason: Option<String>,
    version: u64,
}

impl SagaInstance {
    /// Folds a sequence of events into an instance.
    pub fn from_events(events: impl IntoIterator<Item = SagaEvent>) -> Self {
        let mut instance = Self::default();
        for event in events {
            instance.apply(event);
        }
        instance
    }

    pub fn apply(&mut self, event: SagaEvent) {
        self.version += 1;
        match event {
            SagaEvent::SagaStarted(data) => {
                self.order_id = Some(data.order_id);
                self.customer_id = Some(data.customer_id);
                self.state = SagaState::Validating;
            }
            SagaEvent::StepStarted(data) => {
                self.state = data.step;
            }
            SagaEvent::ItemReserved(data) => {
                self.reservations.push(data.reservation_id);
            }
            SagaEvent::PaymentAuthorized(data) => {
                self.payment_ref = Some(data.payment_ref);
            }
            SagaEvent::OrderPersisted(_) => {
                self.persisted = true;
            }
            SagaEvent::StepFailed(data) => {
                if data.step.can_compensate() {
                    self.state = SagaState::Compensating;
                }
                self.failed_step = Some(data.step);
                self.failure_reason = Some(data.error);
            }
            SagaEvent::CompensationEnqueued(data) => {
                self.compensations.push(data.task);
            }
            SagaEvent::CommitReconciled(data) => {
                self.reconciled_commits.push(data.reservation_id);
            }
            SagaEvent::SagaConfirmed(_) => {
                self.state = SagaState::Confirmed;
            }
            SagaEvent::SagaFailed(data) => {
                self.state = SagaState::Failed;
                self.failure_reason = Some(data.reason);
            }
        }
    }
}

// Query methods
impl SagaInstance {
    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn reservations(&self) -> &[ReservationId] {
        &self.reservations
    }

    pub fn payment_ref(&self) -> Option<&PaymentRef> {
        self.payment_ref.as_ref()
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn compensations(&self) -> &[CompensationTask] {
        &self.compensations
    }

    pub fn reconciled_commits(&self) -> &[ReservationId] {
        &self.reconciled_commits
    }

    /// The step that failed, if the saga did not confirm.
    pub fn failed_step(&self) -> Option<SagaState> {
        self.failed_step
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Number of events applied.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
