//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of an order placement saga.
///
/// State transitions:
/// ```text
/// Validating ──► Reserving ──► Paying ──► Persisting ──► Committing ──► Confirmed
///      │             │            │            │              │
///      │             └────────────┴────────────┴──────────────┴──► Compensating ──► Failed
///      └──────────────────────────────────────────────────────────────────────────► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Checking the request and resolving customer and products.
    #[default]
    Validating,

    /// Taking one reservation per line item.
    Reserving,

    /// Authorizing the payment.
    Paying,

    /// Writing the order record.
    Persisting,

    /// Committing reservations.
    Committing,

    /// Order confirmed (terminal state).
    Confirmed,

    /// A step failed and compensation is being enqueued.
    Compensating,

    /// Saga ended without a confirmed order (terminal state).
    Failed,
}

impl SagaState {
    /// The next state on the happy path, if any.
    pub fn next(&self) -> Option<SagaState> {
        match self {
            SagaState::Validating => Some(SagaState::Reserving),
            SagaState::Reserving => Some(SagaState::Paying),
            SagaState::Paying => Some(SagaState::Persisting),
            SagaState::Persisting => Some(SagaState::Committing),
            SagaState::Committing => Some(SagaState::Confirmed),
            SagaState::Confirmed | SagaState::Compensating | SagaState::Failed => None,
        }
    }

    /// Returns true if a failure in this state leaves side effects to undo.
    pub fn can_compensate(&self) -> bool {
        matches!(
            self,
            SagaState::Reserving | SagaState::Paying | SagaState::Persisting | SagaState::Committing
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Confirmed | SagaState::Failed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Validating => "Validating",
            SagaState::Reserving => "Reserving",
            SagaState::Paying => "Paying",
            SagaState::Persisting => "Persisting",
            SagaState::Committing => "Committing",
            SagaState::Confirmed => "Confirmed",
            SagaState::Compensating => "Compensating",
            SagaState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
