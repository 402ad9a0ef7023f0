//! Payment gateway trait and in-memory implementation with idempotency records.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::Money;
use inventory::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{read, write};

/// Reference to an authorized charge, assigned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentRef(String);

impl PaymentRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PaymentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Wallet,
}

/// Payment failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    /// The gateway refused the charge. Definite.
    #[error("Payment declined: {0}")]
    Declined(String),

    /// Transient or unknown gateway failure.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// No response within the configured timeout; the outcome is unknown.
    #[error("Payment gateway timed out")]
    Timeout,

    /// The idempotency key was already used with a different amount.
    #[error("Idempotency key {key} reused with amount {attempted} (originally {original})")]
    IdempotencyConflict {
        key: String,
        original: Money,
        attempted: Money,
    },

    #[error("Unknown payment: {0}")]
    UnknownPayment(PaymentRef),
}

impl PaymentError {
    /// Returns true if retrying with the same idempotency key is safe and
    /// may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::Gateway(_) | PaymentError::Timeout)
    }
}

/// Trait for payment processing operations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Authorizes a charge of `amount`.
    ///
    /// Repeating a call with the same `idempotency_key` and amount returns the
    /// original outcome without charging again.
    async fn authorize(
        &self,
        idempotency_key: &str,
        amount: Money,
        method: PaymentMethod,
        token: &str,
    ) -> Result<PaymentRef, PaymentError>;

    /// Refunds an authorized charge. Refunding twice succeeds.
    async fn refund(&self, payment_ref: &PaymentRef) -> Result<(), PaymentError>;

    /// Cancels whatever an authorization under `idempotency_key` did or will
    /// do: a recorded charge is refunded and later authorizations with the
    /// key are declined. Voiding an unused key or voiding twice succeeds.
    async fn void(&self, idempotency_key: &str) -> Result<(), PaymentError>;
}

/// Default retention of idempotency records.
pub const DEFAULT_IDEMPOTENCY_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
struct IdempotencyRecord {
    amount: Money,
    outcome: Result<PaymentRef, PaymentError>,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Charge {
    amount: Money,
    refunded: bool,
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    records: HashMap<String, IdempotencyRecord>,
    charges: HashMap<PaymentRef, Charge>,
    voided: HashSet<String>,
    next_id: u32,
    authorize_calls: u32,
    decline_reason: Option<String>,
    transient_failures: u32,
    slow_calls: u32,
    latency: Duration,
    stalled_calls: u32,
    refund_failures: u32,
}

impl InMemoryPaymentState {
    fn purge_before(&mut self, cutoff: DateTime<Utc>) {
        self.records.retain(|_, record| record.recorded_at >= cutoff);
    }
}

/// In-memory payment gateway for testing.
///
/// Keeps idempotency records for the retention window and can be scripted to
/// decline, fail transiently or respond slowly.
#[derive(Debug, Clone)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryPaymentState>>,
    clock: Arc<dyn Clock>,
    retention: chrono::Duration,
}

impl Default for InMemoryPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), DEFAULT_IDEMPOTENCY_RETENTION)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, retention: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(InMemoryPaymentState::default())),
            clock,
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Declines every new authorization with `reason` until cleared with `None`.
    pub fn set_decline(&self, reason: Option<&str>) {
        write(&self.state).decline_reason = reason.map(str::to_string);
    }

    /// Fails the next `count` authorizations with a gateway error.
    pub fn fail_next(&self, count: u32) {
        write(&self.state).transient_failures = count;
    }

    /// Delays the next `count` authorizations by `latency`.
    pub fn slow_next(&self, count: u32, latency: Duration) {
        let mut state = write(&self.state);
        state.slow_calls = count;
        state.latency = latency;
    }

    /// Settles the next `count` authorizations immediately but delays the
    /// response by `latency`, so a caller that times out never learns of
    /// the charge.
    pub fn stall_after_charge(&self, count: u32, latency: Duration) {
        let mut state = write(&self.state);
        state.stalled_calls = count;
        state.latency = latency;
    }

    /// Fails the next `count` refunds or voids with a gateway error.
    pub fn fail_refunds(&self, count: u32) {
        write(&self.state).refund_failures = count;
    }

    /// Number of authorize calls received, including replays and failures.
    pub fn authorize_calls(&self) -> u32 {
        read(&self.state).authorize_calls
    }

    /// Number of distinct charges taken.
    pub fn charge_count(&self) -> usize {
        read(&self.state).charges.len()
    }

    /// Number of charges taken and not refunded.
    pub fn outstanding_charge_count(&self) -> usize {
        read(&self.state)
            .charges
            .values()
            .filter(|c| !c.refunded)
            .count()
    }

    /// Sum of charges taken and not refunded.
    pub fn captured_total(&self) -> Money {
        read(&self.state)
            .charges
            .values()
            .filter(|c| !c.refunded)
            .map(|c| c.amount)
            .sum()
    }

    pub fn is_voided(&self, idempotency_key: &str) -> bool {
        read(&self.state).voided.contains(idempotency_key)
    }

    pub fn is_refunded(&self, payment_ref: &PaymentRef) -> bool {
        read(&self.state)
            .charges
            .get(payment_ref)
            .is_some_and(|c| c.refunded)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn authorize(
        &self,
        idempotency_key: &str,
        amount: Money,
        method: PaymentMethod,
        token: &str,
    ) -> Result<PaymentRef, PaymentError> {
        let delay = {
            let mut state = write(&self.state);
            state.authorize_calls += 1;
            if state.slow_calls > 0 {
                state.slow_calls -= 1;
                Some(state.latency)
            } else {
                None
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (outcome, stall) = self.settle(idempotency_key, amount, method, token);
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        outcome
    }

    async fn refund(&self, payment_ref: &PaymentRef) -> Result<(), PaymentError> {
        let mut state = write(&self.state);
        if state.refund_failures > 0 {
            state.refund_failures -= 1;
            return Err(PaymentError::Gateway("refund endpoint unavailable".to_string()));
        }
        let charge = state
            .charges
            .get_mut(payment_ref)
            .ok_or_else(|| PaymentError::UnknownPayment(payment_ref.clone()))?;
        charge.refunded = true;
        Ok(())
    }

    async fn void(&self, idempotency_key: &str) -> Result<(), PaymentError> {
        let mut state = write(&self.state);
        if state.refund_failures > 0 {
            state.refund_failures -= 1;
            return Err(PaymentError::Gateway("void endpoint unavailable".to_string()));
        }
        state.voided.insert(idempotency_key.to_string());
        let charged = state
            .records
            .get(idempotency_key)
            .and_then(|record| record.outcome.clone().ok());
        if let Some(payment_ref) = charged {
            if let Some(charge) = state.charges.get_mut(&payment_ref) {
                charge.refunded = true;
            }
            tracing::debug!(idempotency_key, %payment_ref, "voided recorded charge");
        }
        Ok(())
    }
}

impl InMemoryPaymentGateway {
    /// Decides an authorization under the state lock. Also returns how long
    /// to stall before answering, if scripted.
    fn settle(
        &self,
        idempotency_key: &str,
        amount: Money,
        method: PaymentMethod,
        token: &str,
    ) -> (Result<PaymentRef, PaymentError>, Option<Duration>) {
        let now = self.clock.now();
        let mut state = write(&self.state);
        if let Some(cutoff) = now.checked_sub_signed(self.retention) {
            state.purge_before(cutoff);
        }

        if let Some(record) = state.records.get(idempotency_key) {
            if record.amount != amount {
                let conflict = PaymentError::IdempotencyConflict {
                    key: idempotency_key.to_string(),
                    original: record.amount,
                    attempted: amount,
                };
                return (Err(conflict), None);
            }
            tracing::debug!(idempotency_key, "replaying recorded payment outcome");
            return (record.outcome.clone(), None);
        }

        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            let error = PaymentError::Gateway("upstream unavailable".to_string());
            return (Err(error), None);
        }

        let decline = if state.voided.contains(idempotency_key) {
            Some("authorization voided".to_string())
        } else {
            state.decline_reason.clone()
        };
        let outcome = match decline {
            Some(reason) => Err(PaymentError::Declined(reason)),
            None if token.is_empty() => {
                Err(PaymentError::Declined("missing payment token".to_string()))
            }
            None => {
                state.next_id += 1;
                let payment_ref = PaymentRef::new(format!("PAY-{:04}", state.next_id));
                state.charges.insert(
                    payment_ref.clone(),
                    Charge {
                        amount,
                        refunded: false,
                    },
                );
                tracing::debug!(%payment_ref, %amount, ?method, "payment authorized");
                Ok(payment_ref)
            }
        };

        state.records.insert(
            idempotency_key.to_string(),
            IdempotencyRecord {
                amount,
                outcome: outcome.clone(),
                recorded_at: now,
            },
        );

        let stall = if state.stalled_calls > 0 {
            state.stalled_calls -= 1;
            Some(state.latency)
        } else {
            None
        };
        (outcome, stall)
    }
}
