//! Saga tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What the coordinator does when a reservation cannot be committed after
/// the order was persisted and paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitFailurePolicy {
    /// Keep the order Confirmed and emit a reconciliation event.
    #[default]
    Reconcile,

    /// Fail the order: refund the payment, return committed units to stock
    /// and persist the order as Failed.
    FailOrder,
}

impl std::str::FromStr for CommitFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reconcile" => Ok(CommitFailurePolicy::Reconcile),
            "fail_order" => Ok(CommitFailurePolicy::FailOrder),
            other => Err(format!("unknown commit failure policy: {other}")),
        }
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Configuration for [`OrderPlacementCoordinator`](crate::OrderPlacementCoordinator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SagaConfig {
    /// Largest quantity accepted on a single line item.
    pub max_line_quantity: u32,
    /// Upper bound on a single payment authorization call.
    pub payment_timeout: Duration,
    /// Authorization attempts (same idempotency key) before giving up on
    /// timeouts and gateway errors.
    pub payment_max_attempts: u32,
    pub payment_retry_backoff: Duration,
    /// Retry policy for release and refund tasks.
    pub compensation: RetryPolicy,
    pub commit_failure_policy: CommitFailurePolicy,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            max_line_quantity: 100,
            payment_timeout: Duration::from_secs(5),
            payment_max_attempts: 3,
            payment_retry_backoff: Duration::from_millis(100),
            compensation: RetryPolicy::default(),
            commit_failure_policy: CommitFailurePolicy::default(),
        }
    }
}
