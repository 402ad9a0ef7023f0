//! Supervised queue for compensating actions.
//!
//! Tasks are handed to a background worker over a channel and retried with
//! exponential backoff. A task stays in the outstanding set until it either
//! succeeds or is escalated as a [`ReconciliationEvent::CompensationFailed`],
//! so nothing is dropped silently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use common::{OrderId, ReservationId, Sku};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::RetryPolicy;
use crate::reconciliation::{self, ReconciliationEvent, ReconciliationSink};
use crate::services::inventory::InventoryService;
use crate::services::payment::{PaymentGateway, PaymentRef};
use crate::services::{read, write};

/// An action that undoes a saga side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompensationTask {
    /// Return a reservation's units to available stock.
    ReleaseReservation {
        order_id: OrderId,
        reservation_id: ReservationId,
    },

    /// Refund a captured payment.
    RefundPayment {
        order_id: OrderId,
        payment_ref: PaymentRef,
    },

    /// Cancel an authorization whose outcome never reached the saga.
    VoidPayment {
        order_id: OrderId,
        idempotency_key: String,
    },

    /// Put committed units back into stock.
    ReturnStock {
        order_id: OrderId,
        sku: Sku,
        quantity: u32,
    },
}

impl CompensationTask {
    pub fn kind(&self) -> &'static str {
        match self {
            CompensationTask::ReleaseReservation { .. } => "release_reservation",
            CompensationTask::RefundPayment { .. } => "refund_payment",
            CompensationTask::VoidPayment { .. } => "void_payment",
            CompensationTask::ReturnStock { .. } => "return_stock",
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            CompensationTask::ReleaseReservation { order_id, .. }
            | CompensationTask::RefundPayment { order_id, .. }
            | CompensationTask::VoidPayment { order_id, .. }
            | CompensationTask::ReturnStock { order_id, .. } => *order_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompensationError {
    /// The worker has stopped; the task was not accepted.
    #[error("Compensation queue is closed")]
    QueueClosed,
}

enum AttemptError {
    Retryable(String),
    Permanent(String),
}

#[derive(Debug)]
struct Job {
    seq: u64,
    task: CompensationTask,
}

#[derive(Debug, Default)]
struct Outstanding {
    tasks: RwLock<HashMap<u64, CompensationTask>>,
    next_seq: AtomicU64,
    idle: Notify,
}

impl Outstanding {
    fn insert(&self, task: CompensationTask) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        write(&self.tasks).insert(seq, task);
        seq
    }

    fn complete(&self, seq: u64) {
        let now_idle = {
            let mut tasks = write(&self.tasks);
            tasks.remove(&seq);
            tasks.is_empty()
        };
        if now_idle {
            self.idle.notify_waiters();
        }
    }
}

/// Handle for enqueueing compensation tasks. Clones share the same worker.
#[derive(Debug, Clone)]
pub struct CompensationQueue {
    sender: mpsc::UnboundedSender<Job>,
    outstanding: Arc<Outstanding>,
}

impl CompensationQueue {
    /// Starts the worker and returns the queue handle with the worker's task.
    ///
    /// The worker exits once every queue handle is dropped and all accepted
    /// tasks have finished.
    pub fn spawn(
        inventory: Arc<dyn InventoryService>,
        payment: Arc<dyn PaymentGateway>,
        reconciliation: Arc<dyn ReconciliationSink>,
        policy: RetryPolicy,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let outstanding = Arc::new(Outstanding::default());
        let worker = Arc::new(CompensationWorker {
            inventory,
            payment,
            reconciliation,
            policy,
        });
        let handle = tokio::spawn(worker.run(receiver, outstanding.clone()));
        (
            Self {
                sender,
                outstanding,
            },
            handle,
        )
    }

    /// Hands a task to the worker without waiting for it to run.
    pub fn enqueue(&self, task: CompensationTask) -> Result<(), CompensationError> {
        let kind = task.kind();
        let seq = self.outstanding.insert(task.clone());
        if self.sender.send(Job { seq, task }).is_err() {
            self.outstanding.complete(seq);
            return Err(CompensationError::QueueClosed);
        }
        metrics::counter!("compensation_tasks_total", "kind" => kind).increment(1);
        Ok(())
    }

    /// Tasks accepted but not yet finished.
    pub fn pending(&self) -> Vec<CompensationTask> {
        read(&self.outstanding.tasks).values().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        read(&self.outstanding.tasks).len()
    }

    /// Waits until no task is outstanding.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.outstanding.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct CompensationWorker {
    inventory: Arc<dyn InventoryService>,
    payment: Arc<dyn PaymentGateway>,
    reconciliation: Arc<dyn ReconciliationSink>,
    policy: RetryPolicy,
}

impl CompensationWorker {
    async fn run(
        self: Arc<Self>,
        mut receiver: mpsc::UnboundedReceiver<Job>,
        outstanding: Arc<Outstanding>,
    ) {
        let mut running = JoinSet::new();
        loop {
            tokio::select! {
                job = receiver.recv() => match job {
                    Some(Job { seq, task }) => {
                        let worker = self.clone();
                        let outstanding = outstanding.clone();
                        running.spawn(async move {
                            worker.process(&task).await;
                            outstanding.complete(seq);
                        });
                    }
                    None => break,
                },
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "compensation task aborted");
                    }
                }
            }
        }

        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "compensation task aborted");
            }
        }
        tracing::info!("compensation worker stopped");
    }

    #[tracing::instrument(skip(self), fields(kind = task.kind(), order_id = %task.order_id()))]
    async fn process(&self, task: &CompensationTask) {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.execute(task).await {
                Ok(()) => {
                    tracing::debug!(attempt, "compensation applied");
                    return;
                }
                Err(AttemptError::Retryable(reason)) if attempt < max_attempts => {
                    let delay = self.policy.backoff_for(attempt);
                    tracing::warn!(
                        attempt,
                        %reason,
                        delay_ms = delay.as_millis() as u64,
                        "compensation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(AttemptError::Retryable(reason)) | Err(AttemptError::Permanent(reason)) => {
                    self.escalate(task, attempt, reason);
                    return;
                }
            }
        }
    }

    async fn execute(&self, task: &CompensationTask) -> Result<(), AttemptError> {
        match task {
            CompensationTask::ReleaseReservation { reservation_id, .. } => self
                .inventory
                .release(*reservation_id)
                .await
                .map_err(|e| classify(e.is_retryable(), e.to_string())),
            CompensationTask::RefundPayment { payment_ref, .. } => self
                .payment
                .refund(payment_ref)
                .await
                .map_err(|e| classify(e.is_retryable(), e.to_string())),
            CompensationTask::VoidPayment {
                idempotency_key, ..
            } => self
                .payment
                .void(idempotency_key)
                .await
                .map_err(|e| classify(e.is_retryable(), e.to_string())),
            CompensationTask::ReturnStock { sku, quantity, .. } => self
                .inventory
                .restock(sku, *quantity)
                .await
                .map_err(|e| classify(e.is_retryable(), e.to_string())),
        }
    }

    fn escalate(&self, task: &CompensationTask, attempts: u32, reason: String) {
        metrics::counter!("compensation_failed_total", "kind" => task.kind()).increment(1);
        tracing::error!(
            alert = true,
            attempts,
            %reason,
            "compensation failed; operator action required"
        );
        reconciliation::emit(
            self.reconciliation.as_ref(),
            ReconciliationEvent::compensation_failed(task.clone(), attempts, reason),
        );
    }
}

fn classify(retryable: bool, reason: String) -> AttemptError {
    if retryable {
        AttemptError::Retryable(reason)
    } else {
        AttemptError::Permanent(reason)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use async_trait::async_trait;
    use common::Money;
    use inventory::{InventoryError, ReservationStatus, StockLedger};

    use super::*;
    use crate::reconciliation::InMemoryReconciliationLog;
    use crate::services::payment::{InMemoryPaymentGateway, PaymentMethod};

    /// Fails the first `failures` releases with a retryable error.
    struct FlakyInventory {
        ledger: StockLedger,
        failures: AtomicU32,
    }

    #[async_trait]
    impl InventoryService for FlakyInventory {
        async fn reserve(
            &self,
            order_id: OrderId,
            sku: &Sku,
            quantity: u32,
        ) -> Result<ReservationId, InventoryError> {
            InventoryService::reserve(&self.ledger, order_id, sku, quantity).await
        }

        async fn commit(&self, id: ReservationId) -> Result<(), InventoryError> {
            InventoryService::commit(&self.ledger, id).await
        }

        async fn release(&self, id: ReservationId) -> Result<(), InventoryError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(InventoryError::Unavailable("connection reset".to_string()));
            }
            InventoryService::release(&self.ledger, id).await
        }

        async fn restock(&self, sku: &Sku, quantity: u32) -> Result<(), InventoryError> {
            InventoryService::restock(&self.ledger, sku, quantity).await
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    async fn reserved(ledger: &StockLedger) -> ReservationId {
        let sku = Sku::new("SKU-001");
        ledger.restock(&sku, 5).await.unwrap();
        ledger.reserve(&sku, 2).await.unwrap()
    }

    #[tokio::test]
    async fn test_release_retries_until_success() {
        let ledger = StockLedger::new();
        let reservation_id = reserved(&ledger).await;
        let inventory = Arc::new(FlakyInventory {
            ledger: ledger.clone(),
            failures: AtomicU32::new(2),
        });
        let log = InMemoryReconciliationLog::new();
        let (queue, _worker) = CompensationQueue::spawn(
            inventory,
            Arc::new(InMemoryPaymentGateway::new()),
            Arc::new(log.clone()),
            fast_policy(5),
        );

        queue
            .enqueue(CompensationTask::ReleaseReservation {
                order_id: OrderId::new(),
                reservation_id,
            })
            .unwrap();
        queue.wait_idle().await;

        assert_eq!(
            ledger.reservation(reservation_id).await.unwrap().status,
            ReservationStatus::Released
        );
        assert!(log.events().is_empty());
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_escalate() {
        let ledger = StockLedger::new();
        let reservation_id = reserved(&ledger).await;
        let inventory = Arc::new(FlakyInventory {
            ledger: ledger.clone(),
            failures: AtomicU32::new(10),
        });
        let log = InMemoryReconciliationLog::new();
        let (queue, _worker) = CompensationQueue::spawn(
            inventory,
            Arc::new(InMemoryPaymentGateway::new()),
            Arc::new(log.clone()),
            fast_policy(3),
        );

        let task = CompensationTask::ReleaseReservation {
            order_id: OrderId::new(),
            reservation_id,
        };
        queue.enqueue(task.clone()).unwrap();
        queue.wait_idle().await;

        let failures = log.compensation_failures();
        assert_eq!(failures.len(), 1);
        match &failures[0] {
            ReconciliationEvent::CompensationFailed {
                task: failed,
                attempts,
                ..
            } => {
                assert_eq!(failed, &task);
                assert_eq!(*attempts, 3);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(
            ledger.reservation(reservation_id).await.unwrap().status,
            ReservationStatus::Active
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_escalates_without_retry() {
        let log = InMemoryReconciliationLog::new();
        let (queue, _worker) = CompensationQueue::spawn(
            Arc::new(StockLedger::new()),
            Arc::new(InMemoryPaymentGateway::new()),
            Arc::new(log.clone()),
            fast_policy(5),
        );

        queue
            .enqueue(CompensationTask::ReleaseReservation {
                order_id: OrderId::new(),
                reservation_id: ReservationId::new(),
            })
            .unwrap();
        queue.wait_idle().await;

        match &log.compensation_failures()[..] {
            [ReconciliationEvent::CompensationFailed { attempts, .. }] => {
                assert_eq!(*attempts, 1)
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refund_retries() {
        let payment = InMemoryPaymentGateway::new();
        let payment_ref = payment
            .authorize("order-1", Money::from_cents(500), PaymentMethod::Card, "tok")
            .await
            .unwrap();
        payment.fail_refunds(2);
        let log = InMemoryReconciliationLog::new();
        let (queue, _worker) = CompensationQueue::spawn(
            Arc::new(StockLedger::new()),
            Arc::new(payment.clone()),
            Arc::new(log.clone()),
            fast_policy(5),
        );

        queue
            .enqueue(CompensationTask::RefundPayment {
                order_id: OrderId::new(),
                payment_ref: payment_ref.clone(),
            })
            .unwrap();
        queue.wait_idle().await;

        assert!(payment.is_refunded(&payment_ref));
        assert!(log.events().is_empty());
    }

    #[tokio::test]
    async fn test_void_retries_and_cancels_charge_by_key() {
        let payment = InMemoryPaymentGateway::new();
        let payment_ref = payment
            .authorize("order-7", Money::from_cents(900), PaymentMethod::Card, "tok")
            .await
            .unwrap();
        payment.fail_refunds(1);
        let log = InMemoryReconciliationLog::new();
        let (queue, _worker) = CompensationQueue::spawn(
            Arc::new(StockLedger::new()),
            Arc::new(payment.clone()),
            Arc::new(log.clone()),
            fast_policy(3),
        );

        queue
            .enqueue(CompensationTask::VoidPayment {
                order_id: OrderId::new(),
                idempotency_key: "order-7".to_string(),
            })
            .unwrap();
        queue.wait_idle().await;

        assert!(payment.is_refunded(&payment_ref));
        assert!(payment.is_voided("order-7"));
        assert!(log.events().is_empty());
    }

    #[tokio::test]
    async fn test_worker_stops_when_handles_dropped() {
        let (queue, worker) = CompensationQueue::spawn(
            Arc::new(StockLedger::new()),
            Arc::new(InMemoryPaymentGateway::new()),
            Arc::new(InMemoryReconciliationLog::new()),
            fast_policy(1),
        );
        drop(queue);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
    }
}
