//! Order placement coordinator.
//!
//! Drives one saga per order:
//!
//! ```text
//! validate ─► resolve ─► reserve (per line) ─► pay ─► persist ─► commit ─► confirm
//! ```
//!
//! A failure after the first reservation enqueues the compensating actions
//! for every side effect taken so far and returns the original error. The
//! caller never waits for compensation to run.
//!
//! An order ID runs at most one saga. Resubmitting the ID of a confirmed
//! order returns that order; any other reuse is rejected before a step runs.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use common::{CustomerId, Money, OrderId, ReservationId, Sku};
use inventory::InventoryError;
use tokio::task::JoinHandle;

use crate::aggregate::SagaInstance;
use crate::compensation::{CompensationQueue, CompensationTask};
use crate::config::{CommitFailurePolicy, SagaConfig};
use crate::error::{PlaceOrderError, SagaError};
use crate::events::SagaEvent;
use crate::journal::SagaLog;
use crate::order::{self, Order, OrderLine, OrderStatus, PlaceOrder};
use crate::reconciliation::{self, ReconciliationEvent, ReconciliationSink};
use crate::services::directory::{CatalogDirectory, CustomerDirectory, DirectoryError};
use crate::services::inventory::InventoryService;
use crate::services::notification::{NotificationQueue, OrderNotification};
use crate::services::payment::{PaymentError, PaymentGateway, PaymentRef};
use crate::services::repository::{OrderRepository, RepositoryError};
use crate::services::write;
use crate::state::SagaState;

/// The services a saga talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub customers: Arc<dyn CustomerDirectory>,
    pub catalog: Arc<dyn CatalogDirectory>,
    pub inventory: Arc<dyn InventoryService>,
    pub payment: Arc<dyn PaymentGateway>,
    pub orders: Arc<dyn OrderRepository>,
    pub notifications: Arc<dyn NotificationQueue>,
    pub reconciliation: Arc<dyn ReconciliationSink>,
    pub journal: Arc<dyn SagaLog>,
}

/// Runs order placement sagas.
///
/// Concurrent calls share no state beyond the collaborators, so any number
/// of orders can be placed at once.
pub struct OrderPlacementCoordinator {
    config: SagaConfig,
    services: Collaborators,
    compensation: CompensationQueue,
    /// Order IDs with a saga currently running in this process.
    in_flight: RwLock<HashSet<OrderId>>,
}

/// Idempotency key sent to the payment gateway for an order.
pub fn idempotency_key(order_id: OrderId) -> String {
    format!("order-{order_id}")
}

impl OrderPlacementCoordinator {
    pub fn new(
        config: SagaConfig,
        services: Collaborators,
        compensation: CompensationQueue,
    ) -> Self {
        Self {
            config,
            services,
            compensation,
            in_flight: RwLock::new(HashSet::new()),
        }
    }

    /// Builds a coordinator together with a compensation worker that uses
    /// the same inventory, payment and reconciliation services.
    pub fn spawn(config: SagaConfig, services: Collaborators) -> (Self, JoinHandle<()>) {
        let (compensation, worker) = CompensationQueue::spawn(
            services.inventory.clone(),
            services.payment.clone(),
            services.reconciliation.clone(),
            config.compensation,
        );
        (Self::new(config, services, compensation), worker)
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    pub fn compensation(&self) -> &CompensationQueue {
        &self.compensation
    }

    /// Places an order under a fresh order ID.
    pub async fn place_order(&self, request: PlaceOrder) -> Result<Order, PlaceOrderError> {
        self.place_order_with_id(OrderId::new(), request).await
    }

    /// Places an order under a caller-chosen ID.
    ///
    /// The ID doubles as the saga ID and seeds the payment idempotency key.
    /// Retrying with the ID of a confirmed order returns the stored order
    /// without reserving or charging again. Reusing an ID whose saga failed
    /// or is still running fails with [`PlaceOrderError::DuplicateOrder`].
    #[tracing::instrument(skip(self, request), fields(customer_id = %request.customer_id))]
    pub async fn place_order_with_id(
        &self,
        order_id: OrderId,
        request: PlaceOrder,
    ) -> Result<Order, PlaceOrderError> {
        let Some(_claim) = self.claim(order_id) else {
            tracing::warn!(%order_id, "order already being placed");
            return Err(PlaceOrderError::DuplicateOrder(order_id));
        };
        if let Some(outcome) = self.previous_outcome(order_id).await {
            return outcome;
        }

        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = std::time::Instant::now();

        let result = self.run(order_id, &request).await;

        metrics::histogram!("saga_duration_seconds").record(saga_start.elapsed().as_secs_f64());
        match &result {
            Ok(order) => {
                metrics::counter!("saga_confirmed").increment(1);
                tracing::info!(total = %order.total, lines = order.lines.len(), "order confirmed");
                self.notify(OrderNotification::OrderConfirmed {
                    order_id,
                    customer_id: order.customer_id,
                    total: order.total,
                });
            }
            Err(e) => {
                metrics::counter!("saga_failed", "reason" => e.kind()).increment(1);
                tracing::warn!(reason = e.kind(), error = %e, "order placement failed");
            }
        }
        result
    }

    /// Rebuilds a saga from its journal.
    pub async fn get_saga(&self, order_id: OrderId) -> Result<Option<SagaInstance>, SagaError> {
        let events = self.services.journal.load(order_id).await?;
        if events.is_empty() {
            return Ok(None);
        }
        Ok(Some(SagaInstance::from_events(events)))
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, RepositoryError> {
        self.services.orders.get(order_id).await
    }

    fn claim(&self, order_id: OrderId) -> Option<Claim<'_>> {
        if !write(&self.in_flight).insert(order_id) {
            return None;
        }
        Some(Claim {
            in_flight: &self.in_flight,
            order_id,
        })
    }

    /// Settles a resubmitted order ID from what earlier attempts left
    /// behind. Returns `None` if the ID has never been used.
    async fn previous_outcome(
        &self,
        order_id: OrderId,
    ) -> Option<Result<Order, PlaceOrderError>> {
        let duplicate = || Some(Err(PlaceOrderError::DuplicateOrder(order_id)));

        let saga = match self.get_saga(order_id).await {
            Ok(saga) => saga,
            Err(e) => {
                tracing::warn!(%order_id, error = %e, "saga journal unreadable; refusing order ID");
                return duplicate();
            }
        };
        let stored = match self.services.orders.get(order_id).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(%order_id, error = %e, "order lookup failed; refusing order ID");
                return duplicate();
            }
        };
        if saga.is_none() && stored.is_none() {
            return None;
        }

        let confirmed = match &saga {
            Some(saga) => saga.state() == SagaState::Confirmed,
            None => stored.as_ref().is_some_and(Order::is_confirmed),
        };
        match stored {
            Some(mut order) if confirmed => {
                metrics::counter!("saga_replayed_total").increment(1);
                tracing::info!(%order_id, "returning previously confirmed order");
                // The final status write may have failed after confirmation.
                order.status = OrderStatus::Confirmed;
                Some(Ok(order))
            }
            _ => {
                tracing::warn!(%order_id, "order ID reused after an unconfirmed attempt");
                duplicate()
            }
        }
    }

    async fn run(&self, order_id: OrderId, request: &PlaceOrder) -> Result<Order, PlaceOrderError> {
        let journal = Journal {
            log: self.services.journal.as_ref(),
            saga_id: order_id,
        };
        let customer_id = request.customer_id;
        journal
            .record(SagaEvent::saga_started(order_id, customer_id))
            .await;

        // Nothing has been touched yet, so failures here need no compensation.
        tracing::info!(step = %SagaState::Validating, "saga step started");
        let lines = match self.resolve(request).await {
            Ok(lines) => lines,
            Err(e) => {
                return self
                    .fail(&journal, SagaState::Validating, customer_id, e, Vec::new())
                    .await;
            }
        };
        let mut order = Order::pending(order_id, customer_id, lines);

        self.enter(&journal, SagaState::Reserving).await;
        let mut reservations = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            match self
                .services
                .inventory
                .reserve(order_id, &line.sku, line.quantity)
                .await
            {
                Ok(reservation_id) => {
                    reservations.push(reservation_id);
                    journal
                        .record(SagaEvent::item_reserved(
                            line.sku.clone(),
                            line.quantity,
                            reservation_id,
                        ))
                        .await;
                }
                Err(e) => {
                    let error = reserve_error(&line.sku, e);
                    let tasks = releases(order_id, &reservations);
                    return self
                        .fail(&journal, SagaState::Reserving, customer_id, error, tasks)
                        .await;
                }
            }
        }
        order.reservation_ids = reservations;

        self.enter(&journal, SagaState::Paying).await;
        let payment_ref = match self.authorize_payment(order_id, order.total, request).await {
            Ok(Authorized {
                payment_ref,
                attempts,
            }) => {
                journal
                    .record(SagaEvent::payment_authorized(
                        payment_ref.clone(),
                        order.total,
                        attempts,
                    ))
                    .await;
                payment_ref
            }
            Err(PaymentFailure { error, uncertain }) => {
                let error = match error {
                    PaymentError::Declined(reason) => PlaceOrderError::PaymentDeclined(reason),
                    other => PlaceOrderError::PaymentGatewayError(other.to_string()),
                };
                let mut tasks = releases(order_id, &order.reservation_ids);
                if uncertain {
                    // A timed-out call may still have charged.
                    tasks.push(CompensationTask::VoidPayment {
                        order_id,
                        idempotency_key: idempotency_key(order_id),
                    });
                }
                return self
                    .fail(&journal, SagaState::Paying, customer_id, error, tasks)
                    .await;
            }
        };
        order.payment_ref = Some(payment_ref.clone());

        self.enter(&journal, SagaState::Persisting).await;
        if let Err(e) = self.services.orders.save(&order).await {
            let mut tasks = releases(order_id, &order.reservation_ids);
            tasks.push(CompensationTask::RefundPayment {
                order_id,
                payment_ref,
            });
            let error = PlaceOrderError::OrderPersistenceFailed(e.to_string());
            return self
                .fail(&journal, SagaState::Persisting, customer_id, error, tasks)
                .await;
        }
        journal
            .record(SagaEvent::order_persisted(OrderStatus::Pending))
            .await;

        self.enter(&journal, SagaState::Committing).await;
        let mut committed = Vec::new();
        let mut failed = Vec::new();
        for (line, reservation_id) in order.lines.iter().zip(&order.reservation_ids) {
            match self.services.inventory.commit(*reservation_id).await {
                Ok(()) => committed.push((line.sku.clone(), line.quantity)),
                Err(e) => failed.push((*reservation_id, e)),
            }
        }
        if let Some((first_id, first_error)) = failed.first() {
            match self.config.commit_failure_policy {
                CommitFailurePolicy::Reconcile => {
                    for (reservation_id, e) in &failed {
                        self.reconcile_commit(&journal, order_id, *reservation_id, e)
                            .await;
                    }
                }
                CommitFailurePolicy::FailOrder => {
                    let error = match first_error {
                        InventoryError::ReservationExpired(_) => {
                            PlaceOrderError::ReservationExpired(*first_id)
                        }
                        other => PlaceOrderError::Inventory(other.to_string()),
                    };
                    let mut tasks: Vec<_> = committed
                        .into_iter()
                        .map(|(sku, quantity)| CompensationTask::ReturnStock {
                            order_id,
                            sku,
                            quantity,
                        })
                        .collect();
                    tasks.push(CompensationTask::RefundPayment {
                        order_id,
                        payment_ref,
                    });
                    self.save_status(&journal, &mut order, OrderStatus::Failed)
                        .await;
                    return self
                        .fail(&journal, SagaState::Committing, customer_id, error, tasks)
                        .await;
                }
            }
        }

        // Stock and payment are settled; a failed status write no longer
        // changes the outcome.
        self.save_status(&journal, &mut order, OrderStatus::Confirmed)
            .await;
        journal.record(SagaEvent::saga_confirmed()).await;
        Ok(order)
    }

    async fn resolve(&self, request: &PlaceOrder) -> Result<Vec<OrderLine>, PlaceOrderError> {
        request.validate(self.config.max_line_quantity)?;

        let customer = self
            .services
            .customers
            .get_by_id(request.customer_id)
            .await
            .map_err(directory_error)?
            .ok_or(PlaceOrderError::CustomerNotFound(request.customer_id))?;
        if !customer.is_active() {
            return Err(PlaceOrderError::CustomerInactive(customer.id));
        }

        let mut lines = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let product = self
                .services
                .catalog
                .get_by_sku(&item.sku)
                .await
                .map_err(directory_error)?
                .ok_or_else(|| PlaceOrderError::ProductNotFound(item.sku.clone()))?;
            if !product.active {
                return Err(PlaceOrderError::ProductUnavailable(item.sku.clone()));
            }
            if product.price.cents() < 0 {
                return Err(PlaceOrderError::ProductUnavailable(item.sku.clone()));
            }
            lines.push(OrderLine {
                sku: item.sku.clone(),
                product_name: product.name,
                quantity: item.quantity,
                unit_price: product.price,
            });
        }
        if order::checked_total(&lines).is_none() {
            return Err(PlaceOrderError::InvalidInput(
                "order total exceeds the representable amount".to_string(),
            ));
        }
        Ok(lines)
    }

    /// Authorizes the charge, retrying timeouts and transient gateway errors.
    async fn authorize_payment(
        &self,
        order_id: OrderId,
        amount: Money,
        request: &PlaceOrder,
    ) -> Result<Authorized, PaymentFailure> {
        let key = idempotency_key(order_id);
        let max_attempts = self.config.payment_max_attempts.max(1);
        let mut attempt = 0;
        let mut timed_out = false;
        loop {
            attempt += 1;
            let call = self.services.payment.authorize(
                &key,
                amount,
                request.payment_method,
                &request.payment_token,
            );
            let result = match tokio::time::timeout(self.config.payment_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(PaymentError::Timeout),
            };
            timed_out |= matches!(result, Err(PaymentError::Timeout));
            match result {
                Ok(payment_ref) => {
                    return Ok(Authorized {
                        payment_ref,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(attempt, error = %e, "payment authorization failed, retrying");
                    tokio::time::sleep(self.config.payment_retry_backoff * attempt).await;
                }
                Err(error) => {
                    // A decline is the gateway's answer for the key, so no
                    // earlier timed-out call can have charged.
                    let uncertain = timed_out && error.is_retryable();
                    if uncertain {
                        tracing::warn!(attempt, "payment outcome unknown after timeouts");
                    }
                    return Err(PaymentFailure { error, uncertain });
                }
            }
        }
    }

    async fn enter(&self, journal: &Journal<'_>, step: SagaState) {
        tracing::info!(step = %step, "saga step started");
        journal.record(SagaEvent::step_started(step)).await;
    }

    /// Records the failure, enqueues compensation and returns `error`.
    async fn fail(
        &self,
        journal: &Journal<'_>,
        step: SagaState,
        customer_id: CustomerId,
        error: PlaceOrderError,
        compensations: Vec<CompensationTask>,
    ) -> Result<Order, PlaceOrderError> {
        tracing::warn!(step = %step, error = %error, "saga step failed");
        journal
            .record(SagaEvent::step_failed(step, error.to_string()))
            .await;

        for task in compensations {
            self.compensate(journal, task).await;
        }

        if step.can_compensate() {
            self.notify(OrderNotification::OrderFailed {
                order_id: journal.saga_id,
                customer_id,
                reason: error.to_string(),
            });
        }
        journal
            .record(SagaEvent::saga_failed(error.to_string()))
            .await;
        Err(error)
    }

    async fn compensate(&self, journal: &Journal<'_>, task: CompensationTask) {
        match self.compensation.enqueue(task.clone()) {
            Ok(()) => {
                tracing::info!(kind = task.kind(), "compensation enqueued");
                journal
                    .record(SagaEvent::compensation_enqueued(task))
                    .await;
            }
            Err(e) => {
                tracing::error!(alert = true, kind = task.kind(), error = %e, "compensation not enqueued");
                reconciliation::emit(
                    self.services.reconciliation.as_ref(),
                    ReconciliationEvent::compensation_failed(task, 0, e.to_string()),
                );
            }
        }
    }

    async fn reconcile_commit(
        &self,
        journal: &Journal<'_>,
        order_id: OrderId,
        reservation_id: ReservationId,
        error: &InventoryError,
    ) {
        tracing::warn!(
            %reservation_id,
            error = %error,
            "reservation commit failed after payment; flagged for reconciliation"
        );
        reconciliation::emit(
            self.services.reconciliation.as_ref(),
            ReconciliationEvent::commit_failed(order_id, reservation_id, error.to_string()),
        );
        journal
            .record(SagaEvent::commit_reconciled(
                reservation_id,
                error.to_string(),
            ))
            .await;
    }

    async fn save_status(&self, journal: &Journal<'_>, order: &mut Order, status: OrderStatus) {
        order.status = status;
        match self.services.orders.save(order).await {
            Ok(()) => journal.record(SagaEvent::order_persisted(status)).await,
            Err(e) => {
                tracing::warn!(status = %status, error = %e, "order status update failed");
                reconciliation::emit(
                    self.services.reconciliation.as_ref(),
                    ReconciliationEvent::status_update_failed(order.id, status, e.to_string()),
                );
            }
        }
    }

    fn notify(&self, notification: OrderNotification) {
        if let Err(e) = self.services.notifications.enqueue(notification) {
            tracing::warn!(error = %e, "order notification dropped");
        }
    }
}

struct Authorized {
    payment_ref: PaymentRef,
    attempts: u32,
}

struct PaymentFailure {
    error: PaymentError,
    /// A timed-out call may have charged under the order's key.
    uncertain: bool,
}

/// Marks an order ID as in flight until dropped.
struct Claim<'a> {
    in_flight: &'a RwLock<HashSet<OrderId>>,
    order_id: OrderId,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        write(self.in_flight).remove(&self.order_id);
    }
}

/// Journal writes for one saga. A failed write is logged and the saga
/// carries on.
struct Journal<'a> {
    log: &'a dyn SagaLog,
    saga_id: OrderId,
}

impl Journal<'_> {
    async fn record(&self, event: SagaEvent) {
        if let Err(e) = self.log.append(self.saga_id, &event).await {
            tracing::warn!(event_type = event.event_type(), error = %e, "saga journal write failed");
        }
    }
}

fn releases(order_id: OrderId, reservations: &[ReservationId]) -> Vec<CompensationTask> {
    reservations
        .iter()
        .map(|reservation_id| CompensationTask::ReleaseReservation {
            order_id,
            reservation_id: *reservation_id,
        })
        .collect()
}

fn reserve_error(sku: &Sku, error: InventoryError) -> PlaceOrderError {
    match error {
        InventoryError::InsufficientStock { .. } => PlaceOrderError::InsufficientStock(sku.clone()),
        InventoryError::InvalidQuantity { .. } => PlaceOrderError::InvalidInput(error.to_string()),
        other => PlaceOrderError::Inventory(other.to_string()),
    }
}

fn directory_error(error: DirectoryError) -> PlaceOrderError {
    PlaceOrderError::DirectoryUnavailable(error.to_string())
}
