//! HTTP API server for order placement.
//!
//! A thin boundary over the order placement saga: requests are decoded,
//! handed to the [`OrderPlacementCoordinator`] or the [`StockLedger`], and
//! their errors mapped to status codes. Structured logging (tracing) and
//! Prometheus metrics are wired in here.

pub mod config;
pub mod error;
pub mod routes;
pub mod seed;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use inventory::{StockLedger, SystemClock};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    Collaborators, InMemoryCatalog, InMemoryCustomerDirectory, InMemoryNotificationQueue,
    InMemoryOrderRepository, InMemoryPaymentGateway, InMemoryReconciliationLog, InMemorySagaLog,
    OrderPlacementCoordinator,
};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::metrics::MetricsState;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub coordinator: OrderPlacementCoordinator,
    pub ledger: StockLedger,
}

/// The in-memory collaborators behind the default state. Kept so the binary
/// can seed them and tests can script their behaviour.
#[derive(Debug, Clone, Default)]
pub struct Backends {
    pub ledger: StockLedger,
    pub customers: InMemoryCustomerDirectory,
    pub catalog: InMemoryCatalog,
    pub payment: InMemoryPaymentGateway,
    pub orders: InMemoryOrderRepository,
    pub notifications: InMemoryNotificationQueue,
    pub reconciliation: InMemoryReconciliationLog,
    pub journal: InMemorySagaLog,
}

impl Backends {
    pub fn new(config: &Config) -> Self {
        let ttl = chrono::Duration::from_std(config.reservation_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(inventory::DEFAULT_RESERVATION_TTL_SECS));
        let retention = chrono::Duration::from_std(config.reservation_retention).unwrap_or_else(|_| {
            chrono::Duration::seconds(inventory::DEFAULT_RESOLVED_RETENTION_SECS)
        });
        Self {
            ledger: StockLedger::with_retention(Arc::new(SystemClock), ttl, retention),
            ..Self::default()
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            customers: Arc::new(self.customers.clone()),
            catalog: Arc::new(self.catalog.clone()),
            inventory: Arc::new(self.ledger.clone()),
            payment: Arc::new(self.payment.clone()),
            orders: Arc::new(self.orders.clone()),
            notifications: Arc::new(self.notifications.clone()),
            reconciliation: Arc::new(self.reconciliation.clone()),
            journal: Arc::new(self.journal.clone()),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(MetricsState {
            handle: metrics_handle,
            app: state.clone(),
        });

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::place))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/stock/{sku}", get(routes::stock::get))
        .route("/stock/{sku}/restock", post(routes::stock::restock))
        .route("/stock/{sku}/adjust", post(routes::stock::adjust))
        .route("/sagas/{id}", get(routes::sagas::get))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default application state over in-memory backends and starts
/// the compensation worker.
///
/// Must be called inside a tokio runtime.
pub fn create_default_state(config: &Config) -> (Arc<AppState>, Backends, JoinHandle<()>) {
    let backends = Backends::new(config);
    let (coordinator, compensation_worker) =
        OrderPlacementCoordinator::spawn(config.saga.clone(), backends.collaborators());

    let state = Arc::new(AppState {
        coordinator,
        ledger: backends.ledger.clone(),
    });

    (state, backends, compensation_worker)
}
