//! API server entry point.

use std::time::Duration;

use api::config::{Config, LogFormat};
use api::seed::Seed;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// How long shutdown waits for outstanding compensation tasks.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Configuration and tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Build state and load seed data
    let (state, backends, compensation_worker) = api::create_default_state(&config);
    let seed = match &config.seed_file {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading seed file");
            Seed::from_path(path)?
        }
        None => Seed::demo(),
    };
    let customer_ids = seed
        .apply(&backends.customers, &backends.catalog, &backends.ledger)
        .await?;
    for id in &customer_ids {
        tracing::info!(customer_id = %id, "customer available");
    }

    // 4. Background reservation expiry
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = inventory::spawn_expiry_sweeper(
        backends.ledger.clone(),
        config.sweep_interval,
        shutdown_rx,
    );

    // 5. Start server
    let app = api::create_app(state.clone(), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 6. Stop the sweeper and drain compensation
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("expiry sweeper already stopped");
    }
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "expiry sweeper panicked");
    }

    let compensation = state.coordinator.compensation().clone();
    if tokio::time::timeout(DRAIN_TIMEOUT, compensation.wait_idle())
        .await
        .is_err()
    {
        for task in compensation.pending() {
            tracing::error!(alert = true, kind = task.kind(), order_id = %task.order_id(), "compensation still pending at shutdown");
        }
    }
    drop(compensation);
    drop(state);
    if tokio::time::timeout(DRAIN_TIMEOUT, compensation_worker)
        .await
        .is_err()
    {
        tracing::warn!("compensation worker did not stop in time");
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
