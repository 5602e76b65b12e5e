//! API server entry point.

use std::sync::Arc;

use api::{Config, workers};
use common::SystemClock;
use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::services::{InMemoryInventoryLedger, PostgresInventoryLedger, SharedInventoryLedger, TracingNotificationSink};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, starting graceful shutdown"),
        () = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}

async fn serve<S: EventStore + Clone + 'static>(
    store: S,
    inventory: SharedInventoryLedger,
    config: &Config,
    metrics_handle: PrometheusHandle,
) {
    let state = api::create_state(
        store,
        api::in_memory_collaborators(inventory),
        config,
        Arc::new(SystemClock),
    );
    state
        .saga
        .refresh_views()
        .await
        .expect("projection catch-up failed");
    if let Err(e) = state.saga.resume_deferred_jobs().await {
        tracing::warn!(error = %e, "could not re-queue deferred promotions");
    }

    let workers = [
        workers::start_sweeper(Arc::clone(&state.saga), config.sweep_interval()),
        workers::start_payout_scheduler(Arc::clone(&state.saga), config.payout_interval()),
        workers::start_job_runner(Arc::clone(&state.saga)),
    ];

    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    for worker in workers {
        worker.abort();
    }
    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    tracing::warn!("payment gateway and carrier are in-memory adapters");

    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url.expose())
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresEventStore::new(pool.clone());
            store.run_migrations().await.expect("migrations failed");
            let inventory = PostgresInventoryLedger::new(pool)
                .with_notifications(Arc::new(TracingNotificationSink));
            tracing::info!("using PostgreSQL event store and inventory ledger");
            serve(store, Arc::new(inventory), &config, metrics_handle).await;
        }
        None => {
            let inventory = InMemoryInventoryLedger::new()
                .with_notifications(Arc::new(TracingNotificationSink));
            tracing::info!("using in-memory event store and inventory ledger");
            serve(InMemoryEventStore::new(), Arc::new(inventory), &config, metrics_handle).await;
        }
    }
}
