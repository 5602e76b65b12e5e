//! HTTP surface and background workers for the marketplace order saga.
//!
//! Routes translate requests into [`saga::OrderSaga`] calls; the workers
//! in [`workers`] drive the sweeper, the payout scheduler and deferred jobs.
//! Logging goes through `tracing`, metrics through the Prometheus recorder.

pub mod config;
pub mod error;
pub mod routes;
pub mod workers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use common::SharedClock;
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::services::{
    InMemoryCartStore, InMemoryCarrier, InMemoryPaymentGateway, SharedInventoryLedger,
    SharedNotificationSink, TracingNotificationSink,
};
use saga::{Collaborators, OrderSaga, SignatureVerifier};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, Secret};
pub use error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub saga: Arc<OrderSaga<S>>,
    pub event_store: S,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/products", post(routes::checkout::upsert_product::<S>))
        .route("/carts", post(routes::checkout::create_cart::<S>))
        .route("/checkout/cart", post(routes::checkout::checkout_cart::<S>))
        .route("/checkout/buy-now", post(routes::checkout::buy_now::<S>))
        .route("/payments/verify", post(routes::payments::verify::<S>))
        .route("/payments/webhook", post(routes::payments::webhook::<S>))
        .route("/shipments/webhook", post(routes::shipments::webhook::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/events", get(routes::orders::events::<S>))
        .route("/orders/{id}/pack", post(routes::orders::pack::<S>))
        .route("/orders/{id}/ship", post(routes::orders::ship::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route(
            "/orders/{id}/cancellation/approve",
            post(routes::orders::approve_cancellation::<S>),
        )
        .route(
            "/orders/{id}/cancellation/reject",
            post(routes::orders::reject_cancellation::<S>),
        )
        .route("/orders/{id}/return", post(routes::orders::request_return::<S>))
        .route(
            "/orders/{id}/return/approve",
            post(routes::orders::approve_return::<S>),
        )
        .route(
            "/orders/{id}/return/reject",
            post(routes::orders::reject_return::<S>),
        )
        .route("/orders/{id}/returned", post(routes::orders::mark_returned::<S>))
        .route("/payouts/pending", get(routes::payouts::pending::<S>))
        .route("/payouts/complete", post(routes::payouts::complete::<S>))
        .route(
            "/settings/platform-fee",
            put(routes::settings::update_platform_fee::<S>),
        )
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

/// Collaborators for a deployment with no external gateway or carrier wired in.
pub fn in_memory_collaborators(inventory: SharedInventoryLedger) -> Collaborators {
    let notifications: SharedNotificationSink = Arc::new(TracingNotificationSink);
    Collaborators {
        inventory,
        payments: Arc::new(InMemoryPaymentGateway::new()),
        carrier: Arc::new(InMemoryCarrier::new()),
        notifications,
        carts: Arc::new(InMemoryCartStore::new()),
    }
}

/// Builds the saga and the handler state around it.
pub fn create_state<S: EventStore + Clone + 'static>(
    event_store: S,
    collaborators: Collaborators,
    config: &Config,
    clock: SharedClock,
) -> Arc<AppState<S>> {
    let saga = OrderSaga::new(
        event_store.clone(),
        collaborators,
        SignatureVerifier::new(config.webhook_secret.expose()),
        config.policy(),
        clock,
    );
    Arc::new(AppState {
        saga: Arc::new(saga),
        event_store,
    })
}
