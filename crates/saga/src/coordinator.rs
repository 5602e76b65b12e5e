//! The order lifecycle saga.
//!
//! [`OrderSaga`] owns the domain services, the read models fed from the
//! event log, and every external collaborator. The flows live in sibling
//! modules as further `impl` blocks: checkout, payment verification,
//! compensation, post-payment lifecycle, the sweeper and payouts.

use std::sync::Arc;

use common::{AggregateId, Clock, SharedClock};
use domain::{
    Aggregate, LineItem, Order, OrderService, SettingsService, SettlementService,
};
use event_store::EventStore;
use projections::{OrderDirectoryView, PayoutLedgerView, ProjectionProcessor};

use crate::error::{Result, SagaError};
use crate::jobs::DeferredJobs;
use crate::policy::LifecyclePolicy;
use crate::retry::RetryPolicy;
use crate::services::{
    Notification, SharedCartStore, SharedCarrierAdapter, SharedInventoryLedger,
    SharedNotificationSink, SharedPaymentGateway, notify_best_effort,
};
use crate::signature::SignatureVerifier;

/// External systems the saga drives.
#[derive(Clone)]
pub struct Collaborators {
    pub inventory: SharedInventoryLedger,
    pub payments: SharedPaymentGateway,
    pub carrier: SharedCarrierAdapter,
    pub notifications: SharedNotificationSink,
    pub carts: SharedCartStore,
}

pub struct OrderSaga<S: EventStore> {
    pub(crate) orders: OrderService<S>,
    pub(crate) settlement: SettlementService<S>,
    pub(crate) settings: SettingsService<S>,
    processor: ProjectionProcessor<S>,
    pub(crate) directory: OrderDirectoryView,
    pub(crate) payouts: PayoutLedgerView,
    pub(crate) inventory: SharedInventoryLedger,
    pub(crate) payments: SharedPaymentGateway,
    pub(crate) carrier: SharedCarrierAdapter,
    pub(crate) notifications: SharedNotificationSink,
    pub(crate) carts: SharedCartStore,
    pub(crate) signatures: SignatureVerifier,
    pub(crate) jobs: DeferredJobs,
    pub(crate) policy: LifecyclePolicy,
    pub(crate) retry: RetryPolicy,
    pub(crate) clock: SharedClock,
}

impl<S> OrderSaga<S>
where
    S: EventStore + Clone + 'static,
{
    pub fn new(
        store: S,
        collaborators: Collaborators,
        signatures: SignatureVerifier,
        policy: LifecyclePolicy,
        clock: SharedClock,
    ) -> Self {
        let directory = OrderDirectoryView::new();
        let payouts = PayoutLedgerView::new();
        let mut processor = ProjectionProcessor::new(store.clone());
        processor.register(Box::new(directory.clone()));
        processor.register(Box::new(payouts.clone()));

        Self {
            orders: OrderService::with_clock(store.clone(), Arc::clone(&clock)),
            settlement: SettlementService::with_clock(store.clone(), Arc::clone(&clock)),
            settings: SettingsService::with_clock(store, policy.default_fee_rate, Arc::clone(&clock)),
            processor,
            directory,
            payouts,
            inventory: collaborators.inventory,
            payments: collaborators.payments,
            carrier: collaborators.carrier,
            notifications: collaborators.notifications,
            carts: collaborators.carts,
            signatures,
            jobs: DeferredJobs::new(),
            policy,
            retry: RetryPolicy::default(),
            clock,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn orders(&self) -> &OrderService<S> {
        &self.orders
    }

    pub fn settlement(&self) -> &SettlementService<S> {
        &self.settlement
    }

    pub fn settings(&self) -> &SettingsService<S> {
        &self.settings
    }

    pub fn directory(&self) -> &OrderDirectoryView {
        &self.directory
    }

    pub fn payouts(&self) -> &PayoutLedgerView {
        &self.payouts
    }

    pub fn jobs(&self) -> &DeferredJobs {
        &self.jobs
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    pub fn signatures(&self) -> &SignatureVerifier {
        &self.signatures
    }

    pub fn inventory(&self) -> &SharedInventoryLedger {
        &self.inventory
    }

    pub fn carts(&self) -> &SharedCartStore {
        &self.carts
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Brings the read models up to date with the event log.
    pub async fn refresh_views(&self) -> Result<()> {
        self.processor.run_catch_up().await?;
        Ok(())
    }

    pub async fn order(&self, order_id: AggregateId) -> Result<Order> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))
    }

    pub(crate) async fn notify(&self, notification: Notification) {
        notify_best_effort(self.notifications.as_ref(), notification).await;
    }

    /// Puts each line's units back. Failures are logged for an operator;
    /// the order's event already records that stock was released.
    pub(crate) async fn release_lines(&self, order_id: AggregateId, lines: &[LineItem]) {
        for line in lines {
            if let Err(e) = self.inventory.release(line.product_id, line.units()).await {
                tracing::error!(%order_id, product_id = %line.product_id, units = line.units(), error = %e, "stock release failed");
                self.notify(Notification::OperatorAlert {
                    order_id: Some(order_id),
                    message: format!(
                        "could not restore {} units of product {}: {e}",
                        line.units(),
                        line.product_id
                    ),
                })
                .await;
            }
        }
    }

    /// Drops the cart an order was placed from, once the order is settled either way.
    pub(crate) async fn clear_cart(&self, order: &Order) {
        let Some(cart_id) = order.cart_id() else {
            return;
        };
        if let Err(e) = self.carts.remove(cart_id).await {
            tracing::warn!(%cart_id, order_id = ?order.id(), error = %e, "cart cleanup failed");
        }
    }
}
