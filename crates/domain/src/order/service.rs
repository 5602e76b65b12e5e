//! Order service: the command surface the saga and API call into.

use chrono::Duration;
use common::{AggregateId, Clock, SharedClock, SystemClock};
use event_store::{EventStore, EventStoreExt};
use std::sync::Arc;

use crate::aggregate::Aggregate;
use crate::command::{CommandHandler, CommandResult, EventContext};
use crate::error::DomainError;

use super::{Actor, ConfirmPayment, Money, Order, OrderStatus, PlaceOrder, RefundDue, ShipmentDetails};

/// Wraps a [`CommandHandler`] for orders and stamps every event with the
/// injected clock's time.
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
    clock: SharedClock,
}

impl<S: EventStore + Clone> Clone for OrderService<S> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: EventStore> OrderService<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, clock: SharedClock) -> Self {
        Self {
            handler: CommandHandler::new(store),
            clock,
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.load_existing(order_id).await
    }

    pub async fn require_order(&self, order_id: AggregateId) -> Result<Order, DomainError> {
        self.handler.load_required(order_id).await
    }

    /// Every order placed under one payment intent, ordered by seller.
    #[tracing::instrument(skip(self))]
    pub async fn orders_for_intent(&self, payment_intent_id: &str) -> Result<Vec<Order>, DomainError> {
        let placed = self
            .handler
            .store()
            .get_correlated_events("OrderPlaced", payment_intent_id)
            .await?;

        let mut orders = Vec::with_capacity(placed.len());
        for envelope in placed {
            if let Some(order) = self.handler.load_existing(envelope.aggregate_id).await? {
                orders.push(order);
            }
        }
        orders.sort_by_key(|o| o.seller_id());
        Ok(orders)
    }

    fn context(&self) -> EventContext {
        EventContext::at(self.clock.now())
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, intent = %cmd.payment_intent_id))]
    pub async fn place_order(&self, cmd: PlaceOrder) -> Result<CommandResult<Order>, DomainError> {
        let order_id = cmd.order_id;
        let context = EventContext::at(cmd.placed_at).correlated(cmd.payment_intent_id.clone());

        let result = self
            .handler
            .execute_with(order_id, context, |order| order.place(cmd))
            .await?;
        metrics::counter!("orders_placed_total").increment(1);
        Ok(result)
    }

    #[tracing::instrument(skip(self))]
    pub async fn begin_verification(
        &self,
        order_id: AggregateId,
        payment_ref: &str,
        lease: Duration,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| {
                order.begin_verification(payment_ref, now, lease)
            })
            .await
    }

    #[tracing::instrument(skip(self, cmd))]
    pub async fn confirm_payment(
        &self,
        order_id: AggregateId,
        cmd: ConfirmPayment,
    ) -> Result<CommandResult<Order>, DomainError> {
        let context = EventContext::at(cmd.confirmed_at);
        self.handler
            .execute_with(order_id, context, |order| order.confirm_payment(cmd))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn fail_payment(
        &self,
        order_id: AggregateId,
        reason: &str,
        actor: Actor,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| {
                order.fail_payment(reason, actor, now)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn start_processing(
        &self,
        order_id: AggregateId,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| order.start_processing(now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn pack(
        &self,
        order_id: AggregateId,
        actor: Actor,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| order.pack(actor, now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        order_id: AggregateId,
        reason: &str,
        actor: Actor,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| order.cancel(reason, actor, now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn request_cancellation(
        &self,
        order_id: AggregateId,
        reason: &str,
        actor: Actor,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| {
                order.request_cancellation(reason, actor, now)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn approve_cancellation(
        &self,
        order_id: AggregateId,
        actor: Actor,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| {
                order.approve_cancellation(actor, now)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn reject_cancellation(
        &self,
        order_id: AggregateId,
        reason: &str,
        actor: Actor,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| {
                order.reject_cancellation(reason, actor, now)
            })
            .await
    }

    #[tracing::instrument(skip(self, shipment), fields(awb = %shipment.awb_code))]
    pub async fn ship(
        &self,
        order_id: AggregateId,
        shipment: ShipmentDetails,
        actor: Actor,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| order.ship(shipment, actor, now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_shipment_status(
        &self,
        order_id: AggregateId,
        status: OrderStatus,
        carrier_status: &str,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| {
                order.update_shipment_status(status, carrier_status, now)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn deliver(
        &self,
        order_id: AggregateId,
        actor: Actor,
        return_window: Duration,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| {
                order.deliver(actor, now, return_window)
            })
            .await
    }

    #[tracing::instrument(skip(self, images))]
    pub async fn request_return(
        &self,
        order_id: AggregateId,
        reason: &str,
        images: Vec<String>,
        actor: Actor,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| {
                order.request_return(reason, images, actor, now)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn approve_return(
        &self,
        order_id: AggregateId,
        pickup_scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
        actor: Actor,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| {
                order.approve_return(pickup_scheduled_at, actor, now)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn reject_return(
        &self,
        order_id: AggregateId,
        reason: &str,
        actor: Actor,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| {
                order.reject_return(reason, actor, now)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_returned(
        &self,
        order_id: AggregateId,
        actor: Actor,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| order.mark_returned(actor, now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn close_return_window(
        &self,
        order_id: AggregateId,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| order.close_return_window(now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn request_capture_refund(
        &self,
        order_id: AggregateId,
        refund: RefundDue,
        reason: &str,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| {
                order.request_capture_refund(refund, reason, now)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_refund_initiated(
        &self,
        order_id: AggregateId,
        refund_ref: &str,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| {
                order.record_refund_initiated(refund_ref, now)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn complete_refund(
        &self,
        order_id: AggregateId,
        refund_ref: &str,
        amount: Money,
    ) -> Result<CommandResult<Order>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(order_id, self.context(), |order| {
                order.complete_refund(refund_ref, amount, now)
            })
            .await
    }

    /// Version of the order as last loaded; exposed for optimistic callers.
    pub async fn version(&self, order_id: AggregateId) -> Result<event_store::Version, DomainError> {
        Ok(self.handler.load(order_id).await?.version())
    }
}
