//! Post-payment lifecycle: packing, shipping, carrier updates, delivery,
//! cancellations and returns.

use common::AggregateId;
use domain::{
    Actor, Aggregate, BuyerId, CommandResult, DomainError, Order, OrderError, OrderEvent,
    OrderStatus, SellerId, ShipmentDetails,
};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::coordinator::OrderSaga;
use crate::error::{Result, SagaError};
use crate::services::{Notification, map_carrier_status};

/// Carrier tracking callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierWebhook {
    pub order_id: AggregateId,
    pub status: String,
    pub awb_code: Option<String>,
    pub courier_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ShipmentUpdate {
    Applied { status: OrderStatus },
    /// The order was already in this status.
    Unchanged { status: OrderStatus },
    /// Carrier status with no bearing on the order.
    Ignored { carrier_status: String },
}

fn ensure_seller(order: &Order, seller_id: SellerId) -> Result<()> {
    if order.seller_id() == Some(seller_id) {
        Ok(())
    } else {
        Err(SagaError::Validation("order belongs to another seller".to_string()))
    }
}

fn ensure_can_reach(order: &Order, to: OrderStatus) -> Result<()> {
    if order.status().can_transition_to(to) {
        Ok(())
    } else {
        Err(OrderError::InvalidTransition {
            from: order.status(),
            to,
        }
        .into())
    }
}

impl<S> OrderSaga<S>
where
    S: EventStore + Clone + 'static,
{
    #[tracing::instrument(skip(self))]
    pub async fn pack(&self, order_id: AggregateId, seller_id: SellerId) -> Result<Order> {
        let order = self.order(order_id).await?;
        ensure_seller(&order, seller_id)?;
        let result = self.orders.pack(order_id, Actor::Seller(seller_id)).await?;
        Ok(result.aggregate)
    }

    /// Books the carrier and marks the order shipped with the courier's tracking code.
    #[tracing::instrument(skip(self))]
    pub async fn ship(&self, order_id: AggregateId, seller_id: SellerId) -> Result<Order> {
        let order = self.order(order_id).await?;
        ensure_seller(&order, seller_id)?;
        ensure_can_reach(&order, OrderStatus::Shipped)?;

        let token = self.carrier.authenticate().await?;
        let shipment_id = self
            .carrier
            .create_shipment(&token, &order, &self.policy.pickup_location)
            .await?;
        let courier = self.carrier.assign_courier(&token, &shipment_id).await?;

        let result = self
            .orders
            .ship(
                order_id,
                ShipmentDetails {
                    shipment_id,
                    awb_code: courier.awb_code.clone(),
                    courier_name: courier.courier_name.clone(),
                    tracking_url: courier.tracking_url,
                    estimated_delivery: courier.estimated_delivery,
                },
                Actor::Seller(seller_id),
            )
            .await?;

        if let Some(buyer_id) = order.buyer_id() {
            self.notify(Notification::Shipped {
                order_id,
                buyer_id,
                awb_code: courier.awb_code,
                courier_name: courier.courier_name,
            })
            .await;
        }
        Ok(result.aggregate)
    }

    /// Buyer cancellation: immediate until packed, a request for approval after.
    #[tracing::instrument(skip(self))]
    pub async fn buyer_cancel(&self, order_id: AggregateId, buyer_id: BuyerId, reason: &str) -> Result<Order> {
        let order = self.order(order_id).await?;
        if order.buyer_id() != Some(buyer_id) {
            return Err(SagaError::Validation("order belongs to another buyer".to_string()));
        }

        let result = self
            .orders
            .request_cancellation(order_id, reason, Actor::Buyer(buyer_id))
            .await?;
        self.after_cancel_command(&result, reason).await;
        Ok(result.aggregate)
    }

    /// Seller or admin cancellation, effective immediately.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: AggregateId, actor: Actor, reason: &str) -> Result<Order> {
        if let Actor::Seller(seller_id) = actor {
            ensure_seller(&self.order(order_id).await?, seller_id)?;
        }
        let result = self.orders.cancel(order_id, reason, actor).await?;
        self.after_cancel_command(&result, reason).await;
        Ok(result.aggregate)
    }

    #[tracing::instrument(skip(self))]
    pub async fn approve_cancellation(&self, order_id: AggregateId, actor: Actor) -> Result<Order> {
        let result = self.orders.approve_cancellation(order_id, actor).await?;
        let reason = result
            .aggregate
            .cancellation()
            .map(|c| c.reason.clone())
            .unwrap_or_default();
        self.settle_cancellation(&result, &reason).await;
        Ok(result.aggregate)
    }

    #[tracing::instrument(skip(self))]
    pub async fn reject_cancellation(&self, order_id: AggregateId, actor: Actor, reason: &str) -> Result<Order> {
        let result = self
            .orders
            .reject_cancellation(order_id, reason, actor)
            .await?;
        Ok(result.aggregate)
    }

    async fn after_cancel_command(&self, result: &CommandResult<Order>, reason: &str) {
        let order = &result.aggregate;
        for event in &result.events {
            if let OrderEvent::CancellationRequested(data) = event
                && let (Some(order_id), Some(seller_id)) = (order.id(), order.seller_id())
            {
                self.notify(Notification::CancellationRequested {
                    order_id,
                    seller_id,
                    reason: data.reason.clone(),
                })
                .await;
            }
        }
        self.settle_cancellation(result, reason).await;
    }

    /// Applies a carrier tracking update.
    #[tracing::instrument(skip(self), fields(order_id = %webhook.order_id, status = %webhook.status))]
    pub async fn handle_carrier_webhook(&self, webhook: CarrierWebhook) -> Result<ShipmentUpdate> {
        let Some(status) = map_carrier_status(&webhook.status) else {
            tracing::info!("ignoring carrier status");
            return Ok(ShipmentUpdate::Ignored {
                carrier_status: webhook.status,
            });
        };
        let order_id = webhook.order_id;
        let before = self.order(order_id).await?;
        if before.status() == status {
            return Ok(ShipmentUpdate::Unchanged { status });
        }

        let after = match status {
            OrderStatus::Delivered => self.deliver(order_id, Actor::Carrier).await?,
            OrderStatus::Returned => self.mark_returned(order_id, Actor::Carrier).await?,
            other => {
                self.orders
                    .update_shipment_status(order_id, other, &webhook.status)
                    .await?
                    .aggregate
            }
        };

        if let Some(buyer_id) = after.buyer_id() {
            self.notify(Notification::StatusChanged {
                order_id,
                buyer_id,
                status: after.status(),
            })
            .await;
        }
        Ok(ShipmentUpdate::Applied {
            status: after.status(),
        })
    }

    /// Opens the return window and starts the payout hold.
    #[tracing::instrument(skip(self))]
    pub async fn deliver(&self, order_id: AggregateId, actor: Actor) -> Result<Order> {
        let result = self
            .orders
            .deliver(order_id, actor, self.policy.return_window)
            .await?;

        for event in &result.events {
            if let OrderEvent::OrderDelivered(data) = event {
                let eligible_at = data.delivered_at + self.policy.payout_hold;
                if let Err(e) = self.settlement.schedule_payout(order_id, eligible_at).await {
                    tracing::error!(%order_id, error = %e, "payout not scheduled");
                }
            }
        }
        Ok(result.aggregate)
    }

    /// A return past the window is refused and the order closed on the spot.
    #[tracing::instrument(skip(self, images))]
    pub async fn request_return(
        &self,
        order_id: AggregateId,
        buyer_id: BuyerId,
        reason: &str,
        images: Vec<String>,
    ) -> Result<Order> {
        let order = self.order(order_id).await?;
        if order.buyer_id() != Some(buyer_id) {
            return Err(SagaError::Validation("order belongs to another buyer".to_string()));
        }

        let result = match self
            .orders
            .request_return(order_id, reason, images, Actor::Buyer(buyer_id))
            .await
        {
            Ok(result) => result,
            Err(DomainError::Order(OrderError::ReturnWindowExpired { expired_at })) => {
                let current_status = match self.orders.close_return_window(order_id).await {
                    Ok(closed) => closed.aggregate.status(),
                    Err(e) => {
                        tracing::warn!(%order_id, error = %e, "could not close return window");
                        order.status()
                    }
                };
                return Err(SagaError::OrderState {
                    current_status,
                    reason: format!("the return window closed at {expired_at}"),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(seller_id) = order.seller_id() {
            self.notify(Notification::ReturnRequested {
                order_id,
                seller_id,
                reason: reason.to_string(),
            })
            .await;
        }
        Ok(result.aggregate)
    }

    /// Approves a return and books the reverse pickup.
    #[tracing::instrument(skip(self))]
    pub async fn approve_return(&self, order_id: AggregateId, seller_id: SellerId) -> Result<Order> {
        let order = self.order(order_id).await?;
        ensure_seller(&order, seller_id)?;
        ensure_can_reach(&order, OrderStatus::ReturnApproved)?;

        let token = self.carrier.authenticate().await?;
        let pickup_at = self.carrier.schedule_return_pickup(&token, &order).await?;
        let result = self
            .orders
            .approve_return(order_id, Some(pickup_at), Actor::Seller(seller_id))
            .await?;

        self.notify_return_decision(&result.aggregate, true).await;
        Ok(result.aggregate)
    }

    #[tracing::instrument(skip(self))]
    pub async fn reject_return(&self, order_id: AggregateId, seller_id: SellerId, reason: &str) -> Result<Order> {
        ensure_seller(&self.order(order_id).await?, seller_id)?;
        let result = self
            .orders
            .reject_return(order_id, reason, Actor::Seller(seller_id))
            .await?;

        self.notify_return_decision(&result.aggregate, false).await;
        Ok(result.aggregate)
    }

    async fn notify_return_decision(&self, order: &Order, approved: bool) {
        if let (Some(order_id), Some(buyer_id)) = (order.id(), order.buyer_id()) {
            self.notify(Notification::ReturnDecided {
                order_id,
                buyer_id,
                approved,
            })
            .await;
        }
    }

    /// Goods are back: stock is restored, the buyer refunded and the
    /// seller's Transaction voided.
    #[tracing::instrument(skip(self))]
    pub async fn mark_returned(&self, order_id: AggregateId, actor: Actor) -> Result<Order> {
        let result = self.orders.mark_returned(order_id, actor).await?;
        let order = &result.aggregate;

        for event in &result.events {
            if let OrderEvent::OrderReturned(data) = event {
                if data.stock_released {
                    self.release_lines(order_id, order.line_items()).await;
                }
                if let Some(refund) = &data.refund {
                    self.refund_paid_order(order_id, refund, "order returned").await;
                }
                metrics::counter!("compensations_total").increment(1);
                if let Some(buyer_id) = order.buyer_id() {
                    self.notify(Notification::ReturnReceived { order_id, buyer_id })
                        .await;
                }
            }
        }
        Ok(result.aggregate)
    }
}
