//! Notification sink: where the saga reports events to buyers, sellers and operators.
//!
//! The sink is injected into every component that notifies. Delivery is
//! best-effort; a failed notification never rolls back the change it reports.

use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::{BuyerId, Money, OrderStatus, ProductId, SellerId};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::SagaError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    NewOrder {
        order_id: AggregateId,
        seller_id: SellerId,
        grand_total: Money,
    },
    PaymentReceived {
        order_id: AggregateId,
        buyer_id: BuyerId,
        amount: Money,
    },
    OrderCancelled {
        order_id: AggregateId,
        buyer_id: BuyerId,
        seller_id: SellerId,
        reason: String,
    },
    CancellationRequested {
        order_id: AggregateId,
        seller_id: SellerId,
        reason: String,
    },
    RefundInitiated {
        order_id: AggregateId,
        buyer_id: BuyerId,
        amount: Money,
    },
    Shipped {
        order_id: AggregateId,
        buyer_id: BuyerId,
        awb_code: String,
        courier_name: String,
    },
    StatusChanged {
        order_id: AggregateId,
        buyer_id: BuyerId,
        status: OrderStatus,
    },
    ReturnRequested {
        order_id: AggregateId,
        seller_id: SellerId,
        reason: String,
    },
    ReturnDecided {
        order_id: AggregateId,
        buyer_id: BuyerId,
        approved: bool,
    },
    ReturnReceived {
        order_id: AggregateId,
        buyer_id: BuyerId,
    },
    PayoutCompleted {
        seller_id: SellerId,
        batch_id: String,
        amount: Money,
        orders: usize,
    },
    OutOfStock {
        product_id: ProductId,
        seller_id: SellerId,
    },
    LowStock {
        product_id: ProductId,
        seller_id: SellerId,
        remaining: u64,
    },
    /// Needs a human: money or stock ended up somewhere the saga could not fix alone.
    OperatorAlert {
        order_id: Option<AggregateId>,
        message: String,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::NewOrder { .. } => "new_order",
            Notification::PaymentReceived { .. } => "payment_received",
            Notification::OrderCancelled { .. } => "order_cancelled",
            Notification::CancellationRequested { .. } => "cancellation_requested",
            Notification::RefundInitiated { .. } => "refund_initiated",
            Notification::Shipped { .. } => "shipped",
            Notification::StatusChanged { .. } => "status_changed",
            Notification::ReturnRequested { .. } => "return_requested",
            Notification::ReturnDecided { .. } => "return_decided",
            Notification::ReturnReceived { .. } => "return_received",
            Notification::PayoutCompleted { .. } => "payout_completed",
            Notification::OutOfStock { .. } => "out_of_stock",
            Notification::LowStock { .. } => "low_stock",
            Notification::OperatorAlert { .. } => "operator_alert",
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), SagaError>;
}

pub type SharedNotificationSink = Arc<dyn NotificationSink>;

/// Sends and logs failures instead of returning them.
pub async fn notify_best_effort(sink: &dyn NotificationSink, notification: Notification) {
    let kind = notification.kind();
    if let Err(e) = sink.notify(notification).await {
        metrics::counter!("notification_failures_total", "kind" => kind).increment(1);
        tracing::warn!(kind, error = %e, "notification dropped");
    }
}

/// Writes every notification to the log. The default outside tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, notification: Notification) -> Result<(), SagaError> {
        match &notification {
            Notification::OperatorAlert { order_id, message } => {
                tracing::error!(?order_id, %message, "operator alert");
            }
            other => {
                tracing::info!(kind = other.kind(), payload = ?other, "notification");
            }
        }
        Ok(())
    }
}

/// Keeps notifications in memory for assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotificationSink {
    sent: Arc<Mutex<Vec<Notification>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `notify` fail.
    pub async fn set_fail(&self, fail: bool) {
        *self.fail.lock().await = fail;
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    pub async fn count_of(&self, kind: &str) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|n| n.kind() == kind)
            .count()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn notify(&self, notification: Notification) -> Result<(), SagaError> {
        if *self.fail.lock().await {
            return Err(SagaError::external("notifications", "sink unavailable"));
        }
        self.sent.lock().await.push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn best_effort_swallows_failures() {
        let sink = RecordingNotificationSink::new();
        sink.set_fail(true).await;

        notify_best_effort(
            &sink,
            Notification::OperatorAlert {
                order_id: None,
                message: "check the ledger".to_string(),
            },
        )
        .await;

        assert!(sink.sent().await.is_empty());
    }

    #[tokio::test]
    async fn recording_sink_counts_by_kind() {
        let sink = RecordingNotificationSink::new();
        let product_id = ProductId::new();
        let seller_id = SellerId::new();
        sink.notify(Notification::OutOfStock {
            product_id,
            seller_id,
        })
        .await
        .unwrap();
        sink.notify(Notification::LowStock {
            product_id,
            seller_id,
            remaining: 2,
        })
        .await
        .unwrap();

        assert_eq!(sink.count_of("out_of_stock").await, 1);
        assert_eq!(sink.count_of("low_stock").await, 1);
    }
}
