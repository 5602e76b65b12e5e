//! Payment gateway contract and an in-memory gateway for tests and local runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::Money;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::SagaError;

/// Payment state as the gateway reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPaymentStatus {
    Created,
    Authorized,
    Captured,
    Failed,
    Refunded,
}

impl std::fmt::Display for GatewayPaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GatewayPaymentStatus::Created => "created",
            GatewayPaymentStatus::Authorized => "authorized",
            GatewayPaymentStatus::Captured => "captured",
            GatewayPaymentStatus::Failed => "failed",
            GatewayPaymentStatus::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub payment_ref: String,
    pub payment_intent_id: String,
    pub status: GatewayPaymentStatus,
    pub method: String,
    pub amount: Money,
    /// The gateway's own payload, kept for audit.
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a payment intent covering a whole checkout.
    async fn create_payment_intent(&self, amount: Money, buyer_ref: &str) -> Result<String, SagaError>;

    /// Authoritative status of a payment. Safe to retry.
    async fn fetch_payment_status(&self, payment_ref: &str) -> Result<PaymentDetails, SagaError>;

    /// Refunds part or all of a captured payment; returns the refund reference.
    async fn refund(&self, payment_ref: &str, amount: Money) -> Result<String, SagaError>;
}

pub type SharedPaymentGateway = Arc<dyn PaymentGateway>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedRefund {
    pub refund_ref: String,
    pub payment_ref: String,
    pub amount: Money,
}

#[derive(Debug, Default)]
struct GatewayState {
    intents: HashMap<String, Money>,
    payments: HashMap<String, PaymentDetails>,
    refunds: Vec<IssuedRefund>,
    next_id: u32,
    failing_fetches: u32,
    fail_refunds: bool,
}

impl GatewayState {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{:04}", self.next_id)
    }
}

/// Gateway double. Payments are settled by calling [`capture`](Self::capture)
/// or [`decline`](Self::decline), standing in for the buyer paying.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures the full intent amount and returns the payment reference.
    pub async fn capture(&self, payment_intent_id: &str) -> String {
        self.settle(payment_intent_id, GatewayPaymentStatus::Captured)
            .await
    }

    pub async fn decline(&self, payment_intent_id: &str) -> String {
        self.settle(payment_intent_id, GatewayPaymentStatus::Failed).await
    }

    async fn settle(&self, payment_intent_id: &str, status: GatewayPaymentStatus) -> String {
        let mut state = self.state.lock().await;
        let amount = state
            .intents
            .get(payment_intent_id)
            .copied()
            .unwrap_or_default();
        let payment_ref = state.next("pay");
        state.payments.insert(
            payment_ref.clone(),
            PaymentDetails {
                payment_ref: payment_ref.clone(),
                payment_intent_id: payment_intent_id.to_string(),
                status,
                method: "card".to_string(),
                amount,
                raw: serde_json::json!({
                    "id": payment_ref,
                    "order_id": payment_intent_id,
                    "status": status.to_string(),
                }),
            },
        );
        payment_ref
    }

    /// Makes the next `count` status lookups fail as if the gateway were down.
    pub async fn fail_next_fetches(&self, count: u32) {
        self.state.lock().await.failing_fetches = count;
    }

    pub async fn set_fail_refunds(&self, fail: bool) {
        self.state.lock().await.fail_refunds = fail;
    }

    pub async fn refunds(&self) -> Vec<IssuedRefund> {
        self.state.lock().await.refunds.clone()
    }

    pub async fn intent_amount(&self, payment_intent_id: &str) -> Option<Money> {
        self.state.lock().await.intents.get(payment_intent_id).copied()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_payment_intent(&self, amount: Money, buyer_ref: &str) -> Result<String, SagaError> {
        let mut state = self.state.lock().await;
        let intent_id = state.next("pi");
        state.intents.insert(intent_id.clone(), amount);
        tracing::debug!(%intent_id, %buyer_ref, %amount, "payment intent created");
        Ok(intent_id)
    }

    async fn fetch_payment_status(&self, payment_ref: &str) -> Result<PaymentDetails, SagaError> {
        let mut state = self.state.lock().await;
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(SagaError::external("payment gateway", "status lookup timed out"));
        }
        state
            .payments
            .get(payment_ref)
            .cloned()
            .ok_or_else(|| SagaError::Validation(format!("unknown payment reference {payment_ref}")))
    }

    async fn refund(&self, payment_ref: &str, amount: Money) -> Result<String, SagaError> {
        let mut state = self.state.lock().await;
        if state.fail_refunds {
            return Err(SagaError::external("payment gateway", "refund rejected"));
        }
        let refund_ref = state.next("rfnd");
        state.refunds.push(IssuedRefund {
            refund_ref: refund_ref.clone(),
            payment_ref: payment_ref.to_string(),
            amount,
        });
        Ok(refund_ref)
    }
}
