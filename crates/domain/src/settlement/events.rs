//! Transaction domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::order::{BuyerId, FeeRate, Money, SellerId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransactionEvent {
    TransactionRecorded(TransactionRecordedData),
    PayoutScheduled(PayoutScheduledData),
    PayoutBecameEligible(PayoutBecameEligibleData),
    PayoutCompleted(PayoutCompletedData),
    TransactionRefunded(TransactionRefundedData),
}

impl DomainEvent for TransactionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransactionEvent::TransactionRecorded(_) => "TransactionRecorded",
            TransactionEvent::PayoutScheduled(_) => "PayoutScheduled",
            TransactionEvent::PayoutBecameEligible(_) => "PayoutBecameEligible",
            TransactionEvent::PayoutCompleted(_) => "PayoutCompleted",
            TransactionEvent::TransactionRefunded(_) => "TransactionRefunded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecordedData {
    pub transaction_id: AggregateId,
    pub order_id: AggregateId,
    pub buyer_id: BuyerId,
    pub seller_id: SellerId,
    pub amount: Money,
    /// Fee rate in force when the payment was verified; never recomputed.
    pub fee_rate: FeeRate,
    pub platform_fee: Money,
    pub seller_net: Money,
    pub payment_method: String,
    pub payment_ref: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutScheduledData {
    pub eligible_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutBecameEligibleData {
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutCompletedData {
    pub batch_id: String,
    pub reference: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRefundedData {
    pub reason: String,
    pub refunded_at: DateTime<Utc>,
}
