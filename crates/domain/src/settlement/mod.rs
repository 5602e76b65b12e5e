//! Settlement ledger: one Transaction per paid order, feeding seller payouts.

mod aggregate;
mod events;
mod service;

pub use aggregate::{PayoutStatus, Transaction, TransactionStatus};
pub use events::{
    PayoutBecameEligibleData, PayoutCompletedData, PayoutScheduledData, TransactionEvent,
    TransactionRecordedData, TransactionRefundedData,
};
pub use service::{RecordTransaction, SettlementService};

use chrono::{DateTime, Utc};
use common::AggregateId;
use thiserror::Error;
use uuid::Uuid;

use crate::order::Money;

/// Namespace for deriving a Transaction id from its order id.
pub const TRANSACTION_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_93b8_4d07_a5e2_c01d_7b3f_9e58);

/// The Transaction id for an order. Stable, so recording twice collides.
pub fn transaction_id_for(order_id: AggregateId) -> AggregateId {
    AggregateId::derived(&TRANSACTION_NAMESPACE, order_id)
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Transaction already recorded for order {0}")]
    AlreadyRecorded(AggregateId),

    #[error("Transaction has not been recorded")]
    NotRecorded,

    #[error("Transaction for order {order_id} is {status:?} under payment {payment_ref}")]
    ConflictingRecord {
        order_id: AggregateId,
        status: TransactionStatus,
        payment_ref: String,
    },

    #[error("Transaction amount must be positive, got {0}")]
    InvalidAmount(Money),

    #[error("Payout is {current}, cannot move to {requested}")]
    InvalidPayoutTransition {
        current: PayoutStatus,
        requested: PayoutStatus,
    },

    #[error("Payout not eligible until {eligible_at}")]
    NotYetEligible { eligible_at: DateTime<Utc> },

    #[error("Transaction was refunded")]
    Refunded,
}
