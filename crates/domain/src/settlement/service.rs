//! Settlement service.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{AggregateId, Clock, SharedClock, SystemClock};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::command::{CommandHandler, CommandResult, EventContext};
use crate::error::DomainError;
use crate::order::{BuyerId, FeeRate, Money, SellerId};

use super::{SettlementError, Transaction, TransactionStatus, transaction_id_for};

/// Inputs for recording the Transaction of a verified payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTransaction {
    pub order_id: AggregateId,
    pub buyer_id: BuyerId,
    pub seller_id: SellerId,
    /// The order's grand total at verification time.
    pub amount: Money,
    pub fee_rate: FeeRate,
    pub payment_method: String,
    pub payment_ref: String,
}

pub struct SettlementService<S: EventStore> {
    handler: CommandHandler<S, Transaction>,
    clock: SharedClock,
}

impl<S: EventStore + Clone> Clone for SettlementService<S> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: EventStore> SettlementService<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, clock: SharedClock) -> Self {
        Self {
            handler: CommandHandler::new(store),
            clock,
        }
    }

    pub async fn transaction_for_order(
        &self,
        order_id: AggregateId,
    ) -> Result<Option<Transaction>, DomainError> {
        self.handler.load_existing(transaction_id_for(order_id)).await
    }

    /// Records the Transaction for an order. Returns `false` when a live
    /// Transaction for the same payment already exists, whether found on load
    /// or lost to a concurrent writer. A voided one, or one recorded under
    /// another payment, is an error.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn record(&self, cmd: RecordTransaction) -> Result<bool, DomainError> {
        let now = self.clock.now();
        let order_id = cmd.order_id;
        let payment_ref = cmd.payment_ref.clone();

        match self
            .handler
            .execute_with(transaction_id_for(order_id), EventContext::at(now), |txn| {
                txn.record(cmd, now)
            })
            .await
        {
            Ok(_) => Ok(true),
            Err(e)
                if e.is_conflict()
                    || matches!(
                        e,
                        DomainError::Settlement(SettlementError::AlreadyRecorded(_))
                    ) =>
            {
                let existing = self
                    .transaction_for_order(order_id)
                    .await?
                    .ok_or(SettlementError::NotRecorded)?;
                if existing.status() != TransactionStatus::Completed
                    || existing.payment_ref() != payment_ref
                {
                    return Err(SettlementError::ConflictingRecord {
                        order_id,
                        status: existing.status(),
                        payment_ref: existing.payment_ref().to_string(),
                    }
                    .into());
                }
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn schedule_payout(
        &self,
        order_id: AggregateId,
        eligible_at: DateTime<Utc>,
    ) -> Result<CommandResult<Transaction>, DomainError> {
        self.handler
            .execute_with(
                transaction_id_for(order_id),
                EventContext::at(self.clock.now()),
                |txn| txn.schedule_payout(eligible_at),
            )
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn promote_eligible(
        &self,
        order_id: AggregateId,
    ) -> Result<CommandResult<Transaction>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(transaction_id_for(order_id), EventContext::at(now), |txn| {
                txn.promote_eligible(now)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn complete_payout(
        &self,
        order_id: AggregateId,
        batch_id: &str,
        reference: &str,
    ) -> Result<CommandResult<Transaction>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(transaction_id_for(order_id), EventContext::at(now), |txn| {
                txn.complete_payout(batch_id, reference, now)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_refunded(
        &self,
        order_id: AggregateId,
        reason: &str,
    ) -> Result<CommandResult<Transaction>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute_with(transaction_id_for(order_id), EventContext::at(now), |txn| {
                txn.mark_refunded(reason, now)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::InMemoryEventStore;

    fn cmd(order_id: AggregateId) -> RecordTransaction {
        RecordTransaction {
            order_id,
            buyer_id: BuyerId::new(),
            seller_id: SellerId::new(),
            amount: Money::from_cents(1000),
            fee_rate: FeeRate::from_bps(500).unwrap(),
            payment_method: "upi".to_string(),
            payment_ref: "pay_1".to_string(),
        }
    }

    #[tokio::test]
    async fn records_exactly_once() {
        let service = SettlementService::new(InMemoryEventStore::new());
        let order_id = AggregateId::new();

        assert!(service.record(cmd(order_id)).await.unwrap());
        assert!(!service.record(cmd(order_id)).await.unwrap());

        let txn = service.transaction_for_order(order_id).await.unwrap().unwrap();
        assert_eq!(txn.amount(), Money::from_cents(1000));
        assert_eq!(txn.platform_fee(), Money::from_cents(50));
        assert_eq!(txn.seller_net(), Money::from_cents(950));
    }

    #[tokio::test]
    async fn voided_or_foreign_transaction_is_not_a_duplicate() {
        let service = SettlementService::new(InMemoryEventStore::new());
        let order_id = AggregateId::new();
        assert!(service.record(cmd(order_id)).await.unwrap());

        let mut other = cmd(order_id);
        other.payment_ref = "pay_2".to_string();
        assert!(matches!(
            service.record(other).await,
            Err(DomainError::Settlement(SettlementError::ConflictingRecord { .. }))
        ));

        service.mark_refunded(order_id, "order not confirmed").await.unwrap();
        match service.record(cmd(order_id)).await {
            Err(DomainError::Settlement(SettlementError::ConflictingRecord { status, .. })) => {
                assert_eq!(status, TransactionStatus::Refunded);
            }
            other => panic!("expected a conflicting record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn racing_records_leave_one_transaction() {
        let store = InMemoryEventStore::new();
        let service = SettlementService::new(store.clone());
        let order_id = AggregateId::new();

        let (a, b) = tokio::join!(service.record(cmd(order_id)), service.record(cmd(order_id)));
        assert_eq!([a.unwrap(), b.unwrap()].iter().filter(|r| **r).count(), 1);
        assert_eq!(store.event_count().await, 1);
    }
}
