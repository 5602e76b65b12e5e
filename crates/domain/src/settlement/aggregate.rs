//! Transaction aggregate: the immutable financial record of a paid order.

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::order::{BuyerId, FeeRate, Money, SellerId};

use super::events::*;
use super::{RecordTransaction, SettlementError, transaction_id_for};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransactionStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// Seller payout progress. Only ever moves forward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum PayoutStatus {
    #[default]
    Pending,
    Eligible,
    Completed,
}

impl std::fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PayoutStatus::Pending => "Pending",
            PayoutStatus::Eligible => "Eligible",
            PayoutStatus::Completed => "Completed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transaction {
    id: Option<AggregateId>,
    #[serde(default)]
    version: Version,
    order_id: Option<AggregateId>,
    buyer_id: Option<BuyerId>,
    seller_id: Option<SellerId>,
    amount: Money,
    fee_rate: FeeRate,
    platform_fee: Money,
    seller_net: Money,
    payment_method: String,
    payment_ref: String,
    status: TransactionStatus,
    payout_status: PayoutStatus,
    payout_eligible_at: Option<DateTime<Utc>>,
    payout_batch_id: Option<String>,
    payout_reference: Option<String>,
    recorded_at: Option<DateTime<Utc>>,
    payout_completed_at: Option<DateTime<Utc>>,
}

impl Aggregate for Transaction {
    type Event = TransactionEvent;
    type Error = SettlementError;

    fn aggregate_type() -> &'static str {
        "Transaction"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            TransactionEvent::TransactionRecorded(data) => {
                self.id = Some(data.transaction_id);
                self.order_id = Some(data.order_id);
                self.buyer_id = Some(data.buyer_id);
                self.seller_id = Some(data.seller_id);
                self.amount = data.amount;
                self.fee_rate = data.fee_rate;
                self.platform_fee = data.platform_fee;
                self.seller_net = data.seller_net;
                self.payment_method = data.payment_method;
                self.payment_ref = data.payment_ref;
                self.recorded_at = Some(data.recorded_at);
                self.status = TransactionStatus::Completed;
                self.payout_status = PayoutStatus::Pending;
            }
            TransactionEvent::PayoutScheduled(data) => {
                self.payout_eligible_at = Some(data.eligible_at);
            }
            TransactionEvent::PayoutBecameEligible(_) => {
                self.payout_status = PayoutStatus::Eligible;
            }
            TransactionEvent::PayoutCompleted(data) => {
                self.payout_status = PayoutStatus::Completed;
                self.payout_batch_id = Some(data.batch_id);
                self.payout_reference = Some(data.reference);
                self.payout_completed_at = Some(data.completed_at);
            }
            TransactionEvent::TransactionRefunded(_) => {
                self.status = TransactionStatus::Refunded;
            }
        }
    }
}

impl Transaction {
    pub fn order_id(&self) -> Option<AggregateId> {
        self.order_id
    }

    pub fn buyer_id(&self) -> Option<BuyerId> {
        self.buyer_id
    }

    pub fn seller_id(&self) -> Option<SellerId> {
        self.seller_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn fee_rate(&self) -> FeeRate {
        self.fee_rate
    }

    pub fn platform_fee(&self) -> Money {
        self.platform_fee
    }

    pub fn seller_net(&self) -> Money {
        self.seller_net
    }

    pub fn payment_method(&self) -> &str {
        &self.payment_method
    }

    pub fn payment_ref(&self) -> &str {
        &self.payment_ref
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn payout_status(&self) -> PayoutStatus {
        self.payout_status
    }

    pub fn payout_eligible_at(&self) -> Option<DateTime<Utc>> {
        self.payout_eligible_at
    }

    pub fn payout_batch_id(&self) -> Option<&str> {
        self.payout_batch_id.as_deref()
    }

    pub fn payout_reference(&self) -> Option<&str> {
        self.payout_reference.as_deref()
    }

    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        self.recorded_at
    }

    pub fn is_recorded(&self) -> bool {
        self.id.is_some()
    }

    fn ensure_recorded(&self) -> Result<(), SettlementError> {
        if self.is_recorded() {
            Ok(())
        } else {
            Err(SettlementError::NotRecorded)
        }
    }

    fn ensure_payable(&self) -> Result<(), SettlementError> {
        self.ensure_recorded()?;
        if self.status == TransactionStatus::Refunded {
            return Err(SettlementError::Refunded);
        }
        Ok(())
    }

    pub fn record(
        &self,
        cmd: RecordTransaction,
        now: DateTime<Utc>,
    ) -> Result<Vec<TransactionEvent>, SettlementError> {
        if self.is_recorded() {
            return Err(SettlementError::AlreadyRecorded(cmd.order_id));
        }
        if !cmd.amount.is_positive() {
            return Err(SettlementError::InvalidAmount(cmd.amount));
        }

        let platform_fee = cmd.fee_rate.fee_for(cmd.amount);
        Ok(vec![TransactionEvent::TransactionRecorded(
            TransactionRecordedData {
                transaction_id: transaction_id_for(cmd.order_id),
                order_id: cmd.order_id,
                buyer_id: cmd.buyer_id,
                seller_id: cmd.seller_id,
                amount: cmd.amount,
                fee_rate: cmd.fee_rate,
                platform_fee,
                seller_net: cmd.amount - platform_fee,
                payment_method: cmd.payment_method,
                payment_ref: cmd.payment_ref,
                recorded_at: now,
            },
        )])
    }

    /// Sets the date the payout may be released. Rescheduling after
    /// eligibility is refused; repeating the same date is a no-op.
    pub fn schedule_payout(
        &self,
        eligible_at: DateTime<Utc>,
    ) -> Result<Vec<TransactionEvent>, SettlementError> {
        self.ensure_payable()?;
        if self.payout_status != PayoutStatus::Pending {
            return Err(SettlementError::InvalidPayoutTransition {
                current: self.payout_status,
                requested: PayoutStatus::Pending,
            });
        }
        if self.payout_eligible_at == Some(eligible_at) {
            return Ok(vec![]);
        }
        Ok(vec![TransactionEvent::PayoutScheduled(PayoutScheduledData {
            eligible_at,
        })])
    }

    /// Promotes to `Eligible` once the hold has elapsed. Returns no events
    /// while the hold is running or when nothing is scheduled.
    pub fn promote_eligible(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TransactionEvent>, SettlementError> {
        self.ensure_payable()?;
        if self.payout_status != PayoutStatus::Pending {
            return Ok(vec![]);
        }
        match self.payout_eligible_at {
            Some(eligible_at) if eligible_at <= now => Ok(vec![
                TransactionEvent::PayoutBecameEligible(PayoutBecameEligibleData { at: now }),
            ]),
            _ => Ok(vec![]),
        }
    }

    pub fn complete_payout(
        &self,
        batch_id: impl Into<String>,
        reference: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TransactionEvent>, SettlementError> {
        self.ensure_payable()?;
        if self.payout_status != PayoutStatus::Eligible {
            return Err(SettlementError::InvalidPayoutTransition {
                current: self.payout_status,
                requested: PayoutStatus::Completed,
            });
        }
        Ok(vec![TransactionEvent::PayoutCompleted(PayoutCompletedData {
            batch_id: batch_id.into(),
            reference: reference.into(),
            completed_at: now,
        })])
    }

    /// The buyer got the money back; the seller will not be paid out.
    pub fn mark_refunded(
        &self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TransactionEvent>, SettlementError> {
        self.ensure_recorded()?;
        if self.status == TransactionStatus::Refunded {
            return Ok(vec![]);
        }
        Ok(vec![TransactionEvent::TransactionRefunded(
            TransactionRefundedData {
                reason: reason.into(),
                refunded_at: now,
            },
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn recorded(amount: i64) -> Transaction {
        let cmd = RecordTransaction {
            order_id: AggregateId::new(),
            buyer_id: BuyerId::new(),
            seller_id: SellerId::new(),
            amount: Money::from_cents(amount),
            fee_rate: FeeRate::from_bps(500).unwrap(),
            payment_method: "card".to_string(),
            payment_ref: "pay_1".to_string(),
        };
        let mut txn = Transaction::default();
        let events = txn.record(cmd, Utc::now()).unwrap();
        txn.apply_events(events);
        txn
    }

    fn step(
        mut txn: Transaction,
        f: impl FnOnce(&Transaction) -> Result<Vec<TransactionEvent>, SettlementError>,
    ) -> Transaction {
        let events = f(&txn).unwrap();
        txn.apply_events(events);
        txn
    }

    #[test]
    fn net_plus_fee_equals_amount() {
        for amount in [1, 99, 1000, 1999, 123_457] {
            let txn = recorded(amount);
            assert_eq!(txn.seller_net() + txn.platform_fee(), txn.amount());
            assert_eq!(txn.status(), TransactionStatus::Completed);
        }
    }

    #[test]
    fn id_is_derived_from_order() {
        let txn = recorded(1000);
        assert_eq!(txn.id(), Some(transaction_id_for(txn.order_id().unwrap())));
    }

    #[test]
    fn second_record_is_refused() {
        let txn = recorded(1000);
        let again = RecordTransaction {
            order_id: txn.order_id().unwrap(),
            buyer_id: BuyerId::new(),
            seller_id: SellerId::new(),
            amount: Money::from_cents(1000),
            fee_rate: FeeRate::default(),
            payment_method: "card".to_string(),
            payment_ref: "pay_1".to_string(),
        };
        assert!(matches!(
            txn.record(again, Utc::now()),
            Err(SettlementError::AlreadyRecorded(_))
        ));
    }

    #[test]
    fn payout_moves_forward_only() {
        let now = Utc::now();
        let txn = recorded(1000);

        assert!(matches!(
            txn.complete_payout("b1", "ref", now),
            Err(SettlementError::InvalidPayoutTransition { .. })
        ));

        let txn = step(txn, |t| t.schedule_payout(now + Duration::days(7)));
        assert!(txn.promote_eligible(now).unwrap().is_empty());

        let txn = step(txn, |t| t.promote_eligible(now + Duration::days(7)));
        assert_eq!(txn.payout_status(), PayoutStatus::Eligible);
        assert!(txn.schedule_payout(now).is_err());

        let txn = step(txn, |t| t.complete_payout("batch-1", "UTR123", now));
        assert_eq!(txn.payout_status(), PayoutStatus::Completed);
        assert_eq!(txn.payout_batch_id(), Some("batch-1"));
        assert!(txn.promote_eligible(now + Duration::days(30)).unwrap().is_empty());
    }

    #[test]
    fn refunded_transaction_is_never_paid_out() {
        let now = Utc::now();
        let txn = recorded(1000);
        let txn = step(txn, |t| t.schedule_payout(now));
        let txn = step(txn, |t| t.mark_refunded("returned", now));

        assert!(matches!(txn.promote_eligible(now), Err(SettlementError::Refunded)));
        assert!(txn.mark_refunded("again", now).unwrap().is_empty());
    }
}
