//! Payout ledger: transactions grouped by seller for settlement.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{Money, PayoutStatus, SellerId, Transaction, TransactionEvent};
use event_store::EventEnvelope;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

#[derive(Debug, Clone, Serialize)]
pub struct PayoutEntry {
    pub transaction_id: AggregateId,
    pub order_id: AggregateId,
    pub seller_id: SellerId,
    pub amount: Money,
    pub platform_fee: Money,
    pub seller_net: Money,
    pub payout_status: PayoutStatus,
    pub eligible_at: Option<DateTime<Utc>>,
    pub batch_id: Option<String>,
    pub refunded: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Eligible earnings of one seller, ready for a manual payout.
#[derive(Debug, Clone, Serialize)]
pub struct SellerPayout {
    pub seller_id: SellerId,
    pub entries: Vec<PayoutEntry>,
    pub total_net: Money,
}

#[derive(Clone, Default)]
pub struct PayoutLedgerView {
    entries: Arc<RwLock<HashMap<AggregateId, PayoutEntry>>>,
    position: Arc<RwLock<ProjectionPosition>>,
}

impl PayoutLedgerView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_by_order(&self, order_id: AggregateId) -> Option<PayoutEntry> {
        self.entries
            .read()
            .await
            .values()
            .find(|e| e.order_id == order_id)
            .cloned()
    }

    /// Scheduled, still-pending payouts whose hold ended at or before `now`.
    pub async fn due_for_eligibility(&self, now: DateTime<Utc>) -> Vec<PayoutEntry> {
        let mut due: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .filter(|e| {
                e.payout_status == PayoutStatus::Pending
                    && !e.refunded
                    && e.eligible_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|e| (e.recorded_at, e.order_id));
        due
    }

    /// Eligible payouts per seller. Sellers and entries come back in a fixed
    /// order, and listing never changes what it lists.
    pub async fn pending_payouts(&self) -> Vec<SellerPayout> {
        let entries = self.entries.read().await;
        let mut by_seller: BTreeMap<SellerId, Vec<PayoutEntry>> = BTreeMap::new();
        for entry in entries.values() {
            if entry.payout_status == PayoutStatus::Eligible && !entry.refunded {
                by_seller.entry(entry.seller_id).or_default().push(entry.clone());
            }
        }

        by_seller
            .into_iter()
            .map(|(seller_id, mut entries)| {
                entries.sort_by_key(|e| (e.recorded_at, e.order_id));
                let total_net = entries.iter().map(|e| e.seller_net).sum();
                SellerPayout {
                    seller_id,
                    entries,
                    total_net,
                }
            })
            .collect()
    }

    pub async fn pending_for_seller(&self, seller_id: SellerId) -> Option<SellerPayout> {
        self.pending_payouts()
            .await
            .into_iter()
            .find(|p| p.seller_id == seller_id)
    }

    async fn apply(&self, transaction_id: AggregateId, event: TransactionEvent) {
        let mut entries = self.entries.write().await;
        match event {
            TransactionEvent::TransactionRecorded(data) => {
                entries.insert(
                    transaction_id,
                    PayoutEntry {
                        transaction_id,
                        order_id: data.order_id,
                        seller_id: data.seller_id,
                        amount: data.amount,
                        platform_fee: data.platform_fee,
                        seller_net: data.seller_net,
                        payout_status: PayoutStatus::Pending,
                        eligible_at: None,
                        batch_id: None,
                        refunded: false,
                        recorded_at: data.recorded_at,
                    },
                );
            }
            TransactionEvent::PayoutScheduled(data) => {
                if let Some(entry) = entries.get_mut(&transaction_id) {
                    entry.eligible_at = Some(data.eligible_at);
                }
            }
            TransactionEvent::PayoutBecameEligible(_) => {
                if let Some(entry) = entries.get_mut(&transaction_id) {
                    entry.payout_status = PayoutStatus::Eligible;
                }
            }
            TransactionEvent::PayoutCompleted(data) => {
                if let Some(entry) = entries.get_mut(&transaction_id) {
                    entry.payout_status = PayoutStatus::Completed;
                    entry.batch_id = Some(data.batch_id);
                }
            }
            TransactionEvent::TransactionRefunded(_) => {
                if let Some(entry) = entries.get_mut(&transaction_id) {
                    entry.refunded = true;
                }
            }
        }
    }
}

#[async_trait]
impl Projection for PayoutLedgerView {
    fn name(&self) -> &'static str {
        "PayoutLedgerView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        if event.aggregate_type == <Transaction as domain::Aggregate>::aggregate_type() {
            let txn_event: TransactionEvent = event.decode()?;
            self.apply(event.aggregate_id, txn_event).await;
        }

        let mut pos = self.position.write().await;
        *pos = pos.advance(event);
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        *self.position.read().await
    }

    async fn reset(&self) -> Result<()> {
        self.entries.write().await.clear();
        *self.position.write().await = ProjectionPosition::zero();
        Ok(())
    }
}

impl ReadModel for PayoutLedgerView {
    fn name(&self) -> &'static str {
        "PayoutLedgerView"
    }

    fn count(&self) -> usize {
        self.entries.try_read().map(|e| e.len()).unwrap_or(0)
    }
}
