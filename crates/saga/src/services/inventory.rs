//! Inventory ledger: per-product stock counters with atomic reserve and release.
//!
//! Stock is counted in units. A reservation is a compare-and-decrement that
//! either takes all requested units or leaves the counter untouched, so
//! concurrent reservations for one product can never oversell it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{Money, ProductId, SellerId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::InventoryError;
use crate::services::notification::{
    Notification, SharedNotificationSink, notify_best_effort,
};

/// A product as the ledger knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductListing {
    pub product_id: ProductId,
    pub seller_id: SellerId,
    pub name: String,
    /// Price of one unit.
    pub unit_price: Money,
    pub lot_size: u32,
    /// Units on hand.
    pub quantity_available: u64,
    #[serde(default)]
    pub low_stock_threshold: u64,
}

impl ProductListing {
    /// Whole lots that can still be bought.
    pub fn available_lots(&self) -> u64 {
        lots_in(self.quantity_available, self.lot_size)
    }
}

pub(crate) fn lots_in(units: u64, lot_size: u32) -> u64 {
    if lot_size == 0 {
        0
    } else {
        units / lot_size as u64
    }
}

/// Counter state right after a successful reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub seller_id: SellerId,
    pub remaining: u64,
    pub low_stock_threshold: u64,
}

impl StockLevel {
    /// The notification this level warrants, if any.
    pub fn alert(&self) -> Option<Notification> {
        if self.remaining == 0 {
            Some(Notification::OutOfStock {
                product_id: self.product_id,
                seller_id: self.seller_id,
            })
        } else if self.remaining <= self.low_stock_threshold {
            Some(Notification::LowStock {
                product_id: self.product_id,
                seller_id: self.seller_id,
                remaining: self.remaining,
            })
        } else {
            None
        }
    }
}

#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Takes `units` from the product's counter, or nothing at all.
    async fn reserve(&self, product_id: ProductId, units: u64) -> Result<StockLevel, InventoryError>;

    /// Puts `units` back. Unconditional; callers guard against double release.
    async fn release(&self, product_id: ProductId, units: u64) -> Result<(), InventoryError>;

    async fn available(&self, product_id: ProductId) -> Result<u64, InventoryError>;

    async fn product(&self, product_id: ProductId) -> Result<Option<ProductListing>, InventoryError>;

    async fn upsert_product(&self, listing: ProductListing) -> Result<(), InventoryError>;
}

pub type SharedInventoryLedger = Arc<dyn InventoryLedger>;

/// Fires the out-of-stock / low-stock check without waiting for it.
pub(crate) fn spawn_stock_check(sink: Option<&SharedNotificationSink>, level: &StockLevel) {
    let (Some(sink), Some(alert)) = (sink, level.alert()) else {
        return;
    };
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        notify_best_effort(sink.as_ref(), alert).await;
    });
}

pub(crate) fn record_reservation(result: &Result<StockLevel, InventoryError>) {
    match result {
        Ok(_) => metrics::counter!("stock_reservations_total").increment(1),
        Err(InventoryError::InsufficientStock { .. }) => {
            metrics::counter!("stock_reservation_rejections_total").increment(1)
        }
        Err(_) => {}
    }
}

/// Mutex-guarded counters; the lock makes check-and-decrement one step.
#[derive(Clone, Default)]
pub struct InMemoryInventoryLedger {
    products: Arc<Mutex<HashMap<ProductId, ProductListing>>>,
    notifications: Option<SharedNotificationSink>,
}

impl InMemoryInventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifications(mut self, sink: SharedNotificationSink) -> Self {
        self.notifications = Some(sink);
        self
    }
}

#[async_trait]
impl InventoryLedger for InMemoryInventoryLedger {
    #[tracing::instrument(skip(self))]
    async fn reserve(&self, product_id: ProductId, units: u64) -> Result<StockLevel, InventoryError> {
        let result = {
            let mut products = self.products.lock().await;
            match products.get_mut(&product_id) {
                None => Err(InventoryError::UnknownProduct(product_id)),
                Some(listing) if listing.quantity_available < units => {
                    Err(InventoryError::InsufficientStock {
                        product_id,
                        requested: units,
                        available: listing.quantity_available,
                    })
                }
                Some(listing) => {
                    listing.quantity_available -= units;
                    Ok(StockLevel {
                        product_id,
                        seller_id: listing.seller_id,
                        remaining: listing.quantity_available,
                        low_stock_threshold: listing.low_stock_threshold,
                    })
                }
            }
        };

        record_reservation(&result);
        if let Ok(level) = &result {
            spawn_stock_check(self.notifications.as_ref(), level);
        }
        result
    }

    #[tracing::instrument(skip(self))]
    async fn release(&self, product_id: ProductId, units: u64) -> Result<(), InventoryError> {
        let mut products = self.products.lock().await;
        let listing = products
            .get_mut(&product_id)
            .ok_or(InventoryError::UnknownProduct(product_id))?;
        listing.quantity_available += units;
        Ok(())
    }

    async fn available(&self, product_id: ProductId) -> Result<u64, InventoryError> {
        self.products
            .lock()
            .await
            .get(&product_id)
            .map(|p| p.quantity_available)
            .ok_or(InventoryError::UnknownProduct(product_id))
    }

    async fn product(&self, product_id: ProductId) -> Result<Option<ProductListing>, InventoryError> {
        Ok(self.products.lock().await.get(&product_id).cloned())
    }

    async fn upsert_product(&self, listing: ProductListing) -> Result<(), InventoryError> {
        self.products
            .lock()
            .await
            .insert(listing.product_id, listing);
        Ok(())
    }
}
