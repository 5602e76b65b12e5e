//! PostgreSQL inventory ledger over the `inventory` table.

use async_trait::async_trait;
use domain::{Money, ProductId, SellerId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::InventoryError;
use crate::services::inventory::{
    InventoryLedger, ProductListing, StockLevel, record_reservation, spawn_stock_check,
};
use crate::services::notification::SharedNotificationSink;

/// The conditional `UPDATE` is the reservation: the row lock Postgres takes
/// for it serializes concurrent reservations of one product.
#[derive(Clone)]
pub struct PostgresInventoryLedger {
    pool: PgPool,
    notifications: Option<SharedNotificationSink>,
}

impl PostgresInventoryLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            notifications: None,
        }
    }

    pub fn with_notifications(mut self, sink: SharedNotificationSink) -> Self {
        self.notifications = Some(sink);
        self
    }

    fn row_to_listing(row: PgRow) -> Result<ProductListing, InventoryError> {
        Ok(ProductListing {
            product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            seller_id: SellerId::from_uuid(row.try_get::<Uuid, _>("seller_id")?),
            name: row.try_get("name")?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            lot_size: row.try_get::<i32, _>("lot_size")?.max(0) as u32,
            quantity_available: row.try_get::<i64, _>("quantity_available")?.max(0) as u64,
            low_stock_threshold: row.try_get::<i64, _>("low_stock_threshold")?.max(0) as u64,
        })
    }

    async fn try_reserve(&self, product_id: ProductId, units: u64) -> Result<StockLevel, InventoryError> {
        let row = sqlx::query(
            r#"
            UPDATE inventory
            SET quantity_available = quantity_available - $2, updated_at = NOW()
            WHERE product_id = $1 AND quantity_available >= $2
            RETURNING seller_id, quantity_available, low_stock_threshold
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(units as i64)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(StockLevel {
                product_id,
                seller_id: SellerId::from_uuid(row.try_get::<Uuid, _>("seller_id")?),
                remaining: row.try_get::<i64, _>("quantity_available")?.max(0) as u64,
                low_stock_threshold: row.try_get::<i64, _>("low_stock_threshold")?.max(0) as u64,
            }),
            None => Err(InventoryError::InsufficientStock {
                product_id,
                requested: units,
                available: self.available(product_id).await?,
            }),
        }
    }
}

#[async_trait]
impl InventoryLedger for PostgresInventoryLedger {
    #[tracing::instrument(skip(self))]
    async fn reserve(&self, product_id: ProductId, units: u64) -> Result<StockLevel, InventoryError> {
        let result = self.try_reserve(product_id, units).await;
        record_reservation(&result);
        if let Ok(level) = &result {
            spawn_stock_check(self.notifications.as_ref(), level);
        }
        result
    }

    #[tracing::instrument(skip(self))]
    async fn release(&self, product_id: ProductId, units: u64) -> Result<(), InventoryError> {
        let updated = sqlx::query(
            "UPDATE inventory SET quantity_available = quantity_available + $2, updated_at = NOW() WHERE product_id = $1",
        )
        .bind(product_id.as_uuid())
        .bind(units as i64)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(InventoryError::UnknownProduct(product_id));
        }
        Ok(())
    }

    async fn available(&self, product_id: ProductId) -> Result<u64, InventoryError> {
        let quantity: Option<i64> =
            sqlx::query_scalar("SELECT quantity_available FROM inventory WHERE product_id = $1")
                .bind(product_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        quantity
            .map(|q| q.max(0) as u64)
            .ok_or(InventoryError::UnknownProduct(product_id))
    }

    async fn product(&self, product_id: ProductId) -> Result<Option<ProductListing>, InventoryError> {
        sqlx::query(
            r#"
            SELECT product_id, seller_id, name, unit_price_cents, lot_size,
                   quantity_available, low_stock_threshold
            FROM inventory WHERE product_id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Self::row_to_listing)
        .transpose()
    }

    async fn upsert_product(&self, listing: ProductListing) -> Result<(), InventoryError> {
        sqlx::query(
            r#"
            INSERT INTO inventory
                (product_id, seller_id, name, unit_price_cents, lot_size, quantity_available, low_stock_threshold)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (product_id) DO UPDATE SET
                seller_id = EXCLUDED.seller_id,
                name = EXCLUDED.name,
                unit_price_cents = EXCLUDED.unit_price_cents,
                lot_size = EXCLUDED.lot_size,
                quantity_available = EXCLUDED.quantity_available,
                low_stock_threshold = EXCLUDED.low_stock_threshold,
                updated_at = NOW()
            "#,
        )
        .bind(listing.product_id.as_uuid())
        .bind(listing.seller_id.as_uuid())
        .bind(&listing.name)
        .bind(listing.unit_price.cents())
        .bind(listing.lot_size as i32)
        .bind(listing.quantity_available as i64)
        .bind(listing.low_stock_threshold as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
