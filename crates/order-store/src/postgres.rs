use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, ProductId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Finalization, InsertOutcome, InventoryItem, NewOrder, Order, OrderLine, OrderStatus,
    OutboxEntry, OutboxId, Result, StatusCount, StoreError, Version, store::OrderStore,
};

const ORDER_COLUMNS: &str =
    "id, customer_id, items, total_amount_cents, status, created_at, processed_at, version";

/// PostgreSQL-backed order store implementation.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("order store migrations up to date");
        Ok(())
    }

    /// Closes the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let items_json: serde_json::Value = row.try_get("items")?;
        let items: Vec<OrderLine> = serde_json::from_value(items_json)?;
        let status: String = row.try_get("status")?;
        let status = OrderStatus::parse(&status)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown order status '{status}'")))?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            customer_id: CustomerId::new(row.try_get::<String, _>("customer_id")?),
            items,
            total_amount: row
                .try_get::<Option<i64>, _>("total_amount_cents")?
                .map(Money::from_cents),
            status,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            version: Version::new(row.try_get("version")?),
        })
    }

    fn row_to_outbox_entry(row: PgRow) -> Result<OutboxEntry> {
        Ok(OutboxEntry {
            id: OutboxId::new(row.try_get("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            created_at: row.try_get("created_at")?,
            published_at: row.try_get("published_at")?,
        })
    }

    fn row_to_inventory_item(row: PgRow) -> Result<InventoryItem> {
        let quantity: i32 = row.try_get("quantity")?;
        Ok(InventoryItem {
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| StoreError::InvalidData(format!("negative quantity {quantity}")))?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        })
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    async fn insert_order_with_outbox(&self, order: NewOrder) -> Result<InsertOutcome> {
        let items_json = serde_json::to_value(&order.items)?;

        let mut tx = self.pool.begin().await?;

        // A concurrent submission of the same id loses here instead of
        // failing on the primary key.
        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (id, customer_id, items, status, created_at, version)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.customer_id.as_str())
        .bind(items_json)
        .bind(OrderStatus::Pending.as_str())
        .bind(order.created_at)
        .bind(Version::first().as_i64())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tracing::debug!("order id already present, nothing written");
            tx.rollback().await?;
            return Ok(InsertOutcome::AlreadyExists);
        }

        let outbox_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO outbox (order_id, created_at)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(InsertOutcome::Created {
            outbox_id: OutboxId::new(outbox_id),
        })
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, created_at, published_at
            FROM outbox
            WHERE published_at IS NULL
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox_entry).collect()
    }

    async fn mark_published(
        &self,
        entry_id: OutboxId,
        published_at: DateTime<Utc>,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE outbox SET published_at = $2 WHERE id = $1 AND published_at IS NULL",
        )
        .bind(entry_id.as_i64())
        .bind(published_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn outbox_entries_for_order(&self, order_id: OrderId) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, created_at, published_at
            FROM outbox
            WHERE order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox_entry).collect()
    }

    async fn get_inventory(&self, product_ids: &[ProductId]) -> Result<Vec<InventoryItem>> {
        let ids: Vec<String> = product_ids.iter().map(|p| p.as_str().to_string()).collect();
        let rows = sqlx::query(
            r#"
            SELECT product_id, quantity, unit_price_cents
            FROM inventory
            WHERE product_id = ANY($1)
            ORDER BY product_id ASC
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_inventory_item).collect()
    }

    async fn list_inventory(&self) -> Result<Vec<InventoryItem>> {
        let rows = sqlx::query(
            "SELECT product_id, quantity, unit_price_cents FROM inventory ORDER BY product_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_inventory_item).collect()
    }

    async fn upsert_inventory(&self, item: InventoryItem) -> Result<()> {
        let quantity = i32::try_from(item.quantity)
            .map_err(|_| StoreError::InvalidData(format!("quantity {} too large", item.quantity)))?;

        sqlx::query(
            r#"
            INSERT INTO inventory (product_id, quantity, unit_price_cents)
            VALUES ($1, $2, $3)
            ON CONFLICT (product_id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                unit_price_cents = EXCLUDED.unit_price_cents
            "#,
        )
        .bind(item.product_id.as_str())
        .bind(quantity)
        .bind(item.unit_price.cents())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finalize_order(&self, finalization: Finalization) -> Result<Version> {
        let mut tx = self.pool.begin().await?;

        let new_version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE orders
            SET status = $3,
                total_amount_cents = $4,
                processed_at = $5,
                version = version + 1
            WHERE id = $1 AND version = $2 AND status = $6
            RETURNING version
            "#,
        )
        .bind(finalization.order_id.as_uuid())
        .bind(finalization.expected_version.as_i64())
        .bind(OrderStatus::Processed.as_str())
        .bind(finalization.total_amount.cents())
        .bind(finalization.processed_at)
        .bind(OrderStatus::Pending.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(new_version) = new_version else {
            tracing::debug!(
                order_id = %finalization.order_id,
                expected_version = finalization.expected_version.as_i64(),
                "version guard rejected finalize"
            );
            tx.rollback().await?;
            return Err(StoreError::StaleWrite {
                order_id: finalization.order_id,
                expected: finalization.expected_version,
            });
        };

        for adjustment in &finalization.adjustments {
            let decrement = i32::try_from(adjustment.decrement).unwrap_or(i32::MAX);
            sqlx::query(
                "UPDATE inventory SET quantity = GREATEST(quantity - $2, 0) WHERE product_id = $1",
            )
            .bind(adjustment.product_id.as_str())
            .bind(decrement)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Version::new(new_version))
    }

    async fn count_orders_by_status(&self) -> Result<Vec<StatusCount>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM orders GROUP BY status ORDER BY status ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                let count: i64 = row.try_get("count")?;
                Ok(StatusCount {
                    status: OrderStatus::parse(&status).ok_or_else(|| {
                        StoreError::InvalidData(format!("unknown order status '{status}'"))
                    })?,
                    count: count as u64,
                })
            })
            .collect()
    }

    async fn count_created_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE created_at >= $1")
            .bind(since)
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }

    async fn count_processed_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE processed_at >= $1")
                .bind(since)
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }
}
