//! Postgres dimension-table loader.
//!
//! Idempotent upserts keyed on (shop_id, external_id); an `EventRecord` is
//! a pure append, never updated or deleted.

use sqlx::PgPool;

use crate::error::IngestError;
use crate::models::{DimensionRow, EventRecord, MarketplaceKind, Shop, ShopStatus};

pub struct OltpLoader {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ShopRow {
    id: i64,
    owner_id: i64,
    marketplace: String,
    encrypted_secret: Vec<u8>,
    ozon_client_id: Option<String>,
    ozon_performance_client_id: Option<String>,
    ozon_performance_encrypted_secret: Option<Vec<u8>>,
    status: String,
    status_message: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl OltpLoader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_shop(&self, shop_id: i64) -> Result<Shop, IngestError> {
        let row: ShopRow = sqlx::query_as(
            "SELECT id, owner_id, marketplace, encrypted_secret, ozon_client_id, \
             ozon_performance_client_id, ozon_performance_encrypted_secret, status, \
             status_message, created_at FROM shops WHERE id = $1",
        )
        .bind(shop_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Self::to_err)?;

        Ok(Shop {
            id: row.id,
            owner_id: row.owner_id,
            marketplace: match row.marketplace.as_str() {
                "ozon" => MarketplaceKind::Ozon,
                _ => MarketplaceKind::Wildberries,
            },
            encrypted_secret: row.encrypted_secret,
            ozon_client_id: row.ozon_client_id,
            ozon_performance_client_id: row.ozon_performance_client_id,
            ozon_performance_encrypted_secret: row.ozon_performance_encrypted_secret,
            status: match row.status.as_str() {
                "active" => ShopStatus::Active,
                "auth_error" => ShopStatus::AuthError,
                "paused" => ShopStatus::Paused,
                _ => ShopStatus::Syncing,
            },
            status_message: row.status_message,
            created_at: row.created_at,
        })
    }

    pub async fn upsert_products(&self, rows: &[DimensionRow]) -> Result<u64, IngestError> {
        self.upsert("products", rows).await
    }

    pub async fn upsert_campaigns(&self, rows: &[DimensionRow]) -> Result<u64, IngestError> {
        self.upsert("campaigns", rows).await
    }

    pub async fn upsert_orders(&self, rows: &[DimensionRow]) -> Result<u64, IngestError> {
        self.upsert("orders", rows).await
    }

    pub async fn upsert_finance_transactions(&self, rows: &[DimensionRow]) -> Result<u64, IngestError> {
        self.upsert("finance_transactions", rows).await
    }

    pub async fn upsert_funnel_snapshots(&self, rows: &[DimensionRow]) -> Result<u64, IngestError> {
        self.upsert("funnel_snapshots", rows).await
    }

    pub async fn upsert_returns(&self, rows: &[DimensionRow]) -> Result<u64, IngestError> {
        self.upsert("returns", rows).await
    }

    pub async fn upsert_commercial_data(&self, rows: &[DimensionRow]) -> Result<u64, IngestError> {
        self.upsert("commercial_data", rows).await
    }

    pub async fn upsert_warehouses(&self, rows: &[DimensionRow]) -> Result<u64, IngestError> {
        self.upsert("warehouses", rows).await
    }

    pub async fn upsert_warehouse_stocks(&self, rows: &[DimensionRow]) -> Result<u64, IngestError> {
        self.upsert("warehouse_stocks", rows).await
    }

    pub async fn upsert_prices(&self, rows: &[DimensionRow]) -> Result<u64, IngestError> {
        self.upsert("prices", rows).await
    }

    pub async fn upsert_content_ratings(&self, rows: &[DimensionRow]) -> Result<u64, IngestError> {
        self.upsert("content_ratings", rows).await
    }

    /// `seller_rating` is a single per-shop summary, not a per-SKU list,
    /// so it gets its own one-row-per-shop upsert rather than going
    /// through the generic `(shop_id, external_id)` dimension table.
    pub async fn upsert_seller_rating(&self, shop_id: i64, payload: &serde_json::Value) -> Result<(), IngestError> {
        sqlx::query(
            "INSERT INTO seller_ratings (shop_id, payload, updated_at) VALUES ($1, $2, now()) \
             ON CONFLICT (shop_id) DO UPDATE SET payload = EXCLUDED.payload, updated_at = now()",
        )
        .bind(shop_id)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(Self::to_err)?;
        Ok(())
    }

    async fn upsert(&self, table: &str, rows: &[DimensionRow]) -> Result<u64, IngestError> {
        let mut affected = 0;
        let mut tx = self.pool.begin().await.map_err(Self::to_err)?;
        for row in rows {
            let query = format!(
                "INSERT INTO {table} (shop_id, external_id, payload, updated_at) \
                 VALUES ($1, $2, $3, now()) \
                 ON CONFLICT (shop_id, external_id) \
                 DO UPDATE SET payload = EXCLUDED.payload, updated_at = now()"
            );
            sqlx::query(&query)
                .bind(row.shop_id)
                .bind(&row.external_id)
                .bind(&row.payload)
                .execute(&mut *tx)
                .await
                .map_err(Self::to_err)?;
            affected += 1;
        }
        tx.commit().await.map_err(Self::to_err)?;
        Ok(affected)
    }

    /// Append events. Best-effort: a log-write failure must never fail
    /// the caller, so callers should treat an `Err` here as a logged
    /// warning, not a propagated failure.
    pub async fn append_events(&self, events: &[EventRecord]) -> Result<u64, IngestError> {
        let mut appended = 0;
        for event in events {
            sqlx::query(
                "INSERT INTO events (created_at, shop_id, campaign_id, product_id, \
                 event_type, old_value, new_value, metadata) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(event.created_at)
            .bind(event.shop_id)
            .bind(&event.campaign_id)
            .bind(&event.product_id)
            .bind(event.event_type.as_str())
            .bind(&event.old_value)
            .bind(&event.new_value)
            .bind(&event.metadata)
            .execute(&self.pool)
            .await
            .map_err(Self::to_err)?;
            appended += 1;
        }
        Ok(appended)
    }

    fn to_err(err: sqlx::Error) -> IngestError {
        IngestError::TransientNetwork {
            marketplace: "oltp".into(),
            source: err.into(),
        }
    }
}
