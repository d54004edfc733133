//! ClickHouse fact/log loader.
//!
//! Append-only writes; readers are responsible for the dedup projection
//! (`price_facts_current` view, or an explicit `FINAL`). We never read
//! before write here — that's the whole point of the versioned model.

use chrono::Utc;
use clickhouse::Row;
use serde::Serialize;

use crate::error::IngestError;
use crate::models::FactRow;

const BATCH_SIZE: usize = 1000;

#[derive(Row, Serialize)]
struct PriceFactRow {
    shop_id: i64,
    nm: String,
    price: f64,
    version: i64,
}

#[derive(Row, Serialize)]
struct StockFactRow {
    shop_id: i64,
    nm: String,
    warehouse: String,
    quantity: i64,
    version: i64,
}

pub struct OlapLoader {
    client: clickhouse::Client,
}

impl OlapLoader {
    pub fn new(client: clickhouse::Client) -> Self {
        Self { client }
    }

    /// Append price observations. `rows` payloads must be `{"nm": ..,
    /// "price": ..}`; malformed rows are skipped (counted, not fatal).
    pub async fn append_price_facts(&self, rows: &[FactRow]) -> Result<usize, IngestError> {
        let mut written = 0;
        for chunk in rows.chunks(BATCH_SIZE) {
            let mut insert = self
                .client
                .insert("price_facts")
                .map_err(Self::to_err)?;
            for row in chunk {
                let Some(price) = row.payload.get("price").and_then(|v| v.as_f64()) else {
                    tracing::warn!(shop_id = row.shop_id, nm = %row.primary_key, "skipping malformed price fact");
                    continue;
                };
                insert
                    .write(&PriceFactRow {
                        shop_id: row.shop_id,
                        nm: row.primary_key.clone(),
                        price,
                        version: row.version.timestamp_millis(),
                    })
                    .await
                    .map_err(Self::to_err)?;
                written += 1;
            }
            insert.end().await.map_err(Self::to_err)?;
        }
        Ok(written)
    }

    pub async fn append_stock_facts(&self, rows: &[FactRow]) -> Result<usize, IngestError> {
        let mut written = 0;
        for chunk in rows.chunks(BATCH_SIZE) {
            let mut insert = self
                .client
                .insert("stock_facts")
                .map_err(Self::to_err)?;
            for row in chunk {
                let (Some(warehouse), Some(quantity)) = (
                    row.payload.get("warehouse").and_then(|v| v.as_str()),
                    row.payload.get("quantity").and_then(|v| v.as_i64()),
                ) else {
                    tracing::warn!(shop_id = row.shop_id, nm = %row.primary_key, "skipping malformed stock fact");
                    continue;
                };
                insert
                    .write(&StockFactRow {
                        shop_id: row.shop_id,
                        nm: row.primary_key.clone(),
                        warehouse: warehouse.to_string(),
                        quantity,
                        version: row.version.timestamp_millis(),
                    })
                    .await
                    .map_err(Self::to_err)?;
                written += 1;
            }
            insert.end().await.map_err(Self::to_err)?;
        }
        Ok(written)
    }

    /// Append a raw ad-snapshot log row. Log tables never dedup; the TTL
    /// in the migration handles retention.
    pub async fn append_ad_snapshot(
        &self,
        shop_id: i64,
        campaign_id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), IngestError> {
        #[derive(Row, Serialize)]
        struct AdSnapshotRow {
            shop_id: i64,
            campaign_id: String,
            snapshot_date: u16,
            payload: String,
            recorded_at: i64,
        }

        let now = Utc::now();
        let epoch_days = now.date_naive().signed_duration_since(
            chrono::NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid epoch date"),
        );

        let mut insert = self
            .client
            .insert("ad_snapshots_log")
            .map_err(Self::to_err)?;
        insert
            .write(&AdSnapshotRow {
                shop_id,
                campaign_id: campaign_id.to_string(),
                snapshot_date: epoch_days.num_days() as u16,
                payload: payload.to_string(),
                recorded_at: now.timestamp_millis(),
            })
            .await
            .map_err(Self::to_err)?;
        insert.end().await.map_err(Self::to_err)?;
        Ok(())
    }

    /// Append one observed bid to the per-campaign history log. Unlike
    /// `append_ad_snapshot`, this records every poll, not just the
    /// campaign-level summary, so a bid's trajectory can be reconstructed
    /// without relying on the event log's change-only entries.
    pub async fn append_bid_history(
        &self,
        shop_id: i64,
        campaign_id: &str,
        bid: f64,
    ) -> Result<(), IngestError> {
        #[derive(Row, Serialize)]
        struct BidHistoryRow {
            shop_id: i64,
            campaign_id: String,
            bid: f64,
            recorded_at: i64,
        }

        let mut insert = self
            .client
            .insert("bid_history_log")
            .map_err(Self::to_err)?;
        insert
            .write(&BidHistoryRow {
                shop_id,
                campaign_id: campaign_id.to_string(),
                bid,
                recorded_at: Utc::now().timestamp_millis(),
            })
            .await
            .map_err(Self::to_err)?;
        insert.end().await.map_err(Self::to_err)?;
        Ok(())
    }

    fn to_err(err: clickhouse::error::Error) -> IngestError {
        IngestError::TransientNetwork {
            marketplace: "clickhouse".into(),
            source: err.into(),
        }
    }
}
