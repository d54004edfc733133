//! Wildberries backfill chain: content -> orders (90d) ->
//! sales funnel (365d, weekly, 7-day chunks) -> finance (weekly) -> ads
//! history (30-day windows) -> commercial data -> warehouses.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Method;

use crate::error::IngestError;
use crate::models::{Credentials, MarketplaceKind};

use super::{dimension_rows, value_as_id, BackfillStep, EmptyStreak, StepDeps};

const EMPTY_STREAK_LIMIT: u32 = 2;

/// Where a windowed step's rows land. `AdLog` goes to the OLAP ad
/// snapshot log (keyed by campaign, not by a stable row id); everything
/// else is an idempotent OLTP dimension upsert.
#[derive(Clone, Copy)]
enum WindowTarget {
    Orders,
    SalesFunnel,
    Finance,
    AdsHistory,
    CommercialData,
}

pub fn chain(deps: &StepDeps) -> Vec<Arc<dyn BackfillStep>> {
    vec![
        Arc::new(ContentStep { deps: deps.clone() }),
        Arc::new(WindowedStep {
            deps: deps.clone(),
            name: "orders",
            path: "/api/v1/supplier/orders",
            lookback_days: 90,
            chunk_days: 90,
            early_exit_limit: None,
            target: WindowTarget::Orders,
        }),
        Arc::new(WindowedStep {
            deps: deps.clone(),
            name: "sales_funnel",
            path: "/api/v1/analytics/nm-report/detail",
            lookback_days: 365,
            chunk_days: 7,
            early_exit_limit: Some(EMPTY_STREAK_LIMIT),
            target: WindowTarget::SalesFunnel,
        }),
        Arc::new(WindowedStep {
            deps: deps.clone(),
            name: "finance",
            path: "/api/v5/supplier/reportDetailByPeriod",
            lookback_days: 365,
            chunk_days: 7,
            early_exit_limit: None,
            target: WindowTarget::Finance,
        }),
        Arc::new(WindowedStep {
            deps: deps.clone(),
            name: "ads_history",
            path: "/adv/v1/upd",
            lookback_days: 365,
            chunk_days: 30,
            early_exit_limit: Some(EMPTY_STREAK_LIMIT),
            target: WindowTarget::AdsHistory,
        }),
        Arc::new(WindowedStep {
            deps: deps.clone(),
            name: "commercial_data",
            path: "/api/v1/analytics/turnover",
            lookback_days: 30,
            chunk_days: 30,
            early_exit_limit: None,
            target: WindowTarget::CommercialData,
        }),
        Arc::new(WarehousesStep { deps: deps.clone() }),
    ]
}

struct ContentStep {
    deps: StepDeps,
}

#[async_trait::async_trait]
impl BackfillStep for ContentStep {
    fn name(&self) -> &'static str {
        "content"
    }

    async fn run(
        &self,
        shop_id: i64,
        _sub_progress: Arc<dyn Fn(String) + Send + Sync>,
    ) -> Result<(), IngestError> {
        let credentials = self.deps.credentials.get(shop_id).await?;
        let headers = crate::client::marketplaces::auth_headers(&credentials);

        let response = self
            .deps
            .client
            .request(
                shop_id,
                MarketplaceKind::Wildberries,
                "statistics",
                Method::GET,
                "https://content-api.wildberries.ru/content/v2/get/cards/list",
                Some(headers),
                None,
                None,
                false,
            )
            .await?;

        let Some(items) = response.json.as_ref().and_then(|v| v.get("cards")).and_then(|v| v.as_array()) else {
            return Ok(());
        };

        let rows: Vec<crate::models::DimensionRow> = items
            .iter()
            .filter_map(|item| {
                let external_id = item.get("nmID")?.as_i64()?.to_string();
                Some(crate::models::DimensionRow {
                    shop_id,
                    external_id,
                    payload: item.clone(),
                })
            })
            .collect();

        self.deps.oltp.upsert_products(&rows).await?;
        Ok(())
    }
}

/// A chunked, date-windowed pull with an optional early-exit on
/// consecutive empty chunks.
struct WindowedStep {
    deps: StepDeps,
    name: &'static str,
    path: &'static str,
    lookback_days: i64,
    chunk_days: i64,
    early_exit_limit: Option<u32>,
    target: WindowTarget,
}

#[async_trait::async_trait]
impl BackfillStep for WindowedStep {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(
        &self,
        shop_id: i64,
        sub_progress: Arc<dyn Fn(String) + Send + Sync>,
    ) -> Result<(), IngestError> {
        let credentials = self.deps.credentials.get(shop_id).await?;
        let Credentials::Wildberries { .. } = &credentials else {
            return Err(IngestError::DataFormat {
                marketplace: "wildberries".into(),
                endpoint: self.path.into(),
                detail: "shop credentials are not a wildberries token".into(),
            });
        };
        let headers = crate::client::marketplaces::auth_headers(&credentials);

        let end = Utc::now();
        let start = end - ChronoDuration::days(self.lookback_days);
        let total_chunks = (self.lookback_days / self.chunk_days).max(1);
        let mut streak = EmptyStreak::new(self.early_exit_limit.unwrap_or(u32::MAX));

        let mut chunk_start = start;
        let mut chunk_index = 0u32;
        while chunk_start < end {
            chunk_index += 1;
            let chunk_end = (chunk_start + ChronoDuration::days(self.chunk_days)).min(end);
            sub_progress(format!("chunk {chunk_index} of {total_chunks}"));

            let query = [
                ("dateFrom", chunk_start.format("%Y-%m-%d").to_string()),
                ("dateTo", chunk_end.format("%Y-%m-%d").to_string()),
            ];

            let response = self
                .deps
                .client
                .request(
                    shop_id,
                    MarketplaceKind::Wildberries,
                    "statistics",
                    Method::GET,
                    self.path,
                    Some(headers.clone()),
                    Some(&query),
                    None,
                    false,
                )
                .await?;

            let items: Vec<serde_json::Value> = response
                .json
                .as_ref()
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            streak.record(!items.is_empty());

            if !items.is_empty() {
                match self.target {
                    WindowTarget::AdsHistory => {
                        for item in &items {
                            let campaign_id = item
                                .get("advertId")
                                .or_else(|| item.get("campaignId"))
                                .or_else(|| item.get("id"))
                                .and_then(value_as_id)
                                .unwrap_or_else(|| "unknown".to_string());
                            self.deps
                                .olap
                                .append_ad_snapshot(shop_id, &campaign_id, item)
                                .await?;
                        }
                    }
                    WindowTarget::Orders => {
                        let rows = dimension_rows(shop_id, &items, &["odid", "srid", "id"], self.name);
                        self.deps.oltp.upsert_orders(&rows).await?;
                    }
                    WindowTarget::SalesFunnel => {
                        let rows = dimension_rows(shop_id, &items, &["nmId", "nm_id", "id"], self.name);
                        self.deps.oltp.upsert_funnel_snapshots(&rows).await?;
                    }
                    WindowTarget::Finance => {
                        let rows = dimension_rows(shop_id, &items, &["rrd_id", "rrdId", "realizationreport_id"], self.name);
                        self.deps.oltp.upsert_finance_transactions(&rows).await?;
                    }
                    WindowTarget::CommercialData => {
                        let rows = dimension_rows(shop_id, &items, &["nmId", "nm_id", "id"], self.name);
                        self.deps.oltp.upsert_commercial_data(&rows).await?;
                    }
                }
            }

            if streak.should_stop() {
                tracing::debug!(shop_id, step = self.name, "early-exit on empty streak");
                break;
            }

            chunk_start = chunk_end;
        }

        Ok(())
    }
}

struct WarehousesStep {
    deps: StepDeps,
}

#[async_trait::async_trait]
impl BackfillStep for WarehousesStep {
    fn name(&self) -> &'static str {
        "warehouses"
    }

    async fn run(
        &self,
        shop_id: i64,
        _sub_progress: Arc<dyn Fn(String) + Send + Sync>,
    ) -> Result<(), IngestError> {
        let credentials = self.deps.credentials.get(shop_id).await?;
        let headers = crate::client::marketplaces::auth_headers(&credentials);

        let response = self
            .deps
            .client
            .request(
                shop_id,
                MarketplaceKind::Wildberries,
                "statistics",
                Method::GET,
                "https://marketplace-api.wildberries.ru/api/v3/warehouses",
                Some(headers),
                None,
                None,
                false,
            )
            .await?;

        let items: Vec<serde_json::Value> = response
            .json
            .as_ref()
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        if !items.is_empty() {
            let rows = dimension_rows(shop_id, &items, &["id", "officeId", "warehouseId"], "warehouse");
            self.deps.oltp.upsert_warehouses(&rows).await?;
        }
        Ok(())
    }
}
