//! Ozon backfill chain: products -> product snapshots ->
//! orders (365d) -> finance (monthly) -> funnel (365d/90d chunks) ->
//! returns (180d) -> warehouse stocks -> prices -> seller rating ->
//! content rating -> content hashes -> ads (180d, 30-day chunks, newest
//! first).

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Method;

use crate::error::IngestError;
use crate::events::fingerprint::{stable_photo_id, text_fingerprint};
use crate::models::MarketplaceKind;

use super::{dimension_rows, value_as_id, BackfillStep, EmptyStreak, StepDeps};

const ADS_EMPTY_STREAK_LIMIT: u32 = 3;

/// Where a `SimpleStep`'s payload lands. `SellerRatingSummary` is a
/// single per-shop object, not a per-SKU list, so it gets its own write
/// path; `ContentHashSeed` doesn't persist to OLTP/OLAP at all, it seeds
/// the content-fingerprint baseline so the first live `content_check`
/// poll doesn't mistake the backfilled state for a new change.
#[derive(Clone, Copy)]
enum SimpleTarget {
    Products,
    WarehouseStocks,
    Prices,
    ContentRating,
    SellerRatingSummary,
    ContentHashSeed,
}

/// Where a `WindowedStep`'s chunk rows land.
#[derive(Clone, Copy)]
enum WindowTarget {
    Orders,
    Finance,
    Funnel,
    Returns,
    Ads,
}

pub fn chain(deps: &StepDeps) -> Vec<Arc<dyn BackfillStep>> {
    vec![
        Arc::new(SimpleStep {
            deps: deps.clone(),
            name: "products",
            path: "/v3/product/list",
            target: SimpleTarget::Products,
        }),
        Arc::new(SimpleStep {
            deps: deps.clone(),
            name: "product_snapshots",
            path: "/v2/product/info/list",
            target: SimpleTarget::Products,
        }),
        Arc::new(WindowedStep {
            deps: deps.clone(),
            name: "orders",
            path: "/v3/posting/fbs/list",
            lookback_days: 365,
            chunk_days: 30,
            empty_streak_limit: None,
            newest_first: false,
            target: WindowTarget::Orders,
        }),
        Arc::new(WindowedStep {
            deps: deps.clone(),
            name: "finance",
            path: "/v3/finance/transaction/list",
            lookback_days: 365,
            chunk_days: 30,
            empty_streak_limit: None,
            newest_first: false,
            target: WindowTarget::Finance,
        }),
        Arc::new(WindowedStep {
            deps: deps.clone(),
            name: "funnel",
            path: "/v1/analytics/data",
            lookback_days: 365,
            chunk_days: 90,
            empty_streak_limit: None,
            newest_first: false,
            target: WindowTarget::Funnel,
        }),
        Arc::new(WindowedStep {
            deps: deps.clone(),
            name: "returns",
            path: "/v3/returns/company/fbs",
            lookback_days: 180,
            chunk_days: 30,
            empty_streak_limit: None,
            newest_first: false,
            target: WindowTarget::Returns,
        }),
        Arc::new(SimpleStep {
            deps: deps.clone(),
            name: "warehouse_stocks",
            path: "/v4/product/info/stocks",
            target: SimpleTarget::WarehouseStocks,
        }),
        Arc::new(SimpleStep {
            deps: deps.clone(),
            name: "prices",
            path: "/v5/product/info/prices",
            target: SimpleTarget::Prices,
        }),
        Arc::new(SimpleStep {
            deps: deps.clone(),
            name: "seller_rating",
            path: "/v1/rating/summary",
            target: SimpleTarget::SellerRatingSummary,
        }),
        Arc::new(SimpleStep {
            deps: deps.clone(),
            name: "content_rating",
            path: "/v1/product/rating-by-sku",
            target: SimpleTarget::ContentRating,
        }),
        Arc::new(SimpleStep {
            deps: deps.clone(),
            name: "content_hashes",
            path: "/v3/product/info/list",
            target: SimpleTarget::ContentHashSeed,
        }),
        Arc::new(WindowedStep {
            deps: deps.clone(),
            name: "ads",
            path: "/api/client/statistics",
            lookback_days: 180,
            chunk_days: 30,
            empty_streak_limit: Some(ADS_EMPTY_STREAK_LIMIT),
            newest_first: true,
            target: WindowTarget::Ads,
        }),
    ]
}

struct SimpleStep {
    deps: StepDeps,
    name: &'static str,
    path: &'static str,
    target: SimpleTarget,
}

#[async_trait::async_trait]
impl BackfillStep for SimpleStep {
    fn name(&self) -> &'static str {
        self.name
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
                MarketplaceKind::Ozon,
                "seller",
                Method::POST,
                self.path,
                Some(headers),
                None,
                Some(serde_json::json!({})),
                false,
            )
            .await?;

        match self.target {
            SimpleTarget::SellerRatingSummary => {
                if let Some(payload) = response.json.as_ref() {
                    self.deps.oltp.upsert_seller_rating(shop_id, payload).await?;
                }
                Ok(())
            }
            SimpleTarget::ContentHashSeed => {
                let Some(items) = response.json.as_ref().and_then(|v| v.get("items")).and_then(|v| v.as_array()) else {
                    return Ok(());
                };
                for item in items {
                    let Some(sku) = item
                        .get("offer_id")
                        .or_else(|| item.get("sku"))
                        .or_else(|| item.get("id"))
                        .and_then(value_as_id)
                    else {
                        continue;
                    };
                    let title = item.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                    let description = item.get("description").and_then(|v| v.as_str()).unwrap_or_default();
                    let photos: Vec<String> = item
                        .get("images")
                        .and_then(|v| v.as_array())
                        .map(|a| a.iter().filter_map(|v| v.as_str()).map(stable_photo_id).collect())
                        .unwrap_or_default();

                    self.deps
                        .state
                        .set_content_hash(shop_id, &sku, "title", &text_fingerprint(title))
                        .await?;
                    self.deps
                        .state
                        .set_content_hash(shop_id, &sku, "desc", &text_fingerprint(description))
                        .await?;
                    self.deps
                        .state
                        .set_content_hash(shop_id, &sku, "main_photo", photos.first().map(String::as_str).unwrap_or_default())
                        .await?;
                    self.deps
                        .state
                        .set_content_hash(shop_id, &sku, "photo_order", &photos.join(","))
                        .await?;
                }
                Ok(())
            }
            SimpleTarget::Products | SimpleTarget::WarehouseStocks | SimpleTarget::Prices | SimpleTarget::ContentRating => {
                let Some(items) = response.json.as_ref().and_then(|v| v.get("items")).and_then(|v| v.as_array()) else {
                    return Ok(());
                };
                let rows = dimension_rows(shop_id, items, &["sku", "offer_id", "id"], self.name);
                match self.target {
                    SimpleTarget::Products => self.deps.oltp.upsert_products(&rows).await?,
                    SimpleTarget::WarehouseStocks => self.deps.oltp.upsert_warehouse_stocks(&rows).await?,
                    SimpleTarget::Prices => self.deps.oltp.upsert_prices(&rows).await?,
                    SimpleTarget::ContentRating => self.deps.oltp.upsert_content_ratings(&rows).await?,
                    SimpleTarget::SellerRatingSummary | SimpleTarget::ContentHashSeed => {}
                }
                Ok(())
            }
        }
    }
}

struct WindowedStep {
    deps: StepDeps,
    name: &'static str,
    path: &'static str,
    lookback_days: i64,
    chunk_days: i64,
    empty_streak_limit: Option<u32>,
    /// Ads history scans newest-first; other windowed steps
    /// scan oldest-first.
    newest_first: bool,
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
        let headers = crate::client::marketplaces::auth_headers(&credentials);

        let end = Utc::now();
        let start = end - ChronoDuration::days(self.lookback_days);
        let total_chunks = ((self.lookback_days / self.chunk_days).max(1)) as u32;
        let mut streak = EmptyStreak::new(self.empty_streak_limit.unwrap_or(u32::MAX));

        for i in 0..total_chunks {
            let index = if self.newest_first {
                total_chunks - 1 - i
            } else {
                i
            };
            let chunk_start = start + ChronoDuration::days(index as i64 * self.chunk_days);
            let chunk_end = (chunk_start + ChronoDuration::days(self.chunk_days)).min(end);
            sub_progress(format!("window {} of {}", i + 1, total_chunks));

            let response = self
                .deps
                .client
                .request(
                    shop_id,
                    MarketplaceKind::Ozon,
                    if self.name == "ads" { "performance" } else { "seller" },
                    Method::POST,
                    self.path,
                    Some(headers.clone()),
                    None,
                    Some(serde_json::json!({
                        "date_from": chunk_start.to_rfc3339(),
                        "date_to": chunk_end.to_rfc3339(),
                    })),
                    false,
                )
                .await?;

            let items: Vec<serde_json::Value> = response
                .json
                .as_ref()
                .and_then(|v| v.get("items"))
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            streak.record(!items.is_empty());

            if !items.is_empty() {
                match self.target {
                    WindowTarget::Orders => {
                        let rows = dimension_rows(shop_id, &items, &["posting_number", "order_id", "id"], self.name);
                        self.deps.oltp.upsert_orders(&rows).await?;
                    }
                    WindowTarget::Finance => {
                        let rows = dimension_rows(shop_id, &items, &["operation_id", "id"], self.name);
                        self.deps.oltp.upsert_finance_transactions(&rows).await?;
                    }
                    WindowTarget::Funnel => {
                        let rows = dimension_rows(shop_id, &items, &["sku", "offer_id", "id"], self.name);
                        self.deps.oltp.upsert_funnel_snapshots(&rows).await?;
                    }
                    WindowTarget::Returns => {
                        let rows = dimension_rows(shop_id, &items, &["return_id", "id"], self.name);
                        self.deps.oltp.upsert_returns(&rows).await?;
                    }
                    WindowTarget::Ads => {
                        for item in &items {
                            let campaign_id = item
                                .get("campaign_id")
                                .or_else(|| item.get("id"))
                                .and_then(value_as_id)
                                .unwrap_or_else(|| "unknown".to_string());
                            self.deps
                                .olap
                                .append_ad_snapshot(shop_id, &campaign_id, item)
                                .await?;
                        }
                    }
                }
            }

            if streak.should_stop() {
                tracing::debug!(shop_id, step = self.name, "early-exit on empty streak");
                break;
            }
        }

        Ok(())
    }
}
