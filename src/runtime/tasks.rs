//! Concrete beat-scheduled tasks.
//!
//! Each task fetches one marketplace surface for `ctx.shop_id`, diffs it
//! against stored state via the event detector, and persists the new
//! state plus any detected events. `sync_all_daily` instead re-runs the
//! full orchestrator chain for a fresh-state refresh.

use std::sync::Arc;

use reqwest::Method;

use crate::client::marketplaces::auth_headers;
use crate::client::MarketplaceClient;
use crate::credentials::CredentialStore;
use crate::error::IngestError;
use crate::events::fingerprint::{stable_photo_id, text_fingerprint};
use crate::events::types::{CampaignSnapshot, ContentSnapshot};
use crate::events::{DetectorConfig, EventDetector};
use crate::loaders::{OltpLoader, OlapLoader};
use crate::models::MarketplaceKind;
use crate::orchestrator::{Orchestrator, StepDeps};
use crate::runtime::queue::{Task, TaskContext, TaskFuture};
use crate::state::StateStore;

#[derive(Clone)]
pub struct TaskDeps {
    pub client: Arc<MarketplaceClient>,
    pub credentials: Arc<CredentialStore>,
    pub oltp: Arc<OltpLoader>,
    pub olap: Arc<OlapLoader>,
    pub state: StateStore,
    pub detector: Arc<EventDetector>,
}

impl TaskDeps {
    pub fn new(
        client: Arc<MarketplaceClient>,
        credentials: Arc<CredentialStore>,
        oltp: Arc<OltpLoader>,
        olap: Arc<OlapLoader>,
        state: StateStore,
    ) -> Self {
        Self {
            client,
            credentials,
            oltp,
            olap,
            state,
            detector: Arc::new(EventDetector::new(DetectorConfig::default())),
        }
    }

    pub fn step_deps(&self) -> StepDeps {
        StepDeps {
            client: self.client.clone(),
            credentials: self.credentials.clone(),
            oltp: self.oltp.clone(),
            olap: self.olap.clone(),
            state: self.state.clone(),
        }
    }
}

async fn shop_marketplace(deps: &TaskDeps, shop_id: i64) -> Result<MarketplaceKind, IngestError> {
    Ok(deps.oltp.get_shop(shop_id).await?.marketplace)
}

/// Render a JSON id field (string or number) as a plain string, without
/// the quoting `Value::to_string` would add for string variants.
fn value_as_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Fetch all campaigns for a shop's ads surface, returning `(campaign_id,
/// CampaignSnapshot)` pairs parsed from the generic `items` envelope both
/// marketplaces' ads APIs return.
async fn fetch_campaigns(
    deps: &TaskDeps,
    shop_id: i64,
    marketplace: MarketplaceKind,
) -> Result<Vec<(String, CampaignSnapshot)>, IngestError> {
    let credentials = deps.credentials.get(shop_id).await?;
    let headers = auth_headers(&credentials);

    let (path, surface) = match marketplace {
        MarketplaceKind::Wildberries => ("/adv/v1/promotion/count", "statistics"),
        MarketplaceKind::Ozon => ("/api/client/campaign", "performance"),
    };

    let response = deps
        .client
        .request(
            shop_id,
            marketplace,
            surface,
            Method::GET,
            path,
            Some(headers),
            None,
            None,
            false,
        )
        .await?;

    let Some(items) = response
        .json
        .as_ref()
        .and_then(|v| v.get("items").or(v.as_array().map(|_| v)))
        .and_then(|v| v.as_array())
    else {
        return Ok(Vec::new());
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(campaign_id) = item.get("id").and_then(value_as_id) else {
            continue;
        };
        let bid = item.get("bid").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let status = item
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let budget = item.get("budget").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let items_set = item
            .get("product_ids")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        out.push((
            campaign_id,
            CampaignSnapshot {
                bid,
                status,
                budget,
                items: items_set,
                zero_impression_items: Default::default(),
                zero_stock_items: Default::default(),
            },
        ));
    }
    Ok(out)
}

macro_rules! task_impl {
    ($ty:ident, $name:literal, $body:item) => {
        pub struct $ty {
            pub deps: TaskDeps,
        }

        $body

        impl Task for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn run(&self, ctx: TaskContext) -> TaskFuture {
                let deps = self.deps.clone();
                Box::pin(async move {
                    let Some(shop_id) = ctx.shop_id else {
                        return Err(IngestError::Fatal {
                            task: $name.to_string(),
                            shop_id: None,
                            source: anyhow::anyhow!("task requires a shop_id"),
                        });
                    };
                    $ty::execute(&deps, shop_id).await
                })
            }
        }
    };
}

task_impl!(UpdateAllBidsTask, "update_all_bids", impl UpdateAllBidsTask {
    async fn execute(deps: &TaskDeps, shop_id: i64) -> Result<(), IngestError> {
        let marketplace = shop_marketplace(deps, shop_id).await?;
        let campaigns = fetch_campaigns(deps, shop_id, marketplace).await?;
        let mut events = Vec::new();

        for (campaign_id, snapshot) in campaigns {
            let previous_state = deps.state.get_campaign_state(shop_id, &campaign_id).await?;
            let previous_snapshot = previous_state.map(|s| CampaignSnapshot {
                bid: s.bid,
                status: s.status,
                budget: s.budget,
                items: s.items,
                zero_impression_items: Default::default(),
                zero_stock_items: Default::default(),
            });

            events.extend(deps.detector.detect_campaign(
                shop_id,
                &campaign_id,
                previous_snapshot.as_ref(),
                &snapshot,
            ));

            deps.state
                .set_campaign_state(
                    shop_id,
                    &campaign_id,
                    &crate::state::CampaignState {
                        bid: snapshot.bid,
                        status: snapshot.status.clone(),
                        items: snapshot.items.clone(),
                        budget: snapshot.budget,
                    },
                )
                .await?;
        }

        if !events.is_empty() {
            deps.oltp.append_events(&events).await?;
        }
        Ok(())
    }
});

task_impl!(CheckAllPositionsTask, "check_all_positions", impl CheckAllPositionsTask {
    async fn execute(deps: &TaskDeps, shop_id: i64) -> Result<(), IngestError> {
        let marketplace = shop_marketplace(deps, shop_id).await?;
        let credentials = deps.credentials.get(shop_id).await?;
        let headers = auth_headers(&credentials);

        let (path, surface) = match marketplace {
            MarketplaceKind::Wildberries => ("/content/v2/get/cards/list", "statistics"),
            MarketplaceKind::Ozon => ("/v5/product/info/prices", "seller"),
        };

        let response = deps
            .client
            .request(shop_id, marketplace, surface, Method::GET, path, Some(headers), None, None, false)
            .await?;

        let Some(items) = response.json.as_ref().and_then(|v| v.get("items")).and_then(|v| v.as_array()) else {
            return Ok(());
        };

        let mut events = Vec::new();
        for item in items {
            let Some(nm) = item.get("id").or_else(|| item.get("sku")).and_then(value_as_id) else {
                continue;
            };
            let Some(price) = item
                .get("price")
                .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            else {
                continue;
            };
            let previous = deps.state.get_price(shop_id, &nm).await?;
            if let Some(event) = deps.detector.detect_price(shop_id, &nm, previous, price) {
                events.push(event);
            }
            deps.state.set_price(shop_id, &nm, price).await?;
        }

        if !events.is_empty() {
            deps.oltp.append_events(&events).await?;
        }
        Ok(())
    }
});

task_impl!(SyncAllFrequentTask, "sync_all_frequent", impl SyncAllFrequentTask {
    async fn execute(deps: &TaskDeps, shop_id: i64) -> Result<(), IngestError> {
        let marketplace = shop_marketplace(deps, shop_id).await?;
        let credentials = deps.credentials.get(shop_id).await?;
        let headers = auth_headers(&credentials);

        let (path, surface) = match marketplace {
            MarketplaceKind::Wildberries => ("/api/v3/stocks", "statistics"),
            MarketplaceKind::Ozon => ("/v4/product/info/stocks", "seller"),
        };

        let response = deps
            .client
            .request(shop_id, marketplace, surface, Method::GET, path, Some(headers), None, None, false)
            .await?;

        let Some(items) = response.json.as_ref().and_then(|v| v.get("items")).and_then(|v| v.as_array()) else {
            return Ok(());
        };

        let mut events = Vec::new();
        for item in items {
            let Some(nm) = item.get("nmId").or_else(|| item.get("sku")).and_then(value_as_id) else {
                continue;
            };
            let warehouse = item.get("warehouse").and_then(|v| v.as_str()).unwrap_or("default");
            let Some(quantity) = item.get("quantity").and_then(|v| v.as_i64()) else {
                continue;
            };
            let previous = deps.state.get_stock(shop_id, &nm, warehouse).await?;
            if let Some(event) = deps.detector.detect_stock(shop_id, &nm, previous, quantity) {
                events.push(event);
            }
            deps.state.set_stock(shop_id, &nm, warehouse, quantity).await?;
        }

        if !events.is_empty() {
            deps.oltp.append_events(&events).await?;
        }

        events = content_check(deps, shop_id, marketplace).await?;
        if !events.is_empty() {
            deps.oltp.append_events(&events).await?;
        }
        Ok(())
    }
});

/// Fetch title/description/photos for every item and diff each against its
/// stored fingerprint. Shares `sync_all_frequent`'s cadence since the
/// beat schedule has no dedicated content-check entry.
async fn content_check(
    deps: &TaskDeps,
    shop_id: i64,
    marketplace: MarketplaceKind,
) -> Result<Vec<crate::models::EventRecord>, IngestError> {
    let credentials = deps.credentials.get(shop_id).await?;
    let headers = auth_headers(&credentials);

    let (path, surface) = match marketplace {
        MarketplaceKind::Wildberries => ("/content/v2/get/cards/list", "statistics"),
        MarketplaceKind::Ozon => ("/v3/product/info/list", "seller"),
    };

    let response = deps
        .client
        .request(shop_id, marketplace, surface, Method::GET, path, Some(headers), None, None, false)
        .await?;

    let Some(items) = response.json.as_ref().and_then(|v| v.get("items")).and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };

    let mut events = Vec::new();
    for item in items {
        let Some(nm) = item.get("nmId").or_else(|| item.get("id")).and_then(value_as_id) else {
            continue;
        };
        let title = item.get("title").and_then(|v| v.as_str()).unwrap_or_default();
        let description = item.get("description").and_then(|v| v.as_str()).unwrap_or_default();
        let photos: Vec<String> = item
            .get("photos")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str())
                    .map(stable_photo_id)
                    .collect()
            })
            .unwrap_or_default();

        let new_snapshot = ContentSnapshot {
            title_fingerprint: text_fingerprint(title),
            desc_fingerprint: text_fingerprint(description),
            main_photo_id: photos.first().cloned().unwrap_or_default(),
            photo_order: photos.clone(),
        };

        let previous = load_content_snapshot(deps, shop_id, &nm).await?;
        events.extend(deps.detector.detect_content(shop_id, &nm, previous.as_ref(), &new_snapshot));

        deps.state
            .set_content_hash(shop_id, &nm, "title", &new_snapshot.title_fingerprint)
            .await?;
        deps.state
            .set_content_hash(shop_id, &nm, "desc", &new_snapshot.desc_fingerprint)
            .await?;
        deps.state
            .set_content_hash(shop_id, &nm, "main_photo", &new_snapshot.main_photo_id)
            .await?;
        deps.state
            .set_content_hash(shop_id, &nm, "photo_order", &new_snapshot.photo_order.join(","))
            .await?;
    }
    Ok(events)
}

async fn load_content_snapshot(
    deps: &TaskDeps,
    shop_id: i64,
    nm: &str,
) -> Result<Option<ContentSnapshot>, IngestError> {
    let title_fingerprint = deps.state.get_content_hash(shop_id, nm, "title").await?;
    let desc_fingerprint = deps.state.get_content_hash(shop_id, nm, "desc").await?;
    let main_photo_id = deps.state.get_content_hash(shop_id, nm, "main_photo").await?;
    let photo_order = deps.state.get_content_hash(shop_id, nm, "photo_order").await?;

    match (title_fingerprint, desc_fingerprint, main_photo_id, photo_order) {
        (Some(title_fingerprint), Some(desc_fingerprint), Some(main_photo_id), Some(photo_order)) => {
            Ok(Some(ContentSnapshot {
                title_fingerprint,
                desc_fingerprint,
                main_photo_id,
                photo_order: photo_order.split(',').map(String::from).filter(|s| !s.is_empty()).collect(),
            }))
        }
        _ => Ok(None),
    }
}

task_impl!(SyncAllAdsTask, "sync_all_ads", impl SyncAllAdsTask {
    async fn execute(deps: &TaskDeps, shop_id: i64) -> Result<(), IngestError> {
        UpdateAllBidsTask::execute(deps, shop_id).await
    }
});

task_impl!(SyncAllCampaignSnapshotsTask, "sync_all_campaign_snapshots", impl SyncAllCampaignSnapshotsTask {
    async fn execute(deps: &TaskDeps, shop_id: i64) -> Result<(), IngestError> {
        let marketplace = shop_marketplace(deps, shop_id).await?;
        let campaigns = fetch_campaigns(deps, shop_id, marketplace).await?;
        for (campaign_id, snapshot) in campaigns {
            let payload = serde_json::json!({
                "bid": snapshot.bid,
                "status": snapshot.status,
                "budget": snapshot.budget,
                "item_count": snapshot.items.len(),
            });
            deps.olap.append_ad_snapshot(shop_id, &campaign_id, &payload).await?;
            deps.olap.append_bid_history(shop_id, &campaign_id, snapshot.bid).await?;
        }
        Ok(())
    }
});

task_impl!(SyncAllDailyTask, "sync_all_daily", impl SyncAllDailyTask {
    async fn execute(deps: &TaskDeps, shop_id: i64) -> Result<(), IngestError> {
        let marketplace = shop_marketplace(deps, shop_id).await?;
        let orchestrator = Orchestrator::new(deps.state.clone(), deps.step_deps());
        match orchestrator.run_backfill(shop_id, marketplace).await? {
            crate::orchestrator::RunOutcome::SkippedAlreadyRunning => {
                tracing::info!(shop_id, "daily sync skipped: backfill already running");
            }
            _ => {}
        }
        Ok(())
    }
});
