//! Event detector.
//!
//! Pure diff functions: `(previous, new) -> events`. No I/O here — callers
//! load the previous snapshot from the state store, call the detector,
//! then persist the new snapshot. Replaying the same `new` against the
//! snapshot it just produced yields no events, by construction (each
//! detector only compares `previous` to `new`, never accumulates).

pub mod fingerprint;
pub mod types;

use chrono::Utc;
use serde_json::json;

use crate::models::{EventKind, EventRecord};
use types::{CampaignSnapshot, ContentSnapshot};

/// Debounce floors and jump heuristics, tunable per marketplace.
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    pub bid_floor: f64,
    pub budget_epsilon: f64,
    pub price_floor: f64,
    pub stock_replenish_jump: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            bid_floor: 0.01,
            budget_epsilon: 0.01,
            price_floor: 0.01,
            stock_replenish_jump: 50,
        }
    }
}

pub struct EventDetector {
    config: DetectorConfig,
}

impl EventDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// `PRICE_CHANGE`: fires when the delta exceeds the configured floor.
    pub fn detect_price(
        &self,
        shop_id: i64,
        product_id: &str,
        previous: Option<f64>,
        new: f64,
    ) -> Option<EventRecord> {
        let previous = previous?;
        if (new - previous).abs() <= self.config.price_floor {
            return None;
        }
        Some(EventRecord {
            created_at: Utc::now(),
            shop_id,
            campaign_id: None,
            product_id: Some(product_id.to_string()),
            event_type: EventKind::PriceChange,
            old_value: Some(previous.to_string()),
            new_value: Some(new.to_string()),
            metadata: json!({}),
        })
    }

    /// `STOCK_OUT` / `STOCK_REPLENISH`.
    pub fn detect_stock(
        &self,
        shop_id: i64,
        product_id: &str,
        previous: Option<i64>,
        new: i64,
    ) -> Option<EventRecord> {
        let previous = previous?;
        let kind = if previous > 0 && new == 0 {
            EventKind::StockOut
        } else if previous == 0 && new - previous >= self.config.stock_replenish_jump {
            EventKind::StockReplenish
        } else {
            return None;
        };
        Some(EventRecord {
            created_at: Utc::now(),
            shop_id,
            campaign_id: None,
            product_id: Some(product_id.to_string()),
            event_type: kind,
            old_value: Some(previous.to_string()),
            new_value: Some(new.to_string()),
            metadata: json!({}),
        })
    }

    /// Content fingerprint/photo-order changes.
    pub fn detect_content(
        &self,
        shop_id: i64,
        product_id: &str,
        previous: Option<&ContentSnapshot>,
        new: &ContentSnapshot,
    ) -> Vec<EventRecord> {
        let Some(previous) = previous else {
            return Vec::new();
        };
        let mut events = Vec::with_capacity(4);

        if previous.title_fingerprint != new.title_fingerprint {
            events.push(self.content_event(
                shop_id,
                product_id,
                EventKind::ContentTitleChanged,
                &previous.title_fingerprint,
                &new.title_fingerprint,
            ));
        }
        if previous.desc_fingerprint != new.desc_fingerprint {
            events.push(self.content_event(
                shop_id,
                product_id,
                EventKind::ContentDescChanged,
                &previous.desc_fingerprint,
                &new.desc_fingerprint,
            ));
        }
        if previous.main_photo_id != new.main_photo_id {
            events.push(self.content_event(
                shop_id,
                product_id,
                EventKind::ContentMainPhotoChanged,
                &previous.main_photo_id,
                &new.main_photo_id,
            ));
        }
        if previous.photo_order != new.photo_order {
            events.push(self.content_event(
                shop_id,
                product_id,
                EventKind::ContentPhotoOrderChanged,
                &previous.photo_order.join(","),
                &new.photo_order.join(","),
            ));
        }

        events
    }

    fn content_event(
        &self,
        shop_id: i64,
        product_id: &str,
        kind: EventKind,
        old: &str,
        new: &str,
    ) -> EventRecord {
        EventRecord {
            created_at: Utc::now(),
            shop_id,
            campaign_id: None,
            product_id: Some(product_id.to_string()),
            event_type: kind,
            old_value: Some(old.to_string()),
            new_value: Some(new.to_string()),
            metadata: json!({}),
        }
    }

    /// Campaign-level: bid/status/budget/item-set/inactivity changes.
    pub fn detect_campaign(
        &self,
        shop_id: i64,
        campaign_id: &str,
        previous: Option<&CampaignSnapshot>,
        new: &CampaignSnapshot,
    ) -> Vec<EventRecord> {
        let mut events = Vec::new();
        let Some(previous) = previous else {
            return events;
        };

        if (new.bid - previous.bid).abs() > self.config.bid_floor {
            events.push(self.campaign_event(
                shop_id,
                campaign_id,
                EventKind::BidChange,
                Some(previous.bid.to_string()),
                Some(new.bid.to_string()),
                json!({}),
            ));
        }

        if previous.status != new.status {
            events.push(self.campaign_event(
                shop_id,
                campaign_id,
                EventKind::StatusChange,
                Some(previous.status.clone()),
                Some(new.status.clone()),
                json!({}),
            ));
        }

        if (new.budget - previous.budget).abs() > self.config.budget_epsilon {
            events.push(self.campaign_event(
                shop_id,
                campaign_id,
                EventKind::BudgetChange,
                Some(previous.budget.to_string()),
                Some(new.budget.to_string()),
                json!({}),
            ));
        }

        for added in new.items.difference(&previous.items) {
            events.push(self.campaign_event(
                shop_id,
                campaign_id,
                EventKind::ItemAdd,
                None,
                Some(added.clone()),
                json!({ "product_id": added }),
            ));
        }
        for removed in previous.items.difference(&new.items) {
            events.push(self.campaign_event(
                shop_id,
                campaign_id,
                EventKind::ItemRemove,
                Some(removed.clone()),
                None,
                json!({ "product_id": removed }),
            ));
        }

        for item in new.items.intersection(&previous.items) {
            let zero_impressions = new.zero_impression_items.contains(item);
            let zero_stock = new.zero_stock_items.contains(item);
            if zero_impressions || zero_stock {
                events.push(self.campaign_event(
                    shop_id,
                    campaign_id,
                    EventKind::ItemInactive,
                    None,
                    None,
                    json!({
                        "product_id": item,
                        "reason": if zero_stock { "stock_zero" } else { "zero_impressions" },
                    }),
                ));
            }
        }

        events
    }

    fn campaign_event(
        &self,
        shop_id: i64,
        campaign_id: &str,
        kind: EventKind,
        old_value: Option<String>,
        new_value: Option<String>,
        metadata: serde_json::Value,
    ) -> EventRecord {
        EventRecord {
            created_at: Utc::now(),
            shop_id,
            campaign_id: Some(campaign_id.to_string()),
            product_id: None,
            event_type: kind,
            old_value,
            new_value,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn detector() -> EventDetector {
        EventDetector::new(DetectorConfig::default())
    }

    #[test]
    fn price_change_requires_previous_snapshot() {
        assert!(detector().detect_price(1, "nm1", None, 100.0).is_none());
    }

    #[test]
    fn price_change_fires_on_delta() {
        let event = detector().detect_price(1, "nm1", Some(100.0), 120.0).unwrap();
        assert_eq!(event.event_type, EventKind::PriceChange);
    }

    #[test]
    fn stock_out_fires_on_drop_to_zero() {
        let event = detector().detect_stock(1, "nm1", Some(5), 0).unwrap();
        assert_eq!(event.event_type, EventKind::StockOut);
    }

    #[test]
    fn stock_replenish_requires_jump_threshold() {
        assert!(detector().detect_stock(1, "nm1", Some(0), 10).is_none());
        let event = detector().detect_stock(1, "nm1", Some(0), 60).unwrap();
        assert_eq!(event.event_type, EventKind::StockReplenish);
    }

    #[test]
    fn replaying_identical_snapshot_is_idempotent() {
        let snapshot = ContentSnapshot {
            title_fingerprint: "abc".into(),
            desc_fingerprint: "def".into(),
            main_photo_id: "p1".into(),
            photo_order: vec!["p1".into(), "p2".into()],
        };
        let events = detector().detect_content(1, "nm1", Some(&snapshot), &snapshot);
        assert!(events.is_empty());
    }

    #[test]
    fn item_set_diff_produces_add_and_remove() {
        let mut prev_items = BTreeSet::new();
        prev_items.insert("a".to_string());
        prev_items.insert("b".to_string());
        let mut new_items = BTreeSet::new();
        new_items.insert("b".to_string());
        new_items.insert("c".to_string());

        let prev = CampaignSnapshot {
            bid: 1.0,
            status: "active".into(),
            budget: 100.0,
            items: prev_items,
            zero_impression_items: BTreeSet::new(),
            zero_stock_items: BTreeSet::new(),
        };
        let new = CampaignSnapshot {
            items: new_items,
            ..prev.clone()
        };

        let events = detector().detect_campaign(1, "camp1", Some(&prev), &new);
        assert!(events.iter().any(|e| e.event_type == EventKind::ItemAdd));
        assert!(events.iter().any(|e| e.event_type == EventKind::ItemRemove));
    }
}
