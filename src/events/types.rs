//! Snapshot shapes the detector diffs against each other.

use std::collections::BTreeSet;

/// A single price/stock/content observation for one marketplace item
/// (`nm` is the marketplace's numeric item id, kept as a string since
/// both Wildberries and Ozon use different native widths).
#[derive(Debug, Clone, PartialEq)]
pub struct ContentSnapshot {
    pub title_fingerprint: String,
    pub desc_fingerprint: String,
    pub main_photo_id: String,
    pub photo_order: Vec<String>,
}

/// Per-campaign state snapshot, covering the campaign-level fields plus
/// its product set.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignSnapshot {
    pub bid: f64,
    pub status: String,
    pub budget: f64,
    pub items: BTreeSet<String>,
    /// Items with zero impressions over the current window, used for
    /// `ITEM_INACTIVE`.
    pub zero_impression_items: BTreeSet<String>,
    /// Items in the campaign whose current stock is zero.
    pub zero_stock_items: BTreeSet<String>,
}
