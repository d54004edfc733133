//! Core data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// External commerce platform a shop is bound to. Closed set — adding a
/// marketplace means adding a variant here and a matching entry in
/// `client::marketplaces`, not a free-form string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketplaceKind {
    Wildberries,
    Ozon,
}

impl MarketplaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketplaceKind::Wildberries => "wildberries",
            MarketplaceKind::Ozon => "ozon",
        }
    }
}

impl std::fmt::Display for MarketplaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shop lifecycle status. Union of circuit state and sync state: only
/// the circuit breaker writes `AuthError`, only the orchestrator writes
/// `Syncing`/`Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShopStatus {
    Active,
    Syncing,
    AuthError,
    Paused,
}

impl ShopStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShopStatus::Active => "active",
            ShopStatus::Syncing => "syncing",
            ShopStatus::AuthError => "auth_error",
            ShopStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for ShopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tenant account. Mirrors the `shops` OLTP dimension row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shop {
    pub id: i64,
    pub owner_id: i64,
    pub marketplace: MarketplaceKind,
    /// Encrypted primary API secret; never decrypted outside `credentials`.
    pub encrypted_secret: Vec<u8>,
    pub ozon_client_id: Option<String>,
    pub ozon_performance_client_id: Option<String>,
    pub ozon_performance_encrypted_secret: Option<Vec<u8>>,
    pub status: ShopStatus,
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Decrypted, marketplace-specific credentials as returned by the
/// credential store. Never logged or serialized to the OLTP/OLAP stores.
#[derive(Debug, Clone)]
pub enum Credentials {
    Wildberries {
        token: String,
    },
    Ozon {
        api_key: String,
        client_id: String,
        performance_client_id: Option<String>,
        performance_secret: Option<String>,
    },
}

/// Proxy classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyClass {
    Datacenter,
    Residential,
    Mobile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyStatus {
    Active,
    Inactive,
    Banned,
    Testing,
}

/// A single upstream proxy, as tracked by the OLTP `proxies` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub id: i64,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub class: ProxyClass,
    pub encrypted_password: Vec<u8>,
    pub success_count: u64,
    pub failure_count: u64,
    pub status: ProxyStatus,
}

impl ProxyRecord {
    /// Derived success rate, used as the weighted-random selection weight.
    /// A proxy with no history is given an optimistic prior so it gets a
    /// chance to accumulate real signal.
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.9
        } else {
            self.success_count as f64 / total as f64
        }
    }
}

/// A versioned row destined for the OLAP store. The loader sets
/// `version` to wall-clock now; readers must dedup by max version per
/// `(shop_id, primary_key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactRow {
    pub shop_id: i64,
    pub primary_key: String,
    pub version: DateTime<Utc>,
    pub payload: Value,
}

/// An idempotently-upserted OLTP dimension row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionRow {
    pub shop_id: i64,
    pub external_id: String,
    pub payload: Value,
}

/// The closed taxonomy of semantic change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    BidChange,
    StatusChange,
    BudgetChange,
    ItemAdd,
    ItemRemove,
    ItemInactive,
    PriceChange,
    StockOut,
    StockReplenish,
    ContentTitleChanged,
    ContentDescChanged,
    ContentMainPhotoChanged,
    ContentPhotoOrderChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BidChange => "bid_change",
            EventKind::StatusChange => "status_change",
            EventKind::BudgetChange => "budget_change",
            EventKind::ItemAdd => "item_add",
            EventKind::ItemRemove => "item_remove",
            EventKind::ItemInactive => "item_inactive",
            EventKind::PriceChange => "price_change",
            EventKind::StockOut => "stock_out",
            EventKind::StockReplenish => "stock_replenish",
            EventKind::ContentTitleChanged => "content_title_changed",
            EventKind::ContentDescChanged => "content_desc_changed",
            EventKind::ContentMainPhotoChanged => "content_main_photo_changed",
            EventKind::ContentPhotoOrderChanged => "content_photo_order_changed",
        }
    }
}

/// An immutable append to the audit log. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub created_at: DateTime<Utc>,
    pub shop_id: i64,
    pub campaign_id: Option<String>,
    pub product_id: Option<String>,
    pub event_type: EventKind,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub metadata: Value,
}
