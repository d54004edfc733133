//! Typed Redis state store.
//!
//! One struct per key family, namespace discipline enforced by the key
//! builders rather than by convention. Readers tolerate missing keys
//! (treated as "first snapshot; no events" — see `events`); every setter
//! writes the full typed value and its TTL in one round trip.
//!
//! Grounded on the pack's Redis task-store backend
//! (`other_examples/783c7b0a_...store-redis.rs.rs`): a `MultiplexedConnection`
//! held behind a cheap `Clone`, cloned per call for concurrent use.

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

const PRICE_TTL_SECS: i64 = 7 * 24 * 3600;
const STOCK_TTL_SECS: i64 = 3 * 24 * 3600;
const CONTENT_TTL_SECS: i64 = 3 * 24 * 3600;
const ADS_TTL_SECS: i64 = 7 * 24 * 3600;
const PROGRESS_TTL_SECS: i64 = 24 * 3600;
const PERFORMANCE_TOKEN_DEFAULT_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct StateStore {
    conn: ConnectionManager,
}

/// Per-campaign ad state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignState {
    pub bid: f64,
    pub status: String,
    pub items: std::collections::BTreeSet<String>,
    pub budget: f64,
}

impl StateStore {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    fn to_backend_err(err: redis::RedisError, key: &str) -> IngestError {
        IngestError::TransientNetwork {
            marketplace: format!("redis:{key}"),
            source: err.into(),
        }
    }

    // ---- price ----

    pub async fn get_price(&self, shop_id: i64, nm: &str) -> Result<Option<f64>, IngestError> {
        let key = format!("state:price:{shop_id}:{nm}");
        let mut conn = self.conn.clone();
        let value: Option<f64> = conn
            .get(&key)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?;
        Ok(value)
    }

    pub async fn set_price(&self, shop_id: i64, nm: &str, price: f64) -> Result<(), IngestError> {
        let key = format!("state:price:{shop_id}:{nm}");
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(&key, price, PRICE_TTL_SECS as u64)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?;
        Ok(())
    }

    // ---- stock ----

    pub async fn get_stock(
        &self,
        shop_id: i64,
        nm: &str,
        warehouse: &str,
    ) -> Result<Option<i64>, IngestError> {
        let key = format!("state:stock:{shop_id}:{nm}:{warehouse}");
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn
            .get(&key)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?;
        Ok(value)
    }

    pub async fn set_stock(
        &self,
        shop_id: i64,
        nm: &str,
        warehouse: &str,
        stock: i64,
    ) -> Result<(), IngestError> {
        let key = format!("state:stock:{shop_id}:{nm}:{warehouse}");
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(&key, stock, STOCK_TTL_SECS as u64)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?;
        Ok(())
    }

    // ---- content fingerprint ----

    pub async fn get_content_hash(
        &self,
        shop_id: i64,
        nm: &str,
        field: &str,
    ) -> Result<Option<String>, IngestError> {
        let key = format!("state:content:{shop_id}:{nm}:{field}");
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?;
        Ok(value)
    }

    pub async fn set_content_hash(
        &self,
        shop_id: i64,
        nm: &str,
        field: &str,
        fingerprint: &str,
    ) -> Result<(), IngestError> {
        let key = format!("state:content:{shop_id}:{nm}:{field}");
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(&key, fingerprint, CONTENT_TTL_SECS as u64)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?;
        Ok(())
    }

    // ---- campaign (ads) state ----

    pub async fn get_campaign_state(
        &self,
        shop_id: i64,
        campaign_id: &str,
    ) -> Result<Option<CampaignState>, IngestError> {
        let key = format!("ads:state:{shop_id}:{campaign_id}");
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?;
        match raw {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
                IngestError::DataFormat {
                    marketplace: "redis".into(),
                    endpoint: key.clone(),
                    detail: e.to_string(),
                }
            }),
        }
    }

    pub async fn set_campaign_state(
        &self,
        shop_id: i64,
        campaign_id: &str,
        state: &CampaignState,
    ) -> Result<(), IngestError> {
        let key = format!("ads:state:{shop_id}:{campaign_id}");
        let raw = serde_json::to_string(state).expect("CampaignState is always serializable");
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(&key, raw, ADS_TTL_SECS as u64)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?;
        Ok(())
    }

    // ---- sticky proxy binding ----

    pub async fn get_proxy_binding(&self, shop_id: i64) -> Result<Option<i64>, IngestError> {
        let key = format!("proxy:bind:{shop_id}");
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn
            .get(&key)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?;
        Ok(value)
    }

    pub async fn set_proxy_binding(
        &self,
        shop_id: i64,
        proxy_id: i64,
        ttl_secs: u64,
    ) -> Result<(), IngestError> {
        let key = format!("proxy:bind:{shop_id}");
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(&key, proxy_id, ttl_secs)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?;
        Ok(())
    }

    pub async fn clear_proxy_binding(&self, shop_id: i64) -> Result<(), IngestError> {
        let key = format!("proxy:bind:{shop_id}");
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&key)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?;
        Ok(())
    }

    // ---- task dedup token ----

    /// `SET key 1 NX EX ttl`. Returns true if the lock was acquired.
    pub async fn acquire_task_lock(
        &self,
        task: &str,
        shop_id: i64,
        ttl_secs: u64,
    ) -> Result<bool, IngestError> {
        let key = format!("task-lock:{task}:{shop_id}");
        let mut conn = self.conn.clone();
        let acquired: bool = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?
            .is_some();
        Ok(acquired)
    }

    pub async fn release_task_lock(&self, task: &str, shop_id: i64) -> Result<(), IngestError> {
        let key = format!("task-lock:{task}:{shop_id}");
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&key)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?;
        Ok(())
    }

    // ---- orchestrator distributed lock ----

    pub async fn acquire_orchestrator_lock(
        &self,
        shop_id: i64,
        ttl_secs: u64,
    ) -> Result<bool, IngestError> {
        let key = format!("orchestrator:{shop_id}");
        let mut conn = self.conn.clone();
        let acquired: bool = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?
            .is_some();
        Ok(acquired)
    }

    pub async fn release_orchestrator_lock(&self, shop_id: i64) -> Result<(), IngestError> {
        let key = format!("orchestrator:{shop_id}");
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&key)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?;
        Ok(())
    }

    // ---- sync progress ----

    pub async fn get_progress(&self, shop_id: i64) -> Result<Option<ProgressRecord>, IngestError> {
        let key = format!("sync-progress:{shop_id}");
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?;
        match raw {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
                IngestError::DataFormat {
                    marketplace: "redis".into(),
                    endpoint: key.clone(),
                    detail: e.to_string(),
                }
            }),
        }
    }

    pub async fn set_progress(
        &self,
        shop_id: i64,
        record: &ProgressRecord,
    ) -> Result<(), IngestError> {
        let key = format!("sync-progress:{shop_id}");
        let raw = serde_json::to_string(record).expect("ProgressRecord is always serializable");
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(&key, raw, PROGRESS_TTL_SECS as u64)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?;
        Ok(())
    }

    // ---- Ozon performance OAuth2 token cache ----

    pub async fn get_performance_token(&self, shop_id: i64) -> Result<Option<String>, IngestError> {
        let key = format!("performance-token:{shop_id}");
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| Self::to_backend_err(e, &key))?;
        Ok(value)
    }

    pub async fn set_performance_token(
        &self,
        shop_id: i64,
        token: &str,
        ttl_secs: Option<u64>,
    ) -> Result<(), IngestError> {
        let key = format!("performance-token:{shop_id}");
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(
            &key,
            token,
            ttl_secs.unwrap_or(PERFORMANCE_TOKEN_DEFAULT_TTL_SECS as u64),
        )
        .await
        .map_err(|e| Self::to_backend_err(e, &key))?;
        Ok(())
    }
}

/// Per-shop progress blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub current_step: u32,
    pub total_steps: u32,
    pub step_name: String,
    pub sub_progress: Option<String>,
    pub percent: u32,
    pub status: ProgressStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Loading,
    Done,
    DoneWithErrors,
    Error,
    Skipped,
}

impl ProgressRecord {
    /// Percent for step `i` of `total`, capped at 99 until the run
    /// actually finishes.
    pub fn percent_for_step(i: u32, total: u32) -> u32 {
        if total == 0 {
            return 0;
        }
        let raw = ((i.saturating_sub(1)) as f64 / total as f64 * 100.0).floor() as u32;
        raw.min(99)
    }
}
