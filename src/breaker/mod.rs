//! Per-shop circuit breaker.
//!
//! Tracks consecutive auth failures across distinct proxies in Redis,
//! trips to `OPEN` and mirrors the transition into OLTP `shops.status` so
//! the façade and dispatcher see it without touching Redis themselves.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::IngestError;

const AUTH_FAILURE_THRESHOLD: u32 = 10;
const DISTINCT_PROXY_THRESHOLD: usize = 2;
const COOLDOWN: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BreakerRecord {
    state: BreakerState,
    failure_count: u32,
    failed_proxy_ids: BTreeSet<i64>,
    opened_at: Option<DateTime<Utc>>,
}

impl Default for BreakerRecord {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            failed_proxy_ids: BTreeSet::new(),
            opened_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateDecision {
    Allow,
    AllowAsProbe,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureOutcome {
    Recorded,
    TrippedFromProbe,
    TrippedFromThreshold,
}

impl BreakerRecord {
    /// Pure state transition for `gate()`. `OPEN` half-opens once the
    /// cooldown has elapsed from `now`, admitting exactly the probe call.
    fn apply_gate(&mut self, now: DateTime<Utc>) -> GateDecision {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => GateDecision::Allow,
            BreakerState::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                if now - opened_at >= chrono::Duration::from_std(COOLDOWN).unwrap() {
                    self.state = BreakerState::HalfOpen;
                    GateDecision::AllowAsProbe
                } else {
                    GateDecision::Deny
                }
            }
        }
    }

    /// Pure state transition for `report_auth_failure()`. A failed probe
    /// in `HALF_OPEN` reopens immediately, bypassing the threshold count.
    fn apply_auth_failure(&mut self, proxy_id: i64, now: DateTime<Utc>) -> FailureOutcome {
        if self.state == BreakerState::HalfOpen {
            self.state = BreakerState::Open;
            self.opened_at = Some(now);
            return FailureOutcome::TrippedFromProbe;
        }

        self.failure_count += 1;
        self.failed_proxy_ids.insert(proxy_id);

        if self.failure_count >= AUTH_FAILURE_THRESHOLD
            && self.failed_proxy_ids.len() >= DISTINCT_PROXY_THRESHOLD
        {
            self.state = BreakerState::Open;
            self.opened_at = Some(now);
            FailureOutcome::TrippedFromThreshold
        } else {
            FailureOutcome::Recorded
        }
    }

    /// Pure state transition for `report_success()`. Returns whether the
    /// breaker closed from `HALF_OPEN` as a result.
    fn apply_success(&mut self) -> bool {
        let closed_from_probe = self.state == BreakerState::HalfOpen;
        if closed_from_probe {
            self.state = BreakerState::Closed;
        }
        self.failure_count = 0;
        self.failed_proxy_ids.clear();
        self.opened_at = None;
        closed_from_probe
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    conn: ConnectionManager,
    oltp: PgPool,
}

impl CircuitBreaker {
    pub async fn connect(redis_url: &str, oltp: PgPool) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, oltp })
    }

    /// Gate a call: returns `Err(ShopDisabled)` if the breaker is `OPEN`
    /// and the cooldown hasn't elapsed. Transitions `OPEN -> HALF_OPEN`
    /// in-place once the cooldown has elapsed, permitting exactly the
    /// caller's probe through.
    pub async fn gate(&self, shop_id: i64) -> Result<(), IngestError> {
        let mut record = self.load(shop_id).await?;
        match record.apply_gate(Utc::now()) {
            GateDecision::Allow => Ok(()),
            GateDecision::AllowAsProbe => {
                self.save(shop_id, &record).await?;
                Ok(())
            }
            GateDecision::Deny => Err(IngestError::ShopDisabled {
                shop_id,
                reason: "circuit breaker open (auth failures)".into(),
            }),
        }
    }

    /// Report an authentication failure (HTTP 401) from `proxy_id`.
    pub async fn report_auth_failure(&self, shop_id: i64, proxy_id: i64) -> Result<(), IngestError> {
        let mut record = self.load(shop_id).await?;
        let outcome = record.apply_auth_failure(proxy_id, Utc::now());
        self.save(shop_id, &record).await?;

        match outcome {
            FailureOutcome::TrippedFromThreshold => {
                self.set_shop_status(
                    shop_id,
                    "auth_error",
                    "circuit breaker tripped: repeated authentication failures",
                )
                .await?;
                tracing::warn!(shop_id, "circuit breaker tripped to open");
            }
            FailureOutcome::TrippedFromProbe => {
                tracing::warn!(shop_id, "circuit breaker probe failed, reopening");
            }
            FailureOutcome::Recorded => {}
        }
        Ok(())
    }

    /// Report a successful call. In `HALF_OPEN`, closes the breaker; in
    /// `CLOSED`, resets the failure streak.
    pub async fn report_success(&self, shop_id: i64) -> Result<(), IngestError> {
        let mut record = self.load(shop_id).await?;
        record.apply_success();
        self.save(shop_id, &record).await
    }

    /// Force the breaker to `CLOSED`.
    pub async fn reset(&self, shop_id: i64) -> Result<(), IngestError> {
        self.save(shop_id, &BreakerRecord::default()).await?;
        self.set_shop_status(shop_id, "active", "credentials updated")
            .await?;
        Ok(())
    }

    async fn load(&self, shop_id: i64) -> Result<BreakerRecord, IngestError> {
        let key = format!("breaker:{shop_id}");
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&key).await.map_err(|e| Self::to_err(e, &key))?;
        match raw {
            None => Ok(BreakerRecord::default()),
            Some(raw) => serde_json::from_str(&raw).map_err(|e| IngestError::DataFormat {
                marketplace: "redis".into(),
                endpoint: key,
                detail: e.to_string(),
            }),
        }
    }

    async fn save(&self, shop_id: i64, record: &BreakerRecord) -> Result<(), IngestError> {
        let key = format!("breaker:{shop_id}");
        let raw = serde_json::to_string(record).expect("BreakerRecord is always serializable");
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&key, raw)
            .await
            .map_err(|e| Self::to_err(e, &key))
    }

    async fn set_shop_status(
        &self,
        shop_id: i64,
        status: &str,
        message: &str,
    ) -> Result<(), IngestError> {
        sqlx::query("UPDATE shops SET status = $1, status_message = $2 WHERE id = $3")
            .bind(status)
            .bind(message)
            .bind(shop_id)
            .execute(&self.oltp)
            .await
            .map_err(|e| IngestError::TransientNetwork {
                marketplace: "oltp:shops".into(),
                source: e.into(),
            })?;
        Ok(())
    }

    fn to_err(err: redis::RedisError, key: &str) -> IngestError {
        IngestError::TransientNetwork {
            marketplace: format!("redis:{key}"),
            source: err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_record_is_closed() {
        let record = BreakerRecord::default();
        assert_eq!(record.state, BreakerState::Closed);
        assert_eq!(record.failure_count, 0);
    }

    #[test]
    fn threshold_requires_both_count_and_distinct_proxies() {
        let mut record = BreakerRecord::default();
        record.failure_count = AUTH_FAILURE_THRESHOLD;
        record.failed_proxy_ids.insert(1);
        assert!(record.failed_proxy_ids.len() < DISTINCT_PROXY_THRESHOLD);
    }

    #[test]
    fn closed_breaker_gates_every_call_through() {
        let mut record = BreakerRecord::default();
        assert_eq!(record.apply_gate(Utc::now()), GateDecision::Allow);
    }

    #[test]
    fn open_breaker_denies_until_cooldown_elapses() {
        let mut record = BreakerRecord {
            state: BreakerState::Open,
            opened_at: Some(Utc::now()),
            ..BreakerRecord::default()
        };
        assert_eq!(record.apply_gate(Utc::now()), GateDecision::Deny);

        let after_cooldown = Utc::now() + chrono::Duration::from_std(COOLDOWN).unwrap() + chrono::Duration::seconds(1);
        assert_eq!(record.apply_gate(after_cooldown), GateDecision::AllowAsProbe);
        assert_eq!(record.state, BreakerState::HalfOpen);
    }

    #[test]
    fn failures_below_threshold_are_only_recorded() {
        let mut record = BreakerRecord::default();
        for proxy_id in 0..AUTH_FAILURE_THRESHOLD - 1 {
            let outcome = record.apply_auth_failure(proxy_id as i64, Utc::now());
            assert_eq!(outcome, FailureOutcome::Recorded);
        }
        assert_eq!(record.state, BreakerState::Closed);
    }

    #[test]
    fn threshold_and_distinct_proxies_trips_the_breaker() {
        let mut record = BreakerRecord::default();
        for proxy_id in 0..AUTH_FAILURE_THRESHOLD {
            record.apply_auth_failure(proxy_id as i64, Utc::now());
        }
        assert_eq!(record.state, BreakerState::Open);
        assert!(record.opened_at.is_some());
    }

    #[test]
    fn threshold_met_but_single_proxy_never_trips() {
        let mut record = BreakerRecord::default();
        for _ in 0..AUTH_FAILURE_THRESHOLD + 5 {
            record.apply_auth_failure(1, Utc::now());
        }
        assert_eq!(record.state, BreakerState::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens_immediately() {
        let mut record = BreakerRecord {
            state: BreakerState::HalfOpen,
            ..BreakerRecord::default()
        };
        let outcome = record.apply_auth_failure(1, Utc::now());
        assert_eq!(outcome, FailureOutcome::TrippedFromProbe);
        assert_eq!(record.state, BreakerState::Open);
    }

    #[test]
    fn success_in_half_open_closes_the_breaker() {
        let mut record = BreakerRecord {
            state: BreakerState::HalfOpen,
            failure_count: 3,
            ..BreakerRecord::default()
        };
        record.failed_proxy_ids.insert(1);
        let closed = record.apply_success();
        assert!(closed);
        assert_eq!(record.state, BreakerState::Closed);
        assert_eq!(record.failure_count, 0);
        assert!(record.failed_proxy_ids.is_empty());
    }

    #[test]
    fn success_in_closed_state_just_resets_the_streak() {
        let mut record = BreakerRecord {
            failure_count: 4,
            ..BreakerRecord::default()
        };
        let closed = record.apply_success();
        assert!(!closed);
        assert_eq!(record.state, BreakerState::Closed);
        assert_eq!(record.failure_count, 0);
    }
}
