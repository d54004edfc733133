use std::time::Duration;

use rand::Rng;
use sqlx::PgPool;

use crate::error::IngestError;
use crate::models::{ProxyRecord, ProxyStatus};
use crate::state::StateStore;

const BANNED_QUARANTINE_SECS: u64 = 30 * 60;
const RATE_LIMITED_QUARANTINE_SECS: u64 = 15 * 60;
const SERVER_ERROR_QUARANTINE_SECS: u64 = 5 * 60;

/// Outcome of a single proxied call, as reported back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Transient,
    /// HTTP 403.
    Banned,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    ServerError,
}

impl Outcome {
    fn quarantine_secs(&self) -> Option<u64> {
        match self {
            Outcome::Ok | Outcome::Transient => None,
            Outcome::Banned => Some(BANNED_QUARANTINE_SECS),
            Outcome::RateLimited => Some(RATE_LIMITED_QUARANTINE_SECS),
            Outcome::ServerError => Some(SERVER_ERROR_QUARANTINE_SECS),
        }
    }
}

/// A leased proxy, bound to the shop that requested it until dropped or
/// reported.
#[derive(Debug, Clone)]
pub struct ProxyLease {
    pub proxy: ProxyRecord,
    pub shop_id: i64,
}

#[derive(Debug, Clone)]
pub struct ProxyPool {
    oltp: PgPool,
    state: StateStore,
}

impl ProxyPool {
    pub fn new(oltp: PgPool, state: StateStore) -> Self {
        Self { oltp, state }
    }

    /// Lease a proxy for `shop_id`, preferring the previously bound proxy
    /// if it is still active. Falls back to weighted-random selection by
    /// success rate among active, non-quarantined proxies.
    pub async fn lease(&self, shop_id: i64) -> Result<ProxyLease, IngestError> {
        let candidates = self.active_proxies().await?;
        if candidates.is_empty() {
            return Err(IngestError::ProxyExhausted { shop_id });
        }

        if let Some(bound_id) = self.state.get_proxy_binding(shop_id).await? {
            if let Some(proxy) = candidates.iter().find(|p| p.id == bound_id) {
                return Ok(ProxyLease {
                    proxy: proxy.clone(),
                    shop_id,
                });
            }
        }

        let chosen = weighted_pick(&candidates);
        self.state
            .set_proxy_binding(shop_id, chosen.id, RATE_LIMITED_QUARANTINE_SECS)
            .await?;
        Ok(ProxyLease {
            proxy: chosen.clone(),
            shop_id,
        })
    }

    /// Report the outcome of a call made through `lease`. Applies
    /// quarantine, clears the sticky binding on quarantine, and increments
    /// the proxy's success/failure counters in OLTP.
    pub async fn report(&self, lease: &ProxyLease, outcome: Outcome) -> Result<(), IngestError> {
        let counter_column = match outcome {
            Outcome::Ok => "success_count",
            _ => "failure_count",
        };

        sqlx::query(&format!(
            "UPDATE proxies SET {counter_column} = {counter_column} + 1 WHERE id = $1"
        ))
        .bind(lease.proxy.id)
        .execute(&self.oltp)
        .await
        .map_err(|e| IngestError::TransientNetwork {
            marketplace: "oltp:proxies".into(),
            source: e.into(),
        })?;

        if let Some(quarantine_secs) = outcome.quarantine_secs() {
            sqlx::query(
                "UPDATE proxies SET status = 'inactive', \
                 quarantined_until = now() + make_interval(secs => $2) WHERE id = $1",
            )
            .bind(lease.proxy.id)
            .bind(quarantine_secs as f64)
            .execute(&self.oltp)
            .await
            .map_err(|e| IngestError::TransientNetwork {
                marketplace: "oltp:proxies".into(),
                source: e.into(),
            })?;
            self.state.clear_proxy_binding(lease.shop_id).await?;
            tracing::warn!(
                proxy_id = lease.proxy.id,
                shop_id = lease.shop_id,
                quarantine_secs,
                ?outcome,
                "proxy quarantined"
            );
        }

        Ok(())
    }

    async fn active_proxies(&self) -> Result<Vec<ProxyRecord>, IngestError> {
        self.reactivate_expired().await?;

        let rows = sqlx::query_as::<_, ProxyRow>(
            "SELECT id, host, port, protocol, class, encrypted_password, \
             success_count, failure_count, status FROM proxies WHERE status = 'active'",
        )
        .fetch_all(&self.oltp)
        .await
        .map_err(|e| IngestError::TransientNetwork {
            marketplace: "oltp:proxies".into(),
            source: e.into(),
        })?;
        Ok(rows.into_iter().map(ProxyRow::into_record).collect())
    }

    /// Lazy TTL sweep: un-quarantine any proxy whose `quarantined_until`
    /// has passed. Runs on every lease rather than on a timer, so a pool
    /// that never leases never bothers Postgres, and one that leases
    /// constantly never serves a stale quarantine.
    async fn reactivate_expired(&self) -> Result<(), IngestError> {
        sqlx::query(
            "UPDATE proxies SET status = 'active', quarantined_until = NULL \
             WHERE status = 'inactive' AND quarantined_until <= now()",
        )
        .execute(&self.oltp)
        .await
        .map_err(|e| IngestError::TransientNetwork {
            marketplace: "oltp:proxies".into(),
            source: e.into(),
        })?;
        Ok(())
    }
}

/// Weighted random pick by `success_rate`. Falls back to uniform choice if
/// every candidate has a zero weight (shouldn't happen given the
/// optimistic prior in `ProxyRecord::success_rate`).
fn weighted_pick(candidates: &[ProxyRecord]) -> &ProxyRecord {
    let total: f64 = candidates.iter().map(ProxyRecord::success_rate).sum();
    if total <= 0.0 {
        return &candidates[0];
    }
    let mut roll = rand::thread_rng().gen_range(0.0..total);
    for proxy in candidates {
        roll -= proxy.success_rate();
        if roll <= 0.0 {
            return proxy;
        }
    }
    candidates.last().expect("candidates is non-empty")
}

#[derive(sqlx::FromRow)]
struct ProxyRow {
    id: i64,
    host: String,
    port: i32,
    protocol: String,
    class: String,
    encrypted_password: Vec<u8>,
    success_count: i64,
    failure_count: i64,
    status: String,
}

impl ProxyRow {
    fn into_record(self) -> ProxyRecord {
        ProxyRecord {
            id: self.id,
            host: self.host,
            port: self.port as u16,
            protocol: self.protocol,
            class: match self.class.as_str() {
                "residential" => crate::models::ProxyClass::Residential,
                "mobile" => crate::models::ProxyClass::Mobile,
                _ => crate::models::ProxyClass::Datacenter,
            },
            encrypted_password: self.encrypted_password,
            success_count: self.success_count as u64,
            failure_count: self.failure_count as u64,
            status: match self.status.as_str() {
                "banned" => ProxyStatus::Banned,
                "testing" => ProxyStatus::Testing,
                "inactive" => ProxyStatus::Inactive,
                _ => ProxyStatus::Active,
            },
        }
    }
}

/// Quarantine horizon used as the sticky binding's TTL, per outcome kind.
pub fn quarantine_duration(outcome: Outcome) -> Option<Duration> {
    outcome.quarantine_secs().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyClass;

    fn proxy(id: i64, success: u64, failure: u64) -> ProxyRecord {
        ProxyRecord {
            id,
            host: "10.0.0.1".into(),
            port: 8080,
            protocol: "http".into(),
            class: ProxyClass::Datacenter,
            encrypted_password: vec![],
            success_count: success,
            failure_count: failure,
            status: ProxyStatus::Active,
        }
    }

    #[test]
    fn weighted_pick_favors_higher_success_rate() {
        let bad = proxy(1, 1, 99);
        let good = proxy(2, 99, 1);
        let candidates = vec![bad, good];

        let mut good_wins = 0;
        for _ in 0..200 {
            if weighted_pick(&candidates).id == 2 {
                good_wins += 1;
            }
        }
        assert!(good_wins > 150, "expected good proxy to dominate, got {good_wins}/200");
    }

    #[test]
    fn quarantine_durations_match_outcome() {
        assert_eq!(
            quarantine_duration(Outcome::Banned),
            Some(Duration::from_secs(30 * 60))
        );
        assert_eq!(
            quarantine_duration(Outcome::ServerError),
            Some(Duration::from_secs(5 * 60))
        );
        assert_eq!(quarantine_duration(Outcome::Ok), None);
    }
}
