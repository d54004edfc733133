//! Sliding-window rate limiter.
//!
//! One Redis sorted set per (marketplace, shop, bucket). `acquire()` trims
//! entries older than the window, counts what's left, and either records
//! the current call or sleeps until the oldest in-window entry expires.
//! Coordinated across workers since the set lives in Redis, not memory.

use std::time::Duration;

use rand::Rng;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::IngestError;
use crate::models::MarketplaceKind;

/// A limiter configuration: no more than `max_requests` calls in any
/// rolling `window` of time.
#[derive(Debug, Clone, Copy)]
pub struct LimiterConfig {
    pub window: Duration,
    pub max_requests: u32,
}

/// Named rate-limit buckets. A marketplace may expose more than one API
/// surface, each with its own window — buckets must never share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    WildberriesStatistics,
    WildberriesAnalytics,
    OzonSeller,
    OzonPerformance,
}

impl Bucket {
    pub fn config(&self) -> LimiterConfig {
        match self {
            Bucket::WildberriesStatistics => LimiterConfig {
                window: Duration::from_secs(63),
                max_requests: 1,
            },
            Bucket::WildberriesAnalytics => LimiterConfig {
                window: Duration::from_secs(21),
                max_requests: 1,
            },
            Bucket::OzonSeller => LimiterConfig {
                window: Duration::from_secs(1),
                max_requests: 10,
            },
            // Ozon's performance (ads) API has no single published cap;
            // this conservative default throttles to one call/second.
            Bucket::OzonPerformance => LimiterConfig {
                window: Duration::from_secs(1),
                max_requests: 1,
            },
        }
    }

    pub fn for_marketplace(marketplace: MarketplaceKind, surface: &str) -> Self {
        match (marketplace, surface) {
            (MarketplaceKind::Wildberries, "analytics") => Bucket::WildberriesAnalytics,
            (MarketplaceKind::Wildberries, _) => Bucket::WildberriesStatistics,
            (MarketplaceKind::Ozon, "performance") => Bucket::OzonPerformance,
            (MarketplaceKind::Ozon, _) => Bucket::OzonSeller,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Bucket::WildberriesStatistics => "wb_statistics",
            Bucket::WildberriesAnalytics => "wb_analytics",
            Bucket::OzonSeller => "ozon_seller",
            Bucket::OzonPerformance => "ozon_performance",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    conn: ConnectionManager,
}

impl RateLimiter {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Block until a slot is free in `bucket`'s window for `shop_id`, then
    /// record this call. Idempotent under cancellation: if the caller is
    /// dropped before this returns, no timestamp was recorded.
    pub async fn acquire(&self, bucket: Bucket, shop_id: i64) -> Result<(), IngestError> {
        let config = bucket.config();
        let key = format!("ratelimit:{}:{}", bucket.as_str(), shop_id);
        let mut retries_with_backoff = 0u32;

        loop {
            let now_ms = now_millis();
            let window_start = now_ms.saturating_sub(config.window.as_millis() as i64);

            let mut conn = self.conn.clone();
            let _: () = conn
                .zrembyscore(&key, 0, window_start)
                .await
                .map_err(|e| Self::to_err(e, &key))?;
            let count: u32 = conn
                .zcard(&key)
                .await
                .map_err(|e| Self::to_err(e, &key))?;

            if count < config.max_requests {
                let member = format!("{now_ms}-{}", uuid::Uuid::new_v4());
                conn.zadd::<_, _, _, ()>(&key, member, now_ms)
                    .await
                    .map_err(|e| Self::to_err(e, &key))?;
                let ttl_secs = config.window.as_secs().max(1) as i64;
                conn.expire::<_, ()>(&key, ttl_secs)
                    .await
                    .map_err(|e| Self::to_err(e, &key))?;
                return Ok(());
            }

            let oldest: Vec<(String, i64)> = conn
                .zrange_withscores(&key, 0, 0)
                .await
                .map_err(|e| Self::to_err(e, &key))?;
            let wait_ms = oldest
                .first()
                .map(|(_, score)| (*score + config.window.as_millis() as i64 - now_ms).max(0))
                .unwrap_or(config.window.as_millis() as i64);

            let jitter_ms = if retries_with_backoff > 0 {
                rand::thread_rng().gen_range(10_000..30_000)
            } else {
                0
            };
            retries_with_backoff += 1;

            tokio::time::sleep(Duration::from_millis(wait_ms as u64 + jitter_ms)).await;
        }
    }

    fn to_err(err: redis::RedisError, key: &str) -> IngestError {
        IngestError::TransientNetwork {
            marketplace: format!("redis:{key}"),
            source: err.into(),
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_resolution_is_namespaced_by_surface() {
        assert_eq!(
            Bucket::for_marketplace(MarketplaceKind::Wildberries, "analytics"),
            Bucket::WildberriesAnalytics
        );
        assert_eq!(
            Bucket::for_marketplace(MarketplaceKind::Wildberries, "statistics"),
            Bucket::WildberriesStatistics
        );
        assert_eq!(
            Bucket::for_marketplace(MarketplaceKind::Ozon, "performance"),
            Bucket::OzonPerformance
        );
        assert_eq!(
            Bucket::for_marketplace(MarketplaceKind::Ozon, "seller"),
            Bucket::OzonSeller
        );
    }

    #[test]
    fn configs_match_documented_defaults() {
        assert_eq!(Bucket::WildberriesStatistics.config().max_requests, 1);
        assert_eq!(
            Bucket::WildberriesStatistics.config().window,
            Duration::from_secs(63)
        );
        assert_eq!(Bucket::OzonSeller.config().max_requests, 10);
        assert_eq!(Bucket::OzonSeller.config().window, Duration::from_secs(1));
    }
}
