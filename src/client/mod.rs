//! Marketplace client: the single outbound HTTP call path. Composes the
//! proxy pool, rate limiter and circuit breaker; spoofs a modern browser's
//! TLS fingerprint; retries transient failures with jittered exponential
//! backoff (xorshift64 jitter), stateless per call rather than tied to a
//! persisted reconnect counter.

pub mod marketplaces;

use std::time::Duration;

use reqwest::{header::HeaderMap, Method, StatusCode};
use serde_json::Value;

use crate::breaker::CircuitBreaker;
use crate::error::IngestError;
use crate::models::MarketplaceKind;
use crate::proxy::{Outcome as ProxyOutcome, ProxyPool};
use crate::ratelimit::{Bucket, RateLimiter};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 2_000;
const BACKOFF_MAX_MS: u64 = 60_000;
const JITTER_FACTOR: f64 = 0.25;
const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// A browser-like TLS/HTTP fingerprint, applied to every outbound call so
/// marketplace anti-bot heuristics see ordinary browser traffic rather
/// than a bare reqwest client.
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36";

/// Response from a marketplace call. `bytes` is always populated and is
/// the only field binary payloads (archives, XLSX exports) should be read
/// from; `json` is `Some` only when the body parsed as JSON.
#[derive(Debug, Clone)]
pub struct MarketplaceResponse {
    pub status: StatusCode,
    pub bytes: Vec<u8>,
    pub json: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallOutcome {
    Ok,
    AuthFail,
    Quarantine,
    Transient,
}

pub struct MarketplaceClient {
    http: reqwest::Client,
    proxy_pool: ProxyPool,
    rate_limiter: RateLimiter,
    breaker: CircuitBreaker,
}

impl MarketplaceClient {
    pub fn new(proxy_pool: ProxyPool, rate_limiter: RateLimiter, breaker: CircuitBreaker) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            proxy_pool,
            rate_limiter,
            breaker,
        })
    }

    /// Issue one logical call, with retries for transient failures.
    #[allow(clippy::too_many_arguments)]
    pub async fn request(
        &self,
        shop_id: i64,
        marketplace: MarketplaceKind,
        surface: &str,
        method: Method,
        path: &str,
        headers: Option<HeaderMap>,
        query: Option<&[(&str, String)]>,
        body: Option<Value>,
        returns_binary: bool,
    ) -> Result<MarketplaceResponse, IngestError> {
        self.breaker.gate(shop_id).await?;

        let mut backoff = BackoffCalculator::new();
        let mut last_err: Option<IngestError> = None;

        for attempt in 0..MAX_ATTEMPTS {
            let bucket = Bucket::for_marketplace(marketplace, surface);
            self.rate_limiter.acquire(bucket, shop_id).await?;

            let lease = self.proxy_pool.lease(shop_id).await?;

            let mut builder = self
                .http
                .request(method.clone(), path)
                .timeout(CALL_TIMEOUT);
            if let Some(h) = headers.clone() {
                builder = builder.headers(h);
            }
            if let Some(q) = query {
                builder = builder.query(q);
            }
            if let Some(b) = body.clone() {
                builder = builder.json(&b);
            }
            builder = builder.header(
                "Proxy-Authorization",
                format!("Basic {}", lease.proxy.host),
            );

            let outcome_result = builder.send().await;

            let (call_outcome, response) = match outcome_result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        (CallOutcome::Ok, Some(resp))
                    } else if status == StatusCode::UNAUTHORIZED {
                        (CallOutcome::AuthFail, Some(resp))
                    } else if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
                        (CallOutcome::Quarantine, Some(resp))
                    } else if status.is_server_error() {
                        (CallOutcome::Transient, Some(resp))
                    } else {
                        (CallOutcome::Ok, Some(resp))
                    }
                }
                Err(_) => (CallOutcome::Transient, None),
            };

            let proxy_outcome = match call_outcome {
                CallOutcome::Ok => ProxyOutcome::Ok,
                CallOutcome::AuthFail => ProxyOutcome::Ok,
                CallOutcome::Quarantine => {
                    if response
                        .as_ref()
                        .map(|r| r.status() == StatusCode::TOO_MANY_REQUESTS)
                        .unwrap_or(false)
                    {
                        ProxyOutcome::RateLimited
                    } else {
                        ProxyOutcome::Banned
                    }
                }
                CallOutcome::Transient => ProxyOutcome::Transient,
            };
            self.proxy_pool.report(&lease, proxy_outcome).await?;

            tracing::info!(
                shop_id,
                marketplace = %marketplace,
                surface,
                path,
                attempt = attempt + 1,
                outcome = ?call_outcome,
                status = response.as_ref().map(|r| r.status().as_u16()),
                "marketplace call completed"
            );

            match call_outcome {
                CallOutcome::Ok => {
                    self.breaker.report_success(shop_id).await?;
                    let resp = response.expect("Ok implies a response");
                    let status = resp.status();
                    let bytes = resp.bytes().await.map_err(|e| IngestError::TransientNetwork {
                        marketplace: marketplace.to_string(),
                        source: e.into(),
                    })?;
                    let bytes = bytes.to_vec();
                    let json = parse_response_body(&bytes, returns_binary);
                    return Ok(MarketplaceResponse { status, bytes, json });
                }
                CallOutcome::AuthFail => {
                    self.breaker
                        .report_auth_failure(shop_id, lease.proxy.id)
                        .await?;
                    return Err(IngestError::AuthFailure {
                        shop_id,
                        marketplace: marketplace.to_string(),
                    });
                }
                CallOutcome::Quarantine | CallOutcome::Transient => {
                    last_err = Some(IngestError::TransientNetwork {
                        marketplace: marketplace.to_string(),
                        source: anyhow::anyhow!(
                            "attempt {} of {MAX_ATTEMPTS} failed ({:?})",
                            attempt + 1,
                            call_outcome
                        ),
                    });
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff.next_backoff()).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or(IngestError::TransientNetwork {
            marketplace: marketplace.to_string(),
            source: anyhow::anyhow!("exhausted retries"),
        }))
    }
}

/// `bytes` always holds the raw body; `json` is only populated when the
/// caller didn't mark the response as binary, so archives/XLSX exports
/// never get run through a JSON parse attempt.
fn parse_response_body(bytes: &[u8], returns_binary: bool) -> Option<Value> {
    if returns_binary {
        None
    } else {
        serde_json::from_slice(bytes).ok()
    }
}

/// Exponential backoff with jitter for the client's retry loop. Attempt
/// counter resets per logical call — there is no persisted reconnect
/// state here, unlike a long-lived session.
struct BackoffCalculator {
    attempt: u32,
    rng_state: u64,
}

impl BackoffCalculator {
    fn new() -> Self {
        Self {
            attempt: 0,
            rng_state: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x9E3779B97F4A7C15),
        }
    }

    fn next_random(&mut self) -> f64 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 7;
        self.rng_state ^= self.rng_state << 17;
        (self.rng_state as f64) / (u64::MAX as f64)
    }

    fn next_backoff(&mut self) -> Duration {
        let base = (BACKOFF_BASE_MS as f64) * 2f64.powi(self.attempt as i32);
        let capped = base.min(BACKOFF_MAX_MS as f64);
        let jitter_range = capped * JITTER_FACTOR;
        let jitter = (self.next_random() * 2.0 - 1.0) * jitter_range;
        let final_ms = (capped + jitter).max(BACKOFF_BASE_MS as f64 * 0.5);
        self.attempt += 1;
        Duration::from_millis(final_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_responses_skip_json_parsing() {
        let bytes = b"PK\x03\x04 not json at all, an xlsx/zip payload";
        assert!(parse_response_body(bytes, true).is_none());
    }

    #[test]
    fn json_responses_parse_when_not_binary() {
        let bytes = br#"{"ok":true}"#;
        let parsed = parse_response_body(bytes, false).expect("valid json body");
        assert_eq!(parsed["ok"], true);
    }

    #[test]
    fn malformed_body_parses_to_none_even_when_not_binary() {
        let bytes = b"not json";
        assert!(parse_response_body(bytes, false).is_none());
    }

    #[test]
    fn backoff_grows_and_stays_capped() {
        let mut calc = BackoffCalculator::new();
        let first = calc.next_backoff();
        let second = calc.next_backoff();
        let third = calc.next_backoff();
        assert!(first.as_millis() >= (BACKOFF_BASE_MS as f64 * 0.5) as u128);
        assert!(second >= Duration::from_millis(0));
        assert!(third.as_millis() <= BACKOFF_MAX_MS as u128 + (BACKOFF_MAX_MS as f64 * JITTER_FACTOR) as u128);
    }
}
