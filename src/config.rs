//! Process configuration, loaded once at startup.

use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Per-queue worker pool sizing.
#[derive(Debug, Clone)]
pub struct QueueConcurrency {
    pub fast: usize,
    pub sync: usize,
    pub backfill: usize,
}

impl Default for QueueConcurrency {
    fn default() -> Self {
        Self {
            fast: 4,
            sync: 8,
            backfill: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Process-wide secret the credential envelope's KDF derives keys from.
    /// Never logged.
    pub process_secret: String,
    pub redis_url: String,
    pub oltp_url: String,
    pub olap_url: String,
    pub queue_concurrency: QueueConcurrency,
    pub facade_port: u16,
    /// When set, `DataFormat` errors log the full offending payload.
    pub debug_payloads: bool,
    pub metrics_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let process_secret = std::env::var("MARKETLOOM_SECRET")
            .context("MARKETLOOM_SECRET is required (credential encryption key material)")?;
        if process_secret.len() < 16 {
            bail!("MARKETLOOM_SECRET must be at least 16 bytes");
        }

        let redis_url =
            std::env::var("REDIS_URL").context("REDIS_URL is required")?;
        let oltp_url = std::env::var("OLTP_URL").context("OLTP_URL is required")?;
        let olap_url = std::env::var("OLAP_URL").context("OLAP_URL is required")?;

        let facade_port = std::env::var("FACADE_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let metrics_port = std::env::var("METRICS_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(9090);

        let queue_concurrency = QueueConcurrency {
            fast: env_usize("QUEUE_CONCURRENCY_FAST", 4),
            sync: env_usize("QUEUE_CONCURRENCY_SYNC", 8),
            backfill: env_usize("QUEUE_CONCURRENCY_BACKFILL", 2),
        };

        let debug_payloads = std::env::var("DEBUG_PAYLOADS")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on"))
            .unwrap_or(false);

        Ok(Self {
            process_secret,
            redis_url,
            oltp_url,
            olap_url,
            queue_concurrency,
            facade_port,
            debug_payloads,
            metrics_port,
        })
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&v| v > 0)
        .unwrap_or(default)
}

/// Per-queue soft/hard time limits. Fixed by design, not
/// environment-tunable — changing them changes the scheduling contract.
pub fn queue_time_limits(queue: Queue) -> (Duration, Duration) {
    match queue {
        Queue::Fast => (Duration::from_secs(30), Duration::from_secs(60)),
        Queue::Sync => (Duration::from_secs(600), Duration::from_secs(1800)),
        Queue::Backfill => (Duration::from_secs(2 * 3600), Duration::from_secs(4 * 3600)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    Fast,
    Sync,
    Backfill,
}

impl Queue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Queue::Fast => "fast",
            Queue::Sync => "sync",
            Queue::Backfill => "backfill",
        }
    }
}

impl std::fmt::Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
