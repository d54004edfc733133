//! Closed set of error kinds for the ingestion fabric.
//!
//! Every component-level `Result` resolves to one of these. Binaries and
//! task handlers wrap them with `anyhow::Context` rather than inventing new
//! variants; callers that need to branch on kind match `IngestError`
//! directly before it is boxed into an `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Network-level failure eligible for retry (timeout, connection reset,
    /// 5xx). Retried per the marketplace client's backoff policy.
    #[error("transient network error calling {marketplace}: {source}")]
    TransientNetwork {
        marketplace: String,
        #[source]
        source: anyhow::Error,
    },

    /// Server-attributed rate limiting (HTTP 429). Distinct from the local
    /// sliding-window limiter's own throttling.
    #[error("rate limited by {marketplace} (retry after {retry_after_secs}s)")]
    RateLimited {
        marketplace: String,
        retry_after_secs: u64,
    },

    /// HTTP 401 from the marketplace. Reported to the circuit breaker; once
    /// the breaker trips this surfaces as `ShopDisabled` instead.
    #[error("authentication failed for shop {shop_id} against {marketplace}")]
    AuthFailure { shop_id: i64, marketplace: String },

    /// The circuit breaker is OPEN for this shop; no call was attempted.
    #[error("shop {shop_id} disabled by circuit breaker: {reason}")]
    ShopDisabled { shop_id: i64, reason: String },

    /// The proxy pool had no non-quarantined proxy to lease.
    #[error("no proxy available for shop {shop_id}")]
    ProxyExhausted { shop_id: i64 },

    /// Unexpected payload shape from a marketplace. Logged (full payload,
    /// gated behind `debug_payloads`) and the record is skipped; never
    /// aborts the surrounding batch.
    #[error("unexpected payload shape from {marketplace} at {endpoint}: {detail}")]
    DataFormat {
        marketplace: String,
        endpoint: String,
        detail: String,
    },

    /// One orchestrator step failed; the chain continues and the run ends
    /// `done_with_errors` rather than aborting.
    #[error("backfill step '{step}' failed for shop {shop_id}: {source}")]
    PartialBackfill {
        shop_id: i64,
        step: String,
        #[source]
        source: anyhow::Error,
    },

    /// Task exceeded its hard time limit or raised an unhandled error; the
    /// worker records it and continues with the next task.
    #[error("task '{task}' failed fatally for shop {shop_id:?}: {source}")]
    Fatal {
        task: String,
        shop_id: Option<i64>,
        #[source]
        source: anyhow::Error,
    },
}

impl IngestError {
    /// Whether the marketplace client should retry this outcome. Only
    /// network-level errors are retried locally; everything else is either
    /// already a terminal classification or handled by a different layer
    /// (breaker, orchestrator, dispatcher).
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::TransientNetwork { .. })
    }
}
