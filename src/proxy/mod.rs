//! Proxy pool.
//!
//! Sticky-binds a shop to one proxy across a short window, falls back to
//! weighted-random selection on success rate, and quarantines proxies that
//! report bad outcomes. Counters live in OLTP (shared across workers);
//! the sticky binding and quarantine horizon live in Redis.

mod pool;

pub use pool::{Outcome, ProxyLease, ProxyPool};
