//! S3: circuit breaker trip and cooldown, against live Redis + Postgres.
//! Skipped unless explicitly opted into.
//!
//! Run with:
//!   REDIS_URL=redis://127.0.0.1 OLTP_URL=postgres://... \
//!     MARKETLOOM_INTEGRATION_TESTS=1 \
//!     cargo test --test integration_breaker -- --ignored

use marketloom::breaker::CircuitBreaker;

fn integration_tests_enabled() -> bool {
    std::env::var("MARKETLOOM_INTEGRATION_TESTS").as_deref() == Ok("1")
}

async fn breaker() -> CircuitBreaker {
    let redis_url = std::env::var("REDIS_URL").expect("REDIS_URL must be set for integration tests");
    let oltp_url = std::env::var("OLTP_URL").expect("OLTP_URL must be set for integration tests");
    let oltp = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&oltp_url)
        .await
        .expect("failed to connect to Postgres");
    CircuitBreaker::connect(&redis_url, oltp)
        .await
        .expect("failed to connect to Redis")
}

/// S3: 10 auth failures across 2+ distinct proxies trips the breaker;
/// while open, `gate` rejects every call.
#[tokio::test]
#[ignore]
async fn repeated_auth_failures_trip_the_breaker() {
    if !integration_tests_enabled() {
        eprintln!("skipping: set MARKETLOOM_INTEGRATION_TESTS=1 to run");
        return;
    }
    let breaker = breaker().await;
    let shop_id = 999_101;
    breaker.reset(shop_id).await.unwrap();

    for i in 0..10 {
        let proxy_id = (i % 3) as i64;
        breaker.report_auth_failure(shop_id, proxy_id).await.unwrap();
    }

    let gated = breaker.gate(shop_id).await;
    assert!(gated.is_err(), "an open breaker must reject the call");

    breaker.reset(shop_id).await.unwrap();
    assert!(breaker.gate(shop_id).await.is_ok(), "reset must close the breaker");
}

/// S3: a single misbehaving proxy alone never trips the breaker, since
/// the distinct-proxy threshold guards against one bad IP looking like a
/// systemic auth failure.
#[tokio::test]
#[ignore]
async fn single_proxy_failures_never_trip_the_breaker() {
    if !integration_tests_enabled() {
        eprintln!("skipping: set MARKETLOOM_INTEGRATION_TESTS=1 to run");
        return;
    }
    let breaker = breaker().await;
    let shop_id = 999_102;
    breaker.reset(shop_id).await.unwrap();

    for _ in 0..20 {
        breaker.report_auth_failure(shop_id, 1).await.unwrap();
    }

    assert!(breaker.gate(shop_id).await.is_ok(), "single-proxy failures must not trip the breaker");
    breaker.reset(shop_id).await.unwrap();
}

/// A success after some failures resets the streak without needing a
/// full trip/cooldown cycle.
#[tokio::test]
#[ignore]
async fn success_resets_the_failure_streak() {
    if !integration_tests_enabled() {
        eprintln!("skipping: set MARKETLOOM_INTEGRATION_TESTS=1 to run");
        return;
    }
    let breaker = breaker().await;
    let shop_id = 999_103;
    breaker.reset(shop_id).await.unwrap();

    for _ in 0..5 {
        breaker.report_auth_failure(shop_id, 1).await.unwrap();
    }
    breaker.report_success(shop_id).await.unwrap();

    for _ in 0..9 {
        breaker.report_auth_failure(shop_id, 2).await.unwrap();
    }
    assert!(
        breaker.gate(shop_id).await.is_ok(),
        "the reset streak plus 9 more failures must stay under threshold"
    );
    breaker.reset(shop_id).await.unwrap();
}
