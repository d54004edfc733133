//! Idempotent DDL, applied on every startup. Grounded on the pack's
//! ClickHouse wide-events schema: `MergeTree`, `PARTITION BY toDate(...)`,
//! explicit TTL, `IF NOT EXISTS` everywhere.

/// OLAP (ClickHouse) schema. Fact tables keep every version and rely on
/// readers to dedup via `argMax`/`FINAL`; log tables are append-only with
/// a 6-month TTL.
pub const OLAP_MIGRATIONS: &[&str] = &[
    "CREATE DATABASE IF NOT EXISTS marketloom",
    r"CREATE TABLE IF NOT EXISTS marketloom.price_facts
(
    shop_id     Int64,
    nm          String,
    price       Float64,
    version     DateTime64(3, 'UTC')
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(version)
ORDER BY (shop_id, nm, version)
SETTINGS index_granularity = 8192",
    r"CREATE TABLE IF NOT EXISTS marketloom.stock_facts
(
    shop_id     Int64,
    nm          String,
    warehouse   String,
    quantity    Int64,
    version     DateTime64(3, 'UTC')
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(version)
ORDER BY (shop_id, nm, warehouse, version)
SETTINGS index_granularity = 8192",
    r"CREATE VIEW IF NOT EXISTS marketloom.price_facts_current AS
SELECT shop_id, nm, argMax(price, version) AS price, max(version) AS version
FROM marketloom.price_facts
GROUP BY shop_id, nm",
    r"CREATE TABLE IF NOT EXISTS marketloom.ad_snapshots_log
(
    shop_id       Int64,
    campaign_id   String,
    snapshot_date Date,
    payload       String,
    recorded_at   DateTime64(3, 'UTC')
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(snapshot_date)
ORDER BY (shop_id, campaign_id, snapshot_date)
TTL recorded_at + INTERVAL 6 MONTH DELETE
SETTINGS index_granularity = 8192",
    r"CREATE TABLE IF NOT EXISTS marketloom.bid_history_log
(
    shop_id      Int64,
    campaign_id  String,
    bid          Float64,
    recorded_at  DateTime64(3, 'UTC')
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(recorded_at)
ORDER BY (shop_id, campaign_id, recorded_at)
TTL recorded_at + INTERVAL 6 MONTH DELETE
SETTINGS index_granularity = 8192",
];

/// OLTP (Postgres) schema. Dimension/event tables; idempotent via
/// `CREATE TABLE IF NOT EXISTS` and explicit `ON CONFLICT` at write time.
pub const OLTP_MIGRATIONS: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS shops (
        id BIGSERIAL PRIMARY KEY,
        owner_id BIGINT NOT NULL,
        marketplace TEXT NOT NULL,
        encrypted_secret BYTEA NOT NULL,
        ozon_client_id TEXT,
        ozon_performance_client_id TEXT,
        ozon_performance_encrypted_secret BYTEA,
        status TEXT NOT NULL DEFAULT 'syncing',
        status_message TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    r"CREATE TABLE IF NOT EXISTS proxies (
        id BIGSERIAL PRIMARY KEY,
        host TEXT NOT NULL,
        port INT NOT NULL,
        protocol TEXT NOT NULL,
        class TEXT NOT NULL,
        encrypted_password BYTEA NOT NULL,
        success_count BIGINT NOT NULL DEFAULT 0,
        failure_count BIGINT NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'active',
        quarantined_until TIMESTAMPTZ
    )",
    r"CREATE TABLE IF NOT EXISTS products (
        shop_id BIGINT NOT NULL REFERENCES shops(id),
        external_id TEXT NOT NULL,
        payload JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (shop_id, external_id)
    )",
    r"CREATE TABLE IF NOT EXISTS campaigns (
        shop_id BIGINT NOT NULL REFERENCES shops(id),
        external_id TEXT NOT NULL,
        payload JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (shop_id, external_id)
    )",
    r"CREATE TABLE IF NOT EXISTS orders (
        shop_id BIGINT NOT NULL REFERENCES shops(id),
        external_id TEXT NOT NULL,
        payload JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (shop_id, external_id)
    )",
    r"CREATE TABLE IF NOT EXISTS finance_transactions (
        shop_id BIGINT NOT NULL REFERENCES shops(id),
        external_id TEXT NOT NULL,
        payload JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (shop_id, external_id)
    )",
    r"CREATE TABLE IF NOT EXISTS funnel_snapshots (
        shop_id BIGINT NOT NULL REFERENCES shops(id),
        external_id TEXT NOT NULL,
        payload JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (shop_id, external_id)
    )",
    r"CREATE TABLE IF NOT EXISTS returns (
        shop_id BIGINT NOT NULL REFERENCES shops(id),
        external_id TEXT NOT NULL,
        payload JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (shop_id, external_id)
    )",
    r"CREATE TABLE IF NOT EXISTS commercial_data (
        shop_id BIGINT NOT NULL REFERENCES shops(id),
        external_id TEXT NOT NULL,
        payload JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (shop_id, external_id)
    )",
    r"CREATE TABLE IF NOT EXISTS warehouses (
        shop_id BIGINT NOT NULL REFERENCES shops(id),
        external_id TEXT NOT NULL,
        payload JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (shop_id, external_id)
    )",
    r"CREATE TABLE IF NOT EXISTS warehouse_stocks (
        shop_id BIGINT NOT NULL REFERENCES shops(id),
        external_id TEXT NOT NULL,
        payload JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (shop_id, external_id)
    )",
    r"CREATE TABLE IF NOT EXISTS prices (
        shop_id BIGINT NOT NULL REFERENCES shops(id),
        external_id TEXT NOT NULL,
        payload JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (shop_id, external_id)
    )",
    r"CREATE TABLE IF NOT EXISTS content_ratings (
        shop_id BIGINT NOT NULL REFERENCES shops(id),
        external_id TEXT NOT NULL,
        payload JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (shop_id, external_id)
    )",
    r"CREATE TABLE IF NOT EXISTS seller_ratings (
        shop_id BIGINT NOT NULL PRIMARY KEY REFERENCES shops(id),
        payload JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    r"CREATE TABLE IF NOT EXISTS events (
        id BIGSERIAL PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL,
        shop_id BIGINT NOT NULL REFERENCES shops(id),
        campaign_id TEXT,
        product_id TEXT,
        event_type TEXT NOT NULL,
        old_value TEXT,
        new_value TEXT,
        metadata JSONB NOT NULL DEFAULT '{}'::jsonb
    )",
    "CREATE INDEX IF NOT EXISTS events_shop_id_created_at_idx ON events (shop_id, created_at DESC)",
];

pub async fn run_olap(client: &clickhouse::Client) -> anyhow::Result<()> {
    for statement in OLAP_MIGRATIONS {
        client.query(statement).execute().await?;
    }
    Ok(())
}

pub async fn run_oltp(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    for statement in OLTP_MIGRATIONS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
