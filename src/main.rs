//! `marketloomd`: the MarketLoom ingestion daemon. Wires together Redis
//! (state, rate limiting, circuit breaking), Postgres (OLTP), ClickHouse
//! (OLAP), the marketplace HTTP client, the task runtime's beat scheduler,
//! and the REST façade, then serves until told to stop.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;

use marketloom::breaker::CircuitBreaker;
use marketloom::client::MarketplaceClient;
use marketloom::config::Config;
use marketloom::credentials::CredentialStore;
use marketloom::dispatcher::Dispatcher;
use marketloom::facade::{self, FacadeState};
use marketloom::loaders::migrations;
use marketloom::loaders::{OlapLoader, OltpLoader};
use marketloom::orchestrator::{Orchestrator, StepDeps};
use marketloom::proxy::ProxyPool;
use marketloom::ratelimit::RateLimiter;
use marketloom::runtime::beat::BeatScheduler;
use marketloom::runtime::tasks::TaskDeps;
use marketloom::runtime::TaskRuntime;
use marketloom::state::StateStore;
use marketloom::telemetry;

#[derive(Parser)]
#[command(name = "marketloomd", about = "MarketLoom ingestion daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the façade, beat scheduler, and task runtime (default).
    Serve,
    /// Apply OLAP/OLTP DDL and exit.
    Migrate,
    /// Trigger one shop's backfill chain from the command line and wait
    /// for it to finish.
    Backfill {
        #[arg(long)]
        shop: i64,
    },
}

struct Wiring {
    oltp: sqlx::PgPool,
    state: StateStore,
    client: Arc<MarketplaceClient>,
    credentials: Arc<CredentialStore>,
    oltp_loader: Arc<OltpLoader>,
    olap_loader: Arc<OlapLoader>,
}

async fn wire(config: &Config) -> Result<Wiring> {
    let oltp = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.oltp_url)
        .await
        .context("connecting to OLTP database")?;

    let olap = clickhouse::Client::default().with_url(&config.olap_url);
    migrations::run_olap(&olap)
        .await
        .context("running OLAP migrations")?;
    migrations::run_oltp(&oltp)
        .await
        .context("running OLTP migrations")?;

    let state = StateStore::connect(&config.redis_url)
        .await
        .context("connecting state store to redis")?;
    let rate_limiter = RateLimiter::connect(&config.redis_url)
        .await
        .context("connecting rate limiter to redis")?;
    let breaker = CircuitBreaker::connect(&config.redis_url, oltp.clone())
        .await
        .context("connecting circuit breaker to redis")?;

    let proxy_pool = ProxyPool::new(oltp.clone(), state.clone());
    let client = Arc::new(
        MarketplaceClient::new(proxy_pool, rate_limiter, breaker)
            .context("building marketplace client")?,
    );
    let credentials = Arc::new(CredentialStore::new(oltp.clone(), config.process_secret.clone()));
    let oltp_loader = Arc::new(OltpLoader::new(oltp.clone()));
    let olap_loader = Arc::new(OlapLoader::new(olap));

    Ok(Wiring {
        oltp,
        state,
        client,
        credentials,
        oltp_loader,
        olap_loader,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;

    telemetry::init_tracing();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Migrate => run_migrate(&config).await,
        Commands::Backfill { shop } => run_backfill(&config, shop).await,
        Commands::Serve => run_serve(&config).await,
    }
}

async fn run_migrate(config: &Config) -> Result<()> {
    // `wire()` applies both OLAP and OLTP DDL as part of connecting; for
    // this subcommand that's the whole job.
    wire(config).await?;
    info!("migrations applied");
    Ok(())
}

async fn run_backfill(config: &Config, shop_id: i64) -> Result<()> {
    let wiring = wire(config).await?;
    let marketplace = wiring.oltp_loader.get_shop(shop_id).await?.marketplace;

    let orchestrator = Orchestrator::new(
        wiring.state.clone(),
        StepDeps {
            client: wiring.client,
            credentials: wiring.credentials,
            oltp: wiring.oltp_loader,
            olap: wiring.olap_loader,
            state: wiring.state,
        },
    );

    let outcome = orchestrator.run_backfill(shop_id, marketplace).await?;
    info!(shop_id, ?outcome, "backfill finished");
    Ok(())
}

async fn run_serve(config: &Config) -> Result<()> {
    telemetry::init_metrics(config.metrics_port);
    info!("marketloomd starting");

    let wiring = wire(config).await?;
    info!("OLTP/OLAP connected and migrated");

    let runtime = Arc::new(TaskRuntime::new(config));
    let dispatcher = Arc::new(Dispatcher::new(
        wiring.oltp.clone(),
        wiring.state.clone(),
        runtime,
    ));

    let task_deps = TaskDeps::new(
        wiring.client.clone(),
        wiring.credentials.clone(),
        wiring.oltp_loader.clone(),
        wiring.olap_loader.clone(),
        wiring.state.clone(),
    );

    let orchestrator = Arc::new(Orchestrator::new(
        wiring.state.clone(),
        StepDeps {
            client: wiring.client,
            credentials: wiring.credentials,
            oltp: wiring.oltp_loader,
            olap: wiring.olap_loader,
            state: wiring.state.clone(),
        },
    ));

    let beat = BeatScheduler::new(dispatcher, task_deps);
    tokio::spawn(async move {
        beat.run().await;
    });
    info!("beat scheduler spawned");

    let app = facade::router(FacadeState {
        state_store: wiring.state,
        oltp: wiring.oltp,
        orchestrator,
    });

    let addr: SocketAddr = ([0, 0, 0, 0], config.facade_port).into();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding façade listener on {addr}"))?;
    info!(%addr, "façade listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("façade server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, draining façade");
}
