//! REST façade: the minimal HTTP surface the rest of the system is
//! driven from.

use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn, Span};

use crate::models::MarketplaceKind;
use crate::orchestrator::Orchestrator;
use crate::state::StateStore;

#[derive(Clone)]
pub struct FacadeState {
    pub state_store: StateStore,
    pub oltp: sqlx::PgPool,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(state: FacadeState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/shops/:id/sync-status", get(sync_status))
        .route("/shops", post(create_shop))
        .layer(middleware::from_fn(request_logging))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct SyncStatusResponse {
    shop_id: i64,
    current_step: u32,
    total_steps: u32,
    step_name: String,
    sub_progress: Option<String>,
    percent: u32,
    status: String,
    error: Option<String>,
}

async fn sync_status(
    State(state): State<FacadeState>,
    Path(shop_id): Path<i64>,
) -> Result<Json<SyncStatusResponse>, (StatusCode, String)> {
    let record = state
        .state_store
        .get_progress(shop_id)
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;

    match record {
        Some(record) => Ok(Json(SyncStatusResponse {
            shop_id,
            current_step: record.current_step,
            total_steps: record.total_steps,
            step_name: record.step_name,
            sub_progress: record.sub_progress,
            percent: record.percent,
            status: format!("{:?}", record.status).to_lowercase(),
            error: record.error,
        })),
        None => Err((StatusCode::NOT_FOUND, "no sync run recorded for shop".into())),
    }
}

#[derive(Deserialize)]
struct CreateShopRequest {
    owner_id: i64,
    marketplace: MarketplaceKind,
}

#[derive(Serialize)]
struct CreateShopResponse {
    shop_id: i64,
    backfill: String,
}

/// Registers the shop row then triggers the orchestrator's backfill
/// chain. task-level failures never
/// surface to the façade — this always accepts and returns a task id
/// (here, the shop id) immediately.
async fn create_shop(
    State(state): State<FacadeState>,
    Json(req): Json<CreateShopRequest>,
) -> Result<Json<CreateShopResponse>, (StatusCode, String)> {
    let row: (i64,) = sqlx::query_as(
        "INSERT INTO shops (owner_id, marketplace, encrypted_secret, status) \
         VALUES ($1, $2, ''::bytea, 'syncing') RETURNING id",
    )
    .bind(req.owner_id)
    .bind(req.marketplace.as_str())
    .fetch_one(&state.oltp)
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let shop_id = row.0;
    let orchestrator = state.orchestrator.clone();
    let marketplace = req.marketplace;
    tokio::spawn(async move {
        if let Err(err) = orchestrator.run_backfill(shop_id, marketplace).await {
            warn!(shop_id, %err, "initial backfill failed to start");
        }
    });

    Ok(Json(CreateShopResponse {
        shop_id,
        backfill: "started".to_string(),
    }))
}

async fn request_logging(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();
    let span = tracing::info_span!(
        "http_request",
        method = %method,
        path = %path,
        client_ip = %addr.ip(),
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );
    let _guard = span.enter();

    let response = next.run(request).await;
    let latency = start.elapsed();
    let status = response.status().as_u16();

    Span::current().record("status", status);
    Span::current().record("latency_ms", latency.as_millis() as u64);

    if status >= 500 {
        warn!(%method, %path, status, latency_ms = latency.as_millis(), "request failed (5xx)");
    } else {
        info!(%method, %path, status, latency_ms = latency.as_millis(), "request completed");
    }

    response
}

impl IntoResponse for crate::error::IngestError {
    fn into_response(self) -> Response {
        let status = match &self {
            crate::error::IngestError::ShopDisabled { .. } => StatusCode::FORBIDDEN,
            crate::error::IngestError::ProxyExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        };
        (status, self.to_string()).into_response()
    }
}
