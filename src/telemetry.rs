//! Logging and metrics initialization.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured logging. Call once, at process start.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Install the Prometheus exporter on `metrics_port`. Best-effort: a failure
/// to bind is logged and the process continues without metrics rather than
/// failing startup over an observability surface.
pub fn init_metrics(metrics_port: u16) {
    let addr: std::net::SocketAddr = ([0, 0, 0, 0], metrics_port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!(%addr, "metrics exporter installed"),
        Err(err) => tracing::warn!(%addr, %err, "failed to install metrics exporter"),
    }
}
