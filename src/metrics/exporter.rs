//! Prometheus metrics exporter
//!
//! Exposes metrics via HTTP for Prometheus scraping, either on a dedicated
//! listener or as a route on the relay's own server.

use crate::metrics::recorder::init_metrics;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;

/// Global prometheus handle
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics server configuration
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Dedicated scrape listener; `None` installs the recorder only
    pub listen_addr: Option<SocketAddr>,
}

impl MetricsConfig {
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            listen_addr: Some(addr),
        }
    }

    /// Recorder without a listener, served through [`metrics_route`]
    pub fn recorder_only() -> Self {
        Self { listen_addr: None }
    }
}

/// Install the Prometheus recorder
///
/// Only the first call installs anything; later calls return the existing
/// handle.
pub fn start_metrics_server(
    config: MetricsConfig,
) -> Result<&'static PrometheusHandle, MetricsError> {
    init_metrics();

    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }

    let handle = match config.listen_addr {
        Some(addr) => {
            let (recorder, exporter) = PrometheusBuilder::new()
                .with_http_listener(addr)
                .build()
                .map_err(|e| MetricsError::SetupFailed(e.to_string()))?;
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder)
                .map_err(|e| MetricsError::SetupFailed(e.to_string()))?;
            tokio::spawn(async move {
                if exporter.await.is_err() {
                    tracing::warn!("Metrics listener on {} stopped", addr);
                }
            });
            tracing::info!("Metrics listening on {}", addr);
            handle
        }
        None => PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| MetricsError::SetupFailed(e.to_string()))?,
    };

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::AlreadyInitialized)?;
    PROMETHEUS_HANDLE
        .get()
        .ok_or(MetricsError::AlreadyInitialized)
}

/// Render metrics as a string (for custom endpoints)
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Errors that can occur during metrics setup
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to setup metrics: {0}")]
    SetupFailed(String),

    #[error("Metrics already initialized")]
    AlreadyInitialized,
}

/// Axum route serving the rendered metrics
pub fn metrics_route<S>() -> axum::routing::MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    use axum::response::IntoResponse;

    axum::routing::get(|| async {
        match render_metrics() {
            Some(metrics) => (
                [(
                    axum::http::header::CONTENT_TYPE,
                    "text/plain; version=0.0.4",
                )],
                metrics,
            )
                .into_response(),
            None => (
                axum::http::StatusCode::SERVICE_UNAVAILABLE,
                "Metrics not initialized",
            )
                .into_response(),
        }
    })
}
