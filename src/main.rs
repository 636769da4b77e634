use anyhow::{Context, Result};
use clap::Parser;
use rfmail_relay::api::create_api_server;
use rfmail_relay::config::{Cli, LogFormat};
use rfmail_relay::metrics::{start_metrics_server, MetricsConfig};
use rfmail_relay::relay::{RelayNode, VERSION};
use rfmail_relay::transport::HttpTransport;
use rfmail_relay::worker::Scheduler;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let metrics_addr = cli.metrics_addr;
    let config = cli.into_config();

    tracing::info!("RFMail relay v{} starting as {}", VERSION, config.node_id);

    match metrics_addr {
        Some(addr) => start_metrics_server(MetricsConfig::with_addr(addr))?,
        None => start_metrics_server(MetricsConfig::recorder_only())?,
    };

    let transport = Arc::new(HttpTransport::new(config.send_timeout));
    let listen_addr = config.listen_addr;
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let node = Arc::new(
        RelayNode::new(config, transport)
            .context("failed to open relay node")?
            .with_events(event_tx),
    );

    let scheduler = Scheduler::new(node.clone()).with_events(event_rx).start();

    let app = create_api_server(node.clone());
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;

    tracing::info!(
        "Listening on {} (advertised as {}), {} peer(s), default peer {}",
        listen_addr,
        node.config().advertise_url,
        node.config().peers.len(),
        node.config().default_peer.as_deref().unwrap_or("<none>")
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    scheduler.shutdown().await;
    tracing::info!("{}", node.stats());
    tracing::info!("Relay stopped");
    Ok(())
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down...");
}
