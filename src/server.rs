use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::{
    config::Config,
    handlers::{self, ApiState},
    logger::SubsystemConfig,
    manager::LogManager,
    signals::setup_signal_handlers,
    stream::StreamServer,
};

/// Start the edgelog server.
///
/// Brings up the log manager (default key + audit trail), the
/// real-time push server, and the management API, then serves both
/// listeners until a shutdown signal arrives. Shutdown order: drain
/// listeners, close stream connections, flush and close every
/// subsystem logger.
pub async fn start_server(config: Config) -> Result<()> {
    info!("edgelog starting...");

    let manager = LogManager::new(
        PathBuf::from(&config.logging.log_root),
        SubsystemConfig::from_logging(&config.logging),
        config.logging.max_index_entries,
    );

    if let Some(minted) = manager.init().await? {
        tracing::warn!(
            key = %minted.key,
            "Minted default admin API key; it will not be shown again"
        );
    }

    let stream = StreamServer::new(manager.clone(), config.stream.clone());
    stream.start();

    let config_swap = Arc::new(ArcSwap::from_pointee(config.clone()));
    let api_state = ApiState {
        manager: manager.clone(),
        stream: stream.clone(),
        config: config_swap,
    };
    let api_app = handlers::api_router(api_state);
    let stream_app = stream.clone().router();

    let (shutdown_tx, signal_handle) = setup_signal_handlers();

    let host: IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("invalid bind host {}", config.server.host))?;
    let api_addr = SocketAddr::from((host, config.server.port));
    let stream_addr = SocketAddr::from((host, config.stream.port));

    let api_listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("failed to bind management API to {}", api_addr))?;
    let stream_listener = tokio::net::TcpListener::bind(stream_addr)
        .await
        .with_context(|| format!("failed to bind stream server to {}", stream_addr))?;

    info!("Management API listening on {}", api_addr);
    info!("Stream server listening on {}", stream_addr);
    info!(
        "Configuration: log root {}, retention {} days, {} req/min API cap, {} stream connections max",
        config.logging.log_root,
        config.logging.retention_days,
        config.api.requests_per_minute,
        config.stream.max_connections,
    );

    let mut api_shutdown = shutdown_tx.subscribe();
    let api_task = tokio::spawn(async move {
        axum::serve(api_listener, api_app)
            .with_graceful_shutdown(async move {
                let _ = api_shutdown.recv().await;
                info!("Shutdown signal received, draining management API connections...");
            })
            .await
    });

    let mut stream_shutdown = shutdown_tx.subscribe();
    let stream_task = tokio::spawn(async move {
        axum::serve(stream_listener, stream_app)
            .with_graceful_shutdown(async move {
                let _ = stream_shutdown.recv().await;
                info!("Shutdown signal received, draining stream connections...");
            })
            .await
    });

    // Even when one listener fails, the flush-and-close below still runs
    let api_result = api_task.await;
    let stream_result = stream_task.await;

    stream.shutdown().await;
    manager.shutdown().await;
    signal_handle.abort();

    api_result.context("management API task panicked")??;
    stream_result.context("stream server task panicked")??;

    info!("Server stopped gracefully");
    Ok(())
}
