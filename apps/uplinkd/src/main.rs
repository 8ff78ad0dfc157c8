//! Uplink device daemon entry point.

mod commands;
mod config;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use uplink_client::{CapabilityRegistry, ConnectionManager, TelemetryDispatcher};
use uplink_protocol::messages::InvokeResult;
use uplink_transport::{CapabilityHandler, HandlerFuture, WsConfig, WsTransport};

/// Liveness capability: echoes the invocation payload back.
fn ping_handler() -> CapabilityHandler {
    Arc::new(|req| -> HandlerFuture { Box::pin(async move { Ok(InvokeResult::ok(req.payload)) }) })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting uplinkd");

    // Load configuration.
    let config = match config::UplinkConfig::load() {
        Ok(c) => {
            tracing::info!(device_id = %c.device_id, endpoint = %c.endpoint_url, "configuration loaded");
            c
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            config::UplinkConfig::default()
        }
    };

    let transport = Arc::new(WsTransport::new(WsConfig {
        url: config.endpoint_url.clone(),
        device_id: config.device_id.clone(),
        device_name: config.device_name.clone(),
    }));

    let registry = Arc::new(CapabilityRegistry::new());
    registry.insert("ping", ping_handler());

    let client_config = config.client_config();
    let manager = Arc::new(ConnectionManager::new(
        transport.clone(),
        registry,
        &client_config,
    ));
    manager.start().await;
    manager.connect();

    let dispatcher = Arc::new(TelemetryDispatcher::new(
        transport,
        manager.clone(),
        &client_config,
    ));
    dispatcher.spawn_schedule();

    tokio::select! {
        _ = commands::run(manager.clone(), dispatcher.clone()) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
        }
    }

    dispatcher.shutdown();
    manager.shutdown().await;
    tracing::info!("uplinkd stopped");
    Ok(())
}
