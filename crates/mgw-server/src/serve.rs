//! Gateway run loop: wire storage, manager, registry, and service together,
//! serve the HTTP surface, and tear everything down in order on ctrl-c.

use std::sync::Arc;

use anyhow::{Context, Result};
use mgw_config::{GatewayConfig, StorageConfig};
use mgw_proxy::ProxyRegistry;
use mgw_session::{ManagerConfig, SessionManager};
use mgw_storage::{MemoryStorage, RedisStorage, Storage};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::http::{AppState, gateway_router};
use crate::service::GatewayService;

pub async fn run(config: GatewayConfig) -> Result<()> {
    let bind_addr = config.bind_addr()?;

    let storage: Arc<dyn Storage> = match &config.storage {
        StorageConfig::Memory => Arc::new(MemoryStorage::new()),
        StorageConfig::Redis { url } => Arc::new(
            RedisStorage::connect(url)
                .await
                .context("failed to open redis storage")?,
        ),
    };

    let manager = Arc::new(SessionManager::new(
        storage.clone(),
        ManagerConfig {
            connect_timeout: config.manager.connect_timeout,
            reconnect_delay: config.manager.reconnect_delay,
            max_reconnects: config.manager.max_reconnects,
            max_sessions: config.manager.max_sessions,
            health_check_interval: config.manager.health_check_interval,
            health_check_parallelism: config.manager.health_check_parallelism,
        },
    ));
    let registry = Arc::new(ProxyRegistry::new(
        manager.clone(),
        storage.clone(),
        bind_addr,
    ));
    let service = Arc::new(GatewayService::new(
        storage.clone(),
        manager.clone(),
        registry.clone(),
    ));

    service.start().await.context("failed to start gateway")?;

    let app = gateway_router(AppState {
        service: service.clone(),
        manager,
        registry,
    });
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve local address")?;
    info!(addr = %local_addr, base_url = %config.base_url(), "mcp-gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("HTTP server failed")?;

    if timeout(config.shutdown_timeout, service.stop())
        .await
        .is_err()
    {
        warn!(
            timeout = ?config.shutdown_timeout,
            "shutdown deadline exceeded, exiting with sessions still open"
        );
    }
    Ok(())
}
