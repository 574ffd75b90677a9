use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use mgw_core::McpDefinition;
use mgw_session::{ManagerConfig, SessionManager};
use mgw_storage::{MemoryStorage, Storage};

use super::ProxyRegistry;

fn quick_definition(name: &str) -> McpDefinition {
    let mut definition = McpDefinition::stdio(name, "true", &[]);
    definition.max_reconnects = Some(1);
    definition.reconnect_delay = Some(Duration::from_millis(10));
    definition.timeout = Some(Duration::from_millis(500));
    definition
}

async fn registry_with_manager() -> (Arc<ProxyRegistry>, Arc<SessionManager>) {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let manager = Arc::new(SessionManager::new(
        storage.clone(),
        ManagerConfig::default(),
    ));
    let registry = Arc::new(ProxyRegistry::new(
        manager.clone(),
        storage,
        "127.0.0.1:0".parse().expect("static addr"),
    ));
    (registry, manager)
}

#[tokio::test]
async fn test_register_requires_existing_session() {
    let (registry, manager) = registry_with_manager().await;

    let err = registry
        .register_mcp_proxy("ghost", &quick_definition("ghost"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no session"), "{err:#}");

    manager.stop().await;
}

#[tokio::test]
async fn test_double_register_fails() {
    let (registry, manager) = registry_with_manager().await;
    let definition = quick_definition("echo");
    manager.add_client(definition.clone()).await.unwrap();

    registry
        .register_mcp_proxy("echo", &definition)
        .await
        .unwrap();
    let err = registry
        .register_mcp_proxy("echo", &definition)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already registered"), "{err:#}");

    registry.shutdown_all().await;
    manager.stop().await;
}

#[tokio::test]
async fn test_unregister_removes_entry() {
    let (registry, manager) = registry_with_manager().await;
    let definition = quick_definition("echo");
    manager.add_client(definition.clone()).await.unwrap();

    registry
        .register_mcp_proxy("echo", &definition)
        .await
        .unwrap();
    assert!(registry.is_registered("echo").await);

    registry.unregister_mcp_proxy("echo").await.unwrap();
    assert!(!registry.is_registered("echo").await);

    let err = registry.unregister_mcp_proxy("echo").await.unwrap_err();
    assert!(err.to_string().contains("no proxy registered"), "{err:#}");

    manager.stop().await;
}

#[tokio::test]
async fn test_dispatch_missing_name_is_bad_request() {
    let (registry, manager) = registry_with_manager().await;
    let request = Request::builder()
        .uri("/sse")
        .body(Body::empty())
        .expect("static request");

    let response = registry.dispatch("", request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    manager.stop().await;
}

#[tokio::test]
async fn test_dispatch_unregistered_name_is_not_found() {
    let (registry, manager) = registry_with_manager().await;
    let request = Request::builder()
        .uri("/missing/sse")
        .body(Body::empty())
        .expect("static request");

    let response = registry.dispatch("missing", request).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    manager.stop().await;
}

#[tokio::test]
async fn test_dispatch_before_connect_is_not_ready() {
    let (registry, manager) = registry_with_manager().await;
    let definition = quick_definition("starting");
    manager.add_client(definition.clone()).await.unwrap();
    registry
        .register_mcp_proxy("starting", &definition)
        .await
        .unwrap();

    // `true` is not an MCP server, so the session never reaches connected.
    let request = Request::builder()
        .uri("/starting/sse")
        .body(Body::empty())
        .expect("static request");
    let response = registry.dispatch("starting", request).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    registry.shutdown_all().await;
    manager.stop().await;
}
