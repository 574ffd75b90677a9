use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use mgw_core::{ConnectionState, McpDefinition, StatusHandle};
use mgw_storage::{MemoryStorage, Storage};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, PaginatedRequestParam,
    ReadResourceRequestParam, ReadResourceResult, Tool,
};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::{ManagerConfig, SessionManager, backoff_delay};
use crate::session::McpSession;

struct MockSession {
    definition: McpDefinition,
    status: StatusHandle,
    connects: AtomicUsize,
    connected: AtomicBool,
    fail_connect: bool,
}

impl MockSession {
    fn new(name: &str) -> Self {
        let mut definition = McpDefinition::stdio(name, "true", &[]);
        definition.max_reconnects = Some(1);
        definition.reconnect_delay = Some(Duration::from_millis(10));
        Self {
            definition,
            status: StatusHandle::new(name),
            connects: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
            fail_connect: false,
        }
    }

    fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl McpSession for MockSession {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        sleep(Duration::from_millis(50)).await;
        if self.fail_connect {
            self.status
                .transition(ConnectionState::Error, Some("mock connect failure".into()))
                .await;
            bail!("mock connect failure");
        }
        self.connected.store(true, Ordering::SeqCst);
        self.status.transition(ConnectionState::Connected, None).await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.status
            .transition(ConnectionState::Disconnected, None)
            .await;
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn wait_until_connected(&self, _cancellation: CancellationToken) -> Result<()> {
        Ok(())
    }

    fn definition(&self) -> McpDefinition {
        self.definition.clone()
    }

    fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        Ok(Vec::new())
    }

    async fn list_prompts(
        &self,
        _cursor: Option<PaginatedRequestParam>,
    ) -> Result<ListPromptsResult> {
        bail!("not implemented in mock")
    }

    async fn list_resources(
        &self,
        _cursor: Option<PaginatedRequestParam>,
    ) -> Result<ListResourcesResult> {
        bail!("not implemented in mock")
    }

    async fn list_resource_templates(
        &self,
        _cursor: Option<PaginatedRequestParam>,
    ) -> Result<ListResourceTemplatesResult> {
        bail!("not implemented in mock")
    }

    async fn call_tool(&self, _request: CallToolRequestParam) -> Result<CallToolResult> {
        bail!("not implemented in mock")
    }

    async fn get_prompt(&self, _request: GetPromptRequestParam) -> Result<GetPromptResult> {
        bail!("not implemented in mock")
    }

    async fn read_resource(
        &self,
        _request: ReadResourceRequestParam,
    ) -> Result<ReadResourceResult> {
        bail!("not implemented in mock")
    }
}

fn manager_with_config(config: ManagerConfig) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(Arc::new(MemoryStorage::new()), config))
}

fn quick_definition(name: &str) -> McpDefinition {
    let mut definition = McpDefinition::stdio(name, "true", &[]);
    definition.max_reconnects = Some(1);
    definition.reconnect_delay = Some(Duration::from_millis(10));
    definition.timeout = Some(Duration::from_millis(500));
    definition
}

#[test]
fn test_backoff_grows_linearly_and_caps() {
    let base = Duration::from_secs(5);
    assert_eq!(backoff_delay(base, 0), Duration::from_secs(5));
    assert_eq!(backoff_delay(base, 1), Duration::from_millis(12_500));
    assert_eq!(backoff_delay(base, 2), Duration::from_secs(20));
    // 5s * (1.5*100 + 1) would be far past the cap.
    assert_eq!(backoff_delay(base, 100), Duration::from_secs(60));
}

#[tokio::test]
async fn test_add_client_rejects_duplicate_name() {
    let manager = manager_with_config(ManagerConfig::default());
    manager.add_client(quick_definition("dup")).await.unwrap();

    let err = manager
        .add_client(quick_definition("dup"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already exists"), "{err:#}");
    assert_eq!(manager.session_count().await, 1);

    manager.stop().await;
}

#[tokio::test]
async fn test_add_client_respects_session_cap() {
    let config = ManagerConfig {
        max_sessions: 2,
        ..ManagerConfig::default()
    };
    let manager = manager_with_config(config);

    manager.add_client(quick_definition("one")).await.unwrap();
    manager.add_client(quick_definition("two")).await.unwrap();
    let err = manager
        .add_client(quick_definition("three"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("session limit"), "{err:#}");
    assert_eq!(manager.session_count().await, 2);

    manager.stop().await;
}

#[tokio::test]
async fn test_concurrent_adds_respect_session_cap() {
    let config = ManagerConfig {
        max_sessions: 4,
        ..ManagerConfig::default()
    };
    let manager = manager_with_config(config);

    let mut join = tokio::task::JoinSet::new();
    for i in 0..16 {
        let manager = manager.clone();
        join.spawn(async move { manager.add_client(quick_definition(&format!("mcp{i}"))).await });
    }
    let mut accepted = 0;
    while let Some(result) = join.join_next().await {
        if result.unwrap().is_ok() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 4);
    assert_eq!(manager.session_count().await, 4);
    manager.stop().await;
}

#[tokio::test]
async fn test_remove_client_unknown_name_fails() {
    let manager = manager_with_config(ManagerConfig::default());
    let err = manager.remove_client("ghost").await.unwrap_err();
    assert!(err.to_string().contains("no session"), "{err:#}");
}

#[tokio::test]
async fn test_remove_client_disconnects_session() {
    let manager = manager_with_config(ManagerConfig::default());
    let mock = Arc::new(MockSession::new("live"));
    mock.connect().await.unwrap();
    manager
        .sessions
        .write()
        .await
        .insert("live".to_string(), mock.clone());

    manager.remove_client("live").await.unwrap();
    assert!(!mock.is_connected().await);
    assert_eq!(manager.session_count().await, 0);
}

#[tokio::test]
async fn test_trigger_reconnect_is_deduplicated() {
    let manager = manager_with_config(ManagerConfig::default());
    let mock = Arc::new(MockSession::new("flaky"));
    manager
        .sessions
        .write()
        .await
        .insert("flaky".to_string(), mock.clone());

    // Second trigger lands while the first attempt is still in flight.
    manager.trigger_reconnect("flaky").await;
    manager.trigger_reconnect("flaky").await;

    timeout(Duration::from_secs(5), async {
        while mock.connect_count() == 0 || !mock.is_connected().await {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("reconnect never completed");

    assert_eq!(mock.connect_count(), 1);
    manager.stop().await;
}

#[tokio::test]
async fn test_trigger_reconnect_unknown_name_clears_mark() {
    let manager = manager_with_config(ManagerConfig::default());
    manager.trigger_reconnect("ghost").await;
    assert!(manager.reconnecting.lock().await.is_empty());
}

#[tokio::test]
async fn test_start_and_stop_with_persisted_definitions() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    for name in ["alpha", "beta", "gamma"] {
        storage.save_mcp(&quick_definition(name)).await.unwrap();
    }
    let manager = Arc::new(SessionManager::new(
        storage.clone(),
        ManagerConfig::default(),
    ));

    timeout(Duration::from_secs(10), manager.start())
        .await
        .expect("start timed out")
        .unwrap();
    assert_eq!(manager.session_count().await, 3);

    timeout(Duration::from_secs(10), manager.stop())
        .await
        .expect("stop timed out");
    assert_eq!(manager.session_count().await, 0);
}

#[tokio::test]
async fn test_connect_retry_leaves_terminal_error_reason() {
    let manager = manager_with_config(ManagerConfig::default());
    let mock = Arc::new(MockSession {
        fail_connect: true,
        ..MockSession::new("down")
    });
    let session: Arc<dyn McpSession> = mock.clone();
    manager
        .sessions
        .write()
        .await
        .insert("down".to_string(), session.clone());

    manager.connect_with_retry(session).await;

    let status = mock.status().snapshot().await;
    assert_eq!(status.state, ConnectionState::Error);
    assert_eq!(
        status.last_error.as_deref(),
        Some("maximum connection attempts exceeded")
    );
    assert_eq!(mock.connect_count(), 1);
}

#[tokio::test]
async fn test_metrics_aggregates_states_and_counters() {
    let manager = manager_with_config(ManagerConfig::default());

    let up = Arc::new(MockSession::new("up"));
    up.connect().await.unwrap();
    up.status().record_request(Duration::from_millis(100)).await;

    let down = Arc::new(MockSession::new("down"));
    down.status()
        .transition(ConnectionState::Error, Some("probe failed".into()))
        .await;

    let idle = Arc::new(MockSession::new("idle"));

    {
        let mut sessions = manager.sessions.write().await;
        sessions.insert("up".to_string(), up.clone());
        sessions.insert("down".to_string(), down.clone());
        sessions.insert("idle".to_string(), idle.clone());
    }

    let metrics = manager.metrics().await;
    assert_eq!(metrics.total_clients, 3);
    assert_eq!(metrics.connected, 1);
    assert_eq!(metrics.errored, 1);
    assert_eq!(metrics.disconnected, 1);
    assert_eq!(metrics.connecting, 0);
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.total_errors, 1);
    assert_eq!(metrics.max_connections, 100);
}
