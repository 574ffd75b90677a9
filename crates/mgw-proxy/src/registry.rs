//! Registry of per-downstream mirror tuples and the HTTP dispatch surface.
//!
//! Each registered downstream owns a mirror server plus a transport adapter:
//! an axum router exposing the mirror over SSE at `/{name}/sse` and over
//! streamable HTTP at `/{name}/stream`. The tuple is inserted before
//! capability population begins, so requests racing initialization see a
//! registered-but-not-ready mirror (500, not 404).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use axum::Router;
use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mgw_core::{ConnectionState, McpDefinition};
use mgw_session::{McpSession, SessionManager};
use mgw_storage::Storage;
use rmcp::transport::sse_server::{SseServer, SseServerConfig};
use rmcp::transport::streamable_http_server::{
    StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
};
use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{debug, info, warn};

use crate::loader;
use crate::mirror::McpMirror;

const INIT_TIMEOUT_FALLBACK: Duration = Duration::from_secs(30);
const UNREGISTER_TIMEOUT: Duration = Duration::from_secs(5);

struct ProxyEntry {
    mirror: McpMirror,
    adapter: TransportAdapter,
    session: Arc<dyn McpSession>,
    definition: McpDefinition,
}

/// HTTP-facing half of one mirror: the routes and their shutdown token.
struct TransportAdapter {
    router: Router,
    shutdown: CancellationToken,
}

impl TransportAdapter {
    fn new(
        name: &str,
        mirror: &McpMirror,
        bind_addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> Self {
        let (sse_server, sse_router) = SseServer::new(SseServerConfig {
            bind: bind_addr,
            sse_path: format!("/{name}/sse"),
            post_path: format!("/{name}/sse/message"),
            ct: shutdown.child_token(),
            sse_keep_alive: None,
        });
        let _service_ct = sse_server.with_service_directly({
            let mirror = mirror.clone();
            move || mirror.clone()
        });

        let stream_service = StreamableHttpService::new(
            {
                let mirror = mirror.clone();
                move || Ok(mirror.clone())
            },
            Arc::new(LocalSessionManager::default()),
            StreamableHttpServerConfig {
                stateful_mode: true,
                sse_keep_alive: None,
            },
        );

        let router = Router::new()
            .merge(sse_router)
            .nest_service(&format!("/{name}/stream"), stream_service)
            .layer(CatchPanicLayer::new());

        Self { router, shutdown }
    }
}

pub struct ProxyRegistry {
    manager: Arc<SessionManager>,
    storage: Arc<dyn Storage>,
    bind_addr: SocketAddr,
    entries: RwLock<HashMap<String, ProxyEntry>>,
    shutdown: CancellationToken,
}

impl ProxyRegistry {
    pub fn new(
        manager: Arc<SessionManager>,
        storage: Arc<dyn Storage>,
        bind_addr: SocketAddr,
    ) -> Self {
        Self {
            manager,
            storage,
            bind_addr,
            entries: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Create the mirror tuple for `name` and start its background
    /// initializer. Fails if no session exists or the name is already
    /// registered.
    pub async fn register_mcp_proxy(&self, name: &str, definition: &McpDefinition) -> Result<()> {
        let session = self
            .manager
            .get(name)
            .await
            .ok_or_else(|| anyhow!("no session for MCP '{name}'"))?;

        let mirror = McpMirror::new(name, session.clone(), definition.log_enabled);
        let adapter =
            TransportAdapter::new(name, &mirror, self.bind_addr, self.shutdown.child_token());

        {
            let mut entries = self.entries.write().await;
            if entries.contains_key(name) {
                adapter.shutdown.cancel();
                bail!("proxy for MCP '{name}' is already registered");
            }
            entries.insert(
                name.to_string(),
                ProxyEntry {
                    mirror: mirror.clone(),
                    adapter,
                    session: session.clone(),
                    definition: definition.clone(),
                },
            );
        }

        self.spawn_initializer(name, definition, session, mirror);
        info!(mcp = %name, "MCP proxy registered");
        Ok(())
    }

    /// Wait for the session to come up, then mirror its capabilities.
    ///
    /// Runs detached from the caller's scope with a definition-scoped
    /// deadline; a failure marks the session status, it never propagates.
    fn spawn_initializer(
        &self,
        name: &str,
        definition: &McpDefinition,
        session: Arc<dyn McpSession>,
        mirror: McpMirror,
    ) {
        let deadline = definition.timeout_or(INIT_TIMEOUT_FALLBACK);
        let cancellation = self.shutdown.child_token();
        let storage = self.storage.clone();
        let name = name.to_string();

        tokio::spawn(async move {
            let result = timeout(deadline, async {
                session
                    .wait_until_connected(cancellation.child_token())
                    .await?;
                loader::load_capabilities(&session, &mirror, &cancellation).await
            })
            .await;

            let failure = match result {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some(format!("{error:#}")),
                Err(_) => Some(format!("timed out after {deadline:?}")),
            };

            match failure {
                None => {
                    info!(mcp = %name, tools = mirror.tool_count().await, "MCP proxy ready");
                }
                Some(reason) => {
                    warn!(mcp = %name, reason = %reason, "MCP proxy initialization failed");
                    session
                        .status()
                        .transition(
                            ConnectionState::Error,
                            Some(format!("initialization failed: {reason}")),
                        )
                        .await;
                    let snapshot = session.status().snapshot().await;
                    if let Err(error) = storage.save_status(&snapshot).await {
                        warn!(mcp = %name, error = %error, "failed to persist status");
                    }
                }
            }
        });
    }

    /// Remove the tuple, then shut down its adapter and session under a
    /// fixed deadline. Shutdown failures are logged, not returned.
    pub async fn unregister_mcp_proxy(&self, name: &str) -> Result<()> {
        let entry = self.entries.write().await.remove(name);
        let Some(entry) = entry else {
            bail!("no proxy registered for MCP '{name}'");
        };

        entry.adapter.shutdown.cancel();
        match timeout(UNREGISTER_TIMEOUT, entry.session.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                warn!(mcp = %name, error = %format!("{error:#}"), "failed to disconnect session on unregister");
            }
            Err(_) => {
                warn!(mcp = %name, "session disconnect timed out on unregister");
            }
        }
        info!(mcp = %name, "MCP proxy unregistered");
        Ok(())
    }

    pub async fn shutdown_all(&self) {
        self.shutdown.cancel();
        let names: Vec<String> = self.entries.read().await.keys().cloned().collect();
        for name in names {
            if let Err(error) = self.unregister_mcp_proxy(&name).await {
                debug!(mcp = %name, error = %format!("{error:#}"), "proxy already gone during shutdown");
            }
        }
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }

    pub async fn registered_definition(&self, name: &str) -> Option<McpDefinition> {
        self.entries
            .read()
            .await
            .get(name)
            .map(|entry| entry.definition.clone())
    }

    pub async fn mirror_for(&self, name: &str) -> Option<McpMirror> {
        self.entries
            .read()
            .await
            .get(name)
            .map(|entry| entry.mirror.clone())
    }

    /// Route one client request to the mirror's transport adapter.
    ///
    /// The ladder: 400 without a name, 404 when unregistered, 500 while the
    /// session is not yet connected, then hand off to the adapter, which
    /// writes the response itself.
    pub async fn dispatch(&self, name: &str, request: Request<Body>) -> Response {
        if name.is_empty() {
            return error_response(StatusCode::BAD_REQUEST, "missing MCP name");
        }

        let target = {
            let entries = self.entries.read().await;
            entries
                .get(name)
                .map(|entry| (entry.adapter.router.clone(), entry.session.clone()))
        };
        let Some((router, session)) = target else {
            return error_response(
                StatusCode::NOT_FOUND,
                &format!("no MCP proxy registered for '{name}'"),
            );
        };

        if !session.is_connected().await {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "MCP server not ready");
        }

        match router.oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
