//! Transactional façade over storage, the session manager, and the proxy
//! registry.
//!
//! Storage is the system of record: every mutation writes storage before
//! touching runtime state, and rollback reverses runtime first, then
//! storage. Runtime side-effect failures after a successful storage write
//! are logged, never returned.

use std::sync::Arc;

use chrono::Utc;
use mgw_core::{GatewayError, McpDefinition, McpStatus};
use mgw_proxy::ProxyRegistry;
use mgw_session::SessionManager;
use mgw_storage::{Storage, StorageError};
use rmcp::model::{CallToolRequestParam, CallToolResult, JsonObject};
use serde::Serialize;
use tracing::{debug, info, warn};

pub type ServiceResult<T> = Result<T, GatewayError>;

/// One stored definition enriched with its live status.
#[derive(Debug, Clone, Serialize)]
pub struct McpEntry {
    pub definition: McpDefinition,
    pub status: McpStatus,
}

/// Tool projection for the aggregate listing.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
    pub mcp_name: String,
}

pub struct GatewayService {
    storage: Arc<dyn Storage>,
    manager: Arc<SessionManager>,
    registry: Arc<ProxyRegistry>,
}

impl GatewayService {
    pub fn new(
        storage: Arc<dyn Storage>,
        manager: Arc<SessionManager>,
        registry: Arc<ProxyRegistry>,
    ) -> Self {
        Self {
            storage,
            manager,
            registry,
        }
    }

    /// Bring up the runtime from persisted state: reload sessions, then
    /// restore a mirror per definition. Per-definition failures are logged.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.manager.start().await?;

        let definitions = self
            .storage
            .list_mcps()
            .await
            .map_err(|e| anyhow::anyhow!("failed to list definitions: {e}"))?;
        for definition in definitions {
            if let Err(error) = self
                .registry
                .register_mcp_proxy(&definition.name, &definition)
                .await
            {
                warn!(
                    mcp = %definition.name,
                    error = %format!("{error:#}"),
                    "failed to restore proxy registration"
                );
            }
        }
        Ok(())
    }

    pub async fn stop(&self) {
        self.registry.shutdown_all().await;
        self.manager.stop().await;
        if let Err(error) = self.storage.close().await {
            warn!(error = %error, "failed to close storage");
        }
    }

    /// Persist a new definition, add its session, and register its mirror.
    /// Rollback on failure: runtime first, then the storage write.
    pub async fn create_mcp(&self, mut definition: McpDefinition) -> ServiceResult<McpDefinition> {
        definition.validate()?;
        let name = definition.name.clone();

        match self.storage.load_mcp(&name).await {
            Ok(_) => return Err(GatewayError::AlreadyExists(name)),
            Err(StorageError::NotFound(_)) => {}
            Err(error) => return Err(map_storage(error)),
        }

        let now = Utc::now();
        definition.created_at = Some(now);
        definition.updated_at = Some(now);
        definition.apply_defaults();

        self.storage
            .save_mcp(&definition)
            .await
            .map_err(map_storage)?;

        if let Err(error) = self.manager.add_client(definition.clone()).await {
            self.rollback_storage(&name).await;
            return Err(GatewayError::ProxyRegistration {
                name,
                reason: format!("{error:#}"),
            });
        }

        if let Err(error) = self.registry.register_mcp_proxy(&name, &definition).await {
            if let Err(remove_error) = self.manager.remove_client(&name).await {
                warn!(mcp = %name, error = %format!("{remove_error:#}"), "rollback: failed to remove session");
            }
            self.rollback_storage(&name).await;
            return Err(GatewayError::ProxyRegistration {
                name,
                reason: format!("{error:#}"),
            });
        }

        info!(mcp = %name, "MCP definition created");
        Ok(definition)
    }

    /// Replace a definition and hot-reload its runtime state. The storage
    /// write is authoritative; reload failures surface as `HotReload`.
    pub async fn update_mcp(
        &self,
        name: &str,
        mut definition: McpDefinition,
    ) -> ServiceResult<McpDefinition> {
        definition.name = name.to_string();
        definition.validate()?;

        let existing = self.storage.load_mcp(name).await.map_err(map_storage)?;
        definition.created_at = existing.created_at;
        definition.updated_at = Some(Utc::now());
        definition.apply_defaults();

        self.storage
            .save_mcp(&definition)
            .await
            .map_err(map_storage)?;

        // Tear down the old runtime state; both halves are best-effort.
        if let Err(error) = self.registry.unregister_mcp_proxy(name).await {
            debug!(mcp = %name, error = %format!("{error:#}"), "reload: no mirror to unregister");
        }
        if let Err(error) = self.manager.remove_client(name).await {
            debug!(mcp = %name, error = %format!("{error:#}"), "reload: no session to remove");
        }

        let mut reload_failure = None;
        if let Err(error) = self.manager.add_client(definition.clone()).await {
            reload_failure = Some(format!("failed to recreate session: {error:#}"));
        } else if let Err(error) = self.registry.register_mcp_proxy(name, &definition).await {
            reload_failure = Some(format!("failed to re-register mirror: {error:#}"));
        }

        if let Some(reason) = reload_failure {
            warn!(mcp = %name, reason = %reason, "hot reload incomplete; storage remains authoritative");
            return Err(GatewayError::HotReload {
                name: name.to_string(),
                reason,
                definition: Box::new(definition),
            });
        }

        info!(mcp = %name, "MCP definition updated");
        Ok(definition)
    }

    /// Delete from storage first; runtime teardown failures are logged only.
    pub async fn delete_mcp(&self, name: &str) -> ServiceResult<()> {
        self.storage.delete_mcp(name).await.map_err(map_storage)?;

        if let Err(error) = self.registry.unregister_mcp_proxy(name).await {
            debug!(mcp = %name, error = %format!("{error:#}"), "delete: no mirror to unregister");
        }
        if let Err(error) = self.manager.remove_client(name).await {
            debug!(mcp = %name, error = %format!("{error:#}"), "delete: no session to remove");
        }

        info!(mcp = %name, "MCP definition deleted");
        Ok(())
    }

    pub async fn list_mcps(&self) -> ServiceResult<Vec<McpEntry>> {
        let definitions = self.storage.list_mcps().await.map_err(map_storage)?;
        let mut entries = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let status = self.status_for(&definition.name).await;
            entries.push(McpEntry { definition, status });
        }
        Ok(entries)
    }

    pub async fn get_mcp(&self, name: &str) -> ServiceResult<McpEntry> {
        let definition = self.storage.load_mcp(name).await.map_err(map_storage)?;
        let status = self.status_for(name).await;
        Ok(McpEntry { definition, status })
    }

    /// Aggregate every connected downstream's tools; per-definition failures
    /// are skipped with a log line, never failing the whole call.
    pub async fn list_all_tools(&self) -> ServiceResult<Vec<AggregatedTool>> {
        let definitions = self.storage.list_mcps().await.map_err(map_storage)?;
        let mut tools = Vec::new();

        for definition in definitions {
            let Some(session) = self.manager.get(&definition.name).await else {
                debug!(mcp = %definition.name, "skipping tools: no session");
                continue;
            };
            if !session.is_connected().await {
                debug!(mcp = %definition.name, "skipping tools: not connected");
                continue;
            }
            match session.list_tools().await {
                Ok(session_tools) => {
                    for tool in session_tools {
                        tools.push(AggregatedTool {
                            name: tool.name.to_string(),
                            description: tool.description.as_ref().map(|d| d.to_string()),
                            input_schema: serde_json::to_value(&tool.input_schema)
                                .unwrap_or_default(),
                            mcp_name: definition.name.clone(),
                        });
                    }
                }
                Err(error) => {
                    warn!(
                        mcp = %definition.name,
                        error = %format!("{error:#}"),
                        "skipping tools: list failed"
                    );
                }
            }
        }
        Ok(tools)
    }

    pub async fn call_tool(
        &self,
        mcp_name: &str,
        tool_name: &str,
        arguments: Option<JsonObject>,
    ) -> ServiceResult<CallToolResult> {
        let Some(session) = self.manager.get(mcp_name).await else {
            // Unknown name is a 404; a known-but-sessionless name is a
            // connectivity failure.
            return match self.storage.load_mcp(mcp_name).await {
                Err(StorageError::NotFound(_)) => {
                    Err(GatewayError::NotFound(mcp_name.to_string()))
                }
                _ => Err(GatewayError::ClientNotConnected(mcp_name.to_string())),
            };
        };
        if !session.is_connected().await {
            return Err(GatewayError::ClientNotConnected(mcp_name.to_string()));
        }

        session
            .call_tool(CallToolRequestParam {
                name: tool_name.to_string().into(),
                arguments,
            })
            .await
            .map_err(|error| GatewayError::ToolCallFailed {
                name: tool_name.to_string(),
                reason: format!("{error:#}"),
            })
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    async fn status_for(&self, name: &str) -> McpStatus {
        match self.manager.get(name).await {
            Some(session) => session.status().snapshot().await,
            None => McpStatus::new(name),
        }
    }

    async fn rollback_storage(&self, name: &str) {
        if let Err(error) = self.storage.delete_mcp(name).await {
            warn!(mcp = %name, error = %error, "rollback: failed to delete definition");
        }
    }
}

fn map_storage(error: StorageError) -> GatewayError {
    match error {
        StorageError::NotFound(name) => GatewayError::NotFound(name),
        StorageError::InvalidDefinition(cause) => GatewayError::InvalidDefinition(cause),
        StorageError::Backend(reason) => GatewayError::Storage(reason),
    }
}
