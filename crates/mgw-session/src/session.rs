use anyhow::Result;
use async_trait::async_trait;
use mgw_core::{McpDefinition, StatusHandle};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, PaginatedRequestParam,
    ReadResourceRequestParam, ReadResourceResult, Tool,
};
use tokio_util::sync::CancellationToken;

/// Capability-set interface to one downstream MCP session.
///
/// The gateway routes everything through this trait so the manager, loader,
/// and mirror never depend on a concrete transport, and tests can substitute
/// in-process doubles.
#[async_trait]
pub trait McpSession: Send + Sync {
    /// Establish the transport and perform the MCP handshake. Fails if the
    /// session is already connected.
    async fn connect(&self) -> Result<()>;

    /// Tear down the transport. Idempotent.
    async fn disconnect(&self) -> Result<()>;

    /// Liveness probe against the downstream.
    async fn health(&self) -> Result<()>;

    async fn is_connected(&self) -> bool;

    /// Poll until connected, the session lands in an error state, or the
    /// token fires.
    async fn wait_until_connected(&self, cancellation: CancellationToken) -> Result<()>;

    /// Deep clone of the definition captured at construction.
    fn definition(&self) -> McpDefinition;

    fn status(&self) -> StatusHandle;

    async fn list_tools(&self) -> Result<Vec<Tool>>;

    async fn list_prompts(
        &self,
        cursor: Option<PaginatedRequestParam>,
    ) -> Result<ListPromptsResult>;

    async fn list_resources(
        &self,
        cursor: Option<PaginatedRequestParam>,
    ) -> Result<ListResourcesResult>;

    async fn list_resource_templates(
        &self,
        cursor: Option<PaginatedRequestParam>,
    ) -> Result<ListResourceTemplatesResult>;

    async fn call_tool(&self, request: CallToolRequestParam) -> Result<CallToolResult>;

    async fn get_prompt(&self, request: GetPromptRequestParam) -> Result<GetPromptResult>;

    async fn read_resource(&self, request: ReadResourceRequestParam) -> Result<ReadResourceResult>;
}
