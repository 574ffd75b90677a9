//! Per-downstream mirror MCP server.
//!
//! The capability loader registers the downstream's tools, prompts,
//! resources, and resource templates here; list calls answer from the
//! registered sets while call-style operations delegate to the live session.
//! Prompt and resource reads forward unconditionally because resource
//! templates produce URIs that never appear in the registered list.

use std::sync::Arc;

use mgw_session::McpSession;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    PaginatedRequestParam, Prompt, ReadResourceRequestParam, ReadResourceResult, Resource,
    ResourceTemplate, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};
use tokio::sync::RwLock;
use tracing::debug;

const MIRROR_SERVER_NAME: &str = "mcp-gateway-proxy";

#[derive(Clone)]
pub struct McpMirror {
    inner: Arc<MirrorInner>,
}

struct MirrorInner {
    name: String,
    session: Arc<dyn McpSession>,
    log_enabled: bool,
    tools: RwLock<Vec<Tool>>,
    prompts: RwLock<Vec<Prompt>>,
    resources: RwLock<Vec<Resource>>,
    templates: RwLock<Vec<ResourceTemplate>>,
}

impl McpMirror {
    pub fn new(name: &str, session: Arc<dyn McpSession>, log_enabled: bool) -> Self {
        Self {
            inner: Arc::new(MirrorInner {
                name: name.to_string(),
                session,
                log_enabled,
                tools: RwLock::new(Vec::new()),
                prompts: RwLock::new(Vec::new()),
                resources: RwLock::new(Vec::new()),
                templates: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn mcp_name(&self) -> &str {
        &self.inner.name
    }

    /// Register a tool; at most once per tool name.
    pub async fn register_tool(&self, tool: Tool) -> bool {
        let mut tools = self.inner.tools.write().await;
        if tools.iter().any(|existing| existing.name == tool.name) {
            debug!(mcp = %self.inner.name, tool = %tool.name, "tool already registered, skipping");
            return false;
        }
        tools.push(tool);
        true
    }

    pub async fn register_prompt(&self, prompt: Prompt) -> bool {
        let mut prompts = self.inner.prompts.write().await;
        if prompts.iter().any(|existing| existing.name == prompt.name) {
            debug!(mcp = %self.inner.name, prompt = %prompt.name, "prompt already registered, skipping");
            return false;
        }
        prompts.push(prompt);
        true
    }

    pub async fn register_resource(&self, resource: Resource) -> bool {
        let mut resources = self.inner.resources.write().await;
        if resources.iter().any(|existing| existing.uri == resource.uri) {
            debug!(mcp = %self.inner.name, uri = %resource.uri, "resource already registered, skipping");
            return false;
        }
        resources.push(resource);
        true
    }

    pub async fn register_template(&self, template: ResourceTemplate) -> bool {
        let mut templates = self.inner.templates.write().await;
        if templates
            .iter()
            .any(|existing| existing.uri_template == template.uri_template)
        {
            debug!(mcp = %self.inner.name, template = %template.uri_template, "resource template already registered, skipping");
            return false;
        }
        templates.push(template);
        true
    }

    pub async fn tool_count(&self) -> usize {
        self.inner.tools.read().await.len()
    }

    pub(crate) async fn list_tools_internal(&self) -> ListToolsResult {
        ListToolsResult::with_all_items(self.inner.tools.read().await.clone())
    }

    pub(crate) async fn call_tool_internal(
        &self,
        request: CallToolRequestParam,
    ) -> Result<CallToolResult, McpError> {
        let registered = self
            .inner
            .tools
            .read()
            .await
            .iter()
            .any(|tool| tool.name == request.name);
        if !registered {
            return Err(McpError::invalid_params(
                format!(
                    "unknown tool '{}' on MCP '{}'",
                    request.name, self.inner.name
                ),
                None,
            ));
        }

        self.inner
            .session
            .call_tool(request)
            .await
            .map_err(|error| self.delegate_error("tools/call", &error))
    }

    pub(crate) async fn list_prompts_internal(&self) -> ListPromptsResult {
        ListPromptsResult::with_all_items(self.inner.prompts.read().await.clone())
    }

    pub(crate) async fn get_prompt_internal(
        &self,
        request: GetPromptRequestParam,
    ) -> Result<GetPromptResult, McpError> {
        self.inner
            .session
            .get_prompt(request)
            .await
            .map_err(|error| self.delegate_error("prompts/get", &error))
    }

    pub(crate) async fn list_resources_internal(&self) -> ListResourcesResult {
        ListResourcesResult::with_all_items(self.inner.resources.read().await.clone())
    }

    pub(crate) async fn read_resource_internal(
        &self,
        request: ReadResourceRequestParam,
    ) -> Result<ReadResourceResult, McpError> {
        self.inner
            .session
            .read_resource(request)
            .await
            .map_err(|error| self.delegate_error("resources/read", &error))
    }

    pub(crate) async fn list_templates_internal(&self) -> ListResourceTemplatesResult {
        ListResourceTemplatesResult::with_all_items(self.inner.templates.read().await.clone())
    }

    fn delegate_error(&self, operation: &str, error: &anyhow::Error) -> McpError {
        McpError::internal_error(
            format!(
                "{operation} forwarding to MCP '{}' failed: {error:#}",
                self.inner.name
            ),
            None,
        )
    }
}

impl ServerHandler for McpMirror {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.server_info.name = MIRROR_SERVER_NAME.to_string();
        info.server_info.version = env!("CARGO_PKG_VERSION").to_string();
        let mut capabilities = ServerCapabilities::builder()
            .enable_tools()
            .enable_prompts()
            .enable_resources();
        if self.inner.log_enabled {
            capabilities = capabilities.enable_logging();
        }
        info.capabilities = capabilities.build();
        info
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(self.list_tools_internal().await)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.call_tool_internal(request).await
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        Ok(self.list_prompts_internal().await)
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        self.get_prompt_internal(request).await
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(self.list_resources_internal().await)
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        self.read_resource_internal(request).await
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        Ok(self.list_templates_internal().await)
    }
}
