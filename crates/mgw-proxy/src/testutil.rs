//! In-process session double shared by the proxy-side tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use mgw_core::{McpDefinition, StatusHandle};
use mgw_session::McpSession;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, PaginatedRequestParam,
    Prompt, ReadResourceRequestParam, ReadResourceResult, Resource, ResourceTemplate, Tool,
};
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub fn sample_tool(name: &str) -> Tool {
    serde_json::from_value(json!({
        "name": name,
        "description": format!("{name} tool"),
        "inputSchema": {"type": "object", "properties": {}},
    }))
    .expect("valid tool fixture")
}

pub fn sample_prompt(name: &str) -> Prompt {
    serde_json::from_value(json!({
        "name": name,
        "description": format!("{name} prompt"),
    }))
    .expect("valid prompt fixture")
}

pub fn sample_resource(uri: &str) -> Resource {
    serde_json::from_value(json!({
        "uri": uri,
        "name": uri,
    }))
    .expect("valid resource fixture")
}

pub fn sample_template(uri_template: &str) -> ResourceTemplate {
    serde_json::from_value(json!({
        "uriTemplate": uri_template,
        "name": uri_template,
    }))
    .expect("valid resource template fixture")
}

pub fn pong_result() -> CallToolResult {
    serde_json::from_value(json!({
        "content": [{"type": "text", "text": "pong"}],
    }))
    .expect("valid call result fixture")
}

/// Scripted session: serves canned capability pages and counts calls.
pub struct FakeSession {
    definition: McpDefinition,
    status: StatusHandle,
    connected: AtomicBool,
    tools: Vec<Tool>,
    /// Pages returned by `list_prompts`, drained front to back.
    prompt_pages: Mutex<Vec<(Vec<Prompt>, Option<String>)>>,
    resources: Vec<Resource>,
    templates: Vec<ResourceTemplate>,
    list_tools_fails: AtomicBool,
    list_prompts_fails: AtomicBool,
    calls: AtomicUsize,
}

impl FakeSession {
    pub fn new(name: &str) -> Self {
        Self {
            definition: McpDefinition::stdio(name, "true", &[]),
            status: StatusHandle::new(name),
            connected: AtomicBool::new(false),
            tools: Vec::new(),
            prompt_pages: Mutex::new(Vec::new()),
            resources: Vec::new(),
            templates: Vec::new(),
            list_tools_fails: AtomicBool::new(false),
            list_prompts_fails: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_definition(mut self, definition: McpDefinition) -> Self {
        self.definition = definition;
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_prompt_pages(self, pages: Vec<(Vec<Prompt>, Option<String>)>) -> Self {
        *self.prompt_pages.try_lock().expect("unshared at setup") = pages;
        self
    }

    pub fn with_resources(mut self, resources: Vec<Resource>) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_templates(mut self, templates: Vec<ResourceTemplate>) -> Self {
        self.templates = templates;
        self
    }

    pub fn failing_list_tools(self) -> Self {
        self.list_tools_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_list_prompts(self) -> Self {
        self.list_prompts_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl McpSession for FakeSession {
    async fn connect(&self) -> Result<()> {
        self.set_connected(true);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.set_connected(false);
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn wait_until_connected(&self, _cancellation: CancellationToken) -> Result<()> {
        if self.is_connected().await {
            Ok(())
        } else {
            bail!("fake session is not connected")
        }
    }

    fn definition(&self) -> McpDefinition {
        self.definition.clone()
    }

    fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        if self.list_tools_fails.load(Ordering::SeqCst) {
            bail!("scripted tools/list failure");
        }
        Ok(self.tools.clone())
    }

    async fn list_prompts(
        &self,
        _cursor: Option<PaginatedRequestParam>,
    ) -> Result<ListPromptsResult> {
        if self.list_prompts_fails.load(Ordering::SeqCst) {
            bail!("scripted prompts/list failure");
        }
        let mut pages = self.prompt_pages.lock().await;
        let (prompts, next) = if pages.is_empty() {
            (Vec::new(), None)
        } else {
            pages.remove(0)
        };
        let mut result = ListPromptsResult::with_all_items(prompts);
        result.next_cursor = next;
        Ok(result)
    }

    async fn list_resources(
        &self,
        _cursor: Option<PaginatedRequestParam>,
    ) -> Result<ListResourcesResult> {
        Ok(ListResourcesResult::with_all_items(self.resources.clone()))
    }

    async fn list_resource_templates(
        &self,
        _cursor: Option<PaginatedRequestParam>,
    ) -> Result<ListResourceTemplatesResult> {
        Ok(ListResourceTemplatesResult::with_all_items(
            self.templates.clone(),
        ))
    }

    async fn call_tool(&self, _request: CallToolRequestParam) -> Result<CallToolResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(pong_result())
    }

    async fn get_prompt(&self, _request: GetPromptRequestParam) -> Result<GetPromptResult> {
        bail!("no prompts scripted")
    }

    async fn read_resource(
        &self,
        _request: ReadResourceRequestParam,
    ) -> Result<ReadResourceResult> {
        bail!("no resources scripted")
    }
}
