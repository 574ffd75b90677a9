//! Populates a mirror server from a connected downstream session.
//!
//! Tools load first and are fatal on failure; prompts, resources, and
//! resource templates then load as a concurrent group whose failures are
//! warnings only. A shared semaphore bounds concurrent registrations.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use mgw_core::{McpDefinition, ToolFilter, ToolFilterMode};
use mgw_session::McpSession;
use rmcp::model::PaginatedRequestParam;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const REGISTRATION_WORKERS: usize = 5;

/// Mirror every capability class of `session` onto `mirror`.
pub async fn load_capabilities(
    session: &Arc<dyn McpSession>,
    mirror: &crate::McpMirror,
    cancellation: &CancellationToken,
) -> Result<()> {
    let definition = session.definition();
    let semaphore = Arc::new(Semaphore::new(REGISTRATION_WORKERS));

    load_tools(session, mirror, &definition, &semaphore, cancellation)
        .await
        .with_context(|| format!("failed to mirror tools for MCP '{}'", definition.name))?;

    let (prompts, resources, templates) = tokio::join!(
        load_prompts(session, mirror, &semaphore, cancellation),
        load_resources(session, mirror, &semaphore, cancellation),
        load_templates(session, mirror, &semaphore, cancellation),
    );
    for (class, result) in [
        ("prompts", prompts),
        ("resources", resources),
        ("resource templates", templates),
    ] {
        if let Err(error) = result {
            warn!(
                mcp = %definition.name,
                class,
                error = %format!("{error:#}"),
                "optional capability class failed to load"
            );
        }
    }

    Ok(())
}

async fn load_tools(
    session: &Arc<dyn McpSession>,
    mirror: &crate::McpMirror,
    definition: &McpDefinition,
    semaphore: &Arc<Semaphore>,
    cancellation: &CancellationToken,
) -> Result<()> {
    if cancellation.is_cancelled() {
        bail!("tool loading cancelled");
    }

    let tools = session.list_tools().await?;
    if let Some(filter) = &definition.tool_filter {
        if filter.mode == ToolFilterMode::Unknown {
            warn!(mcp = %definition.name, "unknown tool_filter mode, accepting all tools");
        }
    }

    let mut join = JoinSet::new();
    for tool in tools {
        if !tool_allowed(definition.tool_filter.as_ref(), tool.name.as_ref()) {
            debug!(mcp = %definition.name, tool = %tool.name, "tool excluded by filter");
            continue;
        }
        let mirror = mirror.clone();
        let semaphore = semaphore.clone();
        join.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            mirror.register_tool(tool).await;
        });
    }
    while join.join_next().await.is_some() {}
    Ok(())
}

/// Filter verdict for a single tool name.
fn tool_allowed(filter: Option<&ToolFilter>, name: &str) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    if filter.list.is_empty() {
        return true;
    }
    match filter.mode {
        ToolFilterMode::Allow => filter.list.iter().any(|allowed| allowed == name),
        ToolFilterMode::Block => !filter.list.iter().any(|blocked| blocked == name),
        ToolFilterMode::Unknown => true,
    }
}

async fn load_prompts(
    session: &Arc<dyn McpSession>,
    mirror: &crate::McpMirror,
    semaphore: &Arc<Semaphore>,
    cancellation: &CancellationToken,
) -> Result<()> {
    let mut cursor: Option<PaginatedRequestParam> = None;
    loop {
        if cancellation.is_cancelled() {
            bail!("prompt loading cancelled");
        }
        let page = session.list_prompts(cursor.take()).await?;

        let mut join = JoinSet::new();
        for prompt in page.prompts {
            let mirror = mirror.clone();
            let semaphore = semaphore.clone();
            join.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                mirror.register_prompt(prompt).await;
            });
        }
        while join.join_next().await.is_some() {}

        match page.next_cursor {
            Some(next) => cursor = Some(PaginatedRequestParam { cursor: Some(next) }),
            None => break,
        }
    }
    Ok(())
}

async fn load_resources(
    session: &Arc<dyn McpSession>,
    mirror: &crate::McpMirror,
    semaphore: &Arc<Semaphore>,
    cancellation: &CancellationToken,
) -> Result<()> {
    let mut cursor: Option<PaginatedRequestParam> = None;
    loop {
        if cancellation.is_cancelled() {
            bail!("resource loading cancelled");
        }
        let page = session.list_resources(cursor.take()).await?;

        let mut join = JoinSet::new();
        for resource in page.resources {
            let mirror = mirror.clone();
            let semaphore = semaphore.clone();
            join.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                mirror.register_resource(resource).await;
            });
        }
        while join.join_next().await.is_some() {}

        match page.next_cursor {
            Some(next) => cursor = Some(PaginatedRequestParam { cursor: Some(next) }),
            None => break,
        }
    }
    Ok(())
}

async fn load_templates(
    session: &Arc<dyn McpSession>,
    mirror: &crate::McpMirror,
    semaphore: &Arc<Semaphore>,
    cancellation: &CancellationToken,
) -> Result<()> {
    let mut cursor: Option<PaginatedRequestParam> = None;
    loop {
        if cancellation.is_cancelled() {
            bail!("resource template loading cancelled");
        }
        let page = session.list_resource_templates(cursor.take()).await?;

        let mut join = JoinSet::new();
        for template in page.resource_templates {
            let mirror = mirror.clone();
            let semaphore = semaphore.clone();
            join.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                mirror.register_template(template).await;
            });
        }
        while join.join_next().await.is_some() {}

        match page.next_cursor {
            Some(next) => cursor = Some(PaginatedRequestParam { cursor: Some(next) }),
            None => break,
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "loader_tests.rs"]
mod tests;
