//! Admin and proxy HTTP surface.
//!
//! Admin routes are a thin veneer over [`GatewayService`]; the `/{name}/sse`
//! and `/{name}/stream` families hand the raw request to the proxy registry,
//! whose transport adapter writes the response itself.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::Json;
use chrono::Utc;
use mgw_core::{GatewayError, McpDefinition};
use mgw_proxy::ProxyRegistry;
use mgw_session::SessionManager;
use rmcp::model::JsonObject;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::service::GatewayService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GatewayService>,
    pub manager: Arc<SessionManager>,
    pub registry: Arc<ProxyRegistry>,
}

pub fn gateway_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/admin/metrics", get(metrics))
        .route("/admin/mcps", post(create_mcp).get(list_mcps))
        .route(
            "/admin/mcps/{name}",
            get(get_mcp).put(update_mcp).delete(delete_mcp),
        )
        .route("/admin/tools", get(list_tools))
        .route("/admin/tools/call", post(call_tool))
        // SSE entry is GET-only; deeper segments (the message endpoint)
        // forward verbatim.
        .route("/{name}/sse", get(dispatch_proxy))
        .route("/{name}/sse/{*rest}", any(dispatch_proxy_tail))
        .route("/{name}/stream", any(dispatch_proxy))
        .route("/{name}/stream/{*rest}", any(dispatch_proxy_tail))
        .with_state(state)
}

async fn healthz() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics(State(state): State<AppState>) -> Json<Value> {
    let metrics = state.manager.metrics().await;
    Json(serde_json::to_value(metrics).unwrap_or_default())
}

async fn create_mcp(State(state): State<AppState>, Json(raw): Json<Value>) -> Response {
    let Ok(definition) = serde_json::from_value::<McpDefinition>(raw) else {
        return invalid_request();
    };
    match state.service.create_mcp(definition).await {
        Ok(created) => (
            StatusCode::CREATED,
            Json(json!({
                "message": "MCP definition added successfully",
                "name": created.name,
            })),
        )
            .into_response(),
        Err(error) => error_response(&error),
    }
}

async fn list_mcps(State(state): State<AppState>) -> Response {
    match state.service.list_mcps().await {
        Ok(entries) => Json(json!({
            "count": entries.len(),
            "mcps": entries,
        }))
        .into_response(),
        Err(error) => error_response(&error),
    }
}

async fn get_mcp(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.service.get_mcp(&name).await {
        Ok(entry) => Json(entry).into_response(),
        Err(error) => error_response(&error),
    }
}

async fn update_mcp(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(raw): Json<Value>,
) -> Response {
    let Ok(definition) = serde_json::from_value::<McpDefinition>(raw) else {
        return invalid_request();
    };
    match state.service.update_mcp(&name, definition).await {
        Ok(_) => Json(json!({
            "message": "MCP definition updated successfully",
        }))
        .into_response(),
        // Storage is authoritative: a failed reload still hands the
        // persisted definition back alongside the error.
        Err(GatewayError::HotReload {
            name,
            reason,
            definition,
        }) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": format!("hot reload failed for '{name}': {reason}"),
                "definition": definition,
            })),
        )
            .into_response(),
        Err(error) => error_response(&error),
    }
}

async fn delete_mcp(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.service.delete_mcp(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(&error),
    }
}

async fn list_tools(State(state): State<AppState>) -> Response {
    match state.service.list_all_tools().await {
        Ok(tools) => Json(tools).into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Debug, Deserialize)]
struct CallToolRequest {
    mcp_name: String,
    tool_name: String,
    #[serde(default)]
    arguments: Option<JsonObject>,
}

async fn call_tool(State(state): State<AppState>, Json(raw): Json<Value>) -> Response {
    let Ok(request) = serde_json::from_value::<CallToolRequest>(raw) else {
        return invalid_request();
    };
    match state
        .service
        .call_tool(&request.mcp_name, &request.tool_name, request.arguments)
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(error) => error_response(&error),
    }
}

async fn dispatch_proxy(
    State(state): State<AppState>,
    Path(name): Path<String>,
    request: Request<Body>,
) -> Response {
    state.registry.dispatch(&name, request).await
}

async fn dispatch_proxy_tail(
    State(state): State<AppState>,
    Path((name, _rest)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    state.registry.dispatch(&name, request).await
}

fn invalid_request() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "Invalid request" })),
    )
        .into_response()
}

fn error_response(error: &GatewayError) -> Response {
    let (status, message) = match error {
        GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "MCP not found".to_string()),
        GatewayError::AlreadyExists(_) => (StatusCode::CONFLICT, "MCP already exists".to_string()),
        GatewayError::InvalidDefinition(_) => {
            (StatusCode::BAD_REQUEST, "Invalid request".to_string())
        }
        GatewayError::Storage(_)
        | GatewayError::ProxyRegistration { .. }
        | GatewayError::HotReload { .. }
        | GatewayError::ClientNotConnected(_)
        | GatewayError::ToolCallFailed { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    };
    (
        status,
        Json(json!({
            "error": message,
            "detail": error.to_string(),
        })),
    )
        .into_response()
}
