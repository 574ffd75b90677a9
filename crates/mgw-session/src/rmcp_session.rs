//! rmcp-backed implementation of [`McpSession`].
//!
//! One session owns the live connection to a single downstream: the
//! transport-appropriate client, the status bookkeeping, and (for HTTP
//! transports) a background ping task scoped to the manager's lifetime.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use mgw_core::{ConnectionState, McpDefinition, StatusHandle, TransportKind};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, ClientCapabilities, ClientInfo, GetPromptRequestParam,
    GetPromptResult, Implementation, ListPromptsResult, ListResourceTemplatesResult,
    ListResourcesResult, PaginatedRequestParam, ReadResourceRequestParam, ReadResourceResult, Tool,
};
use rmcp::service::{Peer, RunningService, ServiceError, ServiceExt};
use rmcp::{ClientHandler, RoleClient};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::session::McpSession;

const PING_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const STDERR_LINE_BUFFER: usize = 1024 * 1024;

/// Client-side handshake identity presented to every downstream.
#[derive(Clone, Default)]
struct GatewayClient;

impl ClientHandler for GatewayClient {
    fn get_info(&self) -> ClientInfo {
        let mut info = ClientInfo::default();
        info.capabilities = ClientCapabilities::default();
        let mut client_info = Implementation::default();
        client_info.name = "mcp-gateway".to_string();
        client_info.version = env!("CARGO_PKG_VERSION").to_string();
        info.client_info = client_info;
        info
    }
}

struct ClientHandle {
    service: RunningService<RoleClient, GatewayClient>,
    child: Option<tokio::process::Child>,
}

impl ClientHandle {
    /// Graceful close. Signal termination, EOF, and cancellation are the
    /// routine outcomes of tearing a session down and land at debug;
    /// anything else surfaces at error.
    async fn shutdown(self, name: &str) {
        match self.service.cancel().await {
            Ok(_) => {}
            Err(error) if error.is_cancelled() => {
                debug!(mcp = %name, error = %error, "client task cancelled on close");
            }
            Err(error) => {
                error!(mcp = %name, error = %error, "client task failed on close");
            }
        }

        if let Some(mut child) = self.child {
            match timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    if is_expected_exit(&status) {
                        debug!(mcp = %name, %status, "MCP child exited");
                    } else {
                        error!(mcp = %name, %status, "MCP child exited with unexpected status");
                    }
                }
                Ok(Err(error)) => {
                    if is_expected_close_error(&error) {
                        debug!(mcp = %name, error = %error, "failed to wait for MCP child process");
                    } else {
                        error!(mcp = %name, error = %error, "unexpected error waiting for MCP child process");
                    }
                }
                Err(_) => {
                    let _ = child.kill().await;
                }
            }
        }
    }
}

/// Exit statuses that belong to a normal teardown: clean exit, killed by a
/// signal, or the shell-style signal codes (143, -1).
fn is_expected_exit(status: &std::process::ExitStatus) -> bool {
    if status.success() {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if status.signal().is_some() {
            return true;
        }
    }
    matches!(status.code(), Some(143) | Some(-1) | None)
}

/// Wait errors that accompany an ordinary close (EOF, interruption,
/// deadline expiry). Everything else deserves attention.
fn is_expected_close_error(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::TimedOut
    )
}

#[derive(Default)]
struct SessionState {
    connected: bool,
    initialized: bool,
    ping_cancel: Option<CancellationToken>,
    ping_done: Option<oneshot::Receiver<()>>,
}

pub struct RmcpSession {
    definition: McpDefinition,
    status: StatusHandle,
    /// Survives caller-scope cancellation; cancels uniformly on manager stop.
    manager_token: CancellationToken,
    state: Arc<RwLock<SessionState>>,
    client: Mutex<Option<ClientHandle>>,
}

impl RmcpSession {
    pub fn new(definition: McpDefinition, manager_token: CancellationToken) -> Self {
        let status = StatusHandle::new(&definition.name);
        Self {
            definition,
            status,
            manager_token,
            state: Arc::new(RwLock::new(SessionState::default())),
            client: Mutex::new(None),
        }
    }

    /// Resume with a previously persisted status (counters survive reloads).
    pub fn with_status(
        definition: McpDefinition,
        status: StatusHandle,
        manager_token: CancellationToken,
    ) -> Self {
        Self {
            definition,
            status,
            manager_token,
            state: Arc::new(RwLock::new(SessionState::default())),
            client: Mutex::new(None),
        }
    }

    fn needs_ping_loop(&self) -> bool {
        self.definition.transport.is_http()
    }

    async fn establish(&self) -> Result<ClientHandle> {
        match self.definition.transport {
            TransportKind::Stdio => self.establish_stdio().await,
            TransportKind::Sse => self.establish_sse().await,
            TransportKind::StreamableHttp => self.establish_streamable_http().await,
        }
    }

    async fn establish_stdio(&self) -> Result<ClientHandle> {
        let name = &self.definition.name;
        let command = self
            .definition
            .command
            .as_deref()
            .ok_or_else(|| anyhow!("MCP '{name}': stdio transport without command"))?;

        let mut cmd = Command::new(command);
        cmd.args(&self.definition.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.definition.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn MCP server '{name}'"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture stdout for MCP server '{name}'"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture stdin for MCP server '{name}'"))?;
        if let Some(stderr) = child.stderr.take() {
            let stderr_name = name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::with_capacity(STDERR_LINE_BUFFER, stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(mcp = %stderr_name, "stderr: {line}");
                }
            });
        }

        let service = GatewayClient
            .serve((stdout, stdin))
            .await
            .with_context(|| format!("failed to initialize MCP server '{name}'"))?;

        Ok(ClientHandle {
            service,
            child: Some(child),
        })
    }

    async fn establish_sse(&self) -> Result<ClientHandle> {
        use rmcp::transport::SseClientTransport;
        use rmcp::transport::sse_client::SseClientConfig;

        let name = &self.definition.name;
        let url = self
            .definition
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("MCP '{name}': sse transport without url"))?;

        let client = self.build_http_client()?;
        let transport = SseClientTransport::start_with_client(
            client,
            SseClientConfig {
                sse_endpoint: url.into(),
                ..Default::default()
            },
        )
        .await
        .with_context(|| format!("failed to open SSE stream for MCP server '{name}' at {url}"))?;

        let service = GatewayClient
            .serve(transport)
            .await
            .with_context(|| format!("failed to initialize SSE MCP server '{name}'"))?;

        Ok(ClientHandle {
            service,
            child: None,
        })
    }

    async fn establish_streamable_http(&self) -> Result<ClientHandle> {
        use rmcp::transport::StreamableHttpClientTransport;
        use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;

        let name = &self.definition.name;
        let url = self
            .definition
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("MCP '{name}': streamable-http transport without url"))?;

        let client = self.build_http_client()?;
        let config = StreamableHttpClientTransportConfig::with_uri(url);
        let transport = StreamableHttpClientTransport::with_client(client, config);

        let service = GatewayClient.serve(transport).await.with_context(|| {
            format!("failed to initialize streamable HTTP MCP server '{name}' at {url}")
        })?;

        Ok(ClientHandle {
            service,
            child: None,
        })
    }

    /// Shared reqwest client: definition headers, connect timeout, and no
    /// overall timeout (the event stream is long-lived).
    fn build_http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.definition.timeout_or(HTTP_CONNECT_TIMEOUT));

        if !self.definition.headers.is_empty() {
            let mut header_map = reqwest::header::HeaderMap::new();
            for (key, value) in &self.definition.headers {
                match (
                    reqwest::header::HeaderName::from_bytes(key.as_bytes()),
                    reqwest::header::HeaderValue::from_str(value),
                ) {
                    (Ok(header_name), Ok(header_value)) => {
                        header_map.insert(header_name, header_value);
                    }
                    _ => {
                        warn!(mcp = %self.definition.name, header = %key, "skipping invalid header");
                    }
                }
            }
            builder = builder.default_headers(header_map);
        }

        builder.build().context("failed to build HTTP client")
    }

    fn spawn_ping_loop(&self, peer: Peer<RoleClient>) -> (CancellationToken, oneshot::Receiver<()>) {
        let cancel = self.manager_token.child_token();
        let (done_tx, done_rx) = oneshot::channel();
        let interval = self
            .definition
            .health_check_interval_or(DEFAULT_PING_INTERVAL);
        let state = self.state.clone();
        let status = self.status.clone();
        let name = self.definition.name.clone();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = sleep(interval) => {}
                }

                if !state.read().await.connected {
                    break;
                }

                match timeout(PING_TIMEOUT, ping_probe(&peer)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        // Reconnection is driven by the manager; the loop
                        // keeps probing.
                        status
                            .transition(
                                ConnectionState::Error,
                                Some(format!("ping failed: {error:#}")),
                            )
                            .await;
                    }
                    Err(_) => {
                        status
                            .transition(
                                ConnectionState::Error,
                                Some(format!("ping timed out after {PING_TIMEOUT:?}")),
                            )
                            .await;
                    }
                }
            }
            debug!(mcp = %name, "ping loop stopped");
            let _ = done_tx.send(());
        });

        (cancel, done_rx)
    }

    async fn peer(&self) -> Result<Peer<RoleClient>> {
        let client = self.client.lock().await;
        let handle = client
            .as_ref()
            .ok_or_else(|| anyhow!("MCP client '{}' is not connected", self.definition.name))?;
        // The peer is cloned out so no transport call ever runs under the
        // session's locks.
        Ok(handle.service.peer().clone())
    }

    async fn ensure_connected(&self) -> Result<()> {
        if !self.state.read().await.connected {
            bail!("MCP client '{}' is not connected", self.definition.name);
        }
        Ok(())
    }

    /// Run one call-style request: timed, counted, error-counted.
    async fn timed<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, ServiceError>>,
    {
        let started = Instant::now();
        let result = fut.await;
        self.status.record_request(started.elapsed()).await;
        match result {
            Ok(value) => Ok(value),
            Err(error) => {
                self.status.increment_errors().await;
                Err(anyhow!(error)).with_context(|| {
                    format!("{operation} failed for MCP '{}'", self.definition.name)
                })
            }
        }
    }
}

/// rmcp exposes no dedicated client ping; a `tools/list` round-trip doubles
/// as the liveness probe.
async fn ping_probe(peer: &Peer<RoleClient>) -> std::result::Result<(), ServiceError> {
    peer.list_tools(None).await.map(|_| ())
}

#[async_trait]
impl McpSession for RmcpSession {
    async fn connect(&self) -> Result<()> {
        if self.state.read().await.connected {
            bail!("MCP client '{}' is already connected", self.definition.name);
        }

        let handle = match self.establish().await {
            Ok(handle) => handle,
            Err(error) => {
                self.status
                    .transition(ConnectionState::Error, Some(format!("{error:#}")))
                    .await;
                return Err(error);
            }
        };

        let peer = handle.service.peer().clone();
        *self.client.lock().await = Some(handle);

        {
            let mut state = self.state.write().await;
            state.connected = true;
            state.initialized = true;
            if self.needs_ping_loop() {
                let (cancel, done) = self.spawn_ping_loop(peer);
                state.ping_cancel = Some(cancel);
                state.ping_done = Some(done);
            }
        }
        self.status.transition(ConnectionState::Connected, None).await;
        debug!(mcp = %self.definition.name, transport = %self.definition.transport, "MCP session connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let (cancel, done) = {
            let mut state = self.state.write().await;
            if !state.connected {
                return Ok(());
            }
            state.connected = false;
            (state.ping_cancel.take(), state.ping_done.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(done) = done {
            let _ = done.await;
        }

        if let Some(handle) = self.client.lock().await.take() {
            handle.shutdown(&self.definition.name).await;
        }

        self.state.write().await.initialized = false;
        self.status
            .transition(ConnectionState::Disconnected, None)
            .await;
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        self.ensure_connected().await?;
        let peer = self.peer().await?;
        ping_probe(&peer)
            .await
            .map_err(|error| anyhow!(error))
            .with_context(|| format!("health probe failed for MCP '{}'", self.definition.name))
    }

    async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }

    async fn wait_until_connected(&self, cancellation: CancellationToken) -> Result<()> {
        loop {
            if self.is_connected().await {
                return Ok(());
            }
            if self.status.state().await == ConnectionState::Error {
                let snapshot = self.status.snapshot().await;
                bail!(
                    "MCP '{}' failed to connect: {}",
                    self.definition.name,
                    snapshot
                        .last_error
                        .unwrap_or_else(|| "unknown error".to_string())
                );
            }
            tokio::select! {
                _ = cancellation.cancelled() => {
                    bail!("cancelled while waiting for MCP '{}'", self.definition.name);
                }
                _ = sleep(WAIT_POLL_INTERVAL) => {}
            }
        }
    }

    fn definition(&self) -> McpDefinition {
        self.definition.clone()
    }

    fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.ensure_connected().await?;
        let peer = self.peer().await?;
        let result = peer
            .list_tools(None)
            .await
            .map_err(|error| anyhow!(error))
            .with_context(|| format!("tools/list failed for MCP '{}'", self.definition.name))?;
        Ok(result.tools)
    }

    async fn list_prompts(
        &self,
        cursor: Option<PaginatedRequestParam>,
    ) -> Result<ListPromptsResult> {
        self.ensure_connected().await?;
        let peer = self.peer().await?;
        peer.list_prompts(cursor)
            .await
            .map_err(|error| anyhow!(error))
            .with_context(|| format!("prompts/list failed for MCP '{}'", self.definition.name))
    }

    async fn list_resources(
        &self,
        cursor: Option<PaginatedRequestParam>,
    ) -> Result<ListResourcesResult> {
        self.ensure_connected().await?;
        let peer = self.peer().await?;
        peer.list_resources(cursor)
            .await
            .map_err(|error| anyhow!(error))
            .with_context(|| format!("resources/list failed for MCP '{}'", self.definition.name))
    }

    async fn list_resource_templates(
        &self,
        cursor: Option<PaginatedRequestParam>,
    ) -> Result<ListResourceTemplatesResult> {
        self.ensure_connected().await?;
        let peer = self.peer().await?;
        peer.list_resource_templates(cursor)
            .await
            .map_err(|error| anyhow!(error))
            .with_context(|| {
                format!(
                    "resources/templates/list failed for MCP '{}'",
                    self.definition.name
                )
            })
    }

    async fn call_tool(&self, request: CallToolRequestParam) -> Result<CallToolResult> {
        self.ensure_connected().await?;
        let peer = self.peer().await?;
        self.timed("tools/call", peer.call_tool(request)).await
    }

    async fn get_prompt(&self, request: GetPromptRequestParam) -> Result<GetPromptResult> {
        self.ensure_connected().await?;
        let peer = self.peer().await?;
        self.timed("prompts/get", peer.get_prompt(request)).await
    }

    async fn read_resource(&self, request: ReadResourceRequestParam) -> Result<ReadResourceResult> {
        self.ensure_connected().await?;
        let peer = self.peer().await?;
        self.timed("resources/read", peer.read_resource(request))
            .await
    }
}
