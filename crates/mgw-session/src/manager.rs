//! Supervises the set of downstream sessions: startup reload, bounded
//! add/remove, connect retries with backoff, the health supervisor, and
//! deduplicated auto-reconnect.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use mgw_core::{ConnectionState, McpDefinition, StatusHandle};
use mgw_storage::Storage;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::rmcp_session::RmcpSession;
use crate::session::McpSession;

const MAX_BACKOFF: Duration = Duration::from_secs(60);
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Per-attempt connect timeout when the definition has none.
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnects: u32,
    pub max_sessions: usize,
    pub health_check_interval: Duration,
    pub health_check_parallelism: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            max_reconnects: 5,
            max_sessions: 100,
            health_check_interval: Duration::from_secs(30),
            health_check_parallelism: 8,
        }
    }
}

/// Aggregate view over every supervised session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ManagerMetrics {
    pub total_clients: usize,
    pub connected: usize,
    pub connecting: usize,
    pub errored: usize,
    pub disconnected: usize,
    pub total_requests: u64,
    pub total_errors: u64,
    pub max_connections: usize,
}

pub struct SessionManager {
    config: ManagerConfig,
    storage: Arc<dyn Storage>,
    sessions: RwLock<HashMap<String, Arc<dyn McpSession>>>,
    /// Names with a reconnect attempt currently in flight.
    reconnecting: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl SessionManager {
    pub fn new(storage: Arc<dyn Storage>, config: ManagerConfig) -> Self {
        Self {
            config,
            storage,
            sessions: RwLock::new(HashMap::new()),
            reconnecting: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Token scoped to the manager's lifetime; background work hangs off it
    /// so caller-scope cancellation never kills a session.
    pub fn lifecycle_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Reload every stored definition, launch concurrent connects, and start
    /// the health supervisor. Per-client failures are logged, not fatal.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let definitions = self
            .storage
            .list_mcps()
            .await
            .context("failed to reload MCP definitions")?;

        let mut join = JoinSet::new();
        for definition in definitions {
            let manager = self.clone();
            join.spawn(async move {
                let name = definition.name.clone();
                (name, manager.add_client(definition).await)
            });
        }

        let mut failed = 0usize;
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((name, Err(error))) => {
                    failed += 1;
                    warn!(mcp = %name, error = %format!("{error:#}"), "failed to start persisted MCP client");
                }
                Ok((_, Ok(()))) => {}
                Err(error) => {
                    failed += 1;
                    warn!(error = %error, "MCP client startup task panicked");
                }
            }
        }
        if failed > 0 {
            info!(failed, "manager started with degraded clients");
        }

        self.spawn_health_supervisor();
        Ok(())
    }

    /// Cancel background work, disconnect every session concurrently, and
    /// wait for all manager-owned tasks to finish.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let sessions: Vec<Arc<dyn McpSession>> = {
            let mut map = self.sessions.write().await;
            map.drain().map(|(_, session)| session).collect()
        };

        let mut join = JoinSet::new();
        for session in sessions {
            join.spawn(async move {
                let name = session.definition().name;
                if let Err(error) = session.disconnect().await {
                    warn!(mcp = %name, error = %format!("{error:#}"), "failed to disconnect session on stop");
                }
            });
        }
        while join.join_next().await.is_some() {}

        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Validate and insert a new session, then begin the async connect.
    ///
    /// The session is constructed outside the map lock; insertion fails on a
    /// duplicate name or when the session cap is reached, in which case the
    /// orphan is disconnected to release its resources.
    pub async fn add_client(self: &Arc<Self>, definition: McpDefinition) -> Result<()> {
        definition.validate()?;
        let name = definition.name.clone();

        let persisted = self.storage.load_status(&name).await;
        let session: Arc<dyn McpSession> = match persisted {
            Ok(status) => Arc::new(RmcpSession::with_status(
                definition,
                StatusHandle::from_status(status),
                self.lifecycle_token(),
            )),
            Err(_) => Arc::new(RmcpSession::new(definition, self.lifecycle_token())),
        };

        let inserted = {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(&name) {
                Err(format!("MCP client '{name}' already exists"))
            } else if sessions.len() >= self.config.max_sessions {
                Err(format!(
                    "session limit reached ({} clients)",
                    self.config.max_sessions
                ))
            } else {
                sessions.insert(name.clone(), session.clone());
                Ok(())
            }
        };

        if let Err(reason) = inserted {
            if let Err(error) = session.disconnect().await {
                debug!(mcp = %name, error = %format!("{error:#}"), "orphan session cleanup failed");
            }
            bail!("{reason}");
        }

        let manager = self.clone();
        self.tasks.spawn(async move {
            manager.connect_with_retry(session).await;
        });
        Ok(())
    }

    /// Remove and disconnect a session; disconnect failures are logged only.
    pub async fn remove_client(&self, name: &str) -> Result<()> {
        let session = self.sessions.write().await.remove(name);
        let Some(session) = session else {
            bail!("no session for MCP '{name}'");
        };
        if let Err(error) = session.disconnect().await {
            warn!(mcp = %name, error = %format!("{error:#}"), "failed to disconnect removed session");
        }
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn McpSession>> {
        self.sessions.read().await.get(name).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn snapshot(&self) -> Vec<(String, Arc<dyn McpSession>)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(name, session)| (name.clone(), session.clone()))
            .collect()
    }

    /// Connect attempt loop with linear-growth exponential backoff.
    ///
    /// Runs on a manager-owned task; every sleep is interruptible by the
    /// manager token. After the final failure the status is left in `error`
    /// with a terminal reason.
    async fn connect_with_retry(self: &Arc<Self>, session: Arc<dyn McpSession>) {
        let definition = session.definition();
        let name = definition.name.clone();
        let attempts = definition.max_reconnects_or(self.config.max_reconnects).max(1);
        let base_delay = definition.reconnect_delay_or(self.config.reconnect_delay);
        let attempt_timeout = definition.timeout_or(self.config.connect_timeout);

        for attempt in 0..attempts {
            if self.shutdown.is_cancelled() {
                return;
            }
            if !self.owns_session(&name, &session).await {
                debug!(mcp = %name, "session removed, abandoning connect attempts");
                return;
            }

            session
                .status()
                .transition(ConnectionState::Connecting, None)
                .await;
            self.persist_status(&session).await;

            match timeout(attempt_timeout, session.connect()).await {
                Ok(Ok(())) => {
                    self.persist_status(&session).await;
                    info!(mcp = %name, "MCP client connected");
                    return;
                }
                Ok(Err(error)) => {
                    // The session already transitioned to error with the
                    // failure reason.
                    debug!(mcp = %name, attempt, error = %format!("{error:#}"), "connect attempt failed");
                }
                Err(_) => {
                    session
                        .status()
                        .transition(
                            ConnectionState::Error,
                            Some(format!("connect timed out after {attempt_timeout:?}")),
                        )
                        .await;
                }
            }
            self.persist_status(&session).await;

            let backoff = backoff_delay(base_delay, attempt);
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = sleep(backoff) => {}
            }
        }

        session
            .status()
            .transition(
                ConnectionState::Error,
                Some("maximum connection attempts exceeded".to_string()),
            )
            .await;
        self.persist_status(&session).await;
        warn!(mcp = %name, attempts, "giving up on MCP client connection");
    }

    /// True while `session` is still the mapped session for `name`; a
    /// removed or replaced session must not keep reconnecting.
    async fn owns_session(&self, name: &str, session: &Arc<dyn McpSession>) -> bool {
        self.sessions
            .read()
            .await
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, session))
    }

    /// Kick off a reconnect unless one is already in flight for this name.
    pub async fn trigger_reconnect(self: &Arc<Self>, name: &str) {
        {
            let mut inflight = self.reconnecting.lock().await;
            if !inflight.insert(name.to_string()) {
                debug!(mcp = %name, "reconnect already in flight");
                return;
            }
        }

        let Some(session) = self.get(name).await else {
            self.reconnecting.lock().await.remove(name);
            return;
        };

        let manager = self.clone();
        let name = name.to_string();
        self.tasks.spawn(async move {
            // Clear any half-open transport before retrying.
            if let Err(error) = session.disconnect().await {
                debug!(mcp = %name, error = %format!("{error:#}"), "pre-reconnect disconnect failed");
            }
            manager.connect_with_retry(session).await;
            manager.reconnecting.lock().await.remove(&name);
        });
    }

    fn spawn_health_supervisor(self: &Arc<Self>) {
        let manager = self.clone();
        self.tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => break,
                    _ = sleep(manager.config.health_check_interval) => {}
                }
                manager.run_health_pass().await;
            }
            debug!("health supervisor stopped");
        });
    }

    /// One supervisor tick: probe every connected, health-enabled session
    /// under the configured parallelism bound.
    async fn run_health_pass(self: &Arc<Self>) {
        let semaphore = Arc::new(Semaphore::new(self.config.health_check_parallelism.max(1)));
        let mut join = JoinSet::new();

        for (name, session) in self.snapshot().await {
            let definition = session.definition();
            if !definition.health_check_enabled || !session.is_connected().await {
                continue;
            }

            let manager = self.clone();
            let semaphore = semaphore.clone();
            join.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                manager
                    .probe_session(&name, session, definition.auto_reconnect)
                    .await;
            });
        }

        while join.join_next().await.is_some() {}
    }

    async fn probe_session(
        self: &Arc<Self>,
        name: &str,
        session: Arc<dyn McpSession>,
        auto_reconnect: bool,
    ) {
        let failure = match timeout(HEALTH_PROBE_TIMEOUT, session.health()).await {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(format!("health check failed: {error:#}")),
            Err(_) => Some(format!(
                "health check timed out after {HEALTH_PROBE_TIMEOUT:?}"
            )),
        };

        match failure {
            None => {
                if session.status().state().await != ConnectionState::Connected {
                    session
                        .status()
                        .transition(ConnectionState::Connected, None)
                        .await;
                    self.persist_status(&session).await;
                }
            }
            Some(reason) => {
                warn!(mcp = %name, reason = %reason, "unhealthy MCP client");
                session
                    .status()
                    .transition(ConnectionState::Error, Some(reason))
                    .await;
                self.persist_status(&session).await;
                if auto_reconnect {
                    self.trigger_reconnect(name).await;
                }
            }
        }
    }

    async fn persist_status(&self, session: &Arc<dyn McpSession>) {
        let snapshot = session.status().snapshot().await;
        if let Err(error) = self.storage.save_status(&snapshot).await {
            warn!(mcp = %snapshot.name, error = %error, "failed to persist status");
        }
    }

    pub async fn metrics(&self) -> ManagerMetrics {
        let sessions = self.snapshot().await;
        let total_clients = sessions.len();
        let mut connected = 0;
        let mut connecting = 0;
        let mut errored = 0;
        let mut total_requests = 0;
        let mut total_errors = 0;

        for (_, session) in sessions {
            let status = session.status().snapshot().await;
            match status.state {
                ConnectionState::Connected => connected += 1,
                ConnectionState::Connecting => connecting += 1,
                ConnectionState::Error => errored += 1,
                ConnectionState::Disconnected => {}
            }
            total_requests += status.total_requests;
            total_errors += status.total_errors;
        }

        ManagerMetrics {
            total_clients,
            connected,
            connecting,
            errored,
            disconnected: total_clients - connected - connecting - errored,
            total_requests,
            total_errors,
            max_connections: self.config.max_sessions,
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let scaled = base.mul_f64(1.5 * f64::from(attempt) + 1.0);
    scaled.min(MAX_BACKOFF)
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
