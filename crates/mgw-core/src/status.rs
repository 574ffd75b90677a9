//! Observed runtime state of one downstream MCP.
//!
//! A `StatusHandle` is the shared, lock-guarded owner; `McpStatus` is the
//! plain snapshot that crosses boundaries (storage, admin API). All mutation
//! goes through the four operations `transition`, `record_request`,
//! `increment_errors`, and `snapshot`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::duration;

/// Weight of history in the response-time moving average.
const EMA_HISTORY_WEIGHT: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Point-in-time status snapshot for one downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpStatus {
    pub name: String,
    pub state: ConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reconnect_attempts: u32,
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub total_errors: u64,
    #[serde(default, with = "duration")]
    pub avg_response_time: Duration,
    /// Derived at snapshot time: `now - last_connected` while connected,
    /// zero otherwise.
    #[serde(default, with = "duration")]
    pub uptime: Duration,
}

impl McpStatus {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: ConnectionState::Disconnected,
            last_connected: None,
            last_error: None,
            last_error_time: None,
            reconnect_attempts: 0,
            total_requests: 0,
            total_errors: 0,
            avg_response_time: Duration::ZERO,
            uptime: Duration::ZERO,
        }
    }
}

/// Shared, mutation-guarded status for one session.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    inner: Arc<RwLock<McpStatus>>,
}

impl StatusHandle {
    pub fn new(name: &str) -> Self {
        Self::from_status(McpStatus::new(name))
    }

    /// Resume from a persisted snapshot (counters survive reloads).
    pub fn from_status(status: McpStatus) -> Self {
        Self {
            inner: Arc::new(RwLock::new(status)),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.read().await.state
    }

    /// Apply a state transition with its bookkeeping side effects.
    pub async fn transition(&self, state: ConnectionState, error: Option<String>) {
        let mut status = self.inner.write().await;
        status.state = state;
        match state {
            ConnectionState::Connected => {
                status.last_connected = Some(Utc::now());
                status.last_error = None;
                status.last_error_time = None;
                status.reconnect_attempts = 0;
            }
            ConnectionState::Error => {
                status.last_error = error;
                status.last_error_time = Some(Utc::now());
                status.total_errors += 1;
            }
            ConnectionState::Connecting => {
                status.reconnect_attempts += 1;
            }
            ConnectionState::Disconnected => {}
        }
    }

    /// Count a completed request and fold its latency into the moving
    /// average (first sample seeds the average directly).
    pub async fn record_request(&self, elapsed: Duration) {
        let mut status = self.inner.write().await;
        status.total_requests += 1;
        if status.total_requests == 1 {
            status.avg_response_time = elapsed;
        } else {
            let blended = status.avg_response_time.as_secs_f64() * EMA_HISTORY_WEIGHT
                + elapsed.as_secs_f64() * (1.0 - EMA_HISTORY_WEIGHT);
            status.avg_response_time = Duration::from_secs_f64(blended);
        }
    }

    pub async fn increment_errors(&self) {
        self.inner.write().await.total_errors += 1;
    }

    /// Deep snapshot with `uptime` computed at read time.
    pub async fn snapshot(&self) -> McpStatus {
        let status = self.inner.read().await;
        let mut copy = status.clone();
        copy.uptime = match (status.state, status.last_connected) {
            (ConnectionState::Connected, Some(since)) => (Utc::now() - since)
                .to_std()
                .unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        };
        copy
    }
}
