//! Gateway configuration: HTTP binding, storage selection, and the session
//! manager knobs. Loaded from a TOML file with CLI overrides on top; every
//! field has a default so a bare `mcp-gateway serve` works.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use mgw_core::duration;
use serde::{Deserialize, Serialize};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RECONNECTS: u32 = 5;
const DEFAULT_MAX_SESSIONS: usize = 100;
const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_HEALTH_CHECK_PARALLELISM: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// External base URL; defaults to `http://{host}:{port}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_shutdown_timeout", with = "duration")]
    pub shutdown_timeout: Duration,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub manager: ManagerKnobs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum StorageConfig {
    #[default]
    Memory,
    Redis {
        url: String,
    },
}

/// Session manager tuning; see the session crate for semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerKnobs {
    #[serde(default = "default_connect_timeout", with = "duration")]
    pub connect_timeout: Duration,
    #[serde(default = "default_reconnect_delay", with = "duration")]
    pub reconnect_delay: Duration,
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: u32,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_health_check_interval", with = "duration")]
    pub health_check_interval: Duration,
    #[serde(default = "default_health_check_parallelism")]
    pub health_check_parallelism: usize,
}

impl GatewayConfig {
    /// Load from a TOML file (when given) and apply CLI overrides.
    pub fn load(
        path: Option<&Path>,
        host_override: Option<String>,
        port_override: Option<u16>,
    ) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config: {}", path.display()))?;
                toml::from_str::<Self>(&raw)
                    .with_context(|| format!("failed to parse config: {}", path.display()))?
            }
            None => Self::default(),
        };

        if let Some(host) = host_override {
            config.host = host;
        }
        if let Some(port) = port_override {
            config.port = port;
        }
        Ok(config)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address '{}:{}'", self.host, self.port))
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: None,
            shutdown_timeout: default_shutdown_timeout(),
            storage: StorageConfig::default(),
            manager: ManagerKnobs::default(),
        }
    }
}

impl Default for ManagerKnobs {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            reconnect_delay: default_reconnect_delay(),
            max_reconnects: default_max_reconnects(),
            max_sessions: default_max_sessions(),
            health_check_interval: default_health_check_interval(),
            health_check_parallelism: default_health_check_parallelism(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_shutdown_timeout() -> Duration {
    DEFAULT_SHUTDOWN_TIMEOUT
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_reconnect_delay() -> Duration {
    DEFAULT_RECONNECT_DELAY
}

fn default_max_reconnects() -> u32 {
    DEFAULT_MAX_RECONNECTS
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

fn default_health_check_interval() -> Duration {
    DEFAULT_HEALTH_CHECK_INTERVAL
}

fn default_health_check_parallelism() -> usize {
    DEFAULT_HEALTH_CHECK_PARALLELISM
}
