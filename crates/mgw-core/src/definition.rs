//! Declarative identity of one downstream MCP server.
//!
//! Definitions are immutable value objects: every boundary crossing hands out
//! a deep clone (all fields are owned data, so `Clone` is a deep copy), and
//! `apply_defaults` is idempotent so it can run on every load and save.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::duration;
use crate::error::DefinitionError;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RECONNECTS: u32 = 5;

/// Wire transport spoken by a downstream MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Stdio,
    Sse,
    StreamableHttp,
}

impl TransportKind {
    /// Short human-readable label, used in log fields and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable-http",
        }
    }

    /// HTTP-based transports share the url/headers/timeout field group.
    pub fn is_http(&self) -> bool {
        matches!(self, Self::Sse | Self::StreamableHttp)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Tool visibility filter applied while mirroring a downstream's tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFilter {
    pub mode: ToolFilterMode,
    pub list: Vec<String>,
}

/// Filter mode. Unrecognized values deserialize to `Unknown`; the capability
/// loader treats that as accept-all and warns rather than rejecting the
/// definition outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolFilterMode {
    Allow,
    Block,
    #[serde(other)]
    Unknown,
}

/// Declarative configuration for one downstream MCP.
///
/// Serialized with snake-case keys; this struct is the admin API request and
/// response body as well as the storage record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpDefinition {
    pub name: String,
    pub transport: TransportKind,

    // stdio transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    // sse / streamable-http transports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(
        default,
        with = "duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    // reconnect policy
    #[serde(default)]
    pub auto_reconnect: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reconnects: Option<u32>,
    #[serde(
        default,
        with = "duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub reconnect_delay: Option<Duration>,

    // health policy
    #[serde(default)]
    pub health_check_enabled: bool,
    #[serde(
        default,
        with = "duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub health_check_interval: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_filter: Option<ToolFilter>,
    #[serde(default)]
    pub log_enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl McpDefinition {
    /// Minimal stdio definition; the usual starting point in tests.
    pub fn stdio(name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportKind::Stdio,
            command: Some(command.to_string()),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Self::empty(name)
        }
    }

    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportKind::Stdio,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
            timeout: None,
            auto_reconnect: false,
            max_reconnects: None,
            reconnect_delay: None,
            health_check_enabled: false,
            health_check_interval: None,
            tool_filter: None,
            log_enabled: false,
            tags: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Validate in order, short-circuiting on the first failure: name,
    /// transport-specific required fields, field exclusivity, tool filter.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(DefinitionError::UnsafeName(self.name.clone()));
        }

        match self.transport {
            TransportKind::Stdio => {
                if self.command.as_deref().unwrap_or("").trim().is_empty() {
                    return Err(DefinitionError::MissingCommand {
                        name: self.name.clone(),
                    });
                }
                if self.url.is_some() {
                    return Err(DefinitionError::ForeignField {
                        name: self.name.clone(),
                        field: "url",
                        transport: self.transport.to_string(),
                    });
                }
            }
            TransportKind::Sse | TransportKind::StreamableHttp => {
                if self.url.as_deref().unwrap_or("").trim().is_empty() {
                    return Err(DefinitionError::MissingUrl {
                        name: self.name.clone(),
                        transport: self.transport.to_string(),
                    });
                }
                if self.command.is_some() {
                    return Err(DefinitionError::ForeignField {
                        name: self.name.clone(),
                        field: "command",
                        transport: self.transport.to_string(),
                    });
                }
            }
        }

        if let Some(filter) = &self.tool_filter {
            if filter.list.is_empty() {
                return Err(DefinitionError::EmptyToolFilter {
                    name: self.name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Populate defaulted fields in place. Idempotent; applied on every load
    /// and save.
    pub fn apply_defaults(&mut self) {
        let now = Utc::now();
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        if self.updated_at.is_none() {
            self.updated_at = Some(now);
        }
        if self.transport.is_http() && self.timeout.is_none() {
            self.timeout = Some(DEFAULT_HTTP_TIMEOUT);
        }
        if self.health_check_enabled && self.health_check_interval.is_none() {
            self.health_check_interval = Some(DEFAULT_HEALTH_CHECK_INTERVAL);
        }
        if self.auto_reconnect {
            if self.max_reconnects.is_none() {
                self.max_reconnects = Some(DEFAULT_MAX_RECONNECTS);
            }
            if self.reconnect_delay.is_none() {
                self.reconnect_delay = Some(DEFAULT_RECONNECT_DELAY);
            }
        }
    }

    /// Per-attempt connect timeout: the definition's, or the caller-provided
    /// fallback when unset.
    pub fn timeout_or(&self, fallback: Duration) -> Duration {
        match self.timeout {
            Some(timeout) if timeout > Duration::ZERO => timeout,
            _ => fallback,
        }
    }

    pub fn health_check_interval_or(&self, fallback: Duration) -> Duration {
        self.health_check_interval.unwrap_or(fallback)
    }

    pub fn max_reconnects_or(&self, fallback: u32) -> u32 {
        self.max_reconnects.unwrap_or(fallback)
    }

    pub fn reconnect_delay_or(&self, fallback: Duration) -> Duration {
        self.reconnect_delay.unwrap_or(fallback)
    }
}
