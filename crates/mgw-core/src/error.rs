use crate::definition::McpDefinition;

/// Validation failures for a downstream MCP definition.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("MCP name must not be empty")]
    EmptyName,

    #[error("MCP name '{0}' is not URL-path-safe (allowed: alphanumerics, '-', '_', '.')")]
    UnsafeName(String),

    #[error("MCP '{name}': stdio transport requires 'command'")]
    MissingCommand { name: String },

    #[error("MCP '{name}': {transport} transport requires 'url'")]
    MissingUrl { name: String, transport: String },

    #[error("MCP '{name}': '{field}' does not apply to {transport} transport")]
    ForeignField {
        name: String,
        field: &'static str,
        transport: String,
    },

    #[error("MCP '{name}': tool_filter.list must not be empty")]
    EmptyToolFilter { name: String },
}

/// Sentinel error kinds surfaced by the gateway service.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("MCP '{0}' not found")]
    NotFound(String),

    #[error("MCP '{0}' already exists")]
    AlreadyExists(String),

    #[error("invalid MCP definition: {0}")]
    InvalidDefinition(#[from] DefinitionError),

    #[error("storage operation failed: {0}")]
    Storage(String),

    #[error("proxy registration failed for '{name}': {reason}")]
    ProxyRegistration { name: String, reason: String },

    /// Storage succeeded but the runtime reload did not; storage is
    /// authoritative, so the persisted definition rides along for callers.
    #[error("hot reload failed for '{name}': {reason}")]
    HotReload {
        name: String,
        reason: String,
        definition: Box<McpDefinition>,
    },

    #[error("MCP client '{0}' is not connected")]
    ClientNotConnected(String),

    #[error("tool call '{name}' failed: {reason}")]
    ToolCallFailed { name: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_not_found() {
        let err = GatewayError::NotFound("echo".into());
        assert_eq!(err.to_string(), "MCP 'echo' not found");
    }

    #[test]
    fn test_display_already_exists() {
        let err = GatewayError::AlreadyExists("dup".into());
        assert_eq!(err.to_string(), "MCP 'dup' already exists");
    }

    #[test]
    fn test_display_invalid_definition_wraps_cause() {
        let err = GatewayError::from(DefinitionError::MissingCommand {
            name: "tool".into(),
        });
        assert_eq!(
            err.to_string(),
            "invalid MCP definition: MCP 'tool': stdio transport requires 'command'"
        );
    }

    #[test]
    fn test_display_hot_reload_carries_definition_payload() {
        let err = GatewayError::HotReload {
            name: "t".into(),
            reason: "session limit reached".into(),
            definition: Box::new(McpDefinition::stdio("t", "node", &["b.js"])),
        };
        assert_eq!(
            err.to_string(),
            "hot reload failed for 't': session limit reached"
        );
        let GatewayError::HotReload { definition, .. } = err else {
            unreachable!();
        };
        assert_eq!(definition.args, vec!["b.js"]);
    }

    #[test]
    fn test_display_client_not_connected() {
        let err = GatewayError::ClientNotConnected("remote".into());
        assert_eq!(err.to_string(), "MCP client 'remote' is not connected");
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GatewayError>();
        assert_send_sync::<DefinitionError>();
    }
}
