//! Persistence contract for MCP definitions and status projections.
//!
//! Two drivers ship with the gateway: an in-memory driver for tests and
//! ephemeral deployments, and a Redis driver namespacing keys under
//! `mcp_proxy:`. Driver-specific failures are translated into the neutral
//! sentinels of [`StorageError`]; callers never see backend error types.

mod memory;
mod redis_store;

pub use memory::MemoryStorage;
pub use redis_store::RedisStorage;

use async_trait::async_trait;
use mgw_core::{DefinitionError, McpDefinition, McpStatus};

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("MCP '{0}' not found")]
    NotFound(String),

    #[error("invalid MCP definition: {0}")]
    InvalidDefinition(#[from] DefinitionError),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage for definitions and status, thread-safe at the operation level.
///
/// Each method is atomic on its own; the service layer composes them with
/// explicit compensating operations instead of transactions.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Validate, apply defaults, and persist; overwrites on conflict.
    async fn save_mcp(&self, definition: &McpDefinition) -> Result<()>;

    async fn load_mcp(&self, name: &str) -> Result<McpDefinition>;

    /// Returns `NotFound` when absent; also best-effort deletes the
    /// associated status entry.
    async fn delete_mcp(&self, name: &str) -> Result<()>;

    /// All current definitions, each returned as an independent clone.
    async fn list_mcps(&self) -> Result<Vec<McpDefinition>>;

    /// Upsert keyed by `status.name`.
    async fn save_status(&self, status: &McpStatus) -> Result<()>;

    /// A fresh `disconnected` status when absent -- never an error.
    async fn load_status(&self, name: &str) -> Result<McpStatus>;

    async fn close(&self) -> Result<()>;
}

/// Shared save-path preparation: validation then idempotent defaulting.
fn prepare_definition(definition: &McpDefinition) -> Result<McpDefinition> {
    definition.validate()?;
    let mut prepared = definition.clone();
    prepared.apply_defaults();
    Ok(prepared)
}
