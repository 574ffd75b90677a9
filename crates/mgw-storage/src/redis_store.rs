//! Redis storage driver.
//!
//! Definitions and status rows are JSON values under
//! `mcp_proxy:mcps:{name}` and `mcp_proxy:status:{name}`. Listing uses a
//! non-blocking `SCAN MATCH` followed by one batched `MGET`, so it never
//! stalls the server on large keyspaces.

use async_trait::async_trait;
use mgw_core::{McpDefinition, McpStatus};
use redis::{AsyncCommands, Client};
use tracing::{debug, warn};

use crate::{Result, Storage, StorageError, prepare_definition};

const MCP_KEY_PREFIX: &str = "mcp_proxy:mcps:";
const STATUS_KEY_PREFIX: &str = "mcp_proxy:status:";

pub struct RedisStorage {
    client: Client,
}

impl RedisStorage {
    /// Open a client and verify the server is responsive.
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let client = Client::open(connection_string)
            .map_err(|e| StorageError::Backend(format!("failed to create redis client: {e}")))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect to redis: {e}")))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(format!("redis ping failed: {e}")))?;

        debug!("redis storage connected");
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StorageError::Backend(format!("redis connection failed: {e}")))
    }
}

fn mcp_key(name: &str) -> String {
    format!("{MCP_KEY_PREFIX}{name}")
}

fn status_key(name: &str) -> String {
    format!("{STATUS_KEY_PREFIX}{name}")
}

#[async_trait]
impl Storage for RedisStorage {
    async fn save_mcp(&self, definition: &McpDefinition) -> Result<()> {
        let prepared = prepare_definition(definition)?;
        let payload = serde_json::to_string(&prepared)
            .map_err(|e| StorageError::Backend(format!("failed to encode definition: {e}")))?;

        let mut conn = self.connection().await?;
        let _: () = conn
            .set(mcp_key(&prepared.name), payload)
            .await
            .map_err(|e| StorageError::Backend(format!("redis set failed: {e}")))?;
        Ok(())
    }

    async fn load_mcp(&self, name: &str) -> Result<McpDefinition> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn
            .get(mcp_key(name))
            .await
            .map_err(|e| StorageError::Backend(format!("redis get failed: {e}")))?;

        let payload = payload.ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        let mut definition: McpDefinition = serde_json::from_str(&payload)
            .map_err(|e| StorageError::Backend(format!("failed to decode definition: {e}")))?;
        definition.apply_defaults();
        Ok(definition)
    }

    async fn delete_mcp(&self, name: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let removed: u64 = conn
            .del(mcp_key(name))
            .await
            .map_err(|e| StorageError::Backend(format!("redis del failed: {e}")))?;
        if removed == 0 {
            return Err(StorageError::NotFound(name.to_string()));
        }

        let status_cleanup: std::result::Result<u64, _> = conn.del(status_key(name)).await;
        if let Err(error) = status_cleanup {
            warn!(mcp = %name, error = %error, "failed to delete status entry");
        }
        Ok(())
    }

    async fn list_mcps(&self) -> Result<Vec<McpDefinition>> {
        let mut conn = self.connection().await?;
        let pattern = format!("{MCP_KEY_PREFIX}*");
        let mut keys = Vec::new();
        {
            let mut iter: redis::AsyncIter<'_, String> = conn
                .scan_match(&pattern)
                .await
                .map_err(|e| StorageError::Backend(format!("redis scan failed: {e}")))?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }

        if keys.is_empty() {
            return Ok(Vec::new());
        }
        keys.sort();

        let mut conn = self.connection().await?;
        let payloads: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::Backend(format!("redis mget failed: {e}")))?;

        let mut definitions = Vec::with_capacity(payloads.len());
        for (key, payload) in keys.iter().zip(payloads) {
            let Some(payload) = payload else {
                // Deleted between SCAN and MGET.
                continue;
            };
            match serde_json::from_str::<McpDefinition>(&payload) {
                Ok(mut definition) => {
                    definition.apply_defaults();
                    definitions.push(definition);
                }
                Err(error) => {
                    warn!(key = %key, error = %error, "skipping undecodable definition");
                }
            }
        }
        Ok(definitions)
    }

    async fn save_status(&self, status: &McpStatus) -> Result<()> {
        let payload = serde_json::to_string(status)
            .map_err(|e| StorageError::Backend(format!("failed to encode status: {e}")))?;

        let mut conn = self.connection().await?;
        let _: () = conn
            .set(status_key(&status.name), payload)
            .await
            .map_err(|e| StorageError::Backend(format!("redis set failed: {e}")))?;
        Ok(())
    }

    async fn load_status(&self, name: &str) -> Result<McpStatus> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn
            .get(status_key(name))
            .await
            .map_err(|e| StorageError::Backend(format!("redis get failed: {e}")))?;

        match payload {
            Some(payload) => serde_json::from_str(&payload)
                .map_err(|e| StorageError::Backend(format!("failed to decode status: {e}"))),
            None => Ok(McpStatus::new(name)),
        }
    }

    async fn close(&self) -> Result<()> {
        // Multiplexed connections close when the client drops.
        Ok(())
    }
}
