//! In-memory storage driver holding cloned value objects under locks.

use std::collections::HashMap;

use async_trait::async_trait;
use mgw_core::{McpDefinition, McpStatus};
use tokio::sync::RwLock;

use crate::{Result, Storage, StorageError, prepare_definition};

#[derive(Default)]
pub struct MemoryStorage {
    mcps: RwLock<HashMap<String, McpDefinition>>,
    statuses: RwLock<HashMap<String, McpStatus>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_mcp(&self, definition: &McpDefinition) -> Result<()> {
        let prepared = prepare_definition(definition)?;
        self.mcps
            .write()
            .await
            .insert(prepared.name.clone(), prepared);
        Ok(())
    }

    async fn load_mcp(&self, name: &str) -> Result<McpDefinition> {
        let mcps = self.mcps.read().await;
        let mut definition = mcps
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        definition.apply_defaults();
        Ok(definition)
    }

    async fn delete_mcp(&self, name: &str) -> Result<()> {
        let removed = self.mcps.write().await.remove(name);
        if removed.is_none() {
            return Err(StorageError::NotFound(name.to_string()));
        }
        self.statuses.write().await.remove(name);
        Ok(())
    }

    async fn list_mcps(&self) -> Result<Vec<McpDefinition>> {
        let mcps = self.mcps.read().await;
        let mut definitions: Vec<McpDefinition> = mcps
            .values()
            .map(|definition| {
                let mut copy = definition.clone();
                copy.apply_defaults();
                copy
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(definitions)
    }

    async fn save_status(&self, status: &McpStatus) -> Result<()> {
        self.statuses
            .write()
            .await
            .insert(status.name.clone(), status.clone());
        Ok(())
    }

    async fn load_status(&self, name: &str) -> Result<McpStatus> {
        let statuses = self.statuses.read().await;
        Ok(statuses
            .get(name)
            .cloned()
            .unwrap_or_else(|| McpStatus::new(name)))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
