// SPDX-License-Identifier: MIT

use super::tool::McpTool;
use super::{connect, tool_name, McpService};
use crate::adk::error::TrellisError;
use crate::adk::tool::Tool;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One stdio MCP server, as listed under `mcp_servers:` in a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

type ServiceMap = HashMap<String, Arc<RwLock<McpService>>>;

/// Starts each server once and hands out its tools
pub struct McpServiceManager {
    services: Arc<RwLock<ServiceMap>>,
}

impl McpServiceManager {
    pub fn new() -> Self {
        Self {
            services: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get_or_create_service(
        &self,
        config: &McpServerConfig,
    ) -> Result<Arc<RwLock<McpService>>, TrellisError> {
        if let Some(service) = self.services.read().await.get(&config.name) {
            return Ok(service.clone());
        }

        log::info!(
            "Starting MCP server '{}': {} {:?}",
            config.name,
            config.command,
            config.args
        );
        let service = Arc::new(RwLock::new(connect(&config.command, &config.args).await?));

        // a concurrent caller may have won the race; keep the first
        let mut services = self.services.write().await;
        Ok(services
            .entry(config.name.clone())
            .or_insert(service)
            .clone())
    }

    pub async fn get_service(&self, name: &str) -> Option<Arc<RwLock<McpService>>> {
        self.services.read().await.get(name).cloned()
    }

    /// Every tool the server offers, wrapped and namespaced
    pub async fn tools(&self, config: &McpServerConfig) -> Result<Vec<Arc<dyn Tool>>, TrellisError> {
        let service = self.get_or_create_service(config).await?;
        let listed = {
            let guard = service.read().await;
            guard
                .list_all_tools()
                .await
                .map_err(|e| TrellisError::api(format!("mcp:{}", config.name), e.to_string()))?
        };

        let tools = listed
            .into_iter()
            .map(|t| {
                let exposed = tool_name(&config.name, &t.name);
                log::info!("Registered MCP tool: {}", exposed);
                Arc::new(McpTool::new(
                    service.clone(),
                    exposed,
                    t.name.to_string(),
                    t.description.unwrap_or_default().to_string(),
                    serde_json::to_value(&t.input_schema).unwrap_or_default(),
                )) as Arc<dyn Tool>
            })
            .collect();
        Ok(tools)
    }
}

impl Default for McpServiceManager {
    fn default() -> Self {
        Self::new()
    }
}
