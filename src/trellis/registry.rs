// SPDX-License-Identifier: MIT

use crate::adk::error::TrellisError;
use crate::adk::tool::{Tool, ToolContext};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared name -> tool table. Clones see the same tools.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<BTreeMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let mut tools = self.tools.write().await;
        if tools.insert(tool.name().to_string(), tool.clone()).is_some() {
            log::warn!("Tool '{}' registered twice, keeping the latest", tool.name());
        }
    }

    pub async fn register_all(&self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) {
        for tool in tools {
            self.register(tool).await;
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        tools.get(name).cloned()
    }

    /// All tools, sorted by name
    pub async fn list(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.read().await.values().cloned().collect()
    }

    /// Tools whose names are listed, in the order given; unknown names are skipped
    pub async fn select(&self, names: &[String]) -> Vec<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        names
            .iter()
            .filter_map(|n| {
                let found = tools.get(n).cloned();
                if found.is_none() {
                    log::warn!("Tool '{}' requested but not registered", n);
                }
                found
            })
            .collect()
    }

    pub async fn names(&self) -> Vec<String> {
        self.tools.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }

    /// Look up and run a tool
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<Value, TrellisError> {
        let tool = self
            .get(name)
            .await
            .ok_or_else(|| TrellisError::tool_not_found(name))?;
        tool.execute_with(args, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
