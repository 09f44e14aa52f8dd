// SPDX-License-Identifier: MIT

use super::McpService;
use crate::adk::error::TrellisError;
use crate::adk::tool::Tool;
use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A tool served by an MCP server
pub struct McpTool {
    service: Arc<RwLock<McpService>>,
    /// Name in the registry, `mcp__<server>__<tool>`
    name: String,
    /// Name the server knows the tool by
    remote_name: String,
    description: String,
    schema: Value,
}

impl McpTool {
    pub fn new(
        service: Arc<RwLock<McpService>>,
        name: String,
        remote_name: String,
        description: String,
        schema: Value,
    ) -> Self {
        Self {
            service,
            name,
            remote_name,
            description,
            schema,
        }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> &Value {
        &self.schema
    }

    async fn execute(&self, input: Value) -> Result<Value, TrellisError> {
        let arguments = match input {
            Value::Object(map) => Some(map),
            _ => None,
        };

        let service = self.service.read().await;
        let result = service
            .call_tool(CallToolRequestParam {
                name: self.remote_name.clone().into(),
                arguments,
            })
            .await
            .map_err(|e| TrellisError::api(self.name.clone(), e.to_string()))?;

        let value = serde_json::to_value(result)?;
        if value.get("isError").and_then(|v| v.as_bool()) == Some(true) {
            return Err(TrellisError::api(self.name.clone(), value["content"].to_string()));
        }
        Ok(value)
    }
}
