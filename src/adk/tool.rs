// SPDX-License-Identifier: MIT

use crate::adk::error::TrellisError;
use crate::adk::memory::MemoryStore;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_NAMESPACE: &str = "default_user";

/// Run-scoped values a tool may need beyond its arguments
#[derive(Clone, Default)]
pub struct ToolContext {
    pub run_id: String,
    pub thread_id: Option<String>,
    pub user_id: Option<String>,
    pub memory: Option<Arc<dyn MemoryStore>>,
    pub cancel: CancellationToken,
}

impl ToolContext {
    /// Memory namespace for the current user
    pub fn namespace(&self) -> &str {
        self.user_id.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }
}

/// Trait for tools that can be called by agents.
///
/// `name()`, `description()` and `schema()` return borrowed values; store them
/// in struct fields rather than building them per call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool name (must be unique within a registry)
    fn name(&self) -> &str;

    /// Returns a human-readable description of what the tool does
    fn description(&self) -> &str;

    /// Returns the JSON schema for the tool's input parameters
    fn schema(&self) -> &Value;

    /// Execute the tool with the given input and return the result
    async fn execute(&self, input: Value) -> Result<Value, TrellisError>;

    /// Execute with access to run-scoped context. Tools that don't need it
    /// keep the default.
    async fn execute_with(&self, input: Value, _ctx: &ToolContext) -> Result<Value, TrellisError> {
        self.execute(input).await
    }
}
