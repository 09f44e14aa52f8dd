// SPDX-License-Identifier: MIT

//! Long-term memory tools, scoped to the calling user's namespace

use crate::adk::error::TrellisError;
use crate::adk::tool::{Tool, ToolContext};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_LIMIT: usize = 3;

static PUT_MEMORY_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "key": { "type": "string", "description": "A unique key for the memory within the namespace." },
            "value": { "type": "string", "description": "The content of the memory to store." }
        },
        "required": ["key", "value"]
    })
});

static SEARCH_MEMORY_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "query": { "type": "string", "description": "Natural language query." },
            "limit": { "type": "integer", "description": "The maximum number of results to return (default 3)." }
        },
        "required": ["query"]
    })
});

#[derive(Debug, Deserialize)]
struct PutArgs {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

fn store(ctx: &ToolContext) -> Result<&dyn crate::adk::memory::MemoryStore, TrellisError> {
    ctx.memory
        .as_deref()
        .ok_or_else(|| TrellisError::config("no memory store configured for this run"))
}

pub struct PutMemoryTool;

#[async_trait]
impl Tool for PutMemoryTool {
    fn name(&self) -> &str {
        "put_memory"
    }

    fn description(&self) -> &str {
        "Stores a piece of information in long-term memory. Use this to remember user preferences or facts."
    }

    fn schema(&self) -> &Value {
        &PUT_MEMORY_SCHEMA
    }

    async fn execute(&self, input: Value) -> Result<Value, TrellisError> {
        self.execute_with(input, &ToolContext::default()).await
    }

    async fn execute_with(&self, input: Value, ctx: &ToolContext) -> Result<Value, TrellisError> {
        let args: PutArgs = serde_json::from_value(input)?;
        let namespace = ctx.namespace();
        store(ctx)?.put(namespace, &args.key, &args.value).await?;
        log::debug!("Stored memory '{}' for {}", args.key, namespace);
        Ok(json!({
            "status": format!("Memory stored for user {} with key {}.", namespace, args.key)
        }))
    }
}

pub struct SearchMemoryTool;

#[async_trait]
impl Tool for SearchMemoryTool {
    fn name(&self) -> &str {
        "search_memory"
    }

    fn description(&self) -> &str {
        "Searches long-term memory for information related to a natural language query."
    }

    fn schema(&self) -> &Value {
        &SEARCH_MEMORY_SCHEMA
    }

    async fn execute(&self, input: Value) -> Result<Value, TrellisError> {
        self.execute_with(input, &ToolContext::default()).await
    }

    async fn execute_with(&self, input: Value, ctx: &ToolContext) -> Result<Value, TrellisError> {
        let args: SearchArgs = serde_json::from_value(input)?;
        let limit = args.limit.unwrap_or(DEFAULT_LIMIT).max(1);
        let hits = store(ctx)?.search(ctx.namespace(), &args.query, limit).await?;
        Ok(json!({
            "memories": hits
                .iter()
                .map(|h| json!({ "value": h.value, "score": h.score }))
                .collect::<Vec<_>>()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::memory::{InMemoryStore, MemoryStore};
    use std::sync::Arc;

    fn ctx(user: Option<&str>, store: Arc<InMemoryStore>) -> ToolContext {
        ToolContext {
            user_id: user.map(|u| u.to_string()),
            memory: Some(store),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_put_then_search_in_user_namespace() {
        let store = Arc::new(InMemoryStore::new());
        let alice = ctx(Some("alice"), store.clone());

        PutMemoryTool
            .execute_with(json!({"key": "food", "value": "likes spicy ramen"}), &alice)
            .await
            .unwrap();

        let found = SearchMemoryTool
            .execute_with(json!({"query": "ramen"}), &alice)
            .await
            .unwrap();
        assert_eq!(found["memories"][0]["value"], "likes spicy ramen");

        // other users do not see it
        let bob = ctx(Some("bob"), store.clone());
        let nothing = SearchMemoryTool
            .execute_with(json!({"query": "ramen"}), &bob)
            .await
            .unwrap();
        assert_eq!(nothing["memories"], json!([]));
    }

    #[tokio::test]
    async fn test_default_namespace_and_missing_store() {
        let store = Arc::new(InMemoryStore::new());
        let anon = ctx(None, store.clone());
        PutMemoryTool
            .execute_with(json!({"key": "k", "value": "v"}), &anon)
            .await
            .unwrap();
        assert_eq!(
            store.get("default_user", "k").await.unwrap().as_deref(),
            Some("v")
        );

        let err = PutMemoryTool
            .execute(json!({"key": "k", "value": "v"}))
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::Config(_)));
    }
}
