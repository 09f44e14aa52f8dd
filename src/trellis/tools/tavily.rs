// SPDX-License-Identifier: MIT

use crate::adk::error::TrellisError;
use crate::adk::tool::Tool;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;

const TAVILY_URL: &str = "https://api.tavily.com/search";

// --- Static schema ---

static TAVILY_SEARCH_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "The search query string."
            },
            "search_depth": {
                "type": "string",
                "enum": ["basic", "advanced"],
                "description": "'basic' for quick results, 'advanced' for more comprehensive results."
            },
            "include_answer": {
                "type": "boolean",
                "description": "Whether to include a concise answer to the query."
            },
            "max_results": {
                "type": "integer",
                "description": "The maximum number of search results to return (default 5)."
            },
            "include_domains": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Only return results from these domains."
            },
            "exclude_domains": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Never return results from these domains."
            }
        },
        "required": ["query"]
    })
});

#[derive(Debug, Serialize, Deserialize)]
pub struct TavilySearchArgs {
    pub query: String,
    #[serde(default, alias = "searchDepth")]
    pub search_depth: Option<String>,
    #[serde(default, alias = "includeAnswer")]
    pub include_answer: Option<bool>,
    #[serde(default, alias = "maxResults")]
    pub max_results: Option<u32>,
    #[serde(default, alias = "includeDomains")]
    pub include_domains: Option<Vec<String>>,
    #[serde(default, alias = "excludeDomains")]
    pub exclude_domains: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TavilySearchResult {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub results: Vec<SearchResult>,
}

pub struct TavilySearchTool {
    client: Client,
    api_key: String,
}

impl TavilySearchTool {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
        }
    }

    /// Needs `TAVILY_API_KEY`
    pub fn from_env() -> Result<Self, TrellisError> {
        let api_key = env::var("TAVILY_API_KEY")
            .map_err(|_| TrellisError::config("TAVILY_API_KEY must be set"))?;
        Ok(Self::new(api_key))
    }

    fn request_body(&self, args: &TavilySearchArgs) -> Value {
        let mut body = json!({
            "api_key": self.api_key,
            "query": args.query,
            "search_depth": args.search_depth.as_deref().unwrap_or("basic"),
            "include_answer": args.include_answer.unwrap_or(false),
            "max_results": args.max_results.unwrap_or(5).clamp(1, 20),
        });
        if let Some(domains) = &args.include_domains {
            body["include_domains"] = json!(domains);
        }
        if let Some(domains) = &args.exclude_domains {
            body["exclude_domains"] = json!(domains);
        }
        body
    }
}

#[async_trait]
impl Tool for TavilySearchTool {
    fn name(&self) -> &str {
        "tavily_search"
    }

    fn description(&self) -> &str {
        "Performs web searches using Tavily. Useful for general knowledge, current events, and detailed information retrieval."
    }

    fn schema(&self) -> &Value {
        &TAVILY_SEARCH_SCHEMA
    }

    async fn execute(&self, input: Value) -> Result<Value, TrellisError> {
        let args: TavilySearchArgs = serde_json::from_value(input)?;

        let resp = self
            .client
            .post(TAVILY_URL)
            .header("Accept", "application/json")
            .json(&self.request_body(&args))
            .send()
            .await?;

        if !resp.status().is_success() {
            let text = resp.text().await?;
            return Err(TrellisError::api("tavily", text));
        }

        let result: TavilySearchResult = resp.json().await?;
        Ok(serde_json::to_value(result)?)
    }
}
