// SPDX-License-Identifier: MIT

//! Research and report
//!
//! Two researchers work the query side by side: one searches the web, the
//! other asks the model what it already knows. Their findings accumulate in
//! `research_data`, and the summarizer only runs once both have been merged.
//! The reporter turns the summary into the final answer.

use super::crag::SEARCH_TOOL;
use super::{apology, ask, conversation_graph, reply, task_text};
use crate::adk::error::TrellisError;
use crate::trellis::graph::{Channel, FnNode, Node, RunContext, State, StateGraph, Update, END};
use crate::trellis::messages::MESSAGES;
use crate::trellis::prompt::value_text;
use async_trait::async_trait;
use serde_json::json;

pub const NAME: &str = "research";

pub const QUERY: &str = "query";
pub const RESEARCH_DATA: &str = "research_data";
pub const SUMMARY: &str = "summary";
pub const REPORT: &str = "report";

/// Research branches, merged in this order
pub const RESEARCHERS: [&str; 2] = ["web_researcher", "model_researcher"];

const RESEARCHER_PROMPT: &str = "You are a research assistant. Gather the facts that answer the \
user's query and present them as concise notes.";

const SUMMARIZER_PROMPT: &str = "You are a summarization expert. Summarize the following research \
data concisely.";

const REPORTER_PROMPT: &str = "You are a report writer. Generate a comprehensive report based on \
the following summary.";

/// Web search through the registered search tool; finds nothing when the
/// tool is unavailable
pub struct WebResearchNode;

#[async_trait]
impl Node for WebResearchNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        let query = task_text(state, QUERY);
        match ctx
            .tools()
            .execute(SEARCH_TOOL, json!({ "query": query }), &ctx.tool_context())
            .await
        {
            Ok(found) => Ok(Update::new().set(RESEARCH_DATA, json!(value_text(&found)))),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                log::warn!("Web research skipped: {}", e);
                Ok(Update::new())
            }
        }
    }
}

pub struct ModelResearchNode;

#[async_trait]
impl Node for ModelResearchNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        match ask(ctx, RESEARCHER_PROMPT, task_text(state, QUERY)).await {
            Ok(notes) => Ok(Update::new().set(RESEARCH_DATA, json!(notes))),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => Ok(Update::new().set(MESSAGES, apology("during research", &e))),
        }
    }
}

pub struct SummarizerNode;

#[async_trait]
impl Node for SummarizerNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        let data: Vec<String> = state.get_array(RESEARCH_DATA).iter().map(value_text).collect();
        match ask(ctx, SUMMARIZER_PROMPT, data.join("\n\n")).await {
            Ok(summary) => Ok(Update::new().set(SUMMARY, json!(summary))),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => Ok(Update::new().set(MESSAGES, apology("summarizing", &e))),
        }
    }
}

pub struct ReporterNode;

#[async_trait]
impl Node for ReporterNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        let summary = state.get_str(SUMMARY).unwrap_or_default().to_string();
        match ask(ctx, REPORTER_PROMPT, summary).await {
            Ok(report) => Ok(Update::new()
                .set(REPORT, json!(report))
                .set(MESSAGES, reply(&report))),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => Ok(Update::new().set(MESSAGES, apology("reporting", &e))),
        }
    }
}

pub fn graph() -> StateGraph {
    let mut graph = conversation_graph(NAME);
    graph
        .add_channel(Channel::replace(QUERY, json!("")))
        .add_channel(Channel::append(RESEARCH_DATA))
        .add_channel(Channel::replace(SUMMARY, json!("")))
        .add_channel(Channel::replace(REPORT, json!("")))
        .add_node(
            "start",
            FnNode::new(|state| Ok(Update::new().set(QUERY, json!(task_text(state, QUERY)))))
                .with_writes([QUERY]),
        )
        .add_node(RESEARCHERS[0], WebResearchNode)
        .add_node(RESEARCHERS[1], ModelResearchNode)
        .add_node("summarizer", SummarizerNode)
        .add_node("reporter", ReporterNode)
        .add_fan_out("start", RESEARCHERS, "summarizer")
        .add_edge("summarizer", "reporter")
        .add_edge("reporter", END)
        .set_entry_point("start");
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::tool::Tool;
    use crate::trellis::messages;
    use crate::trellis::registry::ToolRegistry;
    use crate::trellis::workflows::testing::ScriptedModel;
    use once_cell::sync::Lazy;
    use serde_json::Value;
    use std::sync::Arc;

    static QUERY_SCHEMA: Lazy<Value> = Lazy::new(|| {
        json!({ "type": "object", "properties": { "query": { "type": "string" } } })
    });

    struct FakeSearch;

    #[async_trait]
    impl Tool for FakeSearch {
        fn name(&self) -> &str {
            SEARCH_TOOL
        }

        fn description(&self) -> &str {
            "Canned search results"
        }

        fn schema(&self) -> &Value {
            &QUERY_SCHEMA
        }

        async fn execute(&self, input: Value) -> Result<Value, TrellisError> {
            Ok(json!(format!("web: {} is popular", input["query"].as_str().unwrap_or(""))))
        }
    }

    #[tokio::test]
    async fn test_branches_join_before_summary() {
        let model = ScriptedModel::texts(&["model: rust is fast", "short summary", "full report"]);
        let tools = ToolRegistry::new();
        tools.register(Arc::new(FakeSearch)).await;
        let ctx = RunContext::new().with_model(model.clone()).with_tools(tools);

        let outcome = graph()
            .compile()
            .unwrap()
            .invoke(Update::new().set(MESSAGES, json!("rust")), &ctx)
            .await;

        assert!(outcome.is_completed());
        assert_eq!(
            outcome.trace,
            vec!["start", "web_researcher", "model_researcher", "summarizer", "reporter"]
        );
        assert_eq!(outcome.steps, 4);
        assert_eq!(
            outcome.state.get(RESEARCH_DATA),
            Some(&json!(["web: rust is popular", "model: rust is fast"]))
        );
        // the summarizer saw both findings
        assert_eq!(
            model.prompts()[1],
            "web: rust is popular\n\nmodel: rust is fast"
        );
        assert_eq!(outcome.state.get_str(SUMMARY), Some("short summary"));
        assert_eq!(outcome.state.get_str(REPORT), Some("full report"));
        assert_eq!(messages::last_text(&outcome.state, MESSAGES), "full report");
    }

    #[tokio::test]
    async fn test_missing_search_tool_still_reports() {
        let model = ScriptedModel::texts(&["notes", "summary", "report"]);
        let ctx = RunContext::new().with_model(model);

        let outcome = graph()
            .compile()
            .unwrap()
            .invoke(Update::new().set(QUERY, json!("tides")), &ctx)
            .await;

        assert!(outcome.is_completed());
        assert_eq!(outcome.state.get(RESEARCH_DATA), Some(&json!(["notes"])));
        assert_eq!(outcome.state.get_str(REPORT), Some("report"));
    }
}
