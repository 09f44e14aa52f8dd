// SPDX-License-Identifier: MIT

//! Ready-made workflows built on the graph engine
//!
//! Every workflow declares the `messages` and `next` channels so any of them
//! can be mounted under the [`supervisor`] as a subgraph. Each reads its task
//! from its own input channel when set, otherwise from the latest user
//! message, and appends its answer to `messages`.

pub mod conversational;
pub mod crag;
pub mod plan_execute;
pub mod rag;
pub mod react;
pub mod reflection;
pub mod research;
pub mod rewoo;
pub mod self_rag;
pub mod supervisor;
pub mod teams;

use crate::adk::error::TrellisError;
use crate::adk::model::Content;
use crate::trellis::graph::{Channel, CompiledGraph, RunContext, State, StateGraph};
use crate::trellis::messages::{self, MESSAGES};
use crate::trellis::toolloop::NEXT;
use serde_json::Value;
use std::sync::Arc;

/// Names accepted by [`build`], in the order the supervisor offers them
pub const WORKFLOWS: [&str; 12] = [
    react::NAME,
    rag::NAME,
    conversational::NAME,
    research::NAME,
    rewoo::NAME,
    plan_execute::NAME,
    self_rag::NAME,
    crag::NAME,
    teams::COLLABORATION,
    teams::RESEARCH_TEAM,
    teams::DOCUMENT_WRITING_TEAM,
    reflection::NAME,
];

/// Compile a workflow by name with its default prompts
pub fn build(name: &str) -> Result<Arc<CompiledGraph>, TrellisError> {
    let graph = match name {
        react::NAME => react::graph(Vec::new()),
        rag::NAME => rag::graph(),
        conversational::NAME => conversational::graph(),
        research::NAME => research::graph(),
        rewoo::NAME => rewoo::graph(),
        plan_execute::NAME => plan_execute::graph(),
        self_rag::NAME => self_rag::graph(),
        crag::NAME => crag::graph()?,
        teams::COLLABORATION => teams::collaboration(),
        teams::RESEARCH_TEAM => teams::research_team(),
        teams::DOCUMENT_WRITING_TEAM => teams::document_writing_team(),
        reflection::NAME => reflection::graph(),
        supervisor::NAME => supervisor::graph()?,
        other => {
            return Err(TrellisError::config(format!(
                "unknown workflow '{}' (expected one of {}, {})",
                other,
                WORKFLOWS.join(", "),
                supervisor::NAME
            )))
        }
    };
    Ok(Arc::new(graph.compile()?))
}

/// Graph with the conversation channels every workflow shares
pub(crate) fn conversation_graph(name: &str) -> StateGraph {
    let mut graph = StateGraph::new(name);
    graph
        .add_channel(Channel::append(MESSAGES))
        .add_channel(Channel::replace(NEXT, Value::Null));
    graph
}

/// `channel` when it holds text, otherwise the latest user message
pub(crate) fn task_text(state: &State, channel: &str) -> String {
    state
        .get_str(channel)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .or_else(|| messages::last_user_text(state, MESSAGES))
        .unwrap_or_default()
}

/// One system + user exchange with the run's model
pub(crate) async fn ask(ctx: &RunContext, system: &str, prompt: String) -> Result<String, TrellisError> {
    ctx.check_cancelled()?;
    let model = ctx.model()?;
    let history = [Content::system(system), Content::user(prompt)];
    let reply = model.generate_content(&history, None, None).await?;
    Ok(reply.text())
}

/// Stored memories best matching `query`, most relevant first. Without a
/// memory store there is nothing to recall.
pub(crate) async fn recall(ctx: &RunContext, query: &str, limit: usize) -> Result<Vec<String>, TrellisError> {
    let Some(store) = ctx.memory() else {
        log::debug!("No memory store configured; nothing to retrieve");
        return Ok(Vec::new());
    };
    let namespace = ctx.tool_context().namespace().to_string();
    let documents: Vec<String> = store
        .search(&namespace, query, limit)
        .await?
        .into_iter()
        .filter(|hit| hit.score > 0.0)
        .map(|hit| hit.value)
        .collect();
    log::info!("Retrieved {} documents", documents.len());
    Ok(documents)
}

/// The latest `window` messages with text, one `role: text` line each
pub(crate) fn transcript(state: &State, window: usize) -> String {
    let history = messages::read(state, MESSAGES);
    let skip = history.len().saturating_sub(window);
    history[skip..]
        .iter()
        .filter(|c| !c.text().is_empty())
        .map(|c| format!("{}: {}", c.role, c.text()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Appendable message reporting a failed stage
pub(crate) fn apology(stage: &str, err: &TrellisError) -> Value {
    log::error!("{} failed: {}", stage, err);
    messages::append_one(&Content::model(format!("Error {}: {}", stage, err)))
}

pub(crate) fn reply(text: &str) -> Value {
    messages::append_one(&Content::model(text))
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::adk::error::TrellisError;
    use crate::adk::model::{Content, GenerationConfig, Model};
    use crate::adk::tool::Tool;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays canned replies and records each prompt it was sent
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Result<Content, TrellisError>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<Result<Content, TrellisError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        pub fn texts(replies: &[&str]) -> Arc<Self> {
            Self::new(replies.iter().map(|r| Ok(Content::model(*r))).collect())
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Model for ScriptedModel {
        async fn generate_content(
            &self,
            history: &[Content],
            _config: Option<&GenerationConfig>,
            _tools: Option<&[Arc<dyn Tool>]>,
        ) -> Result<Content, TrellisError> {
            let prompt = history.last().map(|c| c.text()).unwrap_or_default();
            self.prompts.lock().unwrap().push(prompt);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Content::model("FINISH")))
        }
    }
}
