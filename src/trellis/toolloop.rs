// SPDX-License-Identifier: MIT

//! Reason / dispatch tool loop
//!
//! `reason` asks the model for the next move, `dispatch` runs the requested
//! tools and feeds their results back, and [`ToolLoopRouter`] closes the
//! cycle. Output that is neither a tool request nor a known handoff ends the
//! loop.

use crate::adk::error::{CompileError, TrellisError};
use crate::adk::model::{Content, GenerationConfig, Part, ToolCall};
use crate::trellis::graph::{
    Channel, CompiledGraph, Node, Router, RunContext, State, StateGraph, Update, END,
};
use crate::trellis::messages::{self, MESSAGES};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;

/// Channel holding the routing decision written by the reason node
pub const NEXT: &str = "next";

/// Route label for "run the requested tools"
pub const DISPATCH: &str = "tools";

/// Words that explicitly end the loop
const FINISH_WORDS: [&str; 3] = ["FINISH", "END", "DONE"];

/// What the loop does after a reasoning turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Dispatch,
    Finish,
    Handoff(String),
}

impl Decision {
    pub fn label(&self) -> &str {
        match self {
            Decision::Dispatch => DISPATCH,
            Decision::Finish => END,
            Decision::Handoff(label) => label,
        }
    }
}

/// Read the decision off a model reply. Tool calls win; then an exact
/// finish word; then a handoff label, either as the whole reply or on a
/// `HANDOFF: <label>` line. Anything else finishes.
pub fn classify(reply: &Content, handoffs: &[String]) -> Decision {
    if reply.has_tool_calls() {
        return Decision::Dispatch;
    }

    let text = reply.text();
    let trimmed = text.trim().trim_matches(|c: char| c == '\'' || c == '"' || c == '.');
    if FINISH_WORDS.iter().any(|w| trimmed.eq_ignore_ascii_case(w)) {
        return Decision::Finish;
    }

    let find = |candidate: &str| {
        handoffs
            .iter()
            .find(|h| h.eq_ignore_ascii_case(candidate.trim()))
            .cloned()
    };
    if let Some(label) = find(trimmed) {
        return Decision::Handoff(label);
    }
    let marked = text.lines().find_map(|line| {
        let (key, rest) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case("handoff").then(|| find(rest))?
    });
    match marked {
        Some(label) => Decision::Handoff(label),
        None => Decision::Finish,
    }
}

/// Calls the model with the running conversation
pub struct ReasonNode {
    system_prompt: Option<String>,
    tools: Option<Vec<String>>,
    handoffs: Vec<String>,
    generation: Option<GenerationConfig>,
    writes: Vec<String>,
}

impl ReasonNode {
    pub fn new() -> Self {
        Self {
            system_prompt: None,
            tools: None,
            handoffs: Vec::new(),
            generation: None,
            writes: vec![MESSAGES.to_string(), NEXT.to_string()],
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Restrict the tools offered to the model; all registered tools otherwise
    pub fn with_tools(mut self, names: Vec<String>) -> Self {
        self.tools = Some(names);
        self
    }

    pub fn with_handoffs(mut self, labels: Vec<String>) -> Self {
        self.handoffs = labels;
        self
    }

    pub fn with_generation_config(mut self, config: GenerationConfig) -> Self {
        self.generation = Some(config);
        self
    }
}

impl Default for ReasonNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for ReasonNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        ctx.check_cancelled()?;
        let model = ctx.model()?;

        let mut history = Vec::new();
        if let Some(prompt) = &self.system_prompt {
            history.push(Content::system(prompt.clone()));
        }
        history.extend(messages::read(state, MESSAGES));

        let tools = match &self.tools {
            Some(names) => ctx.tools().select(names).await,
            None => ctx.tools().list().await,
        };
        let offered = if tools.is_empty() { None } else { Some(tools.as_slice()) };

        let reply = match model
            .generate_content(&history, self.generation.as_ref(), offered)
            .await
        {
            Ok(reply) => reply,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                log::error!("Model call failed in reasoning step: {}", e);
                Content::model(format!("Error: {}", e))
            }
        };

        let decision = classify(&reply, &self.handoffs);
        log::debug!("Reasoning step decided '{}'", decision.label());
        Ok(Update::new()
            .set(MESSAGES, messages::append_one(&reply))
            .set(NEXT, json!(decision.label())))
    }

    fn writes(&self) -> Option<&[String]> {
        Some(&self.writes)
    }
}

/// Runs the tool calls of the most recent message
pub struct DispatchNode {
    /// Overrides the run's cap when set
    max_concurrency: Option<usize>,
    writes: Vec<String>,
}

impl DispatchNode {
    pub fn new() -> Self {
        Self {
            max_concurrency: None,
            writes: vec![MESSAGES.to_string()],
        }
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max.max(1));
        self
    }
}

impl Default for DispatchNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Gemini wants an object in a function response
fn as_response_object(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        other => json!({ "result": other }),
    }
}

async fn run_call(call: ToolCall, ctx: &RunContext) -> Part {
    let result = match ctx.check_cancelled() {
        Err(e) => Err(e),
        Ok(()) => {
            ctx.tools()
                .execute(&call.name, call.args.clone(), &ctx.tool_context())
                .await
        }
    };
    let response = match result {
        Ok(value) => as_response_object(value),
        Err(e) => {
            log::warn!("Tool '{}' failed: {}", call.name, e);
            json!({ "error": e.to_string() })
        }
    };
    Part::FunctionResponse {
        name: call.name,
        response,
    }
}

#[async_trait]
impl Node for DispatchNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        let calls = messages::last(state, MESSAGES)
            .map(|m| m.tool_calls())
            .unwrap_or_default();
        if calls.is_empty() {
            log::warn!("Dispatch step found no tool calls in the last message");
            return Ok(Update::new());
        }

        log::info!("Dispatching {} tool call(s)", calls.len());
        let parts: Vec<Part> = stream::iter(calls.into_iter().map(|call| run_call(call, ctx)))
            .buffered(self.max_concurrency.unwrap_or_else(|| ctx.max_concurrency()))
            .collect()
            .await;
        ctx.check_cancelled()?;

        let response = Content::new("user", parts);
        Ok(Update::new().set(MESSAGES, messages::append_one(&response)))
    }

    fn writes(&self) -> Option<&[String]> {
        Some(&self.writes)
    }
}

/// Reads the decision the reason node left in [`NEXT`]
pub struct ToolLoopRouter;

#[async_trait]
impl Router for ToolLoopRouter {
    async fn route(&self, state: &State, _ctx: &RunContext) -> Result<String, TrellisError> {
        Ok(state.get_str(NEXT).unwrap_or(END).to_string())
    }
}

/// Builder for a reason/dispatch cycle
#[derive(Debug, Clone)]
pub struct ToolLoop {
    name: String,
    system_prompt: Option<String>,
    tools: Option<Vec<String>>,
    handoffs: Vec<String>,
    generation: Option<GenerationConfig>,
    max_concurrency: Option<usize>,
}

impl ToolLoop {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: None,
            tools: None,
            handoffs: Vec::new(),
            generation: None,
            max_concurrency: None,
        }
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn tools(mut self, names: Vec<String>) -> Self {
        self.tools = Some(names);
        self
    }

    pub fn handoffs(mut self, labels: Vec<String>) -> Self {
        self.handoffs = labels;
        self
    }

    pub fn generation_config(mut self, config: GenerationConfig) -> Self {
        self.generation = Some(config);
        self
    }

    /// Fixed cap on parallel tool calls; without it the run's cap applies
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node names used when the loop is installed into a graph
    pub fn node_names(&self) -> (String, String) {
        (self.name.clone(), format!("{}_tools", self.name))
    }

    fn reason_node(&self) -> ReasonNode {
        let mut node = ReasonNode::new().with_handoffs(self.handoffs.clone());
        if let Some(prompt) = &self.system_prompt {
            node = node.with_system_prompt(prompt.clone());
        }
        if let Some(tools) = &self.tools {
            node = node.with_tools(tools.clone());
        }
        if let Some(gen) = &self.generation {
            node = node.with_generation_config(gen.clone());
        }
        node
    }

    fn dispatch_node(&self) -> DispatchNode {
        match self.max_concurrency {
            Some(max) => DispatchNode::new().with_max_concurrency(max),
            None => DispatchNode::new(),
        }
    }

    /// Add both nodes and their edges to `graph`. `handoff_targets` maps each
    /// handoff label to a node of the enclosing graph; unmapped labels end
    /// the run. The graph must already declare the messages and next channels.
    pub fn install(&self, graph: &mut StateGraph, handoff_targets: &[(String, String)]) {
        let (reason, dispatch) = self.node_names();
        let mut routes = vec![
            (DISPATCH.to_string(), dispatch.clone()),
            (END.to_string(), END.to_string()),
        ];
        for label in &self.handoffs {
            let target = handoff_targets
                .iter()
                .find(|(l, _)| l == label)
                .map(|(_, t)| t.clone())
                .unwrap_or_else(|| END.to_string());
            routes.push((label.clone(), target));
        }

        graph
            .add_node(reason.clone(), self.reason_node())
            .add_node(dispatch.clone(), self.dispatch_node())
            .add_conditional_edges(reason.clone(), ToolLoopRouter, routes)
            .add_edge(dispatch, reason);
    }

    /// Standalone graph over `messages` and `next`; a handoff ends the run
    /// with the label left in `next` for the caller
    pub fn build(&self) -> StateGraph {
        let mut graph = StateGraph::new(self.name.clone());
        graph
            .add_channel(Channel::append(MESSAGES))
            .add_channel(Channel::replace(NEXT, Value::Null));
        self.install(&mut graph, &[]);
        graph.set_entry_point(self.name.clone());
        graph
    }

    pub fn compile(&self) -> Result<CompiledGraph, CompileError> {
        self.build().compile()
    }

    pub fn compile_arc(&self) -> Result<Arc<CompiledGraph>, CompileError> {
        self.compile().map(Arc::new)
    }
}
