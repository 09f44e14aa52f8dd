// SPDX-License-Identifier: MIT

//! Reasoning without observation: plan every tool call up front, run the plan,
//! then answer from the collected evidence

use super::{apology, ask, conversation_graph, reply, task_text};
use crate::adk::error::TrellisError;
use crate::trellis::graph::{Channel, Node, RunContext, State, StateGraph, Update, END};
use crate::trellis::messages::MESSAGES;
use crate::trellis::plan::{Plan, PlanWorkerNode, RESULTS, STEPS};
use async_trait::async_trait;
use serde_json::{json, Value};

pub const NAME: &str = "rewoo";

pub const TASK: &str = "task";
pub const RESULT: &str = "result";

const PLANNER_PROMPT: &str = "For the following task, make a plan that solves the problem step \
by step. For each step, name the tool to call and its arguments as a JSON object. Store each \
tool output in a variable #E1, #E2, ... in order. Later steps may reference earlier outputs \
only through these variables, either as a whole argument (\"#E1\") or inside text \
(\"population of #E1\"). Reply with JSON only, in the form \
{\"plan\": [{\"var\": \"#E1\", \"tool\": \"...\", \"args\": {...}}]}.";

const SOLVER_PROMPT: &str = "Given the task and the results of the tool calls below, provide a \
comprehensive answer to the task.";

/// Asks the model for a plan over the registered tools
pub struct PlannerNode;

#[async_trait]
impl Node for PlannerNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        let task = task_text(state, TASK);
        let catalogue: Vec<String> = ctx
            .tools()
            .list()
            .await
            .iter()
            .map(|t| format!("{}: {}", t.name(), t.description()))
            .collect();
        let system = format!("{}\nTools:\n{}", PLANNER_PROMPT, catalogue.join("\n"));

        let update = Update::new().set(TASK, json!(task));
        let text = match ask(ctx, &system, task.clone()).await {
            Ok(text) => text,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => return Ok(update.set(MESSAGES, apology("planning", &e))),
        };
        match Plan::from_model_output(&text) {
            Ok(plan) => {
                log::info!("Planned {} tool calls", plan.steps().len());
                Ok(update.set(STEPS, plan.to_json()))
            }
            Err(e) => Ok(update.set(MESSAGES, apology("planning", &TrellisError::from(e)))),
        }
    }
}

/// Writes the final answer from the task and the evidence
pub struct SolverNode;

#[async_trait]
impl Node for SolverNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        let task = task_text(state, TASK);
        let results = state.get(RESULTS).cloned().unwrap_or_else(|| json!({}));
        let prompt = format!("Task: {}\nTool results: {}", task, results);

        match ask(ctx, SOLVER_PROMPT, prompt).await {
            Ok(answer) => Ok(Update::new()
                .set(RESULT, json!(answer))
                .set(MESSAGES, reply(&answer))),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => Ok(Update::new().set(MESSAGES, apology("solving", &e))),
        }
    }
}

pub fn graph() -> StateGraph {
    let mut graph = conversation_graph(NAME);
    graph
        .add_channel(Channel::replace(TASK, json!("")))
        .add_channel(Channel::replace(STEPS, json!([])))
        .add_channel(Channel::merge(RESULTS))
        .add_channel(Channel::replace(RESULT, json!("")))
        .add_node("planner", PlannerNode)
        .add_node("worker", PlanWorkerNode::new())
        .add_node("solver", SolverNode)
        .add_edge("planner", "worker")
        .add_edge("worker", "solver")
        .add_edge("solver", END)
        .set_entry_point("planner");
    graph
}

/// Evidence gathered so far, as `#E1: value` lines
pub fn evidence(state: &State) -> Vec<String> {
    state
        .get(RESULTS)
        .and_then(Value::as_object)
        .map(|obj| obj.iter().map(|(k, v)| format!("{}: {}", k, v)).collect())
        .unwrap_or_default()
}
