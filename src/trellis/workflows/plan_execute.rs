// SPDX-License-Identifier: MIT

//! Plan-and-execute: draft a step list, carry the steps out one at a time and
//! decide after each whether to continue, re-plan or wrap up

use super::{apology, ask, conversation_graph, reply, task_text};
use crate::adk::error::TrellisError;
use crate::adk::model::Content;
use crate::trellis::graph::{
    AsyncFnRouter, Channel, FnRouter, Node, RunContext, State, StateGraph, Update, END,
};
use crate::trellis::messages::{self, MESSAGES};
use async_trait::async_trait;
use serde_json::{json, Value};

pub const NAME: &str = "plan_execute";

pub const INPUT: &str = "input";
pub const PLAN: &str = "plan";
pub const PAST_STEPS: &str = "past_steps";
pub const RESPONSE: &str = "response";

const PLANNER: &str = "planner";
const EXECUTOR: &str = "executor";
const FINAL: &str = "final_response";

const PLANNER_PROMPT: &str = "You are a helpful assistant. Given the user's request, create a \
concise, step-by-step plan to fulfill it. Put each step on its own line as a clear, actionable \
instruction. If some steps have already been carried out, plan only the remaining work.";

const EXECUTOR_PROMPT: &str = "You are an executor agent. Carry out the following step, calling \
one of the available tools when it helps.";

const REVISIT_PROMPT: &str = "You are a plan reviser. Based on the original input, the remaining \
plan and the result of the last executed step, reply 'continue' to run the next step, 'replan' \
to revise the remaining steps, or 'finish' if the request is already satisfied.";

const FINAL_PROMPT: &str = "You have completed the steps of the plan. Based on the original \
input and the results of the executed steps, provide a comprehensive final response.";

/// Plan lines with list markers stripped
pub fn parse_plan(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*'))
                .trim()
        })
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn plan(state: &State) -> Vec<String> {
    state
        .get_array(PLAN)
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn past_steps(state: &State) -> Vec<(String, String)> {
    state
        .get_array(PAST_STEPS)
        .iter()
        .filter_map(|pair| {
            let step = pair.get(0)?.as_str()?;
            let result = pair.get(1)?.as_str()?;
            Some((step.to_string(), result.to_string()))
        })
        .collect()
}

fn progress(state: &State) -> String {
    past_steps(state)
        .iter()
        .map(|(step, result)| format!("- {}: {}", step, result))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct PlannerNode;

#[async_trait]
impl Node for PlannerNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        let input = task_text(state, INPUT);
        let done = progress(state);
        let prompt = if done.is_empty() {
            input.clone()
        } else {
            format!("{}\n\nAlready done:\n{}", input, done)
        };

        let update = Update::new().set(INPUT, json!(input));
        match ask(ctx, PLANNER_PROMPT, prompt).await {
            Ok(text) => {
                let steps = parse_plan(&text);
                log::info!("Plan has {} steps", steps.len());
                Ok(update.set(PLAN, json!(steps)))
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => Ok(update
                .set(PLAN, json!([]))
                .set(MESSAGES, apology("planning", &e))),
        }
    }
}

/// Runs the first remaining step with one model call and at most one round of
/// tool calls
pub struct ExecutorNode;

impl ExecutorNode {
    async fn execute(&self, step: &str, ctx: &RunContext) -> Result<String, TrellisError> {
        ctx.check_cancelled()?;
        let model = ctx.model()?;
        let tools = ctx.tools().list().await;
        let offered = if tools.is_empty() { None } else { Some(tools.as_slice()) };
        let history = [Content::system(EXECUTOR_PROMPT), Content::user(step)];
        let response = model.generate_content(&history, None, offered).await?;

        let calls = response.tool_calls();
        if calls.is_empty() {
            return Ok(response.text());
        }
        let tool_ctx = ctx.tool_context();
        let mut outputs = Vec::with_capacity(calls.len());
        for call in calls {
            let output = match ctx.tools().execute(&call.name, call.args, &tool_ctx).await {
                Ok(v) => v,
                Err(e) => json!({ "error": e.to_string() }),
            };
            outputs.push(json!({ "tool": call.name, "output": output }));
        }
        Ok(Value::Array(outputs).to_string())
    }
}

#[async_trait]
impl Node for ExecutorNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        let mut remaining = plan(state);
        if remaining.is_empty() {
            return Ok(Update::new());
        }
        let step = remaining.remove(0);

        let result = match self.execute(&step, ctx).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                log::warn!("Step '{}' failed: {}", step, e);
                format!("Error executing step: {}", e)
            }
        };

        Ok(Update::new()
            .set(PAST_STEPS, json!([[&step, &result]]))
            .set(PLAN, json!(remaining))
            .set(
                MESSAGES,
                messages::append_all([&Content::user(step), &Content::model(result)]),
            ))
    }
}

/// Chooses the next hop after a step; falls back to continuing when the
/// model cannot be asked
async fn revisit(state: State, ctx: RunContext) -> Result<String, TrellisError> {
    let remaining = plan(&state);
    if remaining.is_empty() {
        return Ok(FINAL.to_string());
    }
    let last = past_steps(&state)
        .pop()
        .map(|(_, result)| result)
        .unwrap_or_default();
    let prompt = format!(
        "Original input: {}\nRemaining plan:\n{}\nLast step result: {}",
        task_text(&state, INPUT),
        remaining.join("\n"),
        last
    );

    let decision = match ask(&ctx, REVISIT_PROMPT, prompt).await {
        Ok(text) => text.to_lowercase(),
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            log::warn!("Revisit decision failed, continuing: {}", e);
            return Ok(EXECUTOR.to_string());
        }
    };
    let next = if decision.contains("replan") {
        PLANNER
    } else if decision.contains("finish") {
        FINAL
    } else {
        EXECUTOR
    };
    Ok(next.to_string())
}

pub struct FinalResponseNode;

#[async_trait]
impl Node for FinalResponseNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        let prompt = format!(
            "Original input: {}\nExecuted steps and results:\n{}",
            task_text(state, INPUT),
            progress(state)
        );
        match ask(ctx, FINAL_PROMPT, prompt).await {
            Ok(answer) => Ok(Update::new()
                .set(RESPONSE, json!(answer))
                .set(MESSAGES, reply(&answer))),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => Ok(Update::new().set(MESSAGES, apology("generating the final response", &e))),
        }
    }
}

pub fn graph() -> StateGraph {
    let mut graph = conversation_graph(NAME);
    graph
        .add_channel(Channel::replace(INPUT, json!("")))
        .add_channel(Channel::replace(PLAN, json!([])))
        .add_channel(Channel::append(PAST_STEPS))
        .add_channel(Channel::replace(RESPONSE, json!("")))
        .add_node(PLANNER, PlannerNode)
        .add_node(EXECUTOR, ExecutorNode)
        .add_node(FINAL, FinalResponseNode)
        .add_conditional_edges(
            PLANNER,
            FnRouter::new(|state: &State| {
                let label = if plan(state).is_empty() { FINAL } else { EXECUTOR };
                label.to_string()
            }),
            [(EXECUTOR, EXECUTOR), (FINAL, FINAL)],
        )
        .add_conditional_edges(
            EXECUTOR,
            AsyncFnRouter::new(revisit),
            [(EXECUTOR, EXECUTOR), (PLANNER, PLANNER), (FINAL, FINAL)],
        )
        .add_edge(FINAL, END)
        .set_entry_point(PLANNER);
    graph
}
