// SPDX-License-Identifier: MIT

//! Reflection: draft, critique the draft, then revise it against the critique

use super::{apology, ask, conversation_graph, reply, task_text};
use crate::adk::error::TrellisError;
use crate::trellis::graph::{Channel, Node, RunContext, State, StateGraph, Update, END};
use crate::trellis::messages::MESSAGES;
use async_trait::async_trait;
use serde_json::json;

pub const NAME: &str = "reflection";

pub const REQUEST: &str = "request";
pub const CONTENT: &str = "content";
pub const CRITIQUE: &str = "critique";

const GENERATOR_PROMPT: &str = "You are a writing assistant. Produce the best possible response \
to the user's request.";

const REFLECTOR_PROMPT: &str = "You are a demanding reviewer. Critique the submission below and \
give detailed, actionable recommendations for improving it.";

const REVISER_PROMPT: &str = "You are a writing assistant. Revise the submission below so that \
it addresses every point of the critique. Reply with the revised text only.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Generate,
    Reflect,
    Revise,
}

/// One model call of the draft / critique / revise cycle
pub struct ReflectionNode {
    stage: Stage,
}

impl ReflectionNode {
    pub fn new(stage: Stage) -> Self {
        Self { stage }
    }

    fn request(&self, state: &State) -> (&'static str, String) {
        let content = state.get_str(CONTENT).unwrap_or_default();
        match self.stage {
            Stage::Generate => (GENERATOR_PROMPT, task_text(state, REQUEST)),
            Stage::Reflect => (REFLECTOR_PROMPT, format!("Submission:\n{}", content)),
            Stage::Revise => (
                REVISER_PROMPT,
                format!(
                    "Submission:\n{}\n\nCritique:\n{}",
                    content,
                    state.get_str(CRITIQUE).unwrap_or_default()
                ),
            ),
        }
    }

    fn label(&self) -> &'static str {
        match self.stage {
            Stage::Generate => "generating",
            Stage::Reflect => "reflecting",
            Stage::Revise => "revising",
        }
    }
}

#[async_trait]
impl Node for ReflectionNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        let (system, prompt) = self.request(state);
        let text = match ask(ctx, system, prompt).await {
            Ok(text) => text,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => return Ok(Update::new().set(MESSAGES, apology(self.label(), &e))),
        };

        Ok(match self.stage {
            Stage::Generate => Update::new()
                .set(REQUEST, json!(task_text(state, REQUEST)))
                .set(CONTENT, json!(text))
                .set(MESSAGES, reply(&text)),
            Stage::Reflect => Update::new().set(CRITIQUE, json!(text)),
            Stage::Revise => Update::new()
                .set(CONTENT, json!(text))
                .set(MESSAGES, reply(&text)),
        })
    }
}

pub fn graph() -> StateGraph {
    let mut graph = conversation_graph(NAME);
    graph
        .add_channel(Channel::replace(REQUEST, json!("")))
        .add_channel(Channel::replace(CONTENT, json!("")))
        .add_channel(Channel::replace(CRITIQUE, json!("")))
        .add_node("generator", ReflectionNode::new(Stage::Generate))
        .add_node("reflector", ReflectionNode::new(Stage::Reflect))
        .add_node("reviser", ReflectionNode::new(Stage::Revise))
        .add_edge("generator", "reflector")
        .add_edge("reflector", "reviser")
        .add_edge("reviser", END)
        .set_entry_point("generator");
    graph
}
