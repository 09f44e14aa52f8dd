// SPDX-License-Identifier: MIT

//! Retrieval-augmented generation: recall stored memories for the question,
//! then answer from them

use super::{apology, ask, conversation_graph, recall, reply};
use crate::adk::error::TrellisError;
use crate::trellis::graph::{Channel, Node, RunContext, State, StateGraph, Update, END};
use crate::trellis::messages::{self, MESSAGES};
use async_trait::async_trait;
use serde_json::json;

pub const NAME: &str = "rag";

/// Retrieved context, handed from `retrieve` to `generate`
pub const SCRATCHPAD: &str = "scratchpad";

const RETRIEVE_LIMIT: usize = 4;

const GENERATE_PROMPT: &str = "You are a helpful AI assistant. Answer the question based on the \
following context:\n";

fn question(state: &State) -> String {
    messages::last_user_text(state, MESSAGES).unwrap_or_default()
}

pub struct RetrieveNode;

#[async_trait]
impl Node for RetrieveNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        match recall(ctx, &question(state), RETRIEVE_LIMIT).await {
            Ok(documents) => Ok(Update::new().set(SCRATCHPAD, json!(documents.join("\n\n")))),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => Ok(Update::new().set(MESSAGES, apology("retrieving documents", &e))),
        }
    }
}

pub struct GenerateNode;

#[async_trait]
impl Node for GenerateNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        let system = format!(
            "{}{}",
            GENERATE_PROMPT,
            state.get_str(SCRATCHPAD).unwrap_or_default()
        );
        match ask(ctx, &system, question(state)).await {
            Ok(answer) => Ok(Update::new().set(MESSAGES, reply(&answer))),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => Ok(Update::new().set(MESSAGES, apology("generating response", &e))),
        }
    }
}

pub fn graph() -> StateGraph {
    let mut graph = conversation_graph(NAME);
    graph
        .add_channel(Channel::replace(SCRATCHPAD, json!("")))
        .add_node("retrieve", RetrieveNode)
        .add_node("generate", GenerateNode)
        .add_edge("retrieve", "generate")
        .add_edge("generate", END)
        .set_entry_point("retrieve");
    graph
}
