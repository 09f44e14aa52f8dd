// SPDX-License-Identifier: MIT

//! Self-reflective retrieval: answer from recalled memories, then grade the
//! documents and the answer. A bad document grade retrieves again, an
//! unsupported answer is generated again, and the loop gives up after a
//! fixed number of answers.

use super::{apology, ask, conversation_graph, recall, reply, task_text};
use crate::adk::error::TrellisError;
use crate::trellis::graph::{Channel, FnRouter, Node, RunContext, State, StateGraph, Update, END};
use crate::trellis::messages::MESSAGES;
use crate::trellis::prompt::value_text;
use async_trait::async_trait;
use serde_json::json;

pub const NAME: &str = "self_rag";

pub const QUESTION: &str = "question";
pub const DOCUMENTS: &str = "documents";
pub const GENERATION: &str = "generation";
pub const QUESTION_GRADE: &str = "generation_v_question_grade";
pub const SUPPORT_GRADE: &str = "generation_v_documents_grade";
/// Answers generated so far in this run
pub const ATTEMPTS: &str = "attempts";

pub const MAX_ATTEMPTS: u64 = 3;

const RETRIEVE_LIMIT: usize = 3;

const GENERATE_PROMPT: &str = "You are a helpful AI assistant. Answer the question based on the \
provided documents.";

const RELEVANCE_PROMPT: &str = "You are a grader. Is the document relevant to the question? \
Respond with 'yes' or 'no'.";

const SUPPORT_PROMPT: &str = "You are a grader. Is the generated answer supported by the \
documents? Respond with 'yes' or 'no'.";

fn documents_text(state: &State) -> String {
    state.get(DOCUMENTS).map(value_text).unwrap_or_default()
}

pub struct RetrieveNode;

#[async_trait]
impl Node for RetrieveNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        let question = task_text(state, QUESTION);
        let documents = recall(ctx, &question, RETRIEVE_LIMIT).await?;
        Ok(Update::new()
            .set(QUESTION, json!(question))
            .set(DOCUMENTS, json!(documents)))
    }
}

pub struct GenerateNode;

#[async_trait]
impl Node for GenerateNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        let attempts = state.get(ATTEMPTS).and_then(|v| v.as_u64()).unwrap_or(0) + 1;
        let prompt = format!(
            "Question: {}\nDocuments: {}",
            task_text(state, QUESTION),
            documents_text(state)
        );
        let update = Update::new().set(ATTEMPTS, json!(attempts));
        match ask(ctx, GENERATE_PROMPT, prompt).await {
            Ok(answer) => Ok(update
                .set(GENERATION, json!(answer))
                .set(MESSAGES, reply(&answer))),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => Ok(update.set(MESSAGES, apology("generating", &e))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    /// Are the documents relevant to the question
    Relevance,
    /// Is the answer grounded in the documents
    Support,
}

/// Writes `yes` or `no`; a failed grading call counts as `no`
pub struct GradeNode {
    grade: Grade,
}

impl GradeNode {
    pub fn new(grade: Grade) -> Self {
        Self { grade }
    }
}

#[async_trait]
impl Node for GradeNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        let (system, prompt, channel) = match self.grade {
            Grade::Relevance => {
                let first = state
                    .get_array(DOCUMENTS)
                    .first()
                    .map(value_text)
                    .unwrap_or_default();
                let prompt = format!("Question: {}\nDocument: {}", task_text(state, QUESTION), first);
                (RELEVANCE_PROMPT, prompt, QUESTION_GRADE)
            }
            Grade::Support => {
                let prompt = format!(
                    "Documents: {}\nGenerated Answer: {}",
                    documents_text(state),
                    state.get_str(GENERATION).unwrap_or_default()
                );
                (SUPPORT_PROMPT, prompt, SUPPORT_GRADE)
            }
        };
        let grade = match ask(ctx, system, prompt).await {
            Ok(text) if text.trim().to_lowercase().starts_with("yes") => "yes",
            Ok(_) => "no",
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                log::warn!("{:?} grading failed: {}", self.grade, e);
                "no"
            }
        };
        Ok(Update::new().set(channel, json!(grade)))
    }
}

/// `END` when both grades pass or attempts run out, `retrieve` when the
/// documents missed, `generate` otherwise
pub fn decide(state: &State) -> String {
    let passed = |channel: &str| state.get_str(channel) == Some("yes");
    let attempts = state.get(ATTEMPTS).and_then(|v| v.as_u64()).unwrap_or(0);
    if passed(QUESTION_GRADE) && passed(SUPPORT_GRADE) {
        END.to_string()
    } else if attempts >= MAX_ATTEMPTS {
        log::warn!("Giving up after {} answers", attempts);
        END.to_string()
    } else if !passed(QUESTION_GRADE) {
        "retrieve".to_string()
    } else {
        "generate".to_string()
    }
}

pub fn graph() -> StateGraph {
    let mut graph = conversation_graph(NAME);
    graph
        .add_channel(Channel::replace(QUESTION, json!("")))
        .add_channel(Channel::replace(DOCUMENTS, json!([])))
        .add_channel(Channel::replace(GENERATION, json!("")))
        .add_channel(Channel::replace(QUESTION_GRADE, json!("")))
        .add_channel(Channel::replace(SUPPORT_GRADE, json!("")))
        .add_channel(Channel::replace(ATTEMPTS, json!(0)))
        .add_node("retrieve", RetrieveNode)
        .add_node("generate", GenerateNode)
        .add_node("grade_documents", GradeNode::new(Grade::Relevance))
        .add_node("grade_generation_support", GradeNode::new(Grade::Support))
        .add_edge("retrieve", "generate")
        .add_edge("generate", "grade_documents")
        .add_edge("grade_documents", "grade_generation_support")
        .add_conditional_edges(
            "grade_generation_support",
            FnRouter::new(decide),
            [("retrieve", "retrieve"), ("generate", "generate"), (END, END)],
        )
        .set_entry_point("retrieve");
    graph
}
