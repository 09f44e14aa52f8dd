// SPDX-License-Identifier: MIT

//! Small hierarchical teams: a lead member answers first and passes the
//! conversation to a helper only when its reply asks for the helper's skill.
//! Mounted under the supervisor, each team is one level of the hierarchy.

use super::{apology, ask, conversation_graph, reply, transcript};
use crate::adk::error::TrellisError;
use crate::trellis::graph::{Channel, FnRouter, Node, RunContext, State, StateGraph, Update, END};
use crate::trellis::messages::{self, MESSAGES};
use async_trait::async_trait;
use serde_json::json;

pub const COLLABORATION: &str = "collaboration";
pub const RESEARCH_TEAM: &str = "research_team";
pub const DOCUMENT_WRITING_TEAM: &str = "document_writing_team";

/// Member that spoke last
pub const SENDER: &str = "sender";

/// Messages shown to a member, most recent last
const TRANSCRIPT_WINDOW: usize = 20;

/// One model turn over the conversation, signed with the member's name
pub struct MemberNode {
    name: String,
    system: String,
    writes: Vec<String>,
}

impl MemberNode {
    pub fn new(name: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system: system.into(),
            writes: vec![MESSAGES.to_string(), SENDER.to_string()],
        }
    }
}

#[async_trait]
impl Node for MemberNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        let update = Update::new().set(SENDER, json!(self.name));
        match ask(ctx, &self.system, transcript(state, TRANSCRIPT_WINDOW)).await {
            Ok(text) => Ok(update.set(MESSAGES, reply(&text))),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => Ok(update.set(MESSAGES, apology(&self.name, &e))),
        }
    }

    fn writes(&self) -> Option<&[String]> {
        Some(&self.writes)
    }
}

struct Team {
    name: &'static str,
    preamble: &'static str,
    lead: (&'static str, &'static str),
    helper: (&'static str, &'static str),
    /// Phrase in the lead's reply that calls the helper in
    trigger: &'static str,
}

impl Team {
    fn member(&self, (name, role): (&str, &str)) -> MemberNode {
        MemberNode::new(name, format!("{} {}", self.preamble, role))
    }

    fn graph(self) -> StateGraph {
        let (lead, helper) = (self.lead.0, self.helper.0);
        let trigger = self.trigger;
        let mut graph = conversation_graph(self.name);
        graph
            .add_channel(Channel::replace(SENDER, json!("user")))
            .add_node(lead, self.member(self.lead))
            .add_node(helper, self.member(self.helper))
            .add_conditional_edges(
                lead,
                FnRouter::new(move |state: &State| {
                    let last = messages::last_text(state, MESSAGES).to_lowercase();
                    if last.contains(trigger) {
                        helper.to_string()
                    } else {
                        END.to_string()
                    }
                }),
                [(helper, helper), (END, END)],
            )
            .add_edge(helper, END)
            .set_entry_point(lead);
        graph
    }
}

/// Researcher with a chart maker on call
pub fn collaboration() -> StateGraph {
    Team {
        name: COLLABORATION,
        preamble: "You are a helpful AI assistant, collaborating with other assistants.",
        lead: (
            "researcher",
            "You are a research assistant. Gather the information the user needs. If a chart \
             would help, say so and describe the data for it.",
        ),
        helper: (
            "chart",
            "You are a chart generation assistant. Describe a clear visualization of the data \
             discussed so far.",
        ),
        trigger: "chart",
    }
    .graph()
}

/// Researcher with a web scraper on call
pub fn research_team() -> StateGraph {
    Team {
        name: RESEARCH_TEAM,
        preamble: "You are a helpful AI assistant, part of a research team.",
        lead: (
            "researcher",
            "You are a research assistant. Answer from what you know and say when you need web \
             content from a specific page.",
        ),
        helper: (
            "scraper",
            "You are a web scraping assistant. Extract the relevant content from the pages the \
             researcher asked for.",
        ),
        trigger: "web content",
    }
    .graph()
}

/// Writer with a file manager on call
pub fn document_writing_team() -> StateGraph {
    Team {
        name: DOCUMENT_WRITING_TEAM,
        preamble: "You are a helpful AI assistant, part of a document writing team.",
        lead: (
            "writer",
            "You are a content writer. Draft the requested document and say when it needs a \
             file operation.",
        ),
        helper: (
            "file_manager",
            "You are a file manager. Carry out the file operations the writer asked for and \
             report what was done.",
        ),
        trigger: "file operation",
    }
    .graph()
}
