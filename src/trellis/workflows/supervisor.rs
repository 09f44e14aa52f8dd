// SPDX-License-Identifier: MIT

//! Supervisor: a routing node that hands the conversation to one member
//! workflow at a time and finishes when the model says so
//!
//! Members run as subgraphs sharing `messages` and `next`; every member
//! returns to the supervisor, and `FINISH` ends the run.

use super::{apology, conversation_graph, transcript, WORKFLOWS};
use crate::adk::error::TrellisError;
use crate::adk::model::Content;
use crate::trellis::graph::{CompiledGraph, FnRouter, Node, RunContext, State, StateGraph, Update, END};
use crate::trellis::messages::MESSAGES;
use crate::trellis::toolloop::NEXT;
use async_trait::async_trait;
use serde_json::json;
use std::cmp::Reverse;
use std::sync::Arc;

pub const NAME: &str = "supervisor";

/// Label that ends the run
pub const FINISH: &str = "FINISH";

/// Messages shown to the supervisor, most recent last
const TRANSCRIPT_WINDOW: usize = 20;

const SUPERVISOR_PROMPT: &str = "You are a supervisor managing a conversation between the \
following workers: {members}. Given the conversation so far, reply with the name of the worker \
that should act next, and nothing else. When the user's request has been answered, reply FINISH.";

/// Map a free-form reply onto a member name or [`FINISH`]
pub fn parse_route(reply: &str, members: &[String]) -> String {
    let cleaned = reply
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.' | '*'))
        .trim()
        .to_lowercase();
    if matches!(cleaned.as_str(), "finish" | "end" | "done") {
        return FINISH.to_string();
    }
    if let Some(member) = members.iter().find(|m| m.to_lowercase() == cleaned) {
        return member.clone();
    }
    // a sentence naming one member; earliest mention wins, then the longest
    // name so `research_team` is not read as `research`
    let mentioned = members
        .iter()
        .filter_map(|m| cleaned.find(&m.to_lowercase()).map(|at| (at, m)))
        .min_by_key(|(at, m)| (*at, Reverse(m.len())));
    match mentioned {
        Some((_, member)) => member.clone(),
        None => {
            if !cleaned.contains("finish") {
                log::warn!("Supervisor reply {:?} names no worker; finishing", reply);
            }
            FINISH.to_string()
        }
    }
}

/// Asks the model which member acts next and writes the answer to `next`
pub struct SupervisorNode {
    members: Vec<String>,
    writes: Vec<String>,
}

impl SupervisorNode {
    pub fn new(members: Vec<String>) -> Self {
        Self {
            members,
            writes: vec![NEXT.to_string(), MESSAGES.to_string()],
        }
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }
}

#[async_trait]
impl Node for SupervisorNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        ctx.check_cancelled()?;
        let model = ctx.model()?;
        let system = SUPERVISOR_PROMPT.replace("{members}", &self.members.join(", "));
        let history = [Content::system(system), Content::user(transcript(state, TRANSCRIPT_WINDOW))];

        match model.generate_content(&history, None, None).await {
            Ok(reply) => {
                let next = parse_route(&reply.text(), &self.members);
                log::info!("Supervisor chose {}", next);
                Ok(Update::new().set(NEXT, json!(next)))
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => Ok(Update::new()
                .set(NEXT, json!(FINISH))
                .set(MESSAGES, apology("routing", &e))),
        }
    }

    fn writes(&self) -> Option<&[String]> {
        Some(&self.writes)
    }
}

/// Supervisor over arbitrary member graphs
pub fn graph_with(members: Vec<(String, Arc<CompiledGraph>)>) -> StateGraph {
    let names: Vec<String> = members.iter().map(|(name, _)| name.clone()).collect();
    let mut routes: Vec<(String, String)> = names.iter().map(|n| (n.clone(), n.clone())).collect();
    routes.push((FINISH.to_string(), END.to_string()));

    let mut graph = conversation_graph(NAME);
    graph
        .add_node(NAME, SupervisorNode::new(names))
        .add_conditional_edges(
            NAME,
            FnRouter::new(|state: &State| state.get_str(NEXT).unwrap_or(FINISH).to_string()),
            routes,
        )
        .set_entry_point(NAME);
    for (name, member) in members {
        graph.add_subgraph(name.clone(), member).add_edge(name, NAME);
    }
    graph
}

/// Supervisor over every built-in workflow
pub fn graph() -> Result<StateGraph, TrellisError> {
    let mut members = Vec::with_capacity(WORKFLOWS.len());
    for name in WORKFLOWS {
        members.push((name.to_string(), super::build(name)?));
    }
    Ok(graph_with(members))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trellis::graph::{Channel, FnNode};
    use crate::trellis::messages;
    use crate::trellis::workflows::testing::ScriptedModel;
    use serde_json::Value;

    fn members() -> Vec<String> {
        WORKFLOWS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_route() {
        let m = members();
        assert_eq!(parse_route("rewoo", &m), "rewoo");
        assert_eq!(parse_route(" 'CRAG'. ", &m), "crag");
        assert_eq!(parse_route("FINISH", &m), FINISH);
        assert_eq!(parse_route("I think reflection, then react", &m), "reflection");
        assert_eq!(parse_route("no idea", &m), FINISH);
        assert_eq!(parse_route("Hand it to research_team.", &m), "research_team");
        assert_eq!(parse_route("the rag worker", &m), "rag");
    }

    fn echo_member(reply: &'static str) -> Arc<CompiledGraph> {
        let mut g = StateGraph::new("echo");
        g.add_channel(Channel::append(MESSAGES))
            .add_channel(Channel::replace(NEXT, Value::Null))
            .add_node(
                "say",
                FnNode::new(move |_| {
                    Ok(Update::new().set(MESSAGES, messages::append_one(&Content::model(reply))))
                }),
            )
            .add_edge("say", END)
            .set_entry_point("say");
        Arc::new(g.compile().unwrap())
    }

    #[tokio::test]
    async fn test_routes_to_member_then_finishes() {
        let model = ScriptedModel::texts(&["helper", "FINISH"]);
        let ctx = RunContext::new().with_model(model.clone());
        let graph = graph_with(vec![
            ("helper".to_string(), echo_member("helped")),
            ("other".to_string(), echo_member("other")),
        ])
        .compile()
        .unwrap();

        let outcome = graph
            .invoke(Update::new().set(MESSAGES, json!("please help")), &ctx)
            .await;

        assert!(outcome.is_completed());
        assert_eq!(outcome.trace, vec![NAME, "helper", NAME]);
        let texts: Vec<String> = messages::read(&outcome.state, MESSAGES)
            .iter()
            .map(|c| c.text())
            .collect();
        assert_eq!(texts, vec!["please help", "helped"]);
        assert_eq!(outcome.state.get_str(NEXT), Some(FINISH));
        assert!(model.prompts()[1].contains("model: helped"));
    }

    #[tokio::test]
    async fn test_model_failure_finishes_with_apology() {
        let model = ScriptedModel::new(vec![Err(TrellisError::api("test", "quota"))]);
        let ctx = RunContext::new().with_model(model);
        let graph = graph_with(vec![("helper".to_string(), echo_member("x"))])
            .compile()
            .unwrap();

        let outcome = graph
            .invoke(Update::new().set(MESSAGES, json!("hi")), &ctx)
            .await;

        assert!(outcome.is_completed());
        assert_eq!(outcome.steps, 1);
        assert!(messages::last_text(&outcome.state, MESSAGES).starts_with("Error routing:"));
    }
}
