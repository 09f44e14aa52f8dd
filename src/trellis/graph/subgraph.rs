// SPDX-License-Identifier: MIT

//! Compiled graph wrapped as a node
//!
//! The inner run is seeded with the outer channels both graphs declare and
//! hands back only the shared channels it changed. How each one is handed
//! back is fixed when the outer graph compiles:
//!
//! - append channels return just the suffix the inner run added, so the outer
//!   reducer does not duplicate the seeded history
//! - replace, merge, max and min channels return the inner final value, which
//!   the matching outer reducer absorbs without double counting
//! - channels listed with [`SubgraphNode::with_replace_on_return`] overwrite
//!   the outer value with the inner final value, skipping the outer reducer
//!
//! Any other shared channel (custom reducers, or differing rules on the two
//! sides) is rejected at compile time.

use super::channel::{ChannelRegistry, State, Update};
use super::executor::{CompiledGraph, RunStatus};
use super::node::{Node, RunContext};
use crate::adk::error::{CompileError, TrellisError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct SubgraphNode {
    graph: Arc<CompiledGraph>,
    replace_on_return: BTreeSet<String>,
}

impl SubgraphNode {
    pub fn new(graph: Arc<CompiledGraph>) -> Self {
        Self {
            graph,
            replace_on_return: BTreeSet::new(),
        }
    }

    /// Shared channels whose inner final value replaces the outer one as is
    pub fn with_replace_on_return<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replace_on_return
            .extend(channels.into_iter().map(Into::into));
        self
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    /// Reject shared channels whose return cannot be merged soundly into
    /// `outer` when mounted as node `node`
    pub(crate) fn check_shared(&self, node: &str, outer: &ChannelRegistry) -> Result<(), CompileError> {
        let incompatible = |channel: &str, reason: String| CompileError::IncompatibleSharedChannel {
            node: node.to_string(),
            channel: channel.to_string(),
            reason,
        };
        let inner = self.graph.channels();

        for name in &self.replace_on_return {
            if !inner.contains(name) || !outer.contains(name) {
                return Err(incompatible(
                    name,
                    "listed as replace-on-return but not declared by both graphs".to_string(),
                ));
            }
        }

        for name in inner.names() {
            let (Some(inner_channel), Some(outer_channel)) = (inner.get(name), outer.get(name)) else {
                continue;
            };
            if self.replace_on_return.contains(name) {
                continue;
            }
            let (inner_rule, outer_rule) = (inner_channel.reducer(), outer_channel.reducer());
            if !inner_rule.same_rule(outer_rule) {
                return Err(incompatible(
                    name,
                    format!(
                        "outer reducer {:?} and inner reducer {:?} do not combine; declare it replace-on-return",
                        outer_rule, inner_rule
                    ),
                ));
            }
        }
        Ok(())
    }

    fn shared_channels(&self, outer: &State) -> Vec<String> {
        self.graph
            .channels()
            .names()
            .filter(|name| outer.contains(name))
            .map(|name| name.to_string())
            .collect()
    }
}

/// What the inner run added on top of `before`
fn appended_suffix(before: &Value, after: &Value) -> Value {
    match (before, after) {
        (Value::Array(old), Value::Array(new))
            if new.len() >= old.len() && new[..old.len()] == old[..] =>
        {
            Value::Array(new[old.len()..].to_vec())
        }
        _ => after.clone(),
    }
}

#[async_trait]
impl Node for SubgraphNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        let shared = self.shared_channels(state);
        let seed: Update = shared
            .iter()
            .filter_map(|name| state.get(name).map(|v| (name.clone(), v.clone())))
            .collect();

        let channels = self.graph.channels();
        let seeded = channels
            .merge(&channels.initial_state(), &seed)
            .map_err(|e| TrellisError::other(format!("cannot seed subgraph with channel '{}'", e.0)))?;

        let child = ctx.child();
        log::debug!(
            "Entering subgraph '{}' as run {} with {} shared channels",
            self.graph.name(),
            child.run_id(),
            shared.len()
        );
        let outcome = self.graph.invoke(seed, &child).await;

        match outcome.status {
            RunStatus::Completed => {}
            RunStatus::Failed(fault) => return Err(TrellisError::Run(fault)),
            RunStatus::Cancelled => return Err(TrellisError::Cancelled),
        }

        let mut update = Update::new();
        for name in &shared {
            let (Some(before), Some(after)) = (seeded.get(name), outcome.state.get(name)) else {
                continue;
            };
            if before == after {
                continue;
            }
            if self.replace_on_return.contains(name) {
                update.insert_overwrite(name.clone(), after.clone());
                continue;
            }
            let append = channels
                .get(name)
                .is_some_and(|c| c.reducer().is_append());
            let value = if append {
                appended_suffix(before, after)
            } else {
                after.clone()
            };
            update.insert(name.clone(), value);
        }
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::error::RunFault;
    use crate::trellis::graph::builder::StateGraph;
    use crate::trellis::graph::channel::{Channel, Reducer};
    use crate::trellis::graph::edge::END;
    use crate::trellis::graph::node::FnNode;
    use serde_json::json;

    fn inner() -> Arc<CompiledGraph> {
        let mut g = StateGraph::new("inner");
        g.add_channel(Channel::append("messages"))
            .add_channel(Channel::replace("result", json!(null)))
            .add_channel(Channel::replace("scratch", json!(0)))
            .add_node(
                "work",
                FnNode::new(|s| {
                    let seen = s.get_array("messages").len();
                    Ok(Update::new()
                        .set("scratch", json!(seen))
                        .set("messages", json!("inner says hi")))
                }),
            )
            .add_node(
                "report",
                FnNode::new(|s| Ok(Update::new().set("result", json!(format!("saw {}", s.get_f64("scratch").unwrap_or(0.0)))))),
            )
            .add_edge("work", "report")
            .add_edge("report", END)
            .set_entry_point("work");
        Arc::new(g.compile().unwrap())
    }

    #[test]
    fn test_appended_suffix() {
        assert_eq!(appended_suffix(&json!([1, 2]), &json!([1, 2, 3])), json!([3]));
        assert_eq!(appended_suffix(&json!([1, 2]), &json!([9])), json!([9]));
    }

    #[tokio::test]
    async fn test_returns_only_changed_shared_channels() {
        let node = SubgraphNode::new(inner());
        let outer: State = vec![
            ("messages", json!(["hello"])),
            ("result", json!(null)),
            ("decision", json!("inner")),
        ]
        .into_iter()
        .collect();

        let update = node.invoke(&outer, &RunContext::new()).await.unwrap();

        assert_eq!(update.get("messages"), Some(&json!(["inner says hi"])));
        assert_eq!(update.get("result"), Some(&json!("saw 1")));
        // inner-only channel stays inside
        assert!(update.get("scratch").is_none());
        assert!(update.get("decision").is_none());
    }

    #[tokio::test]
    async fn test_replace_on_return_overwrites_outer_value() {
        let sum = || Reducer::custom(|c, u| json!(c.as_i64().unwrap_or(0) + u.as_i64().unwrap_or(0)));
        let mut g = StateGraph::new("adder");
        g.add_channel(Channel::with_reducer("total", sum(), json!(0)))
            .add_node("add", FnNode::new(|_| Ok(Update::new().set("total", json!(5)))))
            .add_edge("add", END)
            .set_entry_point("add");
        let node = SubgraphNode::new(Arc::new(g.compile().unwrap()))
            .with_replace_on_return(["total"]);

        let mut outer = ChannelRegistry::new();
        outer
            .register(Channel::with_reducer("total", sum(), json!(0)))
            .unwrap();
        assert!(node.check_shared("adder", &outer).is_ok());

        let before: State = vec![("total", json!(10))].into_iter().collect();
        let update = node.invoke(&before, &RunContext::new()).await.unwrap();
        assert!(update.is_overwrite("total"));

        let after = outer.merge(&before, &update).unwrap();
        assert_eq!(after.get("total"), Some(&json!(15)));
    }

    #[tokio::test]
    async fn test_inner_failure_propagates() {
        let mut g = StateGraph::new("broken");
        g.add_node("a", FnNode::new(|_| Err(TrellisError::other("nope"))))
            .add_edge("a", END)
            .set_entry_point("a");
        let node = SubgraphNode::new(Arc::new(g.compile().unwrap()));

        let err = node.invoke(&State::new(), &RunContext::new()).await.unwrap_err();
        assert!(matches!(
            err,
            TrellisError::Run(RunFault::NodeInvocation { ref node, .. }) if node == "a"
        ));
    }
}
