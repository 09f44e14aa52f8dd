// SPDX-License-Identifier: MIT

//! Graph definition and compilation
//!
//! [`StateGraph`] collects channels, nodes and edges; [`StateGraph::compile`]
//! validates them into an immutable [`CompiledGraph`]. Compiling the same
//! builder twice yields behaviorally identical graphs.

use super::channel::{Channel, ChannelRegistry};
use super::checkpoint::Checkpointer;
use super::edge::{Edge, Router, DEFAULT_ROUTE, END, START};
use super::executor::CompiledGraph;
use super::node::Node;
use super::subgraph::SubgraphNode;
use crate::adk::error::CompileError;
use crate::trellis::config::ExecutionConfig;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

/// Mutable graph definition
pub struct StateGraph {
    name: String,
    channels: ChannelRegistry,
    nodes: BTreeMap<String, Arc<dyn Node>>,
    subgraphs: BTreeMap<String, Arc<SubgraphNode>>,
    node_order: Vec<String>,
    edges: BTreeMap<String, Edge>,
    entry: Option<String>,
    config: ExecutionConfig,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    // first definition error wins at compile time
    errors: Vec<CompileError>,
}

fn is_reserved(name: &str) -> bool {
    name.is_empty() || name == END || name == START || name == DEFAULT_ROUTE
}

impl StateGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channels: ChannelRegistry::new(),
            nodes: BTreeMap::new(),
            subgraphs: BTreeMap::new(),
            node_order: Vec::new(),
            edges: BTreeMap::new(),
            entry: None,
            config: ExecutionConfig::default(),
            checkpointer: None,
            errors: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_channel(&mut self, channel: Channel) -> &mut Self {
        if let Err(e) = self.channels.register(channel) {
            self.errors.push(e);
        }
        self
    }

    pub fn add_node(&mut self, name: impl Into<String>, node: impl Node + 'static) -> &mut Self {
        self.add_node_arc(name, Arc::new(node))
    }

    pub fn add_node_arc(&mut self, name: impl Into<String>, node: Arc<dyn Node>) -> &mut Self {
        let name = name.into();
        if is_reserved(&name) {
            self.errors.push(CompileError::ReservedName(name));
        } else if self.nodes.contains_key(&name) {
            self.errors.push(CompileError::DuplicateNode(name));
        } else {
            self.node_order.push(name.clone());
            self.nodes.insert(name, node);
        }
        self
    }

    /// Embed a compiled graph as a node
    pub fn add_subgraph(&mut self, name: impl Into<String>, graph: Arc<CompiledGraph>) -> &mut Self {
        self.add_subgraph_node(name, SubgraphNode::new(graph))
    }

    /// Embed a configured subgraph; its shared channels are checked against
    /// this graph's at compile time
    pub fn add_subgraph_node(&mut self, name: impl Into<String>, node: SubgraphNode) -> &mut Self {
        let name = name.into();
        let accepted = !is_reserved(&name) && !self.nodes.contains_key(&name);
        let node = Arc::new(node);
        self.add_node_arc(name.clone(), node.clone());
        if accepted {
            self.subgraphs.insert(name, node);
        }
        self
    }

    fn add_edge_entry(&mut self, from: String, edge: Edge) {
        if self.edges.contains_key(&from) {
            self.errors.push(CompileError::DuplicateEdge(from));
        } else {
            self.edges.insert(from, edge);
        }
    }

    /// Unconditional `from -> to`; `to` may be [`END`]
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.add_edge_entry(from.into(), Edge::Static(to.into()));
        self
    }

    /// `from -> router -> {label: target}`. A [`DEFAULT_ROUTE`] key catches
    /// labels that are not otherwise mapped.
    pub fn add_conditional_edges<I, K, V>(
        &mut self,
        from: impl Into<String>,
        router: impl Router + 'static,
        routes: I,
    ) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let routes = routes
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.add_edge_entry(
            from.into(),
            Edge::Conditional {
                router: Arc::new(router),
                routes,
            },
        );
        self
    }

    /// After `from`, run `branches` concurrently and continue at `join` once
    /// every branch update has been merged
    pub fn add_fan_out<I, S>(
        &mut self,
        from: impl Into<String>,
        branches: I,
        join: impl Into<String>,
    ) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let edge = Edge::FanOut {
            branches: branches.into_iter().map(Into::into).collect(),
            join: join.into(),
        };
        self.add_edge_entry(from.into(), edge);
        self
    }

    pub fn set_entry_point(&mut self, node: impl Into<String>) -> &mut Self {
        self.entry = Some(node.into());
        self
    }

    pub fn with_config(&mut self, config: ExecutionConfig) -> &mut Self {
        self.config = config;
        self
    }

    pub fn with_checkpointer(&mut self, checkpointer: Arc<dyn Checkpointer>) -> &mut Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    fn is_target(&self, name: &str) -> bool {
        name == END || self.nodes.contains_key(name)
    }

    fn check_target(&self, from: &str, to: &str) -> Result<(), CompileError> {
        if self.is_target(to) {
            Ok(())
        } else {
            Err(CompileError::UnknownNode {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    fn check_fan_out(&self, from: &str, branches: &[String], join: &str) -> Result<(), CompileError> {
        let invalid = |reason: String| CompileError::InvalidFanOut {
            from: from.to_string(),
            reason,
        };

        if branches.is_empty() {
            return Err(invalid("no branches".to_string()));
        }
        self.check_target(from, join)?;

        let mut seen = HashSet::new();
        for branch in branches {
            if branch == END {
                return Err(invalid("the terminal marker cannot be a branch".to_string()));
            }
            self.check_target(from, branch)?;
            if !seen.insert(branch.as_str()) {
                return Err(invalid(format!("branch '{}' listed twice", branch)));
            }
            if branch == from || branch == join {
                return Err(invalid(format!("branch '{}' is also the source or join", branch)));
            }
            match self.edges.get(branch) {
                None => {}
                Some(Edge::Static(to)) if to == join => {}
                Some(_) => {
                    return Err(invalid(format!(
                        "branch '{}' may only lead to the join '{}'",
                        branch, join
                    )))
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<String, CompileError> {
        if let Some(err) = self.errors.first() {
            return Err(err.clone());
        }

        let entry = self.entry.clone().ok_or(CompileError::MissingEntryPoint)?;
        if !self.nodes.contains_key(&entry) {
            return Err(CompileError::UnknownEntryPoint(entry));
        }

        let mut fan_out_branches = HashSet::new();
        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(CompileError::UnknownEdgeSource(from.clone()));
            }
            match edge {
                Edge::Static(to) => self.check_target(from, to)?,
                Edge::Conditional { routes, .. } => {
                    if routes.is_empty() {
                        return Err(CompileError::EmptyRoutes(from.clone()));
                    }
                    for to in routes.values() {
                        self.check_target(from, to)?;
                    }
                }
                Edge::FanOut { branches, join } => {
                    self.check_fan_out(from, branches, join)?;
                    fan_out_branches.extend(branches.iter().cloned());
                }
            }
        }

        for name in &self.node_order {
            if !self.edges.contains_key(name) && !fan_out_branches.contains(name) {
                return Err(CompileError::DeadEnd(name.clone()));
            }
        }

        for name in &self.node_order {
            if let Some(writes) = self.nodes[name].writes() {
                if let Some(channel) = writes.iter().find(|c| !self.channels.contains(c)) {
                    return Err(CompileError::UnknownChannel {
                        node: name.clone(),
                        channel: channel.clone(),
                    });
                }
            }
        }

        for (name, subgraph) in &self.subgraphs {
            subgraph.check_shared(name, &self.channels)?;
        }

        Ok(entry)
    }

    /// Structural reachability; problems here are warnings because routers
    /// are data-dependent
    fn reachability_warnings(&self, entry: &str) -> Vec<String> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut queue = VecDeque::from([entry]);
        let mut end_reachable = false;

        while let Some(name) = queue.pop_front() {
            if name == END {
                end_reachable = true;
                continue;
            }
            if !seen.insert(name) {
                continue;
            }
            match self.edges.get(name) {
                Some(Edge::FanOut { branches, join }) => {
                    queue.extend(branches.iter().map(|s| s.as_str()));
                    queue.push_back(join.as_str());
                }
                Some(edge) => queue.extend(edge.targets()),
                None => {}
            }
        }

        let mut warnings = Vec::new();
        if !end_reachable {
            warnings.push(format!(
                "graph '{}': no path from '{}' reaches {}; runs can only end at the recursion limit",
                self.name, entry, END
            ));
        }
        for name in &self.node_order {
            if !seen.contains(name.as_str()) {
                warnings.push(format!(
                    "graph '{}': node '{}' is unreachable from '{}'",
                    self.name, name, entry
                ));
            }
        }
        warnings
    }

    /// Validate and freeze the definition
    pub fn compile(&self) -> Result<CompiledGraph, CompileError> {
        let entry = self.validate()?;

        let warnings = self.reachability_warnings(&entry);
        for w in &warnings {
            log::warn!("{}", w);
        }

        log::debug!(
            "Compiled graph '{}': {} nodes, {} channels, entry '{}'",
            self.name,
            self.nodes.len(),
            self.channels.len(),
            entry
        );

        Ok(CompiledGraph {
            name: self.name.clone(),
            entry,
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            channels: self.channels.clone(),
            config: self.config.clone(),
            checkpointer: self.checkpointer.clone(),
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trellis::graph::channel::{Reducer, Update};
    use crate::trellis::graph::edge::FnRouter;
    use crate::trellis::graph::node::FnNode;
    use serde_json::json;

    fn noop() -> FnNode {
        FnNode::new(|_| Ok(Update::new()))
    }

    fn linear() -> StateGraph {
        let mut g = StateGraph::new("linear");
        g.add_channel(Channel::replace("x", json!(0)))
            .add_node("a", noop())
            .add_node("b", noop())
            .add_edge("a", "b")
            .add_edge("b", END)
            .set_entry_point("a");
        g
    }

    #[test]
    fn test_linear_graph_compiles_without_warnings() {
        let compiled = linear().compile().unwrap();
        assert_eq!(compiled.entry(), "a");
        assert!(compiled.warnings().is_empty());
    }

    #[test]
    fn test_missing_and_unknown_entry() {
        let mut g = linear();
        g.entry = None;
        assert_eq!(g.compile().err(), Some(CompileError::MissingEntryPoint));

        g.set_entry_point("zzz");
        assert_eq!(
            g.compile().err(),
            Some(CompileError::UnknownEntryPoint("zzz".to_string()))
        );
    }

    #[test]
    fn test_dangling_edge_target() {
        let mut g = StateGraph::new("g");
        g.add_node("a", noop()).add_edge("a", "ghost").set_entry_point("a");
        assert_eq!(
            g.compile().err(),
            Some(CompileError::UnknownNode {
                from: "a".to_string(),
                to: "ghost".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_conditional_target() {
        let mut g = StateGraph::new("g");
        g.add_node("a", noop())
            .add_conditional_edges(
                "a",
                FnRouter::new(|_| "x".to_string()),
                [("x", END), ("y", "nowhere")],
            )
            .set_entry_point("a");
        assert!(matches!(
            g.compile(),
            Err(CompileError::UnknownNode { to, .. }) if to == "nowhere"
        ));
    }

    #[test]
    fn test_duplicate_names_and_reserved() {
        let mut g = linear();
        g.add_node("a", noop());
        assert_eq!(
            g.compile().err(),
            Some(CompileError::DuplicateNode("a".to_string()))
        );

        let mut g = linear();
        g.add_channel(Channel::append("x"));
        assert_eq!(
            g.compile().err(),
            Some(CompileError::DuplicateChannel("x".to_string()))
        );

        let mut g = linear();
        g.add_node(END, noop());
        assert_eq!(
            g.compile().err(),
            Some(CompileError::ReservedName(END.to_string()))
        );
    }

    #[test]
    fn test_second_outgoing_edge_rejected() {
        let mut g = linear();
        g.add_edge("a", END);
        assert_eq!(
            g.compile().err(),
            Some(CompileError::DuplicateEdge("a".to_string()))
        );
    }

    #[test]
    fn test_dead_end_and_empty_routes() {
        let mut g = StateGraph::new("g");
        g.add_node("a", noop()).set_entry_point("a");
        assert_eq!(g.compile().err(), Some(CompileError::DeadEnd("a".to_string())));

        let mut g = StateGraph::new("g");
        g.add_node("a", noop())
            .add_conditional_edges(
                "a",
                FnRouter::new(|_| END.to_string()),
                Vec::<(String, String)>::new(),
            )
            .set_entry_point("a");
        assert_eq!(g.compile().err(), Some(CompileError::EmptyRoutes("a".to_string())));
    }

    #[test]
    fn test_declared_writes_must_be_registered() {
        let mut g = StateGraph::new("g");
        g.add_channel(Channel::replace("x", json!(0)))
            .add_node("a", noop().with_writes(["x", "y"]))
            .add_edge("a", END)
            .set_entry_point("a");
        assert_eq!(
            g.compile().err(),
            Some(CompileError::UnknownChannel {
                node: "a".to_string(),
                channel: "y".to_string()
            })
        );
    }

    #[test]
    fn test_fan_out_validation() {
        let mut g = StateGraph::new("g");
        g.add_node("start", noop())
            .add_node("left", noop())
            .add_node("right", noop())
            .add_node("join", noop())
            .add_fan_out("start", ["left", "right"], "join")
            .add_edge("right", "join")
            .add_edge("join", END)
            .set_entry_point("start");
        assert!(g.compile().is_ok());

        // a branch that wanders off elsewhere breaks the join
        let mut g = StateGraph::new("g");
        g.add_node("start", noop())
            .add_node("left", noop())
            .add_node("join", noop())
            .add_fan_out("start", ["left"], "join")
            .add_edge("left", END)
            .add_edge("join", END)
            .set_entry_point("start");
        assert!(matches!(
            g.compile(),
            Err(CompileError::InvalidFanOut { .. })
        ));
    }

    fn inner_graph(channel: Channel) -> Arc<CompiledGraph> {
        let mut g = StateGraph::new("inner");
        g.add_channel(channel)
            .add_node("a", noop())
            .add_edge("a", END)
            .set_entry_point("a");
        Arc::new(g.compile().unwrap())
    }

    fn outer_with(outer: Channel, inner: SubgraphNode) -> StateGraph {
        let mut g = StateGraph::new("outer");
        g.add_channel(outer)
            .add_subgraph_node("sub", inner)
            .add_edge("sub", END)
            .set_entry_point("sub");
        g
    }

    #[test]
    fn test_shared_channel_rules_must_agree() {
        let g = outer_with(
            Channel::append("log"),
            SubgraphNode::new(inner_graph(Channel::replace("log", json!(null)))),
        );
        assert!(matches!(
            g.compile(),
            Err(CompileError::IncompatibleSharedChannel { node, channel, .. })
                if node == "sub" && channel == "log"
        ));

        let g = outer_with(
            Channel::append("log"),
            SubgraphNode::new(inner_graph(Channel::replace("log", json!(null))))
                .with_replace_on_return(["log"]),
        );
        assert!(g.compile().is_ok());

        let g = outer_with(
            Channel::append("log"),
            SubgraphNode::new(inner_graph(Channel::append("log"))),
        );
        assert!(g.compile().is_ok());
    }

    #[test]
    fn test_custom_shared_channel_needs_replace_on_return() {
        let sum = || Reducer::custom(|c, u| json!(c.as_i64().unwrap_or(0) + u.as_i64().unwrap_or(0)));
        let g = outer_with(
            Channel::with_reducer("total", sum(), json!(0)),
            SubgraphNode::new(inner_graph(Channel::with_reducer("total", sum(), json!(0)))),
        );
        assert!(matches!(
            g.compile(),
            Err(CompileError::IncompatibleSharedChannel { channel, .. }) if channel == "total"
        ));

        // naming a channel the outer graph lacks is also rejected
        let g = outer_with(
            Channel::append("log"),
            SubgraphNode::new(inner_graph(Channel::with_reducer("total", sum(), json!(0))))
                .with_replace_on_return(["total"]),
        );
        assert!(matches!(
            g.compile(),
            Err(CompileError::IncompatibleSharedChannel { channel, .. }) if channel == "total"
        ));
    }

    #[test]
    fn test_cycle_without_exit_is_only_a_warning() {
        let mut g = StateGraph::new("spin");
        g.add_node("a", noop())
            .add_node("b", noop())
            .add_node("orphan", noop())
            .add_edge("a", "b")
            .add_edge("b", "a")
            .add_edge("orphan", END)
            .set_entry_point("a");

        let compiled = g.compile().unwrap();
        assert_eq!(compiled.warnings().len(), 2);
        assert!(compiled.warnings()[0].contains("no path"));
        assert!(compiled.warnings()[1].contains("orphan"));
    }
}
