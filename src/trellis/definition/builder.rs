// SPDX-License-Identifier: MIT

//! Turns a [`GraphDefinition`] into a compiled graph
//!
//! MCP servers are started first so their tools are registered before any
//! agent node asks for them. `graph` nodes load and compile their file
//! recursively, relative to the directory of the file that names them.

use super::loader::DefinitionLoader;
use super::types::{target, ChannelDef, EdgeDef, GraphDefinition, NodeDef, ReducerKind};
use crate::adk::error::{CompileError, TrellisError};
use crate::trellis::graph::{
    Channel, CompiledGraph, ConditionRouter, FnNode, FnRouter, Reducer, State, StateGraph,
    SubgraphNode, Update, DEFAULT_ROUTE,
};
use crate::trellis::mcp::manager::{McpServerConfig, McpServiceManager};
use crate::trellis::messages::MESSAGES;
use crate::trellis::plan::{PlanWorkerNode, RESULTS, STEPS};
use crate::trellis::prompt::PromptNode;
use crate::trellis::registry::ToolRegistry;
use crate::trellis::toolloop::{ToolLoop, NEXT};
use crate::trellis::workflows;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn invalid(message: impl Into<String>) -> TrellisError {
    TrellisError::Compile(CompileError::Definition(message.into()))
}

fn channel(name: &str, def: &ChannelDef) -> Channel {
    let (reducer, fallback) = match def.reducer {
        ReducerKind::Replace => (Reducer::Replace, Value::Null),
        ReducerKind::Append => (Reducer::Append, json!([])),
        ReducerKind::Merge => (Reducer::Merge, json!({})),
        ReducerKind::Max => (Reducer::Max, Value::Null),
        ReducerKind::Min => (Reducer::Min, Value::Null),
    };
    Channel::with_reducer(name, reducer, def.default.clone().unwrap_or(fallback))
}

/// Builds graphs from definitions, sharing one tool registry
pub struct DefinitionBuilder {
    loader: DefinitionLoader,
    registry: ToolRegistry,
    mcp_manager: Option<Arc<McpServiceManager>>,
}

impl DefinitionBuilder {
    pub fn new(registry: ToolRegistry, mcp_manager: Arc<McpServiceManager>) -> Self {
        Self {
            loader: DefinitionLoader::new(),
            registry,
            mcp_manager: Some(mcp_manager),
        }
    }

    /// Builder that never starts MCP servers, for validation
    pub fn offline(registry: ToolRegistry) -> Self {
        Self {
            loader: DefinitionLoader::new(),
            registry,
            mcp_manager: None,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Load and build a definition file
    pub async fn build_file(&self, path: impl AsRef<Path>) -> Result<CompiledGraph, TrellisError> {
        let path = path.as_ref();
        let def = self.loader.load(path)?;
        self.build(&def, &parent_dir(path)).await
    }

    /// Build `def`; relative `graph` files resolve against `base_dir`
    pub fn build<'a>(
        &'a self,
        def: &'a GraphDefinition,
        base_dir: &'a Path,
    ) -> BoxFuture<'a, Result<CompiledGraph, TrellisError>> {
        Box::pin(async move {
            self.initialize_mcp_servers(&def.mcp_servers).await;

            let mut graph = StateGraph::new(def.name.clone());
            graph.with_config(def.engine.clone().with_env_overrides());

            for (name, channel_def) in &def.channels {
                graph.add_channel(channel(name, channel_def));
            }
            if !def.channels.contains_key(MESSAGES) {
                graph.add_channel(Channel::append(MESSAGES));
            }
            if !def.channels.contains_key(NEXT) {
                graph.add_channel(Channel::replace(NEXT, Value::Null));
            }

            for (id, node) in &def.nodes {
                self.add_node(&mut graph, def, id, node, base_dir).await?;
            }
            for edge in &def.edges {
                add_edge(&mut graph, edge)?;
            }
            graph.set_entry_point(def.entry.clone());

            let compiled = graph.compile()?;
            for warning in compiled.warnings() {
                log::warn!("Definition '{}': {}", def.name, warning);
            }
            log::info!(
                "Built graph '{}' with {} nodes",
                def.name,
                compiled.node_names().count()
            );
            Ok(compiled)
        })
    }

    async fn add_node(
        &self,
        graph: &mut StateGraph,
        def: &GraphDefinition,
        id: &str,
        node: &NodeDef,
        base_dir: &Path,
    ) -> Result<(), TrellisError> {
        match node {
            NodeDef::Agent {
                instructions,
                tools,
                handoffs,
            } => {
                let mut tool_loop = ToolLoop::new(id)
                    .handoffs(handoffs.keys().cloned().collect())
                    .generation_config(def.model.generation_config());
                if let Some(instructions) = instructions {
                    tool_loop = tool_loop.system_prompt(instructions.clone());
                }
                if let Some(tools) = tools {
                    for name in tools {
                        if self.registry.get(name).await.is_none() {
                            log::warn!("Agent '{}' lists unregistered tool '{}'", id, name);
                        }
                    }
                    tool_loop = tool_loop.tools(tools.clone());
                }
                let targets: Vec<(String, String)> = handoffs
                    .iter()
                    .map(|(label, node)| (label.clone(), target(node)))
                    .collect();
                tool_loop.install(graph, &targets);
            }
            NodeDef::Llm {
                prompt,
                system,
                output,
                record,
            } => {
                let mut prompt_node = PromptNode::new(prompt.clone())
                    .with_record(*record)
                    .with_generation_config(def.model.generation_config());
                if let Some(system) = system {
                    prompt_node = prompt_node.with_system_prompt(system.clone());
                }
                if let Some(output) = output {
                    prompt_node = prompt_node.with_output(output.clone());
                }
                graph.add_node(id, prompt_node);
            }
            NodeDef::Workflow {
                workflow,
                replace_on_return,
            } => {
                let node = SubgraphNode::new(workflows::build(workflow)?)
                    .with_replace_on_return(replace_on_return.iter().cloned());
                graph.add_subgraph_node(id, node);
            }
            NodeDef::Graph {
                file,
                replace_on_return,
            } => {
                let path = base_dir.join(file);
                let inner = self.loader.load(&path)?;
                let compiled = self.build(&inner, &parent_dir(&path)).await?;
                let node = SubgraphNode::new(Arc::new(compiled))
                    .with_replace_on_return(replace_on_return.iter().cloned());
                graph.add_subgraph_node(id, node);
            }
            NodeDef::Set { values } => {
                let values = values.clone();
                let keys: Vec<String> = values.keys().cloned().collect();
                graph.add_node(
                    id,
                    FnNode::new(move |_| {
                        Ok(values.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Update>())
                    })
                    .with_writes(keys),
                );
            }
            NodeDef::Plan { steps, results } => {
                graph.add_node(
                    id,
                    PlanWorkerNode::with_channels(
                        steps.as_deref().unwrap_or(STEPS),
                        results.as_deref().unwrap_or(RESULTS),
                    ),
                );
            }
        }
        Ok(())
    }

    /// Start each server and register its tools; a failing server is logged
    /// and skipped
    async fn initialize_mcp_servers(&self, servers: &[McpServerConfig]) {
        let Some(manager) = &self.mcp_manager else {
            if !servers.is_empty() {
                log::debug!("Skipping {} MCP servers (offline build)", servers.len());
            }
            return;
        };
        for config in servers {
            match manager.tools(config).await {
                Ok(tools) => {
                    log::info!("MCP server '{}' provides {} tools", config.name, tools.len());
                    self.registry.register_all(tools).await;
                }
                Err(e) => log::error!("Failed to initialize MCP server {}: {}", config.name, e),
            }
        }
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn add_edge(graph: &mut StateGraph, edge: &EdgeDef) -> Result<(), TrellisError> {
    let conditional = !edge.when.is_empty() || edge.otherwise.is_some();
    let switched = edge.route_on.is_some();
    let fan_out = !edge.fan_out.is_empty();
    let forms = [edge.to.is_some(), conditional, switched, fan_out]
        .iter()
        .filter(|used| **used)
        .count();
    if forms != 1 {
        return Err(invalid(format!(
            "edge from '{}' must use exactly one of to, when/otherwise, route_on, fan_out",
            edge.from
        )));
    }

    if let Some(to) = &edge.to {
        graph.add_edge(edge.from.clone(), target(to));
    } else if conditional {
        let mut router = ConditionRouter::new();
        for branch in &edge.when {
            router = router.when(&branch.condition, branch.to.clone())?;
        }
        if let Some(otherwise) = &edge.otherwise {
            router = router.otherwise(otherwise.clone());
        }
        let routes: Vec<(String, String)> = router
            .labels()
            .into_iter()
            .map(|label| {
                let to = target(&label);
                (label, to)
            })
            .collect();
        graph.add_conditional_edges(edge.from.clone(), router, routes);
    } else if let Some(channel) = &edge.route_on {
        if edge.routes.is_empty() {
            return Err(invalid(format!("edge from '{}' has no routes", edge.from)));
        }
        let channel = channel.clone();
        let routes: Vec<(String, String)> = edge
            .routes
            .iter()
            .map(|(label, to)| (label.clone(), target(to)))
            .collect();
        graph.add_conditional_edges(
            edge.from.clone(),
            FnRouter::new(move |state: &State| {
                state
                    .get_str(&channel)
                    .unwrap_or(DEFAULT_ROUTE)
                    .to_string()
            }),
            routes,
        );
    } else {
        let join = edge
            .join
            .as_ref()
            .ok_or_else(|| invalid(format!("fan-out from '{}' has no join", edge.from)))?;
        graph.add_fan_out(edge.from.clone(), edge.fan_out.clone(), join.clone());
    }
    Ok(())
}
