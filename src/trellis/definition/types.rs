// SPDX-License-Identifier: MIT

//! YAML schema for graph definition files

use crate::trellis::config::{ExecutionConfig, ModelSettings};
use crate::trellis::graph::END;
use crate::trellis::mcp::manager::McpServerConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Top-level graph definition
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GraphDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Execution bounds for runs of this graph
    #[serde(default)]
    pub engine: ExecutionConfig,
    /// Model used by agent and llm nodes
    #[serde(default)]
    pub model: ModelSettings,
    /// MCP servers whose tools become available to agent nodes
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
    /// `messages` and `next` are added when not declared
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelDef>,
    pub entry: String,
    pub nodes: BTreeMap<String, NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReducerKind {
    #[default]
    Replace,
    Append,
    Merge,
    Max,
    Min,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct ChannelDef {
    #[serde(default)]
    pub reducer: ReducerKind,
    /// Initial value; `[]` for append, `{}` for merge, null otherwise
    #[serde(default)]
    pub default: Option<Value>,
}

fn default_true() -> bool {
    true
}

/// What a node does, selected by its `kind`
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeDef {
    /// Tool-calling loop over `messages`. Installs `<id>` and `<id>_tools`;
    /// its exits are its handoffs (label -> node), everything else ends.
    Agent {
        #[serde(default)]
        instructions: Option<String>,
        /// Tool names offered to the model; all registered tools when absent
        #[serde(default)]
        tools: Option<Vec<String>>,
        #[serde(default)]
        handoffs: BTreeMap<String, String>,
    },
    /// One templated model call
    Llm {
        prompt: String,
        #[serde(default)]
        system: Option<String>,
        /// Channel receiving the reply text
        #[serde(default)]
        output: Option<String>,
        /// Append the reply to `messages`
        #[serde(default = "default_true")]
        record: bool,
    },
    /// A built-in workflow mounted as a subgraph
    Workflow {
        workflow: String,
        /// Shared channels whose inner value overwrites the outer one
        #[serde(default)]
        replace_on_return: Vec<String>,
    },
    /// Another definition file mounted as a subgraph, relative to this file
    Graph {
        file: String,
        #[serde(default)]
        replace_on_return: Vec<String>,
    },
    /// Writes fixed values
    Set { values: BTreeMap<String, Value> },
    /// Executes the plan held in `steps`, merging results into `results`
    Plan {
        #[serde(default)]
        steps: Option<String>,
        #[serde(default)]
        results: Option<String>,
    },
}

/// One conditional branch: first matching condition wins
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BranchDef {
    pub condition: String,
    pub to: String,
}

/// Outgoing edge of `from`. Exactly one form must be used:
/// `to`, `when`/`otherwise`, `route_on` + `routes`, or `fan_out` + `join`.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct EdgeDef {
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub when: Vec<BranchDef>,
    #[serde(default)]
    pub otherwise: Option<String>,
    /// Channel whose string value is the routing label
    #[serde(default)]
    pub route_on: Option<String>,
    #[serde(default)]
    pub routes: BTreeMap<String, String>,
    #[serde(default)]
    pub fan_out: Vec<String>,
    #[serde(default)]
    pub join: Option<String>,
}

/// `END` and `__end__` both name the terminal
pub fn target(name: &str) -> String {
    if name.eq_ignore_ascii_case("end") {
        END.to_string()
    } else {
        name.to_string()
    }
}
