// SPDX-License-Identifier: MIT

//! Stateful graph execution engine

pub mod builder;
pub mod channel;
pub mod checkpoint;
pub mod edge;
pub mod events;
pub mod executor;
pub mod node;
pub mod subgraph;

pub use builder::StateGraph;
pub use channel::{Channel, ChannelRegistry, Reducer, State, Update};
pub use checkpoint::{Checkpointer, InMemoryCheckpointer};
pub use edge::{AsyncFnRouter, ConditionRouter, Edge, FnRouter, Router, DEFAULT_ROUTE, END, START};
pub use events::{ChannelSink, CollectingSink, EventSink, LogSink, RunEvent};
pub use executor::{CompiledGraph, RunOutcome, RunStatus};
pub use node::{AsyncFnNode, FnNode, Node, RunContext};
pub use subgraph::SubgraphNode;
