// SPDX-License-Identifier: MIT

//! Graphs declared in YAML

pub mod builder;
pub mod loader;
pub mod types;

pub use builder::DefinitionBuilder;
pub use loader::DefinitionLoader;
pub use types::{BranchDef, ChannelDef, EdgeDef, GraphDefinition, NodeDef, ReducerKind};
