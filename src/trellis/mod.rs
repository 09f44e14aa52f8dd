// SPDX-License-Identifier: MIT

//! The graph engine and everything built on top of it
//!
//! - [`graph`] - channels, nodes, edges, compiler and executor
//! - [`toolloop`] and [`plan`] - the reusable agent patterns
//! - [`workflows`] - concrete graphs (ReAct, ReWOO, supervisor, ...)
//! - [`definition`] - graphs declared in YAML
//! - [`tools`] and [`mcp`] - tools handed to the model

pub mod condition;
pub mod config;
pub mod definition;
pub mod graph;
pub mod mcp;
pub mod messages;
pub mod plan;
pub mod prompt;
pub mod registry;
pub mod toolloop;
pub mod tools;
pub mod workflows;
