// SPDX-License-Identifier: MIT

//! trellis-rs - a stateful graph execution engine for agent workflows
//!
//! - [`adk`] holds the collaborators a graph talks to: models, tools, memory
//! - [`trellis`] holds the engine and everything built on it

pub mod adk;
pub mod trellis;
