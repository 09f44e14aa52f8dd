// SPDX-License-Identifier: MIT

//! Reason-and-act: the tool loop with a general-purpose prompt

use crate::trellis::graph::StateGraph;
use crate::trellis::toolloop::ToolLoop;

pub const NAME: &str = "react";

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the available tools whenever \
they help answer the user's request, then reply with the final answer in plain text.";

/// The loop on its own, ready to install into a larger graph
pub fn tool_loop(handoffs: Vec<String>) -> ToolLoop {
    ToolLoop::new(NAME)
        .system_prompt(SYSTEM_PROMPT)
        .handoffs(handoffs)
}

/// Standalone graph; a handoff label ends the run with the label in `next`
pub fn graph(handoffs: Vec<String>) -> StateGraph {
    tool_loop(handoffs).build()
}
