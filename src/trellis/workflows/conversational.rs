// SPDX-License-Identifier: MIT

//! Friendly chat that can remember things through the memory tools and hand
//! the conversation to a specialist workflow

use crate::trellis::graph::StateGraph;
use crate::trellis::toolloop::ToolLoop;

pub const NAME: &str = "conversational";

/// Tools offered to the model
pub const TOOLS: [&str; 2] = ["put_memory", "search_memory"];

/// Workflows this one may hand the conversation to
pub const HANDOFFS: [&str; 7] = [
    "react",
    "rag",
    "research",
    "rewoo",
    "plan_execute",
    "self_rag",
    "crag",
];

pub const SYSTEM_PROMPT: &str = "You are a helpful and friendly AI assistant. You can store and \
retrieve information from memory. Respond to the user's query in a conversational manner. If the \
user asks you to remember something, use the 'put_memory' tool. If the user asks you about \
something you might have remembered, use the 'search_memory' tool. If another agent is better \
suited to the request, reply with a single line 'HANDOFF: <agent>' naming one of: react, rag, \
research, rewoo, plan_execute, self_rag, crag.";

pub fn tool_loop() -> ToolLoop {
    ToolLoop::new(NAME)
        .system_prompt(SYSTEM_PROMPT)
        .tools(TOOLS.iter().map(|t| t.to_string()).collect())
        .handoffs(HANDOFFS.iter().map(|h| h.to_string()).collect())
}

/// Standalone graph; a handoff ends the run with the label in `next`
pub fn graph() -> StateGraph {
    tool_loop().build()
}
