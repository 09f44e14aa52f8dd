// SPDX-License-Identifier: MIT

//! Built-in tools

pub mod calculator;
pub mod memory;
pub mod tavily;

pub use calculator::{calculator_tools, CalculatorTool};
pub use memory::{PutMemoryTool, SearchMemoryTool};
pub use tavily::TavilySearchTool;

use crate::adk::tool::Tool;
use crate::trellis::registry::ToolRegistry;
use std::sync::Arc;

pub fn memory_tools() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(PutMemoryTool), Arc::new(SearchMemoryTool)]
}

/// Calculator and memory tools, plus web search when `TAVILY_API_KEY` is set
pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    let mut tools = calculator_tools();
    tools.extend(memory_tools());
    match TavilySearchTool::from_env() {
        Ok(search) => tools.push(Arc::new(search)),
        Err(e) => log::info!("Web search disabled: {}", e),
    }
    tools
}

pub async fn register_builtin_tools(registry: &ToolRegistry) {
    registry.register_all(builtin_tools()).await;
}
