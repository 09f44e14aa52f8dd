// SPDX-License-Identifier: MIT

//! MCP servers over stdio, exposed as tools
//!
//! Each server tool is registered as `mcp__<server>__<tool>` so tools from
//! different servers never collide.

pub mod manager;
pub mod tool;

pub use manager::{McpServerConfig, McpServiceManager};
pub use tool::McpTool;

use crate::adk::error::TrellisError;
use rmcp::model::{ClientCapabilities, ClientInfo, Implementation};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::{ClientHandler, ServiceExt};
use tokio::process::Command;

/// Prefix shared by every MCP-backed tool name
pub const TOOL_PREFIX: &str = "mcp";

pub type McpService = RunningService<RoleClient, TrellisClientHandler>;

#[derive(Debug, Clone)]
pub struct TrellisClientHandler;

impl ClientHandler for TrellisClientHandler {
    fn get_info(&self) -> ClientInfo {
        ClientInfo {
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
        }
    }
}

/// Registry name for `tool` served by `server`
pub fn tool_name(server: &str, tool: &str) -> String {
    format!("{}__{}__{}", TOOL_PREFIX, server, tool)
}

/// Spawn `command args..` and complete the MCP handshake over its stdio
pub async fn connect(command: &str, args: &[String]) -> Result<McpService, TrellisError> {
    let mut server_cmd = Command::new(command);
    server_cmd.args(args);

    let transport = TokioChildProcess::new(server_cmd)?;
    TrellisClientHandler
        .serve(transport)
        .await
        .map_err(|e| TrellisError::api(format!("mcp:{}", command), e.to_string()))
}
