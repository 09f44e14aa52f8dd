// SPDX-License-Identifier: MIT

//! Typed error handling for trellis-rs
//!
//! Three layers of failure are kept apart:
//! - [`CompileError`] - a graph definition is structurally broken; no run may start
//! - [`RunFault`] - a run ended in the `Failed` state; cloneable so callers can branch on it
//! - [`TrellisError`] - everything a node, tool, model or loader can return

use std::fmt;
use thiserror::Error;

/// Top-level error type for trellis-rs
#[derive(Debug, Error)]
pub enum TrellisError {
    /// API errors from external services (Gemini, Tavily, MCP servers)
    #[error("API error from {provider}: {message}")]
    Api { provider: String, message: String },

    /// Tool not found during dispatch
    #[error("Tool '{name}' not found")]
    ToolNotFound { name: String },

    /// Configuration errors (missing env vars, invalid definition values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Structural problem in a graph definition
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// A (sub)graph run ended in the failed state
    #[error("Run failed: {0}")]
    Run(#[from] RunFault),

    /// Model-specific failures
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Malformed or unresolvable plan
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    /// Cooperative cancellation observed inside a node
    #[error("Run cancelled")]
    Cancelled,

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Generic error wrapper
    #[error("{0}")]
    Other(String),
}

/// Structural defects found while compiling a graph
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("channel '{0}' is registered twice")]
    DuplicateChannel(String),

    #[error("node '{0}' is declared twice")]
    DuplicateNode(String),

    #[error("'{0}' is a reserved name")]
    ReservedName(String),

    #[error("no entry point set")]
    MissingEntryPoint,

    #[error("entry point '{0}' is not a declared node")]
    UnknownEntryPoint(String),

    #[error("edge from '{from}' references unknown node '{to}'")]
    UnknownNode { from: String, to: String },

    #[error("edge source '{0}' is not a declared node")]
    UnknownEdgeSource(String),

    #[error("node '{0}' already has an outgoing edge")]
    DuplicateEdge(String),

    #[error("conditional edge from '{0}' declares no routes")]
    EmptyRoutes(String),

    #[error("node '{0}' has no outgoing edge")]
    DeadEnd(String),

    #[error("node '{node}' declares write to unregistered channel '{channel}'")]
    UnknownChannel { node: String, channel: String },

    #[error("invalid fan-out from '{from}': {reason}")]
    InvalidFanOut { from: String, reason: String },

    #[error("subgraph '{node}' cannot hand back channel '{channel}': {reason}")]
    IncompatibleSharedChannel {
        node: String,
        channel: String,
        reason: String,
    },

    #[error("invalid graph definition: {0}")]
    Definition(String),
}

/// Which budget a timeout exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutScope {
    Run,
    Step,
}

impl fmt::Display for TimeoutScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutScope::Run => write!(f, "run"),
            TimeoutScope::Step => write!(f, "step"),
        }
    }
}

/// Why a run transitioned to `Failed`
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RunFault {
    /// A router returned a label absent from its map and no default exists
    #[error("router after '{node}' returned unknown label '{label}'")]
    Routing { node: String, label: String },

    /// A node's underlying call failed and the node did not recover
    #[error("node '{node}' failed: {message}")]
    NodeInvocation { node: String, message: String },

    /// A router itself failed (e.g. an async router's model call)
    #[error("router after '{node}' failed: {message}")]
    Router { node: String, message: String },

    /// Step counter reached the configured ceiling
    #[error("recursion limit of {limit} steps exceeded")]
    RecursionLimitExceeded { limit: usize },

    /// Wall-clock budget exhausted
    #[error("{scope} timeout exceeded{}", .node.as_ref().map(|n| format!(" in node '{}'", n)).unwrap_or_default())]
    Timeout {
        scope: TimeoutScope,
        node: Option<String>,
    },

    /// A node (or the run input) wrote a channel that is not registered
    #[error("'{node}' wrote unregistered channel '{channel}'")]
    InvalidUpdate { node: String, channel: String },
}

/// Fieldless discriminant of [`RunFault`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Routing,
    NodeInvocation,
    Router,
    RecursionLimitExceeded,
    Timeout,
    InvalidUpdate,
}

impl RunFault {
    pub fn kind(&self) -> FaultKind {
        match self {
            RunFault::Routing { .. } => FaultKind::Routing,
            RunFault::NodeInvocation { .. } => FaultKind::NodeInvocation,
            RunFault::Router { .. } => FaultKind::Router,
            RunFault::RecursionLimitExceeded { .. } => FaultKind::RecursionLimitExceeded,
            RunFault::Timeout { .. } => FaultKind::Timeout,
            RunFault::InvalidUpdate { .. } => FaultKind::InvalidUpdate,
        }
    }
}

/// Model/LLM-specific errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// API key not configured
    #[error("API key not configured for provider: {0}")]
    ApiKeyMissing(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Response blocked by the provider
    #[error("Response blocked: {0}")]
    Blocked(String),

    /// Invalid response from model
    #[error("Invalid response from model: {0}")]
    InvalidResponse(String),
}

/// Problems with a typed plan
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan variable '{0}' is defined twice")]
    DuplicateVariable(String),

    #[error("step '{step}' references '{var}' before it is defined")]
    UndefinedReference { step: String, var: String },

    #[error("invalid variable name '{0}', expected '#E<n>'")]
    InvalidVariable(String),

    #[error("plan is malformed: {0}")]
    Malformed(String),
}

impl TrellisError {
    /// Create an API error
    pub fn api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a tool not found error
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound { name: name.into() }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create from a generic message
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TrellisError::Cancelled)
    }
}

impl From<&str> for TrellisError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for TrellisError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for TrellisError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(err.to_string())
    }
}

pub type Result<T, E = TrellisError> = std::result::Result<T, E>;
