// SPDX-License-Identifier: MIT

//! Model module - the model-invocation collaborator
//!
//! The engine only needs `invoke(messages) -> {content, tool calls}`. That is
//! expressed by the [`Model`] trait over a list of [`Content`] messages; the
//! returned `Content` carries text parts and zero or more
//! [`Part::FunctionCall`] requests.
//!
//! Implementations live in their own submodules:
//! - [gemini] - Google's Gemini API

pub mod gemini;

use crate::adk::error::TrellisError;
use crate::adk::tool::Tool;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration for model generation
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

/// Parts of a message - text, thinking, function calls, etc.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Part {
    /// Regular text output from the model
    Text(String),
    /// Thinking/reasoning content from thinking models
    Thinking(String),
    /// Function/tool call requested by the model
    FunctionCall {
        name: String,
        args: serde_json::Value,
        /// Thought signature from Gemini thinking models - must be preserved and sent back
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought_signature: Option<String>,
    },
    /// Response from executing a function/tool
    FunctionResponse {
        name: String,
        response: serde_json::Value,
    },
}

/// A tool invocation request extracted from a model message
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub args: serde_json::Value,
}

impl Content {
    pub fn new(role: impl Into<String>, parts: Vec<Part>) -> Self {
        Self {
            role: role.into(),
            parts,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new("system", vec![Part::Text(text.into())])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new("user", vec![Part::Text(text.into())])
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new("model", vec![Part::Text(text.into())])
    }

    /// All text parts joined with newlines (thinking excluded)
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tool invocation requests in the order the model emitted them
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::FunctionCall { name, args, .. } => Some(ToolCall {
                    name: name.clone(),
                    args: args.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, Part::FunctionCall { .. }))
    }
}

/// Core trait for LLM model implementations
#[async_trait]
pub trait Model: Send + Sync {
    async fn generate_content(
        &self,
        history: &[Content],
        config: Option<&GenerationConfig>,
        tools: Option<&[Arc<dyn Tool>]>,
    ) -> Result<Content, TrellisError>;
}
