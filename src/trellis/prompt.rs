// SPDX-License-Identifier: MIT

//! Single model call driven by a prompt template
//!
//! Templates reference channels with `{channel}` or `{channel.field}`. Strings
//! are substituted as-is, arrays of strings one per line, anything else as
//! compact JSON. `{input}` falls back to the latest user message when the
//! state has no `input` channel. Braces that do not name a known value are
//! left untouched, so JSON examples survive rendering.

use crate::adk::error::TrellisError;
use crate::adk::model::{Content, GenerationConfig};
use crate::trellis::graph::{Node, RunContext, State, Update};
use crate::trellis::messages::{self, MESSAGES};
use async_trait::async_trait;
use serde_json::Value;

/// Placeholder that falls back to the latest user message
pub const INPUT: &str = "input";

fn is_placeholder_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Text form of a channel value for prompt substitution
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) if items.iter().all(Value::is_string) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn lookup(state: &State, name: &str) -> Option<String> {
    if let Some(value) = state.get_path(name) {
        if name == INPUT && value_text(value).is_empty() {
            return messages::last_user_text(state, MESSAGES);
        }
        return Some(value_text(value));
    }
    if name == INPUT {
        return messages::last_user_text(state, MESSAGES);
    }
    None
}

/// Substitute `{name}` placeholders from `state`
pub fn render(template: &str, state: &State) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let name_len = after
            .find(|c: char| !is_placeholder_char(c))
            .unwrap_or(after.len());
        let name = &after[..name_len];
        let closed = after[name_len..].starts_with('}');

        match (closed && !name.is_empty()).then(|| lookup(state, name)).flatten() {
            Some(text) => {
                out.push_str(&text);
                rest = &after[name_len + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Renders a template, asks the model once and stores the reply
pub struct PromptNode {
    system: Option<String>,
    template: String,
    output: Option<String>,
    record: bool,
    generation: Option<GenerationConfig>,
    writes: Vec<String>,
}

impl PromptNode {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            system: None,
            template: template.into(),
            output: None,
            record: true,
            generation: None,
            writes: vec![MESSAGES.to_string()],
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system = Some(prompt.into());
        self
    }

    /// Also write the reply text to `channel`
    pub fn with_output(mut self, channel: impl Into<String>) -> Self {
        self.output = Some(channel.into());
        self.refresh_writes();
        self
    }

    /// Whether the reply is appended to the conversation (default true)
    pub fn with_record(mut self, record: bool) -> Self {
        self.record = record;
        self.refresh_writes();
        self
    }

    pub fn with_generation_config(mut self, config: GenerationConfig) -> Self {
        self.generation = Some(config);
        self
    }

    fn refresh_writes(&mut self) {
        self.writes = self
            .record
            .then(|| MESSAGES.to_string())
            .into_iter()
            .chain(self.output.clone())
            .collect();
    }

    fn history(&self, state: &State) -> Vec<Content> {
        let mut history = Vec::with_capacity(2);
        if let Some(system) = &self.system {
            history.push(Content::system(render(system, state)));
        }
        history.push(Content::user(render(&self.template, state)));
        history
    }
}

#[async_trait]
impl Node for PromptNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        ctx.check_cancelled()?;
        let model = ctx.model()?;
        let history = self.history(state);

        let reply = match model
            .generate_content(&history, self.generation.as_ref(), None)
            .await
        {
            Ok(reply) => reply,
            Err(e) if e.is_cancelled() || !self.record => return Err(e),
            Err(e) => {
                log::error!("Prompt call failed: {}", e);
                return Ok(Update::new().set(
                    MESSAGES,
                    messages::append_one(&Content::model(format!("Error: {}", e))),
                ));
            }
        };

        let text = reply.text();
        let mut update = Update::new();
        if let Some(channel) = &self.output {
            update.insert(channel.clone(), Value::String(text.clone()));
        }
        if self.record {
            update.insert(MESSAGES, messages::append_one(&Content::model(text)));
        }
        Ok(update)
    }

    fn writes(&self) -> Option<&[String]> {
        Some(&self.writes)
    }
}
