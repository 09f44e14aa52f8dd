// SPDX-License-Identifier: MIT

//! Conversation messages stored in an append channel
//!
//! Each entry is a serialized [`Content`]. Bare strings are accepted as user
//! text so callers can seed a run with `{"messages": "hello"}`.

use crate::adk::model::Content;
use crate::trellis::graph::State;
use serde_json::Value;

/// Conventional channel name for the running conversation
pub const MESSAGES: &str = "messages";

pub fn to_value(content: &Content) -> Value {
    serde_json::to_value(content).unwrap_or(Value::Null)
}

/// Value to append one message
pub fn append_one(content: &Content) -> Value {
    Value::Array(vec![to_value(content)])
}

/// Value to append several messages in order
pub fn append_all<'a>(contents: impl IntoIterator<Item = &'a Content>) -> Value {
    Value::Array(contents.into_iter().map(to_value).collect())
}

pub fn from_value(value: &Value) -> Option<Content> {
    match value {
        Value::String(text) => Some(Content::user(text.clone())),
        other => match serde_json::from_value(other.clone()) {
            Ok(content) => Some(content),
            Err(e) => {
                log::warn!("Skipping unreadable message entry: {}", e);
                None
            }
        },
    }
}

/// Every readable message in `channel`, oldest first
pub fn read(state: &State, channel: &str) -> Vec<Content> {
    state
        .get_array(channel)
        .iter()
        .filter_map(from_value)
        .collect()
}

pub fn last(state: &State, channel: &str) -> Option<Content> {
    state.get_array(channel).last().and_then(from_value)
}

/// Text of the most recent message, empty when there is none
pub fn last_text(state: &State, channel: &str) -> String {
    last(state, channel).map(|c| c.text()).unwrap_or_default()
}

/// Text of the most recent user message
pub fn last_user_text(state: &State, channel: &str) -> Option<String> {
    read(state, channel)
        .into_iter()
        .rev()
        .find(|c| c.role == "user" && !c.text().is_empty())
        .map(|c| c.text())
}
