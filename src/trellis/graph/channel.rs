// SPDX-License-Identifier: MIT

//! Channel registry: the shape of a graph's shared state
//!
//! A [`Channel`] is a named slot with a [`Reducer`] and a default factory.
//! [`State`] is an immutable snapshot handed to nodes; nodes answer with a
//! partial [`Update`] which the registry folds in with [`ChannelRegistry::merge`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::adk::error::CompileError;

pub type ReduceFn = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;
pub type DefaultFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Strategy for folding an update into the current value
#[derive(Clone)]
pub enum Reducer {
    /// Latest wins; a `null` update keeps the current value
    Replace,
    /// Concatenate, preserving insertion order
    Append,
    /// Shallow object union, later keys overwrite
    Merge,
    /// Keep the numeric maximum
    Max,
    /// Keep the numeric minimum
    Min,
    Custom(ReduceFn),
}

impl fmt::Debug for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reducer::Replace => write!(f, "Replace"),
            Reducer::Append => write!(f, "Append"),
            Reducer::Merge => write!(f, "Merge"),
            Reducer::Max => write!(f, "Max"),
            Reducer::Min => write!(f, "Min"),
            Reducer::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl Reducer {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        Reducer::Custom(Arc::new(f))
    }

    /// Total over all JSON values: ill-typed inputs degrade, they never panic
    pub fn reduce(&self, current: &Value, update: &Value) -> Value {
        match self {
            Reducer::Replace => {
                if update.is_null() {
                    current.clone()
                } else {
                    update.clone()
                }
            }
            Reducer::Append => {
                let mut items = match current {
                    Value::Array(a) => a.clone(),
                    Value::Null => Vec::new(),
                    other => vec![other.clone()],
                };
                match update {
                    Value::Array(new_items) => items.extend(new_items.iter().cloned()),
                    Value::Null => {}
                    other => items.push(other.clone()),
                }
                Value::Array(items)
            }
            Reducer::Merge => match update {
                Value::Object(new_obj) => {
                    let mut merged = match current {
                        Value::Object(obj) => obj.clone(),
                        _ => Map::new(),
                    };
                    for (k, v) in new_obj {
                        merged.insert(k.clone(), v.clone());
                    }
                    Value::Object(merged)
                }
                Value::Null => current.clone(),
                other => other.clone(),
            },
            Reducer::Max => keep_extreme(current, update, |new, cur| new > cur),
            Reducer::Min => keep_extreme(current, update, |new, cur| new < cur),
            Reducer::Custom(f) => f(current, update),
        }
    }

    pub fn is_append(&self) -> bool {
        matches!(self, Reducer::Append)
    }

    /// Both sides fold values the same way. Custom reducers are opaque, so
    /// they never match, not even themselves.
    pub fn same_rule(&self, other: &Reducer) -> bool {
        match (self, other) {
            (Reducer::Custom(_), _) | (_, Reducer::Custom(_)) => false,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

fn keep_extreme(current: &Value, update: &Value, better: impl Fn(f64, f64) -> bool) -> Value {
    match (current.as_f64(), update.as_f64()) {
        (_, None) => current.clone(),
        (None, Some(_)) => update.clone(),
        (Some(cur), Some(new)) => {
            if better(new, cur) {
                update.clone()
            } else {
                current.clone()
            }
        }
    }
}

/// A named slot in the shared state
#[derive(Clone)]
pub struct Channel {
    name: String,
    reducer: Reducer,
    default: DefaultFn,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("reducer", &self.reducer)
            .finish()
    }
}

impl Channel {
    pub fn new<F>(name: impl Into<String>, reducer: Reducer, default: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            reducer,
            default: Arc::new(default),
        }
    }

    /// Replace channel seeded with a fixed default
    pub fn replace(name: impl Into<String>, default: Value) -> Self {
        Self::new(name, Reducer::Replace, move || default.clone())
    }

    /// Append channel starting as an empty list
    pub fn append(name: impl Into<String>) -> Self {
        Self::new(name, Reducer::Append, || Value::Array(Vec::new()))
    }

    /// Merge channel starting as an empty object
    pub fn merge(name: impl Into<String>) -> Self {
        Self::new(name, Reducer::Merge, || Value::Object(Map::new()))
    }

    pub fn with_reducer(name: impl Into<String>, reducer: Reducer, default: Value) -> Self {
        Self::new(name, reducer, move || default.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reducer(&self) -> &Reducer {
        &self.reducer
    }

    pub fn default_value(&self) -> Value {
        (self.default)()
    }
}

/// Immutable snapshot of a run's channels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    values: BTreeMap<String, Value>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel: &str) -> Option<&Value> {
        self.values.get(channel)
    }

    /// Nested lookup with dot notation (e.g. `result.data.intent`)
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.values.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                other => other.get(part)?,
            };
        }
        Some(current)
    }

    pub fn get_str(&self, channel: &str) -> Option<&str> {
        self.get(channel).and_then(|v| v.as_str())
    }

    pub fn get_f64(&self, channel: &str) -> Option<f64> {
        self.get(channel).and_then(|v| v.as_f64())
    }

    pub fn get_array(&self, channel: &str) -> &[Value] {
        self.get(channel)
            .and_then(|v| v.as_array())
            .map(|a| a.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.values.contains_key(channel)
    }

    pub(crate) fn insert(&mut self, channel: impl Into<String>, value: Value) {
        self.values.insert(channel.into(), value);
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for State {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Partial update returned by a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Update {
    writes: BTreeMap<String, Value>,
    /// Channels whose value is stored as is, bypassing the reducer
    #[serde(skip)]
    overwrites: BTreeSet<String>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style write
    pub fn set(mut self, channel: impl Into<String>, value: Value) -> Self {
        self.insert(channel, value);
        self
    }

    pub fn insert(&mut self, channel: impl Into<String>, value: Value) {
        let channel = channel.into();
        self.overwrites.remove(&channel);
        self.writes.insert(channel, value);
    }

    /// Builder-style write that replaces the channel's value outright
    pub fn overwrite(mut self, channel: impl Into<String>, value: Value) -> Self {
        self.insert_overwrite(channel, value);
        self
    }

    pub fn insert_overwrite(&mut self, channel: impl Into<String>, value: Value) {
        let channel = channel.into();
        self.overwrites.insert(channel.clone());
        self.writes.insert(channel, value);
    }

    pub fn is_overwrite(&self, channel: &str) -> bool {
        self.overwrites.contains(channel)
    }

    /// Build from a JSON object; anything else is rejected
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(obj) => Some(obj.into_iter().collect()),
            Value::Null => Some(Self::new()),
            _ => None,
        }
    }

    pub fn get(&self, channel: &str) -> Option<&Value> {
        self.writes.get(channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = &String> {
        self.writes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.writes.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Update {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            writes: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            overwrites: BTreeSet::new(),
        }
    }
}

/// A write to a channel the registry does not know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChannel(pub String);

/// Registered channels in declaration order
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
    index: HashMap<String, usize>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: Channel) -> Result<(), CompileError> {
        if self.index.contains_key(channel.name()) {
            return Err(CompileError::DuplicateChannel(channel.name().to_string()));
        }
        self.index
            .insert(channel.name().to_string(), self.channels.len());
        self.channels.push(channel);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.index.get(name).map(|&i| &self.channels[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.name())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Every channel at its default
    pub fn initial_state(&self) -> State {
        self.channels
            .iter()
            .map(|c| (c.name().to_string(), c.default_value()))
            .collect()
    }

    /// Fold `update` into a copy of `state`. All-or-nothing: an unknown
    /// channel leaves nothing applied. Overwrites skip the reducer.
    pub fn merge(&self, state: &State, update: &Update) -> Result<State, UnknownChannel> {
        if let Some(unknown) = update.channels().find(|name| !self.contains(name)) {
            return Err(UnknownChannel(unknown.clone()));
        }

        let mut next = state.clone();
        for (name, value) in update.iter() {
            let Some(channel) = self.get(name) else {
                continue;
            };
            let current = next
                .values
                .remove(name)
                .unwrap_or_else(|| channel.default_value());
            let reduced = if update.is_overwrite(name) {
                value.clone()
            } else {
                channel.reducer().reduce(&current, value)
            };
            next.values.insert(name.clone(), reduced);
        }
        Ok(next)
    }
}
