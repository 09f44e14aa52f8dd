// SPDX-License-Identifier: MIT

//! Typed plans for planner/worker workflows
//!
//! A plan is a list of steps `#E<n> = tool(args)`. Arguments are parsed once
//! into [`ArgValue`] trees whose placeholders point at earlier step results,
//! and resolution walks that tree against a lookup table. Serialized JSON is
//! never searched and replaced.

use crate::adk::error::{PlanError, TrellisError};
use crate::trellis::graph::{Node, RunContext, State, Update};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};

/// Default channel holding the serialized plan
pub const STEPS: &str = "steps";

/// Default channel collecting `#E<n> -> result`
pub const RESULTS: &str = "results";

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Ref(String),
}

/// One argument, with placeholders made explicit
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Literal(Value),
    /// The whole value is a prior result, kept with its JSON type
    Ref(String),
    /// Text with embedded references, rendered as a string
    Template(Vec<Segment>),
    Object(BTreeMap<String, ArgValue>),
    List(Vec<ArgValue>),
}

/// Split text into literal runs and `#E<n>` references
fn scan(text: &str) -> Vec<Segment> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'#' && bytes.get(i + 1) == Some(&b'E') {
            let digits = bytes[i + 2..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
            if digits > 0 {
                if literal_start < i {
                    segments.push(Segment::Text(text[literal_start..i].to_string()));
                }
                let end = i + 2 + digits;
                segments.push(Segment::Ref(text[i..end].to_string()));
                i = end;
                literal_start = end;
                continue;
            }
        }
        i += 1;
    }
    if literal_start < text.len() {
        segments.push(Segment::Text(text[literal_start..].to_string()));
    }
    segments
}

pub fn is_variable(name: &str) -> bool {
    matches!(scan(name).as_slice(), [Segment::Ref(r)] if r == name)
}

/// Results render into templates as bare strings when they are strings
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ArgValue {
    pub fn parse(value: &Value) -> Self {
        match value {
            Value::String(s) => {
                let mut segments = scan(s);
                let has_ref = segments.iter().any(|s| matches!(s, Segment::Ref(_)));
                match (segments.len(), has_ref) {
                    (1, true) => match segments.pop() {
                        Some(Segment::Ref(r)) => ArgValue::Ref(r),
                        _ => ArgValue::Literal(value.clone()),
                    },
                    (_, true) => ArgValue::Template(segments),
                    _ => ArgValue::Literal(value.clone()),
                }
            }
            Value::Object(obj) => ArgValue::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), ArgValue::parse(v)))
                    .collect(),
            ),
            Value::Array(items) => ArgValue::List(items.iter().map(ArgValue::parse).collect()),
            other => ArgValue::Literal(other.clone()),
        }
    }

    /// Every variable this argument reads
    pub fn refs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ArgValue::Literal(_) => {}
            ArgValue::Ref(r) => out.push(r),
            ArgValue::Template(segments) => out.extend(segments.iter().filter_map(|s| match s {
                Segment::Ref(r) => Some(r.as_str()),
                Segment::Text(_) => None,
            })),
            ArgValue::Object(fields) => fields.values().for_each(|v| v.collect_refs(out)),
            ArgValue::List(items) => items.iter().for_each(|v| v.collect_refs(out)),
        }
    }

    /// Substitute results; `Err(var)` names the first missing one
    pub fn resolve(&self, results: &BTreeMap<String, Value>) -> Result<Value, String> {
        let lookup = |var: &str| results.get(var).ok_or_else(|| var.to_string());
        Ok(match self {
            ArgValue::Literal(v) => v.clone(),
            ArgValue::Ref(r) => lookup(r)?.clone(),
            ArgValue::Template(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(t) => out.push_str(t),
                        Segment::Ref(r) => out.push_str(&render(lookup(r)?)),
                    }
                }
                Value::String(out)
            }
            ArgValue::Object(fields) => {
                let mut obj = Map::new();
                for (k, v) in fields {
                    obj.insert(k.clone(), v.resolve(results)?);
                }
                Value::Object(obj)
            }
            ArgValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(|v| v.resolve(results))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Back to the planner's JSON form
    pub fn to_json(&self) -> Value {
        match self {
            ArgValue::Literal(v) => v.clone(),
            ArgValue::Ref(r) => Value::String(r.clone()),
            ArgValue::Template(segments) => Value::String(
                segments
                    .iter()
                    .map(|s| match s {
                        Segment::Text(t) | Segment::Ref(t) => t.as_str(),
                    })
                    .collect(),
            ),
            ArgValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            ArgValue::List(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub var: String,
    pub tool: String,
    pub args: BTreeMap<String, ArgValue>,
}

impl PlanStep {
    pub fn refs(&self) -> Vec<&str> {
        self.args.values().flat_map(|a| a.refs()).collect()
    }

    pub fn resolve_args(&self, results: &BTreeMap<String, Value>) -> Result<Value, PlanError> {
        let mut obj = Map::new();
        for (k, v) in &self.args {
            let value = v.resolve(results).map_err(|var| PlanError::UndefinedReference {
                step: self.var.clone(),
                var,
            })?;
            obj.insert(k.clone(), value);
        }
        Ok(Value::Object(obj))
    }
}

/// A validated plan: unique variables, references only to earlier steps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    steps: Vec<PlanStep>,
}

fn field<'a>(item: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| item.get(*n))
}

fn parse_step(item: &Value) -> Result<PlanStep, PlanError> {
    let var = field(item, &["var", "varName", "variable"])
        .and_then(|v| v.as_str())
        .ok_or_else(|| PlanError::Malformed(format!("step without a variable: {}", item)))?;
    let tool = field(item, &["tool", "toolName"])
        .and_then(|v| v.as_str())
        .ok_or_else(|| PlanError::Malformed(format!("step '{}' names no tool", var)))?;

    let raw_args = match field(item, &["args", "toolArgs", "tool_args"]) {
        None | Some(Value::Null) => Value::Object(Map::new()),
        // planners sometimes hand back the arguments as a JSON string
        Some(Value::String(s)) => serde_json::from_str(s)
            .map_err(|e| PlanError::Malformed(format!("step '{}' arguments: {}", var, e)))?,
        Some(other) => other.clone(),
    };
    let Value::Object(obj) = raw_args else {
        return Err(PlanError::Malformed(format!(
            "step '{}' arguments must be an object",
            var
        )));
    };

    Ok(PlanStep {
        var: var.to_string(),
        tool: tool.to_string(),
        args: obj
            .iter()
            .map(|(k, v)| (k.clone(), ArgValue::parse(v)))
            .collect(),
    })
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Result<Self, PlanError> {
        let mut defined: HashSet<&str> = HashSet::new();
        for step in &steps {
            if !is_variable(&step.var) {
                return Err(PlanError::InvalidVariable(step.var.clone()));
            }
            if let Some(missing) = step.refs().into_iter().find(|r| !defined.contains(r)) {
                return Err(PlanError::UndefinedReference {
                    step: step.var.clone(),
                    var: missing.to_string(),
                });
            }
            if !defined.insert(step.var.as_str()) {
                return Err(PlanError::DuplicateVariable(step.var.clone()));
            }
        }
        Ok(Self { steps })
    }

    /// Accepts `[step, ...]` or `{"plan": [step, ...]}`
    pub fn from_json(value: &Value) -> Result<Self, PlanError> {
        let items = match value {
            Value::Array(items) => items,
            Value::Object(obj) => match obj.get("plan").or_else(|| obj.get("steps")) {
                Some(Value::Array(items)) => items,
                _ => return Err(PlanError::Malformed("expected a 'plan' list".to_string())),
            },
            _ => return Err(PlanError::Malformed("expected a list of steps".to_string())),
        };
        let steps = items.iter().map(parse_step).collect::<Result<Vec<_>, _>>()?;
        Self::new(steps)
    }

    /// Pull the JSON plan out of a model reply, tolerating prose and code fences
    pub fn from_model_output(text: &str) -> Result<Self, PlanError> {
        let start = text
            .find(['{', '['])
            .ok_or_else(|| PlanError::Malformed("no JSON in planner output".to_string()))?;
        let end = text
            .rfind(['}', ']'])
            .filter(|&e| e > start)
            .ok_or_else(|| PlanError::Malformed("unterminated JSON in planner output".to_string()))?;
        let value: Value = serde_json::from_str(&text[start..=end])
            .map_err(|e| PlanError::Malformed(e.to_string()))?;
        Self::from_json(&value)
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Array(
            self.steps
                .iter()
                .map(|s| {
                    let args: Map<String, Value> =
                        s.args.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
                    json!({ "var": s.var, "tool": s.tool, "args": args })
                })
                .collect(),
        )
    }
}

/// Executes the plan in `steps` and merges each result into `results`
pub struct PlanWorkerNode {
    steps_channel: String,
    results_channel: String,
    writes: Vec<String>,
}

impl PlanWorkerNode {
    pub fn new() -> Self {
        Self::with_channels(STEPS, RESULTS)
    }

    pub fn with_channels(steps: impl Into<String>, results: impl Into<String>) -> Self {
        let results = results.into();
        Self {
            steps_channel: steps.into(),
            writes: vec![results.clone()],
            results_channel: results,
        }
    }
}

impl Default for PlanWorkerNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for PlanWorkerNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        let plan = match state.get(&self.steps_channel) {
            None | Some(Value::Null) => Plan::default(),
            Some(value) => Plan::from_json(value)?,
        };

        let mut results: BTreeMap<String, Value> = state
            .get(&self.results_channel)
            .and_then(|v| v.as_object())
            .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        let mut produced = Map::new();

        for step in plan.steps() {
            ctx.check_cancelled()?;
            let outcome = match step.resolve_args(&results) {
                Ok(args) => {
                    log::debug!("Plan step {} = {}({})", step.var, step.tool, args);
                    ctx.tools()
                        .execute(&step.tool, args, &ctx.tool_context())
                        .await
                }
                Err(e) => Err(e.into()),
            };
            let value = outcome.unwrap_or_else(|e| {
                log::warn!("Plan step {} ({}) failed: {}", step.var, step.tool, e);
                Value::String(format!("Error: {}", e))
            });
            results.insert(step.var.clone(), value.clone());
            produced.insert(step.var.clone(), value);
        }

        Ok(Update::new().set(self.results_channel.clone(), Value::Object(produced)))
    }

    fn writes(&self) -> Option<&[String]> {
        Some(&self.writes)
    }
}
