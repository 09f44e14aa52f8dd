// SPDX-License-Identifier: MIT

//! Condition expression evaluator

use super::ast::{CompareOp, Expression, Literal};
use crate::trellis::graph::State;
use serde_json::Value;

/// Evaluate a condition expression against a state snapshot
pub fn evaluate(expr: &Expression, state: &State) -> bool {
    match expr {
        Expression::Const(b) => *b,
        Expression::Truthy(path) => is_truthy(state.get_path(path)),
        Expression::Compare { path, op, value } => compare(state.get_path(path), *op, value),
        Expression::And(left, right) => evaluate(left, state) && evaluate(right, state),
        Expression::Or(left, right) => evaluate(left, state) || evaluate(right, state),
        Expression::Not(inner) => !evaluate(inner, state),
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

fn compare(left: Option<&Value>, op: CompareOp, right: &Literal) -> bool {
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::NotEq => !values_equal(left, right),
        CompareOp::Gt => compare_numbers(left, right, |a, b| a > b),
        CompareOp::Gte => compare_numbers(left, right, |a, b| a >= b),
        CompareOp::Lt => compare_numbers(left, right, |a, b| a < b),
        CompareOp::Lte => compare_numbers(left, right, |a, b| a <= b),
        CompareOp::Contains => contains(left, right),
    }
}

fn literal_matches(value: &Value, literal: &Literal) -> bool {
    match (value, literal) {
        (Value::Null, Literal::Null) => true,
        (Value::String(s), Literal::String(rs)) => s == rs,
        (Value::Number(n), Literal::Number(rn)) => n
            .as_f64()
            .map(|f| (f - rn).abs() < f64::EPSILON)
            .unwrap_or(false),
        (Value::Bool(b), Literal::Boolean(rb)) => b == rb,
        _ => false,
    }
}

fn values_equal(left: Option<&Value>, right: &Literal) -> bool {
    match left {
        // missing behaves as null
        None => *right == Literal::Null,
        Some(v) => literal_matches(v, right),
    }
}

fn compare_numbers(left: Option<&Value>, right: &Literal, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (left.and_then(|v| v.as_f64()), right) {
        (Some(l), Literal::Number(r)) => cmp(l, *r),
        _ => false,
    }
}

fn contains(left: Option<&Value>, right: &Literal) -> bool {
    match (left, right) {
        (Some(Value::String(s)), Literal::String(sub)) => s.contains(sub.as_str()),
        (Some(Value::Array(items)), lit) => items.iter().any(|v| literal_matches(v, lit)),
        (Some(Value::Object(obj)), Literal::String(key)) => obj.contains_key(key),
        _ => false,
    }
}
