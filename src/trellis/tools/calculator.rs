// SPDX-License-Identifier: MIT

//! Calculator tools
//!
//! `evaluate_expression` takes arithmetic text (`2 * (3 + sqrt(16)) ^ 2`);
//! the rest are single operations on named numeric arguments.

use crate::adk::error::TrellisError;
use crate::adk::tool::Tool;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone, Copy)]
enum Op {
    Expression,
    Binary {
        lhs: &'static str,
        rhs: &'static str,
        f: fn(f64, f64) -> Result<f64, String>,
    },
    Unary {
        arg: &'static str,
        f: fn(f64) -> Result<f64, String>,
    },
}

pub struct CalculatorTool {
    name: &'static str,
    description: &'static str,
    schema: Value,
    op: Op,
}

fn number_schema(fields: &[(&str, &str)]) -> Value {
    let properties: serde_json::Map<String, Value> = fields
        .iter()
        .map(|(name, desc)| (name.to_string(), json!({ "type": "number", "description": desc })))
        .collect();
    let required: Vec<&str> = fields.iter().map(|(n, _)| *n).collect();
    json!({ "type": "object", "properties": properties, "required": required })
}

impl CalculatorTool {
    fn binary(
        name: &'static str,
        description: &'static str,
        (lhs, lhs_desc): (&'static str, &'static str),
        (rhs, rhs_desc): (&'static str, &'static str),
        f: fn(f64, f64) -> Result<f64, String>,
    ) -> Self {
        Self {
            name,
            description,
            schema: number_schema(&[(lhs, lhs_desc), (rhs, rhs_desc)]),
            op: Op::Binary { lhs, rhs, f },
        }
    }

    fn unary(
        name: &'static str,
        description: &'static str,
        (arg, arg_desc): (&'static str, &'static str),
        f: fn(f64) -> Result<f64, String>,
    ) -> Self {
        Self {
            name,
            description,
            schema: number_schema(&[(arg, arg_desc)]),
            op: Op::Unary { arg, f },
        }
    }

    fn expression() -> Self {
        Self {
            name: "evaluate_expression",
            description: "Evaluates a mathematical expression safely.",
            schema: json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "The mathematical expression to evaluate."
                    }
                },
                "required": ["expression"]
            }),
            op: Op::Expression,
        }
    }
}

/// Numbers, numeric strings and earlier calculator outputs (`{"result": n}`)
fn arg(input: &Value, name: &str) -> Result<f64, TrellisError> {
    input
        .get(name)
        .map(|v| v.get("result").unwrap_or(v))
        .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
        .ok_or_else(|| TrellisError::other(format!("'{}' must be a number", name)))
}

fn finite(x: f64) -> Result<f64, String> {
    if x.is_finite() {
        Ok(x)
    } else {
        Err("result is not a finite number".to_string())
    }
}

fn number(x: f64) -> Value {
    // whole results print without a trailing .0
    if x.fract() == 0.0 && x.abs() < 9.0e15 {
        json!(x as i64)
    } else {
        json!(x)
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn schema(&self) -> &Value {
        &self.schema
    }

    async fn execute(&self, input: Value) -> Result<Value, TrellisError> {
        let result = match self.op {
            Op::Expression => {
                let text = input
                    .get("expression")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| TrellisError::other("'expression' must be a string"))?;
                evaluate(text)
            }
            Op::Binary { lhs, rhs, f } => f(arg(&input, lhs)?, arg(&input, rhs)?),
            Op::Unary { arg: name, f } => f(arg(&input, name)?),
        };
        let value = result
            .and_then(finite)
            .map_err(|e| TrellisError::other(format!("{}: {}", self.name, e)))?;
        Ok(json!({ "result": number(value) }))
    }
}

fn ok(x: f64) -> Result<f64, String> {
    Ok(x)
}

/// All calculator tools
pub fn calculator_tools() -> Vec<Arc<dyn Tool>> {
    let a = ("a", "The first number.");
    let b = ("b", "The second number.");
    let value = ("value", "The input number.");
    let angle = ("angle", "The angle in radians.");

    vec![
        Arc::new(CalculatorTool::expression()),
        Arc::new(CalculatorTool::binary("add_numbers", "Adds two numbers.", a, b, |x, y| ok(x + y))),
        Arc::new(CalculatorTool::binary("subtract_numbers", "Subtracts two numbers.", a, b, |x, y| ok(x - y))),
        Arc::new(CalculatorTool::binary("multiply_numbers", "Multiplies two numbers.", a, b, |x, y| ok(x * y))),
        Arc::new(CalculatorTool::binary(
            "divide_numbers",
            "Divides two numbers.",
            ("a", "The numerator."),
            ("b", "The denominator."),
            divide,
        )),
        Arc::new(CalculatorTool::binary(
            "power",
            "Calculates the power of a number.",
            ("base", "The base."),
            ("exponent", "The exponent."),
            |x, y| ok(x.powf(y)),
        )),
        Arc::new(CalculatorTool::unary("sqrt", "Calculates the square root of a number.", value, sqrt)),
        Arc::new(CalculatorTool::unary("sin", "Calculates the sine of an angle in radians.", angle, |x| ok(x.sin()))),
        Arc::new(CalculatorTool::unary("cos", "Calculates the cosine of an angle in radians.", angle, |x| ok(x.cos()))),
        Arc::new(CalculatorTool::unary("tan", "Calculates the tangent of an angle in radians.", angle, |x| ok(x.tan()))),
        Arc::new(CalculatorTool::unary("log", "Calculates the natural logarithm of a number.", value, ln)),
        Arc::new(CalculatorTool::unary("abs", "Calculates the absolute value of a number.", value, |x| ok(x.abs()))),
        Arc::new(CalculatorTool::unary("round", "Rounds a number to the nearest integer.", value, |x| ok(x.round()))),
        Arc::new(CalculatorTool::unary("floor", "Rounds a number down to the nearest integer.", value, |x| ok(x.floor()))),
        Arc::new(CalculatorTool::unary("ceil", "Rounds a number up to the nearest integer.", value, |x| ok(x.ceil()))),
    ]
}

fn divide(x: f64, y: f64) -> Result<f64, String> {
    if y == 0.0 {
        Err("division by zero".to_string())
    } else {
        Ok(x / y)
    }
}

fn sqrt(x: f64) -> Result<f64, String> {
    if x < 0.0 {
        Err("square root of a negative number".to_string())
    } else {
        Ok(x.sqrt())
    }
}

fn ln(x: f64) -> Result<f64, String> {
    if x <= 0.0 {
        Err("logarithm of a non-positive number".to_string())
    } else {
        Ok(x.ln())
    }
}

// --- expression evaluator ---
//
// expr   := term (('+' | '-') term)*
// term   := unary (('*' | '/' | '%') unary)*
// unary  := '-' unary | power
// power  := atom ('^' unary)?
// atom   := number | ident | ident '(' expr ')' | '(' expr ')'

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn eat(&mut self, want: char) -> bool {
        self.skip_ws();
        if self.chars.peek() == Some(&want) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        loop {
            if self.eat('+') {
                value += self.term()?;
            } else if self.eat('-') {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        loop {
            if self.eat('*') {
                value *= self.unary()?;
            } else if self.eat('/') {
                value = divide(value, self.unary()?)?;
            } else if self.eat('%') {
                let rhs = self.unary()?;
                if rhs == 0.0 {
                    return Err("modulo by zero".to_string());
                }
                value %= rhs;
            } else {
                return Ok(value);
            }
        }
    }

    fn unary(&mut self) -> Result<f64, String> {
        if self.eat('-') {
            return Ok(-self.unary()?);
        }
        if self.eat('+') {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> Result<f64, String> {
        let base = self.atom()?;
        if self.eat('^') {
            Ok(base.powf(self.unary()?))
        } else {
            Ok(base)
        }
    }

    fn atom(&mut self) -> Result<f64, String> {
        self.skip_ws();
        if self.eat('(') {
            let value = self.expr()?;
            if !self.eat(')') {
                return Err("missing ')'".to_string());
            }
            return Ok(value);
        }

        match self.chars.peek().copied() {
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let mut text = String::new();
                while let Some(&c) = self.chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        text.push(c);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                text.parse().map_err(|_| format!("invalid number '{}'", text))
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let mut ident = String::new();
                while let Some(&c) = self.chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                self.call_or_constant(&ident)
            }
            Some(c) => Err(format!("unexpected '{}'", c)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn call_or_constant(&mut self, ident: &str) -> Result<f64, String> {
        match ident {
            "pi" => return Ok(std::f64::consts::PI),
            "e" => return Ok(std::f64::consts::E),
            _ => {}
        }
        if !self.eat('(') {
            return Err(format!("unknown name '{}'", ident));
        }
        let x = self.expr()?;
        if !self.eat(')') {
            return Err(format!("missing ')' after {}(", ident));
        }
        match ident {
            "sqrt" => sqrt(x),
            "sin" => Ok(x.sin()),
            "cos" => Ok(x.cos()),
            "tan" => Ok(x.tan()),
            "log" | "ln" => ln(x),
            "log10" => ln(x).map(|_| x.log10()),
            "exp" => Ok(x.exp()),
            "abs" => Ok(x.abs()),
            "round" => Ok(x.round()),
            "floor" => Ok(x.floor()),
            "ceil" => Ok(x.ceil()),
            other => Err(format!("unknown function '{}'", other)),
        }
    }
}

/// Evaluate arithmetic text
pub fn evaluate(text: &str) -> Result<f64, String> {
    let mut parser = Parser {
        chars: text.chars().peekable(),
    };
    let value = parser.expr()?;
    parser.skip_ws();
    match parser.chars.next() {
        None => Ok(value),
        Some(c) => Err(format!("unexpected '{}'", c)),
    }
}
