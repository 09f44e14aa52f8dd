// SPDX-License-Identifier: MIT

//! Condition expression parser
//!
//! Precedence, loosest first: `or`, `and`, `not`, comparison. Parentheses group.

use super::ast::{CompareOp, Expression, Literal};
use crate::adk::error::CompileError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Str(String),
    Num(f64),
    Op(CompareOp),
    And,
    Or,
    Not,
    True,
    False,
    Null,
    LParen,
    RParen,
}

fn error(input: &str, reason: impl Into<String>) -> CompileError {
    CompileError::Definition(format!("condition '{}': {}", input, reason.into()))
}

fn tokenize(input: &str) -> Result<Vec<Token>, CompileError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(error(input, "unterminated string"));
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            '=' | '!' | '>' | '<' => {
                let next = chars.get(i + 1).copied();
                let (op, width) = match (c, next) {
                    ('=', Some('=')) => (CompareOp::Eq, 2),
                    ('!', Some('=')) => (CompareOp::NotEq, 2),
                    ('>', Some('=')) => (CompareOp::Gte, 2),
                    ('<', Some('=')) => (CompareOp::Lte, 2),
                    ('>', _) => (CompareOp::Gt, 1),
                    ('<', _) => (CompareOp::Lt, 1),
                    _ => return Err(error(input, format!("unexpected '{}'", c))),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| error(input, format!("bad number '{}'", text)))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "contains" => Token::Op(CompareOp::Contains),
                    _ => Token::Path(word),
                });
            }
            other => return Err(error(input, format!("unexpected '{}'", other))),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn or_expr(&mut self) -> Result<Expression, CompileError> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Expression::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expression, CompileError> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.unary()?;
            left = Expression::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expression, CompileError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expression::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expression, CompileError> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(error(self.input, "missing ')'")),
                }
            }
            Some(Token::True) => Ok(Expression::Const(true)),
            Some(Token::False) => Ok(Expression::Const(false)),
            Some(Token::Path(path)) => match self.peek() {
                Some(Token::Op(op)) => {
                    let op = *op;
                    self.pos += 1;
                    let value = self.literal()?;
                    Ok(Expression::Compare { path, op, value })
                }
                _ => Ok(Expression::Truthy(path)),
            },
            Some(other) => Err(error(self.input, format!("unexpected token {:?}", other))),
            None => Err(error(self.input, "unexpected end of expression")),
        }
    }

    fn literal(&mut self) -> Result<Literal, CompileError> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Literal::String(s)),
            Some(Token::Num(n)) => Ok(Literal::Number(n)),
            Some(Token::True) => Ok(Literal::Boolean(true)),
            Some(Token::False) => Ok(Literal::Boolean(false)),
            Some(Token::Null) => Ok(Literal::Null),
            Some(other) => Err(error(
                self.input,
                format!("expected a literal, found {:?}", other),
            )),
            None => Err(error(self.input, "expected a literal")),
        }
    }
}

/// Parse a condition expression string into an AST
pub fn parse(input: &str) -> Result<Expression, CompileError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(error(input, "empty expression"));
    }

    let mut parser = Parser {
        input,
        tokens,
        pos: 0,
    };
    let expr = parser.or_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(error(input, "trailing input"));
    }
    Ok(expr)
}
