// SPDX-License-Identifier: MIT

//! Declarative routing conditions
//!
//! Conditions are small boolean expressions over the state snapshot:
//! - `intent == 'search'`
//! - `confidence > 0.8`
//! - `not (intent == 'bug' or priority > 3)`
//! - `tags contains 'urgent'`

mod ast;
mod evaluator;
mod parser;

pub use ast::{CompareOp, Expression, Literal};
pub use evaluator::evaluate;
pub use parser::parse;
