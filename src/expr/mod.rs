//! Safe restricted-grammar expression evaluator.
//!
//! Grounded on `cylc/flow/host_select.py`'s `SimpleVisitor`/`_simple_eval`,
//! which whitelists a small AST node set before handing the expression to
//! Python's `eval`. This evaluator instead parses and walks its own
//! minimal AST so that no construct outside the grammar can ever reach a
//! host process.

mod ast;
mod eval;
mod token;

pub use eval::eval;

use crate::error::Result;

/// Whether `expr`'s top-level node is a comparison (yields a boolean) rather
/// than a plain value expression. Used by the host selector (C3) to
/// classify a threshold-program line as a filter or a rank without needing
/// any variable bindings — comparisons and everything else are
/// syntactically distinguishable before evaluation.
pub fn root_is_comparison(expr: &str) -> Result<bool> {
    let tokens = token::tokenize(expr)?;
    let node = ast::Parser::new(&tokens).parse_expr()?;
    Ok(matches!(node, ast::Node::Compare(..)))
}
