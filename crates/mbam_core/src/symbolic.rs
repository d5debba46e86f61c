//! Built-in symbolic algebra.
//!
//! Typed symbols, canonical expression trees, expansion, substitution,
//! polynomial solving and one-sided limits at zero. This is the engine
//! behind the default [`crate::algebra::Symbolic`] implementation.

mod expr;
mod limit;
mod parse;
mod simplify;
mod solve;

use thiserror::Error;

pub use expr::{Expr, Func, Symbol, EPSILON};
pub use limit::limit_at_zero;
pub use parse::{
    parse, parse_assignment, parse_in, ParseError, PlainSymbols, SymbolResolver, VariableScope,
};
pub use simplify::{canonical, expand, split_coefficient, substitute, terms, together};
pub use solve::solve;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlgebraError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("no solution for {symbol}")]
    NoSolution { symbol: String },
    #[error("unsupported expression: {0}")]
    Unsupported(String),
}
