//! The symbolic algebra boundary.
//!
//! Everything the reduction engine needs from a computer algebra system goes
//! through [`Algebra`]. [`Symbolic`] is the built-in implementation.

use std::collections::BTreeSet;

use num_traits::Zero;

use crate::symbolic::{self, AlgebraError, Expr, SymbolResolver, Symbol};

/// A single `(from, to)` rewrite.
pub type Substitution = (Expr, Expr);

pub trait Algebra: Send + Sync {
    fn parse(&self, input: &str, scope: &dyn SymbolResolver) -> Result<Expr, AlgebraError>;

    fn simplify(&self, expr: &Expr) -> Expr;

    fn expand(&self, expr: &Expr) -> Expr;

    /// Applies the rewrites in order.
    fn substitute(&self, expr: &Expr, subs: &[Substitution]) -> Expr;

    /// Solutions of `expr = 0` for `symbol`, principal branch first.
    fn solve(&self, expr: &Expr, symbol: &Symbol) -> Result<Vec<Expr>, AlgebraError>;

    /// `lim_{symbol -> 0+} expr`.
    fn limit(&self, expr: &Expr, symbol: &Symbol) -> Result<Expr, AlgebraError>;

    fn terms(&self, expr: &Expr) -> Vec<Expr> {
        match self.expand(expr) {
            Expr::Add(terms) => terms,
            other if other.is_zero() => Vec::new(),
            other => vec![other],
        }
    }

    fn atoms(&self, expr: &Expr) -> BTreeSet<Symbol> {
        expr.free_symbols()
    }
}

/// The built-in engine from [`crate::symbolic`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Symbolic;

impl Algebra for Symbolic {
    fn parse(&self, input: &str, scope: &dyn SymbolResolver) -> Result<Expr, AlgebraError> {
        Ok(symbolic::parse_in(input, scope)?)
    }

    fn simplify(&self, expr: &Expr) -> Expr {
        // Expanding merges like terms hidden behind products.
        let expanded = symbolic::expand(expr);
        let (numerator, denominator) = symbolic::together(&expanded);
        let numerator = symbolic::expand(&numerator);
        if numerator.is_zero() {
            return Expr::zero();
        }
        let candidate = numerator / denominator;
        if symbolic::terms(&candidate).len() < symbolic::terms(&expanded).len() {
            candidate
        } else {
            expanded
        }
    }

    fn expand(&self, expr: &Expr) -> Expr {
        symbolic::expand(expr)
    }

    fn substitute(&self, expr: &Expr, subs: &[Substitution]) -> Expr {
        symbolic::substitute(expr, subs)
    }

    fn solve(&self, expr: &Expr, symbol: &Symbol) -> Result<Vec<Expr>, AlgebraError> {
        symbolic::solve(expr, symbol)
    }

    fn limit(&self, expr: &Expr, symbol: &Symbol) -> Result<Expr, AlgebraError> {
        symbolic::limit_at_zero(expr, symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::PlainSymbols;

    #[test]
    fn simplify_merges_expanded_terms() {
        let algebra = Symbolic;
        let expr = algebra.parse("a*(x + y) - a*y", &PlainSymbols).unwrap();
        assert_eq!(algebra.simplify(&expr), algebra.parse("a*x", &PlainSymbols).unwrap());
    }

    #[test]
    fn simplify_cancels_over_common_denominator() {
        let algebra = Symbolic;
        let expr = algebra.parse("1/x - 1/x", &PlainSymbols).unwrap();
        assert!(algebra.simplify(&expr).is_zero());
    }

    #[test]
    fn terms_default_uses_expansion() {
        let algebra = Symbolic;
        let expr = algebra.parse("k*(x - y)", &PlainSymbols).unwrap();
        assert_eq!(algebra.terms(&expr).len(), 2);
    }
}
