//! Solving `expr = 0` for a symbol.
//!
//! The expression is brought over a common denominator and the numerator is
//! treated as a polynomial in the symbol. Linear equations, pure powers
//! `c_n*s^n + c_0` and general quadratics are supported; anything else is
//! reported as unsupported rather than guessed at.

use std::collections::BTreeMap;

use num_traits::Zero;

use super::expr::{Expr, Symbol};
use super::simplify::{canonical, canonical_add, canonical_mul, expand, terms, together};
use super::AlgebraError;

/// Solutions of `expr = 0` for `symbol`. Multiple branches are returned in a
/// stable order; the first is the principal one.
pub fn solve(expr: &Expr, symbol: &Symbol) -> Result<Vec<Expr>, AlgebraError> {
    let (numerator, _) = together(&canonical(expr));
    let numerator = expand(&numerator);
    if !numerator.has_symbol(symbol) {
        return Err(AlgebraError::NoSolution {
            symbol: symbol.to_string(),
        });
    }

    let raw = polynomial_coefficients(&numerator, symbol)?;
    let lowest = raw.keys().next().copied().unwrap_or(0);
    // Divide through by symbol^lowest so the constant term is present.
    let coefficients: BTreeMap<i64, Expr> = raw.into_iter().map(|(d, c)| (d - lowest, c)).collect();
    let degree = coefficients.keys().next_back().copied().unwrap_or(0);

    if degree == 0 {
        return if lowest > 0 {
            Ok(vec![Expr::zero()])
        } else {
            Err(AlgebraError::NoSolution {
                symbol: symbol.to_string(),
            })
        };
    }

    let coeff = |d: i64| coefficients.get(&d).cloned().unwrap_or_else(Expr::zero);
    let c0 = coeff(0);
    let cn = coeff(degree);

    if degree == 1 {
        return Ok(vec![-c0 / cn]);
    }

    let is_pure_power = coefficients.keys().all(|d| *d == 0 || *d == degree);
    if is_pure_power {
        let root = Expr::pow(-c0 / cn, Expr::num(1.0 / degree as f64));
        return Ok(if degree % 2 == 0 {
            vec![root.clone(), -root]
        } else {
            vec![root]
        });
    }

    if degree == 2 {
        let c1 = coeff(1);
        let discriminant = c1.clone().powi(2) - Expr::num(4.0) * cn.clone() * c0;
        let sqrt = Expr::pow(discriminant, Expr::num(0.5));
        let denom = Expr::num(2.0) * cn;
        return Ok(vec![
            (-c1.clone() + sqrt.clone()) / denom.clone(),
            (-c1 - sqrt) / denom,
        ]);
    }

    Err(AlgebraError::Unsupported(format!(
        "degree {degree} polynomial in {symbol}"
    )))
}

fn polynomial_coefficients(
    expr: &Expr,
    symbol: &Symbol,
) -> Result<BTreeMap<i64, Expr>, AlgebraError> {
    let mut grouped: BTreeMap<i64, Vec<Expr>> = BTreeMap::new();
    for term in terms(expr) {
        let (degree, coeff) = monomial_degree(&term, symbol)?;
        grouped.entry(degree).or_default().push(coeff);
    }
    Ok(grouped
        .into_iter()
        .map(|(degree, coeffs)| (degree, canonical_add(coeffs)))
        .filter(|(_, coeff)| !coeff.is_zero())
        .collect())
}

fn monomial_degree(term: &Expr, symbol: &Symbol) -> Result<(i64, Expr), AlgebraError> {
    match term {
        Expr::Sym(s) if s == symbol => Ok((1, Expr::num(1.0))),
        Expr::Pow(base, exp) if matches!(&**base, Expr::Sym(s) if s == symbol) => {
            match exp.as_num() {
                Some(n) if n.fract() == 0.0 => Ok((n as i64, Expr::num(1.0))),
                _ => Err(AlgebraError::Unsupported(format!(
                    "non-integer power of {symbol} in {term}"
                ))),
            }
        }
        Expr::Mul(factors) => {
            let mut degree = 0;
            let mut rest = Vec::with_capacity(factors.len());
            for factor in factors {
                let (d, c) = monomial_degree(factor, symbol)?;
                degree += d;
                rest.push(c);
            }
            Ok((degree, canonical_mul(rest)))
        }
        other if other.has_symbol(symbol) => Err(AlgebraError::Unsupported(format!(
            "{other} is not polynomial in {symbol}"
        ))),
        other => Ok((0, other.clone())),
    }
}
