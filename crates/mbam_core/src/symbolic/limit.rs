//! One-sided limits at zero by leading-order analysis.
//!
//! Every subexpression is reduced to `coeff * s^order` as `s -> 0+`. Sums
//! keep their lowest surviving order, cancelling terms fall through to the
//! next order, and products add orders. The limit is then `0` for positive
//! order, the coefficient for zero order and a signed infinity otherwise.

use num_traits::Zero;

use super::expr::{Expr, Func, Symbol};
use super::simplify::{canonical, canonical_add, canonical_call, canonical_mul, canonical_pow, expand, split_coefficient};
use super::AlgebraError;

const ORDER_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone)]
struct Leading {
    coeff: Expr,
    order: f64,
}

impl Leading {
    fn zero() -> Self {
        Self {
            coeff: Expr::zero(),
            order: f64::INFINITY,
        }
    }

    fn constant(coeff: Expr) -> Self {
        if coeff.is_zero() {
            Self::zero()
        } else {
            Self { coeff, order: 0.0 }
        }
    }

    fn is_zero(&self) -> bool {
        self.order == f64::INFINITY
    }
}

/// `lim_{symbol -> 0+} expr`.
pub fn limit_at_zero(expr: &Expr, symbol: &Symbol) -> Result<Expr, AlgebraError> {
    let expanded = expand(expr);
    if !expanded.has_symbol(symbol) {
        return Ok(expanded);
    }
    let lead = leading(&expanded, symbol)?;
    if lead.is_zero() || lead.order > ORDER_TOLERANCE {
        return Ok(Expr::zero());
    }
    if lead.order.abs() <= ORDER_TOLERANCE {
        return Ok(canonical(&lead.coeff));
    }
    if lead.coeff.has_infinity() {
        return Ok(lead.coeff);
    }
    let (sign, _) = split_coefficient(&lead.coeff);
    Ok(if sign < 0.0 {
        Expr::NegInfinity
    } else {
        Expr::Infinity
    })
}

fn leading(expr: &Expr, symbol: &Symbol) -> Result<Leading, AlgebraError> {
    if !expr.has_symbol(symbol) {
        return Ok(Leading::constant(expr.clone()));
    }
    match expr {
        Expr::Sym(_) => Ok(Leading {
            coeff: Expr::num(1.0),
            order: 1.0,
        }),
        Expr::Add(terms) => {
            let mut leads = terms
                .iter()
                .map(|term| leading(term, symbol))
                .collect::<Result<Vec<_>, _>>()?;
            loop {
                let min = leads.iter().map(|l| l.order).fold(f64::INFINITY, f64::min);
                if min == f64::INFINITY {
                    return Ok(Leading::zero());
                }
                let (lowest, rest): (Vec<Leading>, Vec<Leading>) = leads
                    .into_iter()
                    .partition(|l| (l.order - min).abs() <= ORDER_TOLERANCE);
                let sum = expand(&canonical_add(lowest.into_iter().map(|l| l.coeff).collect()));
                if !sum.is_zero() {
                    return Ok(Leading {
                        coeff: sum,
                        order: min,
                    });
                }
                // Cancelled at this order; the next order leads.
                leads = rest;
            }
        }
        Expr::Mul(factors) => {
            let mut coeffs = Vec::with_capacity(factors.len());
            let mut order = 0.0;
            for factor in factors {
                let lead = leading(factor, symbol)?;
                if lead.is_zero() {
                    return Ok(Leading::zero());
                }
                order += lead.order;
                coeffs.push(lead.coeff);
            }
            Ok(Leading {
                coeff: canonical_mul(coeffs),
                order,
            })
        }
        Expr::Pow(base, exp) => {
            if exp.has_symbol(symbol) {
                return Err(AlgebraError::Unsupported(format!(
                    "{symbol} in exponent of {expr}"
                )));
            }
            let lead = leading(base, symbol)?;
            match exp.as_num() {
                Some(n) => {
                    if lead.is_zero() {
                        return Ok(if n > 0.0 {
                            Leading::zero()
                        } else {
                            Leading::constant(Expr::Infinity)
                        });
                    }
                    Ok(Leading {
                        coeff: canonical_pow(lead.coeff, Expr::num(n)),
                        order: lead.order * n,
                    })
                }
                None if lead.order.abs() <= ORDER_TOLERANCE => Ok(Leading::constant(
                    canonical_pow(lead.coeff, (**exp).clone()),
                )),
                None => Err(AlgebraError::Unsupported(format!(
                    "symbolic power of a vanishing base in {expr}"
                ))),
            }
        }
        Expr::Call(func, arg) => {
            let lead = leading(arg, symbol)?;
            if !lead.is_zero() && lead.order < -ORDER_TOLERANCE {
                let (sign, _) = split_coefficient(&lead.coeff);
                return match func {
                    Func::Exp if sign < 0.0 => Ok(Leading::zero()),
                    Func::Exp | Func::Log => Ok(Leading::constant(Expr::Infinity)),
                    _ => Err(AlgebraError::Unsupported(format!(
                        "oscillating limit of {expr}"
                    ))),
                };
            }
            if *func == Func::Sin && lead.order > ORDER_TOLERANCE {
                // sin(u) ~ u for small u
                return Ok(lead);
            }
            let at_zero = if lead.order.abs() <= ORDER_TOLERANCE {
                lead.coeff
            } else {
                Expr::zero()
            };
            Ok(Leading::constant(canonical_call(*func, at_zero)))
        }
        Expr::Num(_) | Expr::Infinity | Expr::NegInfinity => Ok(Leading::constant(expr.clone())),
    }
}
