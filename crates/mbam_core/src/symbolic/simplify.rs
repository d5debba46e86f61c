//! Canonical forms, expansion, substitution and rational recombination.

use std::collections::BTreeMap;

use num_traits::{One, Zero};

use super::expr::{remove_factors, Expr, Func};

/// A sum is cancelled when it is this small relative to the largest
/// coefficient that went into it. Absolute size never drops a term.
const CANCELLATION: f64 = 64.0 * f64::EPSILON;
/// Largest integer power of a sum that `expand` multiplies out.
const MAX_EXPANDED_POWER: f64 = 8.0;

/// Rebuilds `expr` bottom-up in canonical form.
pub fn canonical(expr: &Expr) -> Expr {
    match expr {
        Expr::Num(value) => Expr::num(*value),
        Expr::Sym(_) | Expr::Infinity | Expr::NegInfinity => expr.clone(),
        Expr::Add(terms) => canonical_add(terms.iter().map(canonical).collect()),
        Expr::Mul(factors) => canonical_mul(factors.iter().map(canonical).collect()),
        Expr::Pow(base, exp) => canonical_pow(canonical(base), canonical(exp)),
        Expr::Call(func, arg) => canonical_call(*func, canonical(arg)),
    }
}

pub(crate) fn from_terms(mut terms: Vec<Expr>) -> Expr {
    match terms.len() {
        0 => Expr::zero(),
        1 => terms.remove(0),
        _ => Expr::Add(terms),
    }
}

pub(crate) fn from_factors(mut factors: Vec<Expr>) -> Expr {
    match factors.len() {
        0 => Expr::one(),
        1 => factors.remove(0),
        _ => Expr::Mul(factors),
    }
}

/// Numeric coefficient and the remaining monomial: `-3*x*y` is `(-3, x*y)`.
pub fn split_coefficient(term: &Expr) -> (f64, Expr) {
    match term {
        Expr::Num(value) => (*value, Expr::one()),
        Expr::Mul(factors) => match factors.split_first() {
            Some((Expr::Num(coeff), rest)) => (*coeff, from_factors(rest.to_vec())),
            _ => (1.0, term.clone()),
        },
        _ => (1.0, term.clone()),
    }
}

fn scale(monomial: Expr, coeff: f64) -> Expr {
    if coeff == 1.0 {
        return monomial;
    }
    match monomial {
        Expr::Num(value) => Expr::num(value * coeff),
        Expr::Mul(mut factors) => {
            factors.insert(0, Expr::num(coeff));
            Expr::Mul(factors)
        }
        other => Expr::Mul(vec![Expr::num(coeff), other]),
    }
}

/// Running sum of the coefficients of one monomial.
#[derive(Debug, Default, Clone, Copy)]
struct Coefficient {
    sum: f64,
    largest: f64,
}

impl Coefficient {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.largest = self.largest.max(value.abs());
    }

    fn cancelled(&self) -> bool {
        !self.sum.is_nan() && self.sum.abs() <= CANCELLATION * self.largest
    }
}

/// Sum of already-canonical terms.
pub(crate) fn canonical_add(terms: Vec<Expr>) -> Expr {
    let mut flat = Vec::with_capacity(terms.len());
    for term in terms {
        match term {
            Expr::Add(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }

    let mut constant = Coefficient::default();
    let mut positive_infinity = false;
    let mut negative_infinity = false;
    let mut grouped: BTreeMap<Expr, Coefficient> = BTreeMap::new();
    for term in flat {
        match term {
            Expr::Num(value) => constant.add(value),
            Expr::Infinity => positive_infinity = true,
            Expr::NegInfinity => negative_infinity = true,
            other => {
                let (coeff, monomial) = split_coefficient(&other);
                grouped.entry(monomial).or_default().add(coeff);
            }
        }
    }

    match (positive_infinity, negative_infinity) {
        (true, false) => return Expr::Infinity,
        (false, true) => return Expr::NegInfinity,
        _ => {}
    }

    let mut out = Vec::new();
    if positive_infinity {
        // oo - oo stays unevaluated so validity checks reject it.
        out.push(Expr::Infinity);
        out.push(Expr::NegInfinity);
    }
    if !constant.cancelled() {
        out.push(Expr::num(constant.sum));
    }
    for (monomial, coeff) in grouped {
        if coeff.cancelled() {
            continue;
        }
        out.push(scale(monomial, coeff.sum));
    }
    out.sort();
    from_terms(out)
}

/// Product of already-canonical factors.
pub(crate) fn canonical_mul(factors: Vec<Expr>) -> Expr {
    let mut flat = Vec::with_capacity(factors.len());
    for factor in factors {
        match factor {
            Expr::Mul(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }

    let mut coeff = 1.0;
    let mut infinite = false;
    let mut infinity_sign = 1.0;
    let mut powers: BTreeMap<Expr, Vec<Expr>> = BTreeMap::new();
    for factor in flat {
        match factor {
            Expr::Num(value) => coeff *= value,
            Expr::Infinity => infinite = true,
            Expr::NegInfinity => {
                infinite = true;
                infinity_sign = -infinity_sign;
            }
            Expr::Pow(base, exp) => powers.entry(*base).or_default().push(*exp),
            other => powers.entry(other).or_default().push(Expr::one()),
        }
    }
    if coeff == 0.0 && !infinite {
        return Expr::zero();
    }

    let mut out = Vec::new();
    let mut regroup = false;
    for (base, exponents) in powers {
        match canonical_pow(base, canonical_add(exponents)) {
            Expr::Num(value) => coeff *= value,
            Expr::Infinity => infinite = true,
            Expr::NegInfinity => {
                infinite = true;
                infinity_sign = -infinity_sign;
            }
            Expr::Mul(inner) => {
                regroup = true;
                out.extend(inner);
            }
            other => out.push(other),
        }
    }

    if regroup {
        out.push(Expr::num(coeff));
        if infinite {
            out.push(if infinity_sign < 0.0 {
                Expr::NegInfinity
            } else {
                Expr::Infinity
            });
        }
        return canonical_mul(out);
    }

    if infinite {
        if coeff == 0.0 || coeff.is_nan() {
            return Expr::Num(f64::NAN);
        }
        let sign = infinity_sign * coeff.signum();
        out.push(if sign < 0.0 {
            Expr::NegInfinity
        } else {
            Expr::Infinity
        });
        coeff = 1.0;
    } else if coeff == 0.0 {
        return Expr::zero();
    }

    out.sort();
    if coeff != 1.0 {
        out.insert(0, Expr::num(coeff));
    }
    from_factors(out)
}

fn is_integer(value: f64) -> bool {
    value.fract() == 0.0
}

/// Power of already-canonical operands.
pub(crate) fn canonical_pow(base: Expr, exp: Expr) -> Expr {
    let exponent = exp.as_num();
    match exponent {
        Some(e) if e == 0.0 => return Expr::one(),
        Some(e) if e == 1.0 => return base,
        _ => {}
    }

    match (&base, exponent) {
        (Expr::Num(b), _) if *b == 1.0 => Expr::one(),
        (Expr::Num(b), Some(e)) => {
            if *b == 0.0 {
                return if e < 0.0 { Expr::Infinity } else { Expr::zero() };
            }
            let value = b.powf(e);
            if value.is_finite() && (*b > 0.0 || is_integer(e)) {
                Expr::num(value)
            } else {
                Expr::Pow(Box::new(base.clone()), Box::new(exp))
            }
        }
        (Expr::Infinity, Some(e)) => {
            if e > 0.0 {
                Expr::Infinity
            } else {
                Expr::zero()
            }
        }
        (Expr::NegInfinity, Some(e)) if is_integer(e) => {
            if e < 0.0 {
                Expr::zero()
            } else if e % 2.0 == 0.0 {
                Expr::Infinity
            } else {
                Expr::NegInfinity
            }
        }
        (Expr::Pow(inner_base, inner_exp), Some(e)) if is_integer(e) => canonical_pow(
            (**inner_base).clone(),
            canonical_mul(vec![(**inner_exp).clone(), Expr::num(e)]),
        ),
        (Expr::Mul(factors), Some(e)) if is_integer(e) => canonical_mul(
            factors
                .iter()
                .map(|factor| canonical_pow(factor.clone(), Expr::num(e)))
                .collect(),
        ),
        _ => Expr::Pow(Box::new(base.clone()), Box::new(exp)),
    }
}

pub(crate) fn canonical_call(func: Func, arg: Expr) -> Expr {
    match (func, &arg) {
        (Func::Exp, Expr::Num(v)) if *v == 0.0 => Expr::one(),
        (Func::Log, Expr::Num(v)) if *v == 1.0 => Expr::zero(),
        (Func::Log, Expr::Num(v)) if *v == 0.0 => Expr::NegInfinity,
        (Func::Sin, Expr::Num(v)) if *v == 0.0 => Expr::zero(),
        (Func::Cos, Expr::Num(v)) if *v == 0.0 => Expr::one(),
        (Func::Exp, Expr::Infinity) | (Func::Log, Expr::Infinity) => Expr::Infinity,
        (Func::Exp, Expr::NegInfinity) => Expr::zero(),
        (Func::Exp, Expr::Call(Func::Log, inner)) | (Func::Log, Expr::Call(Func::Exp, inner)) => {
            (**inner).clone()
        }
        _ => Expr::Call(func, Box::new(arg.clone())),
    }
}

fn is_expandable_power(expr: &Expr) -> bool {
    match expr {
        Expr::Pow(base, exp) => {
            matches!(**base, Expr::Add(_))
                && exp
                    .as_num()
                    .is_some_and(|n| n > 1.0 && is_integer(n) && n <= MAX_EXPANDED_POWER)
        }
        _ => false,
    }
}

/// Distributes products over sums and multiplies out small integer powers
/// of sums. Denominators are left alone.
pub fn expand(expr: &Expr) -> Expr {
    match expr {
        Expr::Add(terms) => canonical_add(terms.iter().map(expand).collect()),
        Expr::Mul(factors) => {
            let mut acc = vec![Expr::one()];
            for factor in factors.iter().map(expand) {
                let parts = match factor {
                    Expr::Add(terms) => terms,
                    other => vec![other],
                };
                let next: Vec<Expr> = acc
                    .iter()
                    .flat_map(|a| {
                        parts
                            .iter()
                            .map(move |p| canonical_mul(vec![a.clone(), p.clone()]))
                    })
                    .collect();
                acc = next;
            }
            canonical_add(acc)
        }
        Expr::Pow(base, exp) => {
            let base = expand(base);
            let exp = canonical(exp);
            if let (Expr::Add(_), Some(n)) = (&base, exp.as_num()) {
                if n > 1.0 && is_integer(n) && n <= MAX_EXPANDED_POWER {
                    return expand(&Expr::Mul(vec![base.clone(); n as usize]));
                }
            }
            let powered = canonical_pow(base, exp);
            match &powered {
                Expr::Mul(factors) if factors.iter().any(is_expandable_power) => expand(&powered),
                _ => powered,
            }
        }
        Expr::Call(func, arg) => canonical_call(*func, expand(arg)),
        _ => canonical(expr),
    }
}

/// Additive terms of the expanded expression. Zero has no terms.
pub fn terms(expr: &Expr) -> Vec<Expr> {
    match expand(expr) {
        Expr::Add(terms) => terms,
        other if other.is_zero() => Vec::new(),
        other => vec![other],
    }
}

/// Applies each `(from, to)` pair in order, re-canonicalising after each.
pub fn substitute(expr: &Expr, subs: &[(Expr, Expr)]) -> Expr {
    let mut current = expr.clone();
    for (from, to) in subs {
        current = canonical(&replace(&current, from, to));
    }
    current
}

fn replace(expr: &Expr, from: &Expr, to: &Expr) -> Expr {
    if expr == from {
        return to.clone();
    }
    match expr {
        Expr::Add(terms) => {
            if let Expr::Add(pattern) = from {
                if let Some(rest) = remove_factors(terms, pattern) {
                    let mut out: Vec<Expr> = rest.iter().map(|t| replace(t, from, to)).collect();
                    out.push(to.clone());
                    return Expr::Add(out);
                }
            }
            Expr::Add(terms.iter().map(|t| replace(t, from, to)).collect())
        }
        Expr::Mul(factors) => {
            if let Expr::Mul(pattern) = from {
                if let Some(rest) = remove_factors(factors, pattern) {
                    let mut out: Vec<Expr> = rest.iter().map(|f| replace(f, from, to)).collect();
                    out.push(to.clone());
                    return Expr::Mul(out);
                }
            }
            Expr::Mul(factors.iter().map(|f| replace(f, from, to)).collect())
        }
        Expr::Pow(base, exp) => Expr::Pow(
            Box::new(replace(base, from, to)),
            Box::new(replace(exp, from, to)),
        ),
        Expr::Call(func, arg) => Expr::Call(*func, Box::new(replace(arg, from, to))),
        _ => expr.clone(),
    }
}

/// Splits `expr` into numerator and denominator over a common denominator.
pub fn together(expr: &Expr) -> (Expr, Expr) {
    match expr {
        Expr::Add(terms) => {
            let parts: Vec<(Expr, Expr)> = terms.iter().map(together).collect();
            let mut denominators: Vec<Expr> = Vec::new();
            for (_, den) in &parts {
                if !den.is_one() && !denominators.contains(den) {
                    denominators.push(den.clone());
                }
            }
            if denominators.is_empty() {
                let numerator = canonical_add(parts.into_iter().map(|(num, _)| num).collect());
                return (numerator, Expr::one());
            }
            let numerator = canonical_add(
                parts
                    .into_iter()
                    .map(|(num, den)| {
                        let mut factors = vec![num];
                        factors.extend(denominators.iter().filter(|d| **d != den).cloned());
                        canonical_mul(factors)
                    })
                    .collect(),
            );
            (numerator, canonical_mul(denominators))
        }
        Expr::Mul(factors) => {
            let (nums, dens): (Vec<Expr>, Vec<Expr>) = factors.iter().map(together).unzip();
            (canonical_mul(nums), canonical_mul(dens))
        }
        Expr::Pow(base, exp) => match exp.as_num() {
            Some(n) if is_integer(n) => {
                let (num, den) = together(base);
                if n >= 0.0 {
                    (canonical_pow(num, Expr::num(n)), canonical_pow(den, Expr::num(n)))
                } else {
                    (canonical_pow(den, Expr::num(-n)), canonical_pow(num, Expr::num(-n)))
                }
            }
            Some(n) if n < 0.0 => (Expr::one(), canonical_pow((**base).clone(), Expr::num(-n))),
            _ => (expr.clone(), Expr::one()),
        },
        _ => (expr.clone(), Expr::one()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::parse;

    fn p(text: &str) -> Expr {
        parse(text).expect("expression should parse")
    }

    #[test]
    fn like_terms_and_powers_combine() {
        assert_eq!(p("x + 2*x - y + y"), p("3*x"));
        assert_eq!(p("x*x*y/x"), p("x*y"));
        assert_eq!(p("(x^2)^3"), p("x^6"));
    }

    #[test]
    fn small_coefficients_are_kept() {
        let tiny = canonical(&p("1e-13*k*x + y"));
        assert!(tiny.has_symbol(&crate::symbolic::Symbol::named("k")));
        assert_eq!(canonical(&p("k*x - 1e-13")).to_string(), p("k*x - 1e-13").to_string());
        assert_ne!(canonical(&p("k*x - 1e-13")), p("k*x"));
    }

    #[test]
    fn rounding_residue_cancels() {
        assert_eq!(p("0.1*x + 0.2*x - 0.3*x + y"), p("y"));
        assert_eq!(p("x - x + 1e-20"), p("1e-20"));
    }

    #[test]
    fn infinity_arithmetic() {
        assert_eq!(p("oo + x"), Expr::Infinity);
        assert_eq!(p("-2*oo"), Expr::NegInfinity);
        assert_eq!(p("1/0"), Expr::Infinity);
        assert!(p("oo - oo").has_infinity());
    }

    #[test]
    fn expand_distributes_and_raises_sums() {
        assert_eq!(expand(&p("(a + b)*(a - b)")), p("a^2 - b^2"));
        assert_eq!(expand(&p("(x + 1)^2")), p("x^2 + 2*x + 1"));
        assert_eq!(expand(&p("k*(x*(a + b))^2")), p("k*x^2*a^2 + 2*k*x^2*a*b + k*x^2*b^2"));
    }

    #[test]
    fn terms_of_expanded_sum() {
        assert_eq!(terms(&p("a*(x + y)")).len(), 2);
        assert!(terms(&p("x - x")).is_empty());
    }

    #[test]
    fn substitution_is_sequential() {
        let subs = vec![(p("a"), p("b")), (p("b"), p("c"))];
        assert_eq!(substitute(&p("a + b"), &subs), p("2*c"));
    }

    #[test]
    fn substitution_matches_factor_subsets() {
        let subs = vec![(p("x*epsilon"), p("xtilde"))];
        assert_eq!(substitute(&p("2*k*x*epsilon + x"), &subs), p("2*k*xtilde + x"));
    }

    #[test]
    fn together_finds_common_denominator() {
        let (num, den) = together(&p("1/p1 - t"));
        assert_eq!(num, p("1 - t*p1"));
        assert_eq!(den, p("p1"));

        let (num, den) = together(&p("a/x + b/x"));
        assert_eq!(num, p("a + b"));
        assert_eq!(den, p("x"));
    }
}
