//! Expression trees and typed symbols.
//!
//! Expressions are kept in a canonical form (see `simplify`): sums and
//! products are flattened and sorted, numeric coefficients lead products,
//! and like terms/factors are merged. Structural equality on canonical
//! expressions is therefore a usable notion of algebraic equality for the
//! term-matching the reduction engine performs.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use num_traits::{One, Zero};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use super::simplify::{canonical, from_factors};

/// Name of the small parameter introduced by epsilon templates.
pub const EPSILON: &str = "epsilon";

const DERIVATIVE_SUFFIX: &str = "dot";
const INITIAL_SUFFIX: &str = "_init";

/// A symbol with its structural kind.
///
/// Derivatives and initial values refer to their variable by name, so
/// renaming a variable renames its derivative and initial value with it.
/// The `xdot` / `x_init` spellings only exist at the text boundary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Symbol {
    Named(String),
    Derivative(String),
    Initial(String),
}

impl Symbol {
    pub fn named(name: impl Into<String>) -> Self {
        Symbol::Named(name.into())
    }

    pub fn epsilon() -> Self {
        Symbol::Named(EPSILON.to_string())
    }

    pub fn is_epsilon(&self) -> bool {
        matches!(self, Symbol::Named(name) if name == EPSILON)
    }

    /// The underlying name: the variable for derivatives and initial values.
    pub fn base(&self) -> &str {
        match self {
            Symbol::Named(name) | Symbol::Derivative(name) | Symbol::Initial(name) => name,
        }
    }

    pub fn derivative(&self) -> Symbol {
        Symbol::Derivative(self.base().to_string())
    }

    pub fn initial(&self) -> Symbol {
        Symbol::Initial(self.base().to_string())
    }

    pub fn is_derivative(&self) -> bool {
        matches!(self, Symbol::Derivative(_))
    }

    /// Same kind of symbol over a different base name.
    pub fn with_base(&self, base: &str) -> Symbol {
        match self {
            Symbol::Named(_) => Symbol::Named(base.to_string()),
            Symbol::Derivative(_) => Symbol::Derivative(base.to_string()),
            Symbol::Initial(_) => Symbol::Initial(base.to_string()),
        }
    }

    pub fn to_expr(&self) -> Expr {
        Expr::Sym(self.clone())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Named(name) => write!(f, "{name}"),
            Symbol::Derivative(name) => write!(f, "{name}{DERIVATIVE_SUFFIX}"),
            Symbol::Initial(name) => write!(f, "{name}{INITIAL_SUFFIX}"),
        }
    }
}

/// Elementary functions understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Func {
    Exp,
    Log,
    Sin,
    Cos,
}

impl Func {
    pub fn name(self) -> &'static str {
        match self {
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Sin => "sin",
            Func::Cos => "cos",
        }
    }

    pub fn from_name(name: &str) -> Option<Func> {
        match name {
            "exp" => Some(Func::Exp),
            "log" | "ln" => Some(Func::Log),
            "sin" => Some(Func::Sin),
            "cos" => Some(Func::Cos),
            _ => None,
        }
    }
}

/// Symbolic expression tree.
///
/// Subtraction is `a + (-1)*b` and division is `a * b^(-1)`.
#[derive(Debug, Clone)]
pub enum Expr {
    Num(f64),
    Sym(Symbol),
    Add(Vec<Expr>),
    Mul(Vec<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>),
    Infinity,
    NegInfinity,
}

impl Expr {
    pub fn num(value: f64) -> Expr {
        // Normalise -0.0 so canonical comparisons stay consistent.
        Expr::Num(if value == 0.0 { 0.0 } else { value })
    }

    pub fn sym(name: &str) -> Expr {
        Expr::Sym(Symbol::named(name))
    }

    pub fn epsilon() -> Expr {
        Expr::Sym(Symbol::epsilon())
    }

    pub fn sum(terms: Vec<Expr>) -> Expr {
        canonical(&Expr::Add(terms))
    }

    pub fn product(factors: Vec<Expr>) -> Expr {
        canonical(&Expr::Mul(factors))
    }

    pub fn pow(base: Expr, exponent: Expr) -> Expr {
        canonical(&Expr::Pow(Box::new(base), Box::new(exponent)))
    }

    pub fn powi(self, exponent: i32) -> Expr {
        Expr::pow(self, Expr::num(f64::from(exponent)))
    }

    pub fn recip(self) -> Expr {
        self.powi(-1)
    }

    pub fn call(func: Func, arg: Expr) -> Expr {
        canonical(&Expr::Call(func, Box::new(arg)))
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Expr::Num(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Expr::Sym(symbol) => Some(symbol),
            _ => None,
        }
    }

    /// True when any node satisfies `pred`.
    pub fn any_node(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        match self {
            Expr::Add(items) | Expr::Mul(items) => items.iter().any(|item| item.any_node(pred)),
            Expr::Pow(base, exp) => base.any_node(pred) || exp.any_node(pred),
            Expr::Call(_, arg) => arg.any_node(pred),
            _ => false,
        }
    }

    pub fn free_symbols(&self) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<Symbol>) {
        match self {
            Expr::Sym(symbol) => {
                out.insert(symbol.clone());
            }
            Expr::Add(items) | Expr::Mul(items) => {
                for item in items {
                    item.collect_symbols(out);
                }
            }
            Expr::Pow(base, exp) => {
                base.collect_symbols(out);
                exp.collect_symbols(out);
            }
            Expr::Call(_, arg) => arg.collect_symbols(out),
            Expr::Num(_) | Expr::Infinity | Expr::NegInfinity => {}
        }
    }

    pub fn has_symbol(&self, symbol: &Symbol) -> bool {
        self.any_node(&|node| matches!(node, Expr::Sym(s) if s == symbol))
    }

    /// True when an infinity (or a NaN produced by `0 * oo`) is present.
    pub fn has_infinity(&self) -> bool {
        self.any_node(&|node| match node {
            Expr::Infinity | Expr::NegInfinity => true,
            Expr::Num(value) => !value.is_finite(),
            _ => false,
        })
    }

    /// Subexpression test. A product pattern matches any product holding all
    /// of its factors, so `x*epsilon` is found inside `2*x*y*epsilon`.
    pub fn contains(&self, pattern: &Expr) -> bool {
        self.any_node(&|node| {
            if node == pattern {
                return true;
            }
            match (node, pattern) {
                (Expr::Mul(factors), Expr::Mul(wanted)) => remove_factors(factors, wanted).is_some(),
                _ => false,
            }
        })
    }

    /// Rebuild the expression with symbols replaced where `f` returns a value.
    pub fn map_symbols(&self, f: &dyn Fn(&Symbol) -> Option<Expr>) -> Expr {
        canonical(&self.map_symbols_raw(f))
    }

    fn map_symbols_raw(&self, f: &dyn Fn(&Symbol) -> Option<Expr>) -> Expr {
        match self {
            Expr::Sym(symbol) => f(symbol).unwrap_or_else(|| self.clone()),
            Expr::Add(items) => Expr::Add(items.iter().map(|item| item.map_symbols_raw(f)).collect()),
            Expr::Mul(items) => Expr::Mul(items.iter().map(|item| item.map_symbols_raw(f)).collect()),
            Expr::Pow(base, exp) => Expr::Pow(
                Box::new(base.map_symbols_raw(f)),
                Box::new(exp.map_symbols_raw(f)),
            ),
            Expr::Call(func, arg) => Expr::Call(*func, Box::new(arg.map_symbols_raw(f))),
            _ => self.clone(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Expr::Num(_) => 0,
            Expr::Infinity => 1,
            Expr::NegInfinity => 2,
            Expr::Sym(_) => 3,
            Expr::Call(_, _) => 4,
            Expr::Pow(_, _) => 5,
            Expr::Mul(_) => 6,
            Expr::Add(_) => 7,
        }
    }
}

/// Removes one occurrence of each pattern factor; `None` if any is missing.
pub(crate) fn remove_factors(factors: &[Expr], pattern: &[Expr]) -> Option<Vec<Expr>> {
    let mut remaining = factors.to_vec();
    for wanted in pattern {
        let pos = remaining.iter().position(|factor| factor == wanted)?;
        remaining.remove(pos);
    }
    Some(remaining)
}

impl Ord for Expr {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Expr::Num(a), Expr::Num(b)) => a.total_cmp(b),
            (Expr::Sym(a), Expr::Sym(b)) => a.cmp(b),
            (Expr::Add(a), Expr::Add(b)) | (Expr::Mul(a), Expr::Mul(b)) => a.cmp(b),
            (Expr::Pow(base_a, exp_a), Expr::Pow(base_b, exp_b)) => {
                base_a.cmp(base_b).then_with(|| exp_a.cmp(exp_b))
            }
            (Expr::Call(func_a, arg_a), Expr::Call(func_b, arg_b)) => {
                func_a.cmp(func_b).then_with(|| arg_a.cmp(arg_b))
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Expr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Expr {}

impl From<Symbol> for Expr {
    fn from(symbol: Symbol) -> Self {
        Expr::Sym(symbol)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::num(value)
    }
}

impl Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::sum(vec![self, rhs])
    }
}

impl Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        Expr::sum(vec![self, -rhs])
    }
}

impl Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::product(vec![self, rhs])
    }
}

impl Div for Expr {
    type Output = Expr;

    fn div(self, rhs: Expr) -> Expr {
        Expr::product(vec![self, rhs.recip()])
    }
}

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::product(vec![Expr::Num(-1.0), self])
    }
}

impl Zero for Expr {
    fn zero() -> Self {
        Expr::Num(0.0)
    }

    fn is_zero(&self) -> bool {
        matches!(self, Expr::Num(value) if *value == 0.0)
    }
}

impl One for Expr {
    fn one() -> Self {
        Expr::Num(1.0)
    }
}

// --- Printing ---

const PREC_ADD: u8 = 1;
const PREC_MUL: u8 = 2;
const PREC_POW: u8 = 3;
const PREC_ATOM: u8 = 4;

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Num(value) if *value < 0.0 => PREC_ADD,
        Expr::NegInfinity | Expr::Add(_) => PREC_ADD,
        Expr::Mul(_) => PREC_MUL,
        Expr::Pow(_, exp) => match exp.as_num() {
            Some(n) if n < 0.0 => PREC_MUL,
            _ => PREC_POW,
        },
        _ => PREC_ATOM,
    }
}

fn wrap(expr: &Expr, min_prec: u8) -> String {
    if precedence(expr) < min_prec {
        format!("({expr})")
    } else {
        expr.to_string()
    }
}

pub(crate) fn format_number(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Splits a term into (is_negative, magnitude) for printing sums.
fn signed_parts(term: &Expr) -> (bool, Expr) {
    match term {
        Expr::Num(value) if *value < 0.0 => (true, Expr::Num(-value)),
        Expr::NegInfinity => (true, Expr::Infinity),
        Expr::Mul(factors) => match factors.first() {
            Some(Expr::Num(coeff)) if *coeff < 0.0 => {
                let mut rest = factors.clone();
                if *coeff == -1.0 {
                    rest.remove(0);
                } else {
                    rest[0] = Expr::Num(-coeff);
                }
                (true, from_factors(rest))
            }
            _ => (false, term.clone()),
        },
        _ => (false, term.clone()),
    }
}

fn fmt_sum(terms: &[Expr], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, term) in terms.iter().enumerate() {
        let (negative, magnitude) = signed_parts(term);
        match (i, negative) {
            (0, false) => write!(f, "{magnitude}")?,
            (0, true) => write!(f, "-{magnitude}")?,
            (_, false) => write!(f, " + {magnitude}")?,
            (_, true) => write!(f, " - {magnitude}")?,
        }
    }
    Ok(())
}

fn fmt_product(factors: &[Expr], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut coeff = 1.0;
    let mut numer: Vec<Expr> = Vec::new();
    let mut denom: Vec<Expr> = Vec::new();
    for factor in factors {
        match factor {
            Expr::Num(value) => coeff *= value,
            Expr::Pow(base, exp) => match exp.as_num() {
                Some(n) if n == -1.0 => denom.push((**base).clone()),
                Some(n) if n < 0.0 => denom.push(Expr::Pow(base.clone(), Box::new(Expr::Num(-n)))),
                _ => numer.push(factor.clone()),
            },
            other => numer.push(other.clone()),
        }
    }

    let mut out = String::new();
    if numer.is_empty() {
        out.push_str(&format_number(coeff));
    } else if coeff == -1.0 {
        out.push('-');
    } else if coeff != 1.0 {
        out.push_str(&format_number(coeff));
        out.push('*');
    }
    let numer_text: Vec<String> = numer.iter().map(|e| wrap(e, PREC_MUL)).collect();
    out.push_str(&numer_text.join("*"));

    if !denom.is_empty() {
        out.push('/');
        if denom.len() == 1 {
            out.push_str(&wrap(&denom[0], PREC_POW));
        } else {
            let denom_text: Vec<String> = denom.iter().map(|e| wrap(e, PREC_MUL)).collect();
            out.push('(');
            out.push_str(&denom_text.join("*"));
            out.push(')');
        }
    }
    write!(f, "{out}")
}

fn fmt_power(base: &Expr, exp: &Expr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match exp.as_num() {
        Some(n) if n == -1.0 => write!(f, "1/{}", wrap(base, PREC_POW)),
        Some(n) if n < 0.0 => write!(f, "1/{}^{}", wrap(base, PREC_ATOM), format_number(-n)),
        _ => write!(f, "{}^{}", wrap(base, PREC_ATOM), wrap(exp, PREC_ATOM)),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Num(value) => write!(f, "{}", format_number(*value)),
            Expr::Sym(symbol) => write!(f, "{symbol}"),
            Expr::Infinity => write!(f, "oo"),
            Expr::NegInfinity => write!(f, "-oo"),
            Expr::Add(terms) => fmt_sum(terms, f),
            Expr::Mul(factors) => fmt_product(factors, f),
            Expr::Pow(base, exp) => fmt_power(base, exp, f),
            Expr::Call(func, arg) => write!(f, "{}({})", func.name(), arg),
        }
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse(&text).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::parse;

    #[test]
    fn symbols_print_structural_suffixes() {
        assert_eq!(Symbol::Derivative("x".into()).to_string(), "xdot");
        assert_eq!(Symbol::Initial("x".into()).to_string(), "x_init");
        assert_eq!(Symbol::named("x").derivative().with_base("xtilde").to_string(), "xtildedot");
    }

    #[test]
    fn display_round_trips_through_parser() {
        for text in ["p1/p2", "-x + y", "2*a*b", "1/(a*b)", "x^2", "a/(b + c)", "exp(-k*t)"] {
            let expr = parse(text).expect("parse");
            let again = parse(&expr.to_string()).expect("reparse");
            assert_eq!(expr, again, "round trip of {text} via {expr}");
        }
    }

    #[test]
    fn contains_matches_partial_products() {
        let expr = parse("2*x*y*epsilon + z").unwrap();
        assert!(expr.contains(&parse("x*epsilon").unwrap()));
        assert!(!expr.contains(&parse("x/epsilon").unwrap()));
    }

    #[test]
    fn operators_build_canonical_results() {
        let x = Expr::sym("x");
        let sum = x.clone() + x.clone();
        assert_eq!(sum, parse("2*x").unwrap());
        let cancelled = x.clone() - x.clone();
        assert!(cancelled.is_zero());
        let ratio = x.clone() / x;
        assert!(ratio.is_one());
    }

    #[test]
    fn infinity_is_reported() {
        assert!(Expr::product(vec![Expr::Infinity, Expr::sym("a")]).has_infinity());
        assert!(!parse("a + b").unwrap().has_infinity());
    }
}
