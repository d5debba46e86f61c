//! Text to expression parsing.
//!
//! Recursive descent over a flat token stream. Accepts `^` and `**` for
//! powers, the functions `exp`, `log`, `sin` and `cos`, and `oo` for
//! infinity. Identifiers are resolved to typed symbols by a
//! [`SymbolResolver`], which is how `xdot` and `x_init` become derivative
//! and initial-value symbols for declared variables.

use std::collections::BTreeSet;

use thiserror::Error;

use super::expr::{Expr, Func, Symbol};
use super::simplify::canonical;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("expected ')'")]
    ExpectedClosingParen,
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("unexpected character '{0}'")]
    UnexpectedCharacter(char),
    #[error("invalid assignment '{0}'")]
    InvalidAssignment(String),
}

/// Maps identifiers to typed symbols.
pub trait SymbolResolver {
    fn resolve(&self, ident: &str) -> Symbol;
}

/// Every identifier is a plain named symbol.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainSymbols;

impl SymbolResolver for PlainSymbols {
    fn resolve(&self, ident: &str) -> Symbol {
        Symbol::named(ident)
    }
}

/// Resolves `<var>dot` and `<var>_init` against a set of variable names.
#[derive(Debug, Clone, Default)]
pub struct VariableScope {
    variables: BTreeSet<String>,
}

impl VariableScope {
    pub fn new<I, S>(variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            variables: variables.into_iter().map(Into::into).collect(),
        }
    }
}

impl SymbolResolver for VariableScope {
    fn resolve(&self, ident: &str) -> Symbol {
        if self.variables.contains(ident) {
            return Symbol::named(ident);
        }
        if let Some(base) = ident.strip_suffix("dot") {
            if self.variables.contains(base) {
                return Symbol::Derivative(base.to_string());
            }
        }
        if let Some(base) = ident.strip_suffix("_init") {
            if self.variables.contains(base) {
                return Symbol::Initial(base.to_string());
            }
        }
        Symbol::named(ident)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Identifier(name) => name.clone(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::Slash => "/".into(),
            Token::Caret => "^".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            // Scientific notation: 1e-3, 2.5E+4
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let sign = usize::from(matches!(chars.get(i + 1), Some('+') | Some('-')));
                if chars.get(i + 1 + sign).is_some_and(|d| d.is_ascii_digit()) {
                    i += 1 + sign;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| ParseError::InvalidNumber(text.clone()))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Identifier(chars[start..i].iter().collect()));
        } else {
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' if chars.get(i + 1) == Some(&'*') => {
                    i += 1;
                    Token::Caret
                }
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                other => return Err(ParseError::UnexpectedCharacter(other)),
            };
            tokens.push(token);
            i += 1;
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    resolver: &'a dyn SymbolResolver,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        let mut terms = vec![self.parse_product()?];
        while let Some(token) = self.peek() {
            match token {
                Token::Plus => {
                    self.consume();
                    terms.push(self.parse_product()?);
                }
                Token::Minus => {
                    self.consume();
                    let right = self.parse_product()?;
                    terms.push(Expr::Mul(vec![Expr::Num(-1.0), right]));
                }
                _ => break,
            }
        }
        Ok(single_or(terms, Expr::Add))
    }

    fn parse_product(&mut self) -> Result<Expr, ParseError> {
        let mut factors = vec![self.parse_unary()?];
        while let Some(token) = self.peek() {
            match token {
                Token::Star => {
                    self.consume();
                    factors.push(self.parse_unary()?);
                }
                Token::Slash => {
                    self.consume();
                    let right = self.parse_unary()?;
                    factors.push(Expr::Pow(Box::new(right), Box::new(Expr::Num(-1.0))));
                }
                _ => break,
            }
        }
        Ok(single_or(factors, Expr::Mul))
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                let expr = self.parse_unary()?;
                Ok(Expr::Mul(vec![Expr::Num(-1.0), expr]))
            }
            Some(Token::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            // Right associative, and the exponent may carry its own sign.
            let exponent = self.parse_unary()?;
            return Ok(Expr::Pow(Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::num(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let func = Func::from_name(&name).ok_or(ParseError::UnknownFunction(name))?;
                    let arg = self.parse_expression()?;
                    self.expect_closing()?;
                    Ok(Expr::Call(func, Box::new(arg)))
                } else if name == "oo" {
                    Ok(Expr::Infinity)
                } else {
                    Ok(Expr::Sym(self.resolver.resolve(&name)))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect_closing()?;
                Ok(expr)
            }
            Some(token) => Err(ParseError::UnexpectedToken(token.describe())),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn expect_closing(&mut self) -> Result<(), ParseError> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            _ => Err(ParseError::ExpectedClosingParen),
        }
    }
}

fn single_or(mut items: Vec<Expr>, wrap: fn(Vec<Expr>) -> Expr) -> Expr {
    if items.len() == 1 {
        items.remove(0)
    } else {
        wrap(items)
    }
}

/// Parses with every identifier treated as a plain symbol.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    parse_in(input, &PlainSymbols)
}

/// Parses with identifiers resolved by `resolver`; the result is canonical.
pub fn parse_in(input: &str, resolver: &dyn SymbolResolver) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        resolver,
    };
    let expr = parser.parse_expression()?;
    if let Some(token) = parser.peek() {
        return Err(ParseError::UnexpectedToken(token.describe()));
    }
    Ok(canonical(&expr))
}

/// Parses `name = expression`.
pub fn parse_assignment(
    input: &str,
    resolver: &dyn SymbolResolver,
) -> Result<(Symbol, Expr), ParseError> {
    let (lhs, rhs) = input
        .split_once('=')
        .ok_or_else(|| ParseError::InvalidAssignment(input.to_string()))?;
    let target = match parse_in(lhs, resolver)? {
        Expr::Sym(symbol) => symbol,
        _ => return Err(ParseError::InvalidAssignment(input.to_string())),
    };
    Ok((target, parse_in(rhs, resolver)?))
}
