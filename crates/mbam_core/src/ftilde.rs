//! Inverting fthetas into ftildes.
//!
//! Each ftheta `tilde = f(theta, ...)` is solved for its theta. An inverse
//! can still mention other retiring thetas (`p2 = p1/r`), so the inverses
//! are substituted into each other until none does.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::algebra::{Algebra, Substitution};
use crate::reparameterize::Ftheta;
use crate::symbolic::{Expr, Symbol};
use crate::template::LimitType;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FtildeError {
    #[error("invalid theta substitution for {theta}: {reason}")]
    InvalidSubstitution { theta: String, reason: String },
    #[error("thetas still unresolved after {passes} passes: {unresolved:?}")]
    UnresolvedTheta {
        passes: usize,
        unresolved: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ftilde {
    pub theta: String,
    pub limit: LimitType,
    pub tilde: String,
    pub f: Expr,
    pub f_inv: Expr,
}

/// Stored form of an ftilde, every field as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtildeRecord {
    pub theta: String,
    pub tilde: String,
    pub limit: String,
    pub f: String,
    pub f_inv: String,
}

impl From<&Ftilde> for FtildeRecord {
    fn from(ftilde: &Ftilde) -> Self {
        Self {
            theta: ftilde.theta.clone(),
            tilde: ftilde.tilde.clone(),
            limit: ftilde.limit.to_string(),
            f: ftilde.f.to_string(),
            f_inv: ftilde.f_inv.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FtildeSet {
    ftildes: Vec<Ftilde>,
}

impl FtildeSet {
    pub fn new(ftildes: Vec<Ftilde>) -> Self {
        Self { ftildes }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Ftilde> {
        self.ftildes.iter()
    }

    pub fn len(&self) -> usize {
        self.ftildes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ftildes.is_empty()
    }

    pub fn thetas(&self) -> BTreeSet<Symbol> {
        self.ftildes
            .iter()
            .map(|ftilde| Symbol::named(&ftilde.theta))
            .collect()
    }

    /// `(theta -> f_inv)` for every member.
    pub fn substitutions(&self) -> Vec<Substitution> {
        self.ftildes
            .iter()
            .map(|ftilde| (Expr::Sym(Symbol::named(&ftilde.theta)), ftilde.f_inv.clone()))
            .collect()
    }

    /// `(theta, tilde)` name pairs for renaming the parameter list.
    pub fn renames(&self) -> Vec<(String, String)> {
        self.ftildes
            .iter()
            .map(|ftilde| (ftilde.theta.clone(), ftilde.tilde.clone()))
            .collect()
    }

    /// Thetas that still appear in some inverse.
    pub fn unresolved(&self) -> Vec<String> {
        let thetas = self.thetas();
        let mut found: BTreeSet<String> = BTreeSet::new();
        for ftilde in &self.ftildes {
            for symbol in ftilde.f_inv.free_symbols() {
                if thetas.contains(&symbol) {
                    found.insert(symbol.base().to_string());
                }
            }
        }
        found.into_iter().collect()
    }

    pub fn is_resolved(&self) -> bool {
        self.unresolved().is_empty()
    }

    pub fn records(&self) -> Vec<FtildeRecord> {
        self.ftildes.iter().map(FtildeRecord::from).collect()
    }
}

impl<'a> IntoIterator for &'a FtildeSet {
    type Item = &'a Ftilde;
    type IntoIter = std::slice::Iter<'a, Ftilde>;

    fn into_iter(self) -> Self::IntoIter {
        self.ftildes.iter()
    }
}

pub struct FtildeSolver<'a> {
    algebra: &'a dyn Algebra,
    max_passes: usize,
}

impl<'a> FtildeSolver<'a> {
    pub fn new(algebra: &'a dyn Algebra, max_passes: usize) -> Self {
        Self {
            algebra,
            max_passes,
        }
    }

    /// Solves `f - tilde = 0` for theta, keeping the principal branch.
    pub fn invert(&self, ftheta: &Ftheta) -> Result<Ftilde, FtildeError> {
        let theta = Symbol::named(&ftheta.theta);
        let equation = ftheta.f.clone() - Expr::Sym(Symbol::named(&ftheta.tilde));
        let invalid = |reason: String| FtildeError::InvalidSubstitution {
            theta: ftheta.theta.clone(),
            reason,
        };
        let branches = self
            .algebra
            .solve(&equation, &theta)
            .map_err(|err| invalid(err.to_string()))?;
        if branches.len() > 1 {
            debug!(theta = %ftheta.theta, branches = branches.len(), "taking principal branch");
        }
        let f_inv = branches
            .into_iter()
            .next()
            .ok_or_else(|| invalid(format!("{equation} = 0 has no solution")))?;
        Ok(Ftilde {
            theta: ftheta.theta.clone(),
            limit: ftheta.limit,
            tilde: ftheta.tilde.clone(),
            f: ftheta.f.clone(),
            f_inv,
        })
    }

    /// Inverts every ftheta and eliminates thetas from the inverses.
    pub fn solve(&self, fthetas: &[Ftheta]) -> Result<FtildeSet, FtildeError> {
        let ftildes = fthetas
            .iter()
            .map(|ftheta| self.invert(ftheta))
            .collect::<Result<Vec<_>, _>>()?;
        let mut set = FtildeSet::new(ftildes);

        for pass in 0..self.max_passes {
            if set.is_resolved() {
                debug!(passes = pass, "ftildes resolved");
                return Ok(set);
            }
            let subs = set.substitutions();
            for ftilde in &mut set.ftildes {
                ftilde.f_inv = self.algebra.substitute(&ftilde.f_inv, &subs);
            }
        }

        let unresolved = set.unresolved();
        if unresolved.is_empty() {
            Ok(set)
        } else {
            Err(FtildeError::UnresolvedTheta {
                passes: self.max_passes,
                unresolved,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::Symbolic;
    use crate::symbolic::{parse, EPSILON};

    fn ftheta(theta: &str, limit: LimitType, tilde: &str, f: &str) -> Ftheta {
        Ftheta {
            theta: theta.into(),
            limit,
            tilde: tilde.into(),
            f: parse(f).expect("parse"),
        }
    }

    #[test]
    fn single_slot_round_trip() {
        let solver = FtildeSolver::new(&Symbolic, 8);
        let set = solver
            .solve(&[ftheta("p1", LimitType::Zero, EPSILON, "p1")])
            .expect("ftilde should solve");
        let only = set.iter().next().expect("one ftilde");
        assert_eq!(only.f_inv, Expr::epsilon());
        assert_eq!(set.substitutions(), vec![(Expr::sym("p1"), Expr::epsilon())]);
    }

    #[test]
    fn chained_inverses_are_eliminated() {
        let solver = FtildeSolver::new(&Symbolic, 8);
        let set = solver
            .solve(&[
                ftheta("p1", LimitType::Infinity, EPSILON, "1/p1"),
                ftheta("p2", LimitType::Infinity, "p1_over_p2", "p1/p2"),
            ])
            .expect("ftildes should solve");
        assert!(set.is_resolved());
        let f_inv: Vec<Expr> = set.iter().map(|f| f.f_inv.clone()).collect();
        assert_eq!(f_inv[0], parse("1/epsilon").unwrap());
        assert_eq!(f_inv[1], parse("1/(epsilon*p1_over_p2)").unwrap());
        let thetas = set.thetas();
        for inverse in &f_inv {
            assert!(inverse.free_symbols().is_disjoint(&thetas));
        }
    }

    #[test]
    fn unsolvable_ftheta_is_invalid_substitution() {
        let solver = FtildeSolver::new(&Symbolic, 8);
        let err = solver
            .solve(&[ftheta("p1", LimitType::Zero, EPSILON, "exp(p1)")])
            .expect_err("exp is not invertible here");
        assert!(matches!(err, FtildeError::InvalidSubstitution { ref theta, .. } if theta == "p1"));
    }

    #[test]
    fn mutual_dependence_exhausts_pass_budget() {
        let solver = FtildeSolver::new(&Symbolic, 3);
        // p1 = p2*a and p2 = p1*b keep reintroducing each other.
        let err = solver
            .solve(&[
                ftheta("p1", LimitType::Zero, "a", "p1/p2"),
                ftheta("p2", LimitType::Zero, "b", "p2/p1"),
            ])
            .expect_err("cycle cannot resolve");
        match err {
            FtildeError::UnresolvedTheta { passes, unresolved } => {
                assert_eq!(passes, 3);
                assert!(!unresolved.is_empty());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn records_are_text() {
        let solver = FtildeSolver::new(&Symbolic, 8);
        let set = solver
            .solve(&[ftheta("p1", LimitType::Infinity, EPSILON, "1/p1")])
            .unwrap();
        let records = set.records();
        assert_eq!(records[0].limit, "inf");
        assert_eq!(records[0].f_inv, "1/epsilon");
    }
}
