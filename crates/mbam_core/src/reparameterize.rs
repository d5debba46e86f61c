//! Candidate reparameterizations from a limit map and the template library.
//!
//! Every way of naming the limiting parameters as template slots
//! (`inf_1`, `inf_2`, `zero_1`, ...) is tried against every template. Each
//! fully substituted template yields a partial ftheta for every parameter it
//! mentions; one partial per parameter is then chosen across all parameters.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::algebra::{Algebra, Substitution};
use crate::symbolic::{Expr, PlainSymbols, Symbol, EPSILON};
use crate::template::{tilde_label, LimitMap, LimitType, Template, TemplateSet};

/// `tilde = f(theta, ...)`: the proposed replacement of one retiring parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ftheta {
    pub theta: String,
    pub limit: LimitType,
    pub tilde: String,
    pub f: Expr,
}

impl Ftheta {
    pub fn is_epsilon(&self) -> bool {
        self.tilde == EPSILON
    }
}

impl fmt::Display for Ftheta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) : {} = {}", self.theta, self.limit, self.tilde, self.f)
    }
}

pub struct Reparameterizer<'a> {
    algebra: &'a dyn Algebra,
    limits: &'a LimitMap,
}

impl<'a> Reparameterizer<'a> {
    pub fn new(algebra: &'a dyn Algebra, limits: &'a LimitMap) -> Self {
        Self { algebra, limits }
    }

    /// Slot-to-parameter assignments over all orderings of the limit map,
    /// deduplicated as sets of pairs.
    pub fn slot_assignments(&self) -> Vec<Vec<Substitution>> {
        let mut seen: BTreeSet<Vec<(Symbol, Symbol)>> = BTreeSet::new();
        let mut out = Vec::new();
        for ordering in self.limits.iter().permutations(self.limits.len()) {
            let mut counts: BTreeMap<LimitType, usize> = BTreeMap::new();
            let mut pairs: Vec<(Symbol, Symbol)> = ordering
                .into_iter()
                .map(|(param, limit)| {
                    let count = counts.entry(*limit).or_insert(0);
                    *count += 1;
                    (limit.slot(*count), Symbol::named(param))
                })
                .collect();
            pairs.sort();
            if seen.insert(pairs.clone()) {
                out.push(
                    pairs
                        .into_iter()
                        .map(|(slot, param)| (Expr::Sym(slot), Expr::Sym(param)))
                        .collect(),
                );
            }
        }
        out
    }

    /// The template with slots replaced, or `None` if any slot is left over.
    pub fn fill(&self, template: &Template, assignment: &[Substitution]) -> Option<Expr> {
        let expr = match self.algebra.parse(&template.template, &PlainSymbols) {
            Ok(expr) => expr,
            Err(err) => {
                warn!(template = %template.template, error = %err, "skipping unparsable template");
                return None;
            }
        };
        let slots = expr.free_symbols();
        let filled = self.algebra.substitute(&expr, assignment);
        filled.free_symbols().is_disjoint(&slots).then_some(filled)
    }

    /// Partial fthetas for each limiting parameter, epsilon templates first.
    pub fn partial_fthetas(&self, templates: &TemplateSet) -> BTreeMap<String, Vec<Ftheta>> {
        let mut partials: BTreeMap<String, Vec<Ftheta>> = self
            .limits
            .keys()
            .map(|param| (param.clone(), Vec::new()))
            .collect();
        let assignments = self.slot_assignments();

        let groups = [(&templates.epsilon, true), (&templates.finite, false)];
        for (group, epsilon) in groups {
            for template in group.iter() {
                for assignment in &assignments {
                    let Some(filled) = self.fill(template, assignment) else {
                        continue;
                    };
                    let tilde = if epsilon {
                        EPSILON.to_string()
                    } else {
                        tilde_label(&filled)
                    };
                    for symbol in filled.free_symbols() {
                        let Some(limit) = self.limits.get(symbol.base()) else {
                            continue;
                        };
                        let partial = Ftheta {
                            theta: symbol.base().to_string(),
                            limit: *limit,
                            tilde: tilde.clone(),
                            f: filled.clone(),
                        };
                        let entry = partials.entry(partial.theta.clone()).or_default();
                        if !entry.contains(&partial) {
                            entry.push(partial);
                        }
                    }
                }
            }
        }
        partials
    }

    /// Complete candidate ftheta sets in Cartesian order. Each holds one
    /// ftheta per limiting parameter, exactly one epsilon tilde, pairwise
    /// distinct tildes, and a function set no earlier candidate used.
    pub fn candidates(&self, templates: &TemplateSet) -> Vec<Vec<Ftheta>> {
        if self.limits.is_empty() {
            return Vec::new();
        }
        let partials = self.partial_fthetas(templates);
        for (param, options) in &partials {
            debug!(param = %param, options = options.len(), "partial fthetas");
        }

        let mut seen_functions: Vec<BTreeSet<Expr>> = Vec::new();
        let mut out = Vec::new();
        for combo in partials.into_values().multi_cartesian_product() {
            let epsilon_count = combo.iter().filter(|f| f.is_epsilon()).count();
            let tildes: BTreeSet<&str> = combo.iter().map(|f| f.tilde.as_str()).collect();
            if epsilon_count != 1 || tildes.len() != self.limits.len() {
                continue;
            }
            let functions: BTreeSet<Expr> = combo.iter().map(|f| f.f.clone()).collect();
            if seen_functions.contains(&functions) {
                continue;
            }
            seen_functions.push(functions);
            out.push(combo);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::Symbolic;
    use crate::symbolic::parse;
    use crate::template::stock_templates;

    fn limits(entries: &[(&str, LimitType)]) -> LimitMap {
        entries
            .iter()
            .map(|(name, limit)| (name.to_string(), *limit))
            .collect()
    }

    #[test]
    fn assignments_cover_each_slot_once() {
        let map = limits(&[("a", LimitType::Infinity), ("b", LimitType::Infinity)]);
        let reparam = Reparameterizer::new(&Symbolic, &map);
        let assignments = reparam.slot_assignments();
        assert_eq!(assignments.len(), 2);

        let mixed = limits(&[("a", LimitType::Infinity), ("b", LimitType::Zero)]);
        let reparam = Reparameterizer::new(&Symbolic, &mixed);
        assert_eq!(reparam.slot_assignments().len(), 1);
    }

    #[test]
    fn fill_rejects_leftover_slots() {
        let map = limits(&[("a", LimitType::Infinity)]);
        let reparam = Reparameterizer::new(&Symbolic, &map);
        let assignment = &reparam.slot_assignments()[0];
        let ratio = Template::new(vec![0, 2], "inf_1/inf_2", "inf_1_over_inf_2", "ma");
        assert!(reparam.fill(&ratio, assignment).is_none());
        let recip = Template::new(vec![0, 1], "1/inf_1", EPSILON, "ma");
        assert_eq!(reparam.fill(&recip, assignment), Some(parse("1/a").unwrap()));
    }

    #[test]
    fn single_zero_parameter_yields_identity_candidate() {
        let map = limits(&[("p1", LimitType::Zero)]);
        let reparam = Reparameterizer::new(&Symbolic, &map);
        let templates = TemplateSet::partition(stock_templates());
        let candidates = reparam.candidates(&templates);
        assert_eq!(candidates.len(), 1);
        let only = &candidates[0][0];
        assert_eq!(only.theta, "p1");
        assert_eq!(only.tilde, EPSILON);
        assert_eq!(only.f, Expr::sym("p1"));
    }

    #[test]
    fn two_infinities_pair_epsilon_with_ratio() {
        let map = limits(&[("k1", LimitType::Infinity), ("k2", LimitType::Infinity)]);
        let reparam = Reparameterizer::new(&Symbolic, &map);
        let templates = TemplateSet::partition(
            stock_templates().into_iter().filter(|t| t.class == "ma"),
        );
        let candidates = reparam.candidates(&templates);
        assert!(!candidates.is_empty());
        for candidate in &candidates {
            assert_eq!(candidate.len(), 2);
            assert_eq!(candidate.iter().filter(|f| f.is_epsilon()).count(), 1);
            assert_ne!(candidate[0].tilde, candidate[1].tilde);
        }
        let first = &candidates[0];
        assert_eq!(first[0].theta, "k1");
        assert_eq!(first[0].f, parse("1/k1").unwrap());
        assert_eq!(first[1].theta, "k2");
    }

    #[test]
    fn empty_limit_map_has_no_candidates() {
        let map = LimitMap::new();
        let reparam = Reparameterizer::new(&Symbolic, &map);
        assert!(reparam
            .candidates(&TemplateSet::partition(stock_templates()))
            .is_empty());
    }
}
