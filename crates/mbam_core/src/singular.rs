//! Singular limits.
//!
//! When setting epsilon to zero does not give a finite model, the candidate
//! is reworked first: equations dominated by epsilon are divided through, a
//! variable that always travels with epsilon is merged into a replacement,
//! equations that share a singular term are combined, combined derivatives
//! become new variables, and any equation that still diverges is multiplied
//! by epsilon. Only then is the limit taken.

use std::collections::{BTreeMap, BTreeSet};

use num_traits::Zero;
use tracing::{debug, info, warn};

use crate::algebra::{Algebra, Substitution};
use crate::model::{GroupKind, Model, ModelKind};
use crate::symbolic::{split_coefficient, Expr, Symbol};

/// The additive epsilon terms of one equation and their negations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpsilonTerms {
    pub terms: BTreeSet<Expr>,
    pub negated: BTreeSet<Expr>,
}

impl EpsilonTerms {
    fn push(&mut self, term: Expr) {
        self.negated.insert(-term.clone());
        self.terms.insert(term);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOperator {
    /// `var*epsilon`
    Multiply,
    /// `var/epsilon`
    Divide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combine {
    Add,
    Subtract,
}

/// `res[second] = res[first] (+|-) res[second]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Combination {
    pub op: Combine,
    pub first: usize,
    pub second: usize,
}

/// What each step of [`SingularLimitResolver::resolve`] changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SingularReport {
    pub divided: Vec<(GroupKind, usize)>,
    pub merged: Option<(String, MergeOperator)>,
    pub combined: Vec<Combination>,
    pub transformed: Vec<(String, Expr)>,
    pub stabilised: Vec<(GroupKind, usize)>,
}

impl SingularReport {
    pub fn changed(&self) -> bool {
        !self.divided.is_empty()
            || self.merged.is_some()
            || !self.combined.is_empty()
            || !self.transformed.is_empty()
            || !self.stabilised.is_empty()
    }
}

const SINGULAR_GROUPS: [GroupKind; 2] = [GroupKind::Residuals, GroupKind::InitialDerivatives];

fn divides_by_epsilon(term: &Expr) -> bool {
    term.any_node(&|node| match node {
        Expr::Pow(base, exp) => {
            matches!(base.as_ref(), Expr::Sym(s) if s.is_epsilon())
                && exp.as_num().is_some_and(|n| n < 0.0)
        }
        _ => false,
    })
}

pub struct SingularLimitResolver<'a> {
    algebra: &'a dyn Algebra,
}

impl<'a> SingularLimitResolver<'a> {
    pub fn new(algebra: &'a dyn Algebra) -> Self {
        Self { algebra }
    }

    /// Runs every step and takes the epsilon limit. ODE models are
    /// converted to DAE form first.
    pub fn resolve(&self, model: &mut Model) -> SingularReport {
        if model.kind == ModelKind::Ode {
            *model = model.to_dae(self.algebra);
        }
        let mut report = SingularReport {
            divided: self.divide_epsilon(model),
            ..SingularReport::default()
        };

        let terms = self.epsilon_terms(model, GroupKind::Residuals);
        report.merged = self.merge_variable(model, &terms);
        report.combined = find_like_terms(&terms);
        self.combine_equations(model, &report.combined);
        report.transformed = self.transform_variables(model);
        report.stabilised = self.multiply_epsilon(model);

        model.eval_epsilon(self.algebra);
        model.reclassify_variables();
        model.zero_algebraic_derivatives();
        info!(
            model = %model.name,
            divided = report.divided.len(),
            merged = ?report.merged,
            combined = report.combined.len(),
            transformed = report.transformed.len(),
            stabilised = report.stabilised.len(),
            "singular limit evaluated"
        );
        report
    }

    /// Epsilon terms of each equation in `kind` that has any, by index.
    pub fn epsilon_terms(&self, model: &Model, kind: GroupKind) -> BTreeMap<usize, EpsilonTerms> {
        let epsilon = Symbol::epsilon();
        let mut out = BTreeMap::new();
        for (index, eq) in model.equations(kind).iter().enumerate() {
            let mut found = EpsilonTerms::default();
            for term in self.algebra.terms(&eq.rhs) {
                if term.has_symbol(&epsilon) {
                    found.push(term);
                }
            }
            if !found.terms.is_empty() {
                out.insert(index, found);
            }
        }
        out
    }

    /// Divides an equation by epsilon when at least half of its terms are
    /// multiplied by epsilon and none is divided by it.
    pub fn divide_epsilon(&self, model: &mut Model) -> Vec<(GroupKind, usize)> {
        let epsilon = Symbol::epsilon();
        let mut divided = Vec::new();
        for kind in SINGULAR_GROUPS {
            let updates: Vec<(usize, Expr)> = model
                .equations(kind)
                .iter()
                .enumerate()
                .filter(|(_, eq)| eq.rhs.has_symbol(&epsilon))
                .filter_map(|(index, eq)| {
                    let terms = self.algebra.terms(&eq.rhs);
                    if terms.iter().any(divides_by_epsilon) {
                        return None;
                    }
                    let multiplied = terms.iter().filter(|t| t.has_symbol(&epsilon)).count();
                    (terms.len() as f64 / 2.0 <= multiplied as f64)
                        .then(|| (index, self.algebra.expand(&(eq.rhs.clone() / Expr::epsilon()))))
                })
                .collect();
            for (index, rhs) in updates {
                debug!(group = kind.key(), index, "dividing equation by epsilon");
                model.set_equation(kind, index, rhs);
                divided.push((kind, index));
            }
        }
        divided
    }

    /// Merges the single variable that occurs in every epsilon term into
    /// `<var>tilde`, provided it always meets epsilon through the same
    /// operator.
    pub fn merge_variable(
        &self,
        model: &mut Model,
        terms: &BTreeMap<usize, EpsilonTerms>,
    ) -> Option<(String, MergeOperator)> {
        if terms.is_empty() {
            return None;
        }
        let mut shared: BTreeSet<Symbol> = model.variables.iter().map(|v| v.symbol()).collect();
        for term in terms.values().flat_map(|t| &t.terms) {
            let atoms = term.free_symbols();
            shared.retain(|symbol| atoms.contains(symbol));
        }
        if shared.len() != 1 {
            return None;
        }
        let var = shared.into_iter().next()?;
        let op = merge_operator(&var, terms)?;

        let name = var.base().to_string();
        let tilde = format!("{name}tilde");
        let replacement = Expr::Sym(Symbol::named(&tilde));
        let var_expr = var.to_expr();
        let initial = Expr::Sym(var.initial());
        let subs: Vec<Substitution> = match op {
            MergeOperator::Multiply => vec![
                (var_expr * Expr::epsilon(), replacement),
                (initial.clone() * Expr::epsilon(), initial),
            ],
            MergeOperator::Divide => vec![
                (var_expr.clone() / Expr::epsilon(), replacement),
                (initial.clone() / Expr::epsilon(), initial),
                (var_expr, Expr::zero()),
                (Expr::Sym(var.derivative()), Expr::zero()),
            ],
        };
        model.substitute(self.algebra, &subs);
        model.rename_variable(&name, &tilde);
        model.reserve_name(&tilde);
        debug!(variable = %name, replacement = %tilde, operator = ?op, "merged variable with epsilon");
        Some((tilde, op))
    }

    /// Applies each combination in turn, expanding so the shared terms cancel.
    pub fn combine_equations(&self, model: &mut Model, combinations: &[Combination]) {
        for combination in combinations {
            let equations = model.equations(GroupKind::Residuals);
            let (Some(first), Some(second)) = (
                equations.get(combination.first),
                equations.get(combination.second),
            ) else {
                continue;
            };
            let merged = match combination.op {
                Combine::Add => first.rhs.clone() + second.rhs.clone(),
                Combine::Subtract => first.rhs.clone() - second.rhs.clone(),
            };
            let merged = self.algebra.expand(&merged);
            debug!(?combination, merged = %merged, "combined residuals");
            model.set_equation(GroupKind::Residuals, combination.second, merged);
        }
    }

    /// Residuals with two or more derivative terms define new variables.
    /// Returns each new variable with its definition in the old variables.
    pub fn transform_variables(&self, model: &mut Model) -> Vec<(String, Expr)> {
        let mut counts: Vec<(Expr, usize)> = Vec::new();
        let mut combos: Vec<Expr> = Vec::new();
        for eq in model.equations(GroupKind::Residuals) {
            let simplified = self.algebra.simplify(&eq.rhs);
            let dots: Vec<Expr> = self
                .algebra
                .terms(&simplified)
                .into_iter()
                .filter(|t| t.free_symbols().iter().any(Symbol::is_derivative))
                .collect();
            if dots.len() < 2 {
                continue;
            }
            for dot in &dots {
                let key = if split_coefficient(dot).0 < 0.0 {
                    -dot.clone()
                } else {
                    dot.clone()
                };
                match counts.iter_mut().find(|(seen, _)| *seen == key) {
                    Some((_, count)) => *count += 1,
                    None => counts.push((key, 1)),
                }
            }
            combos.push(Expr::sum(dots));
        }
        if combos.is_empty() {
            return Vec::new();
        }

        let mut fast: Option<(&Expr, usize)> = None;
        for (dot, count) in &counts {
            if fast.map_or(true, |(_, best)| *count > best) {
                fast = Some((dot, *count));
            }
        }
        let Some(fast_var) = fast.and_then(|(dot, _)| {
            dot.free_symbols()
                .into_iter()
                .find(Symbol::is_derivative)
                .map(|d| d.base().to_string())
        }) else {
            return Vec::new();
        };
        debug!(fast = %fast_var, "fast variable");

        let variables: BTreeSet<String> = model.variable_names().into_iter().collect();
        let names = self.mint_names(model, combos.len());
        let dot_to_var = |symbol: &Symbol| match symbol {
            Symbol::Derivative(base) if variables.contains(base) => {
                Some(Expr::Sym(Symbol::named(base)))
            }
            _ => None,
        };
        let definitions: Vec<(String, Expr)> = names
            .iter()
            .cloned()
            .zip(combos.iter().map(|combo| combo.map_symbols(&dot_to_var)))
            .collect();

        let initial_values: BTreeMap<String, Expr> = model
            .variable_names()
            .into_iter()
            .zip(model.equations(GroupKind::InitialConditions).iter().map(|eq| eq.rhs.clone()))
            .collect();
        let initial_derivatives: BTreeMap<String, Expr> = model
            .variable_names()
            .into_iter()
            .zip(
                model
                    .equations(GroupKind::InitialDerivatives)
                    .iter()
                    .map(|eq| eq.rhs.clone()),
            )
            .collect();

        let mut all_vars = variables.clone();
        all_vars.extend(names.iter().cloned());
        let to_derivative = |symbol: &Symbol| match symbol {
            Symbol::Named(base) if all_vars.contains(base) => Some(Expr::Sym(symbol.derivative())),
            _ => None,
        };

        let mut old_to_new: Vec<Substitution> = Vec::new();
        let mut old_to_new_dot: Vec<Substitution> = Vec::new();
        let mut transformed = Vec::new();
        for (name, definition) in &definitions {
            let slow = definition
                .free_symbols()
                .into_iter()
                .find(|s| matches!(s, Symbol::Named(base) if variables.contains(base) && *base != fast_var));
            let Some(slow) = slow else {
                warn!(variable = %name, definition = %definition, "no slow variable in combined derivative");
                continue;
            };
            let zero = definition.clone() - Expr::Sym(Symbol::named(name));
            let solution = match self.algebra.solve(&zero, &slow) {
                Ok(branches) if !branches.is_empty() => branches[0].clone(),
                Ok(_) => continue,
                Err(err) => {
                    warn!(variable = %slow, error = %err, "cannot solve for slow variable");
                    continue;
                }
            };
            old_to_new_dot.push((
                Expr::Sym(slow.derivative()),
                solution.map_symbols(&to_derivative),
            ));
            old_to_new.push((slow.to_expr(), solution));

            let position = model.variables.iter().position(|v| v.name == slow.base());
            if let Some(var) = position.and_then(|i| model.variables.get_mut(i)) {
                var.name = name.clone();
            }
            if let Some(i) = position {
                let at = |values: &BTreeMap<String, Expr>| {
                    definition.map_symbols(&|symbol: &Symbol| match symbol {
                        Symbol::Named(base) => values.get(base).cloned(),
                        _ => None,
                    })
                };
                model.set_equation(GroupKind::InitialConditions, i, at(&initial_values));
                model.set_equation(GroupKind::InitialDerivatives, i, at(&initial_derivatives));
            }
            info!(slow = %slow, replacement = %name, definition = %definition, "variable transformed");
            transformed.push((name.clone(), definition.clone()));
        }

        let residual_subs: Vec<Substitution> =
            old_to_new.iter().chain(&old_to_new_dot).cloned().collect();
        rewrite(self.algebra, model, GroupKind::Residuals, &residual_subs);
        rewrite(self.algebra, model, GroupKind::Observations, &old_to_new);
        transformed
    }

    /// Fresh `x_<k>` names, unique against the model's atoms and used names.
    fn mint_names(&self, model: &mut Model, count: usize) -> Vec<String> {
        let taken: BTreeSet<String> = model
            .atoms()
            .iter()
            .map(|s| s.base().to_string())
            .chain(model.variable_names())
            .collect();
        let mut names = Vec::with_capacity(count);
        let mut k = 1;
        while names.len() < count {
            let candidate = format!("x_{k}");
            if !taken.contains(&candidate) && !model.used_names().contains(&candidate) {
                model.reserve_name(&candidate);
                names.push(candidate);
            }
            k += 1;
        }
        names
    }

    /// Multiplies by epsilon every equation whose epsilon limit diverges.
    pub fn multiply_epsilon(&self, model: &mut Model) -> Vec<(GroupKind, usize)> {
        let epsilon = Symbol::epsilon();
        let mut stabilised = Vec::new();
        for kind in SINGULAR_GROUPS {
            let mut updates = Vec::new();
            for (index, eq) in model.equations(kind).iter().enumerate() {
                if !eq.rhs.has_symbol(&epsilon) {
                    continue;
                }
                match self.algebra.limit(&eq.rhs, &epsilon) {
                    Ok(limit) if limit.has_infinity() => {
                        updates.push((index, self.algebra.expand(&(eq.rhs.clone() * Expr::epsilon()))));
                    }
                    Ok(_) => {}
                    Err(err) => warn!(group = kind.key(), index, error = %err, "epsilon limit failed"),
                }
            }
            for (index, rhs) in updates {
                debug!(group = kind.key(), index, "multiplying equation by epsilon");
                model.set_equation(kind, index, rhs);
                stabilised.push((kind, index));
            }
        }
        stabilised
    }
}

fn rewrite(algebra: &dyn Algebra, model: &mut Model, kind: GroupKind, subs: &[Substitution]) {
    if subs.is_empty() {
        return;
    }
    let rewritten: Vec<Expr> = model
        .equations(kind)
        .iter()
        .map(|eq| algebra.substitute(&eq.rhs, subs))
        .collect();
    for (index, rhs) in rewritten.into_iter().enumerate() {
        model.set_equation(kind, index, rhs);
    }
}

fn merge_operator(var: &Symbol, terms: &BTreeMap<usize, EpsilonTerms>) -> Option<MergeOperator> {
    let multiplied = var.to_expr() * Expr::epsilon();
    let divided = var.to_expr() / Expr::epsilon();
    let all = |pattern: &Expr| {
        terms
            .values()
            .flat_map(|t| &t.terms)
            .all(|term| term.contains(pattern))
    };
    match (all(&multiplied), all(&divided)) {
        (true, false) => Some(MergeOperator::Multiply),
        (false, true) => Some(MergeOperator::Divide),
        _ => None,
    }
}

/// Pairs of equations whose epsilon terms are identical (subtract) or
/// sign-negated (add). An equation joins at most one pair as the second.
pub fn find_like_terms(terms: &BTreeMap<usize, EpsilonTerms>) -> Vec<Combination> {
    let indices: Vec<usize> = terms.keys().copied().collect();
    let mut consumed: BTreeSet<usize> = BTreeSet::new();
    let mut additions = Vec::new();
    let mut subtractions = Vec::new();
    for (pos, &first) in indices.iter().enumerate() {
        if consumed.contains(&first) {
            continue;
        }
        for &second in &indices[pos + 1..] {
            if consumed.contains(&second) {
                continue;
            }
            let (a, b) = (&terms[&first], &terms[&second]);
            if a.terms == b.terms {
                consumed.insert(second);
                subtractions.push(Combination {
                    op: Combine::Subtract,
                    first,
                    second,
                });
            } else if a.terms == b.negated {
                consumed.insert(second);
                additions.push(Combination {
                    op: Combine::Add,
                    first,
                    second,
                });
            }
        }
    }
    additions.extend(subtractions);
    additions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::Symbolic;
    use crate::model::{ModelDocument, VariableKind};

    fn dae(vars: &[&str], res: &[&str]) -> Model {
        let ic: Vec<String> = vars.iter().map(|v| format!("{v}0")).collect();
        let icd: Vec<String> = vars.iter().map(|_| "0".to_string()).collect();
        let doc: ModelDocument = serde_json::from_value(serde_json::json!({
            "type": "dae",
            "name": "fast_slow",
            "class": "ma",
            "ps": [{"name": "a"}, {"name": "b"}, {"name": "k"}, {"name": "epsilon"}],
            "vs": vars.iter().map(|v| serde_json::json!({"name": v})).collect::<Vec<_>>(),
            "res": {"eqs": res},
            "obs": {"eqs": vars},
            "ic": {"eqs": ic},
            "icd": {"eqs": icd},
        }))
        .expect("document should deserialize");
        Model::from_document(&doc, &Symbolic).expect("model should parse")
    }

    fn residual(model: &Model, index: usize) -> Expr {
        model.equations(GroupKind::Residuals)[index].rhs.clone()
    }

    fn expect(model: &Model, text: &str) -> Expr {
        Symbolic.parse(text, &model.scope()).expect("parse")
    }

    #[test]
    fn epsilon_terms_are_collected_with_negations() {
        let model = dae(&["x"], &["k*epsilon*x - xdot", "a - xdot"]);
        let terms = SingularLimitResolver::new(&Symbolic).epsilon_terms(&model, GroupKind::Residuals);
        assert_eq!(terms.len(), 1);
        let found = &terms[&0];
        assert!(found.terms.contains(&expect(&model, "k*epsilon*x")));
        assert!(found.negated.contains(&expect(&model, "-k*epsilon*x")));
    }

    #[test]
    fn majority_epsilon_equation_is_divided() {
        let mut model = dae(&["x", "y"], &["epsilon*x + epsilon*y - xdot", "epsilon*x + y/epsilon - ydot"]);
        let divided = SingularLimitResolver::new(&Symbolic).divide_epsilon(&mut model);
        assert_eq!(divided, vec![(GroupKind::Residuals, 0)]);
        assert_eq!(residual(&model, 0), expect(&model, "x + y - xdot/epsilon"));
        assert_eq!(residual(&model, 1), expect(&model, "epsilon*x + y/epsilon - ydot"));
    }

    #[test]
    fn multiplicative_merge_renames_variable() {
        let mut model = dae(&["x", "y"], &["a - k*epsilon*x - ydot", "epsilon*x - xdot"]);
        let resolver = SingularLimitResolver::new(&Symbolic);
        let terms = resolver.epsilon_terms(&model, GroupKind::Residuals);
        let merged = resolver.merge_variable(&mut model, &terms);
        assert_eq!(merged, Some(("xtilde".to_string(), MergeOperator::Multiply)));
        assert_eq!(model.variables[0].name, "xtilde");
        assert_eq!(residual(&model, 0), expect(&model, "a - k*xtilde - ydot"));
        assert_eq!(residual(&model, 1), expect(&model, "xtilde - xtildedot"));
    }

    #[test]
    fn mixed_operators_leave_model_unchanged() {
        let mut model = dae(&["x"], &["epsilon*x - xdot", "x/epsilon - a"]);
        let before = model.clone();
        let resolver = SingularLimitResolver::new(&Symbolic);
        let terms = resolver.epsilon_terms(&model, GroupKind::Residuals);
        assert_eq!(resolver.merge_variable(&mut model, &terms), None);
        assert_eq!(model, before);
    }

    #[test]
    fn negated_epsilon_terms_are_added() {
        let mut model = dae(&["x", "y"], &["k*epsilon*y - a*x - xdot", "a*x - k*epsilon*y - ydot"]);
        let resolver = SingularLimitResolver::new(&Symbolic);
        let terms = resolver.epsilon_terms(&model, GroupKind::Residuals);
        let combinations = find_like_terms(&terms);
        assert_eq!(
            combinations,
            vec![Combination {
                op: Combine::Add,
                first: 0,
                second: 1
            }]
        );
        resolver.combine_equations(&mut model, &combinations);
        assert_eq!(residual(&model, 1), expect(&model, "-xdot - ydot"));
        assert_eq!(resolver.epsilon_terms(&model, GroupKind::Residuals).len(), 1);
    }

    #[test]
    fn negated_pair_keeps_residual_count() {
        let mut model = dae(&["x", "y"], &["epsilon*a*y + b - xdot", "x - epsilon*a*y - ydot"]);
        let resolver = SingularLimitResolver::new(&Symbolic);
        let terms = resolver.epsilon_terms(&model, GroupKind::Residuals);
        resolver.combine_equations(&mut model, &find_like_terms(&terms));
        // One residual per variable; only the singular term is gone.
        assert_eq!(model.equations(GroupKind::Residuals).len(), 2);
        assert_eq!(residual(&model, 0), expect(&model, "epsilon*a*y + b - xdot"));
        assert_eq!(residual(&model, 1), expect(&model, "b + x - xdot - ydot"));
    }

    #[test]
    fn initial_derivative_epsilon_terms_are_collected() {
        let mut model = dae(&["x"], &["a - xdot"]);
        model.set_equation(GroupKind::InitialDerivatives, 0, expect(&model, "k*epsilon*x0 - a"));
        let resolver = SingularLimitResolver::new(&Symbolic);
        assert!(resolver.epsilon_terms(&model, GroupKind::Residuals).is_empty());
        let terms = resolver.epsilon_terms(&model, GroupKind::InitialDerivatives);
        assert!(terms[&0].terms.contains(&expect(&model, "k*epsilon*x0")));
    }

    #[test]
    fn identical_epsilon_terms_are_subtracted() {
        let model = dae(&["x", "y"], &["epsilon*y - xdot", "epsilon*y - ydot", "a - x"]);
        let terms = SingularLimitResolver::new(&Symbolic).epsilon_terms(&model, GroupKind::Residuals);
        let combinations = find_like_terms(&terms);
        assert_eq!(combinations.len(), 1);
        assert_eq!(combinations[0].op, Combine::Subtract);
    }

    #[test]
    fn combined_derivatives_become_new_variables() {
        let mut model = dae(
            &["x", "y", "z"],
            &["a*x - xdot - ydot", "b*z - xdot - zdot", "k - x"],
        );
        let transformed = SingularLimitResolver::new(&Symbolic).transform_variables(&mut model);
        assert_eq!(transformed.len(), 2);
        assert_eq!(transformed[0].0, "x_1");
        assert_eq!(transformed[0].1, expect(&model, "-x - y"));
        assert_eq!(model.variable_names(), vec!["x", "x_1", "x_2"]);
        assert_eq!(residual(&model, 0), expect(&model, "a*x + x_1dot"));
        assert_eq!(
            model.equations(GroupKind::InitialConditions)[1].rhs,
            expect(&model, "-x0 - y0")
        );
        assert!(model.used_names().contains("x_2"));
    }

    #[test]
    fn divergent_equation_is_multiplied_by_epsilon() {
        let mut model = dae(&["x"], &["a/epsilon - xdot"]);
        let stabilised = SingularLimitResolver::new(&Symbolic).multiply_epsilon(&mut model);
        assert_eq!(stabilised, vec![(GroupKind::Residuals, 0)]);
        assert_eq!(residual(&model, 0), expect(&model, "a - epsilon*xdot"));
    }

    #[test]
    fn divisive_merge_resolves_to_algebraic_variable() {
        let mut model = dae(&["x", "y"], &["k*y - x/epsilon - xdot", "a*x - b*y - ydot"]);
        let report = SingularLimitResolver::new(&Symbolic).resolve(&mut model);
        assert_eq!(report.merged, Some(("xtilde".to_string(), MergeOperator::Divide)));
        assert!(report.changed());
        assert_eq!(model.variables[0].name, "xtilde");
        assert_eq!(model.variables[0].kind, VariableKind::Algebraic);
        assert_eq!(residual(&model, 0), expect(&model, "k*y - xtilde"));
        assert_eq!(residual(&model, 1), expect(&model, "-b*y - ydot"));
        assert!(model.parameters.iter().all(|p| !p.name.contains("epsilon")));
        assert!(!model.atoms().contains(&Symbol::epsilon()));
    }
}
