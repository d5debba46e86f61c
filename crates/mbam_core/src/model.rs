//! Parametrized ODE/DAE models.
//!
//! A [`Model`] owns its parameters, variables and equation groups as parsed
//! expressions. Reduction steps work on clones: substitute, evaluate the
//! epsilon limit, check validity, and either keep the clone or drop it.

mod document;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::algebra::{Algebra, Substitution};
use crate::symbolic::{AlgebraError, Expr, ParseError, Symbol, VariableScope, EPSILON};

pub use document::{GroupDocument, ModelDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Ode,
    Dae,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    #[default]
    Identity,
    Log,
    Sinh,
    Constant,
}

fn default_init_val() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default = "default_init_val")]
    pub init_val: f64,
    #[serde(default)]
    pub transform: Transform,
}

impl Parameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            init_val: default_init_val(),
            transform: Transform::Identity,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.transform == Transform::Constant
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    #[default]
    Dynamic,
    Algebraic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: VariableKind,
}

impl Variable {
    pub fn dynamic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VariableKind::Dynamic,
        }
    }

    pub fn symbol(&self) -> Symbol {
        Symbol::named(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKind {
    Inputs,
    Rhs,
    Residuals,
    Observations,
    InitialConditions,
    InitialDerivatives,
}

impl GroupKind {
    pub fn key(self) -> &'static str {
        match self {
            GroupKind::Inputs => "inp",
            GroupKind::Rhs => "rhs",
            GroupKind::Residuals => "res",
            GroupKind::Observations => "obs",
            GroupKind::InitialConditions => "ic",
            GroupKind::InitialDerivatives => "icd",
        }
    }

    /// Groups a model of `kind` carries, in document order.
    pub fn for_model(kind: ModelKind) -> &'static [GroupKind] {
        match kind {
            ModelKind::Ode => &[
                GroupKind::Inputs,
                GroupKind::Rhs,
                GroupKind::Observations,
                GroupKind::InitialConditions,
            ],
            ModelKind::Dae => &[
                GroupKind::Inputs,
                GroupKind::Residuals,
                GroupKind::Observations,
                GroupKind::InitialConditions,
                GroupKind::InitialDerivatives,
            ],
        }
    }

    fn has_assignments(self) -> bool {
        self == GroupKind::Inputs
    }
}

/// Classification of a symbol against a model's declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Parameter,
    Variable,
    Derivative,
    Initial,
    Input,
    /// Introduced by the engine (`epsilon`).
    Synthetic,
    Undeclared,
}

/// `lhs = rhs`, or a bare expression when `lhs` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    pub lhs: Option<Symbol>,
    pub rhs: Expr,
}

impl Equation {
    pub fn expr(rhs: Expr) -> Self {
        Self { lhs: None, rhs }
    }

    pub fn assign(lhs: Symbol, rhs: Expr) -> Self {
        Self {
            lhs: Some(lhs),
            rhs,
        }
    }

    fn parse(
        text: &str,
        assignment: bool,
        algebra: &dyn Algebra,
        scope: &VariableScope,
    ) -> Result<Self, AlgebraError> {
        if !assignment {
            return Ok(Self::expr(algebra.parse(text, scope)?));
        }
        let (lhs, rhs) = text
            .split_once('=')
            .ok_or_else(|| ParseError::InvalidAssignment(text.to_string()))?;
        let target = match algebra.parse(lhs, scope)? {
            Expr::Sym(symbol) => symbol,
            _ => return Err(ParseError::InvalidAssignment(text.to_string()).into()),
        };
        Ok(Self::assign(target, algebra.parse(rhs, scope)?))
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lhs {
            Some(lhs) => write!(f, "{lhs} = {}", self.rhs),
            None => write!(f, "{}", self.rhs),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EquationGroup {
    pub substitutions: Vec<Equation>,
    pub equations: Vec<Equation>,
}

impl EquationGroup {
    fn all(&self) -> impl Iterator<Item = &Equation> {
        self.substitutions.iter().chain(self.equations.iter())
    }

    fn all_mut(&mut self) -> impl Iterator<Item = &mut Equation> {
        self.substitutions.iter_mut().chain(self.equations.iter_mut())
    }

    fn equation_atoms(&self) -> BTreeSet<Symbol> {
        self.equations
            .iter()
            .flat_map(|eq| eq.rhs.free_symbols())
            .collect()
    }

    fn to_document(&self) -> GroupDocument {
        GroupDocument {
            sbs: self.substitutions.iter().map(ToString::to_string).collect(),
            eqs: self.equations.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Why a model failed validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validity {
    pub missing_parameters: Vec<String>,
    pub infinite: bool,
    pub epsilon: bool,
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        self.missing_parameters.is_empty() && !self.infinite && !self.epsilon
    }

    pub fn reason(&self) -> String {
        let mut reasons = Vec::new();
        if !self.missing_parameters.is_empty() {
            reasons.push(format!(
                "parameters missing from equations: {}",
                self.missing_parameters.join(", ")
            ));
        }
        if self.infinite {
            reasons.push("equations are not finite".to_string());
        }
        if self.epsilon {
            reasons.push("epsilon remains".to_string());
        }
        reasons.join("; ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub name: String,
    pub base_name: String,
    pub kind: ModelKind,
    pub class: String,
    pub parameters: Vec<Parameter>,
    pub variables: Vec<Variable>,
    groups: BTreeMap<GroupKind, EquationGroup>,
    used_names: BTreeSet<String>,
}

impl Model {
    pub fn from_document(doc: &ModelDocument, algebra: &dyn Algebra) -> Result<Self, AlgebraError> {
        let scope = VariableScope::new(doc.vs.iter().map(|v| v.name.clone()));
        let mut groups = BTreeMap::new();
        for &kind in GroupKind::for_model(doc.kind) {
            let mut group = EquationGroup::default();
            if let Some(group_doc) = doc.group(kind) {
                for text in &group_doc.sbs {
                    group.substitutions.push(Equation::parse(text, true, algebra, &scope)?);
                }
                for text in &group_doc.eqs {
                    let assignment = kind.has_assignments() || text.contains('=');
                    group.equations.push(Equation::parse(text, assignment, algebra, &scope)?);
                }
            }
            groups.insert(kind, group);
        }

        let model = Self {
            name: doc.name.clone(),
            base_name: doc.base_name.clone().unwrap_or_else(|| doc.name.clone()),
            kind: doc.kind,
            class: doc.class.clone(),
            parameters: doc.ps.clone(),
            variables: doc.vs.clone(),
            groups,
            used_names: doc.used.iter().cloned().collect(),
        };
        let undeclared = model.undeclared_symbols();
        if !undeclared.is_empty() {
            warn!(
                model = %model.name,
                symbols = ?undeclared.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "model uses undeclared symbols"
            );
        }
        Ok(model)
    }

    pub fn to_document(&self) -> ModelDocument {
        let mut doc = ModelDocument {
            kind: self.kind,
            name: self.name.clone(),
            base_name: (self.base_name != self.name).then(|| self.base_name.clone()),
            class: self.class.clone(),
            ps: self.parameters.clone(),
            vs: self.variables.clone(),
            inp: None,
            rhs: None,
            res: None,
            obs: None,
            ic: None,
            icd: None,
            used: self.used_names.iter().cloned().collect(),
        };
        for (kind, group) in &self.groups {
            doc.set_group(*kind, group.to_document());
        }
        doc
    }

    pub fn group(&self, kind: GroupKind) -> Option<&EquationGroup> {
        self.groups.get(&kind)
    }

    pub fn group_mut(&mut self, kind: GroupKind) -> Option<&mut EquationGroup> {
        self.groups.get_mut(&kind)
    }

    pub fn equations(&self, kind: GroupKind) -> &[Equation] {
        self.groups
            .get(&kind)
            .map(|group| group.equations.as_slice())
            .unwrap_or(&[])
    }

    pub fn set_equation(&mut self, kind: GroupKind, index: usize, rhs: Expr) {
        if let Some(eq) = self
            .groups
            .get_mut(&kind)
            .and_then(|group| group.equations.get_mut(index))
        {
            eq.rhs = rhs;
        }
    }

    /// The group holding the dynamics: `rhs` for ODEs, `res` for DAEs.
    pub fn dynamics_kind(&self) -> GroupKind {
        match self.kind {
            ModelKind::Ode => GroupKind::Rhs,
            ModelKind::Dae => GroupKind::Residuals,
        }
    }

    /// Parameters that take part in reduction, in declaration order.
    pub fn free_parameters(&self) -> Vec<&Parameter> {
        self.parameters.iter().filter(|p| !p.is_constant()).collect()
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables.iter().map(|v| v.name.clone()).collect()
    }

    pub fn scope(&self) -> VariableScope {
        VariableScope::new(self.variable_names())
    }

    pub fn used_names(&self) -> &BTreeSet<String> {
        &self.used_names
    }

    pub fn reserve_name(&mut self, name: &str) {
        self.used_names.insert(name.to_string());
    }

    /// Every symbol appearing on a right-hand side anywhere in the model.
    pub fn atoms(&self) -> BTreeSet<Symbol> {
        self.groups
            .values()
            .flat_map(|group| group.all())
            .flat_map(|eq| eq.rhs.free_symbols())
            .collect()
    }

    pub fn symbol_kind(&self, symbol: &Symbol) -> SymbolKind {
        let is_variable = |name: &str| self.variables.iter().any(|v| v.name == name);
        match symbol {
            Symbol::Derivative(name) if is_variable(name) => SymbolKind::Derivative,
            Symbol::Initial(name) if is_variable(name) => SymbolKind::Initial,
            Symbol::Named(name) if name == EPSILON => SymbolKind::Synthetic,
            Symbol::Named(name) if self.parameters.iter().any(|p| &p.name == name) => {
                SymbolKind::Parameter
            }
            Symbol::Named(name) if is_variable(name) => SymbolKind::Variable,
            Symbol::Named(_) if self.defined_symbols().contains(symbol) => SymbolKind::Input,
            _ => SymbolKind::Undeclared,
        }
    }

    fn defined_symbols(&self) -> BTreeSet<Symbol> {
        self.groups
            .values()
            .flat_map(|group| group.all())
            .filter_map(|eq| eq.lhs.clone())
            .collect()
    }

    pub fn undeclared_symbols(&self) -> BTreeSet<Symbol> {
        self.atoms()
            .into_iter()
            .filter(|symbol| self.symbol_kind(symbol) == SymbolKind::Undeclared)
            .collect()
    }

    fn for_each_equation_mut(&mut self, mut f: impl FnMut(&mut Equation)) {
        for group in self.groups.values_mut() {
            for eq in group.all_mut() {
                f(eq);
            }
        }
    }

    /// Applies the rewrites to every right-hand side. Left-hand symbols are
    /// renamed when a rewrite maps them to another symbol.
    pub fn substitute(&mut self, algebra: &dyn Algebra, subs: &[Substitution]) {
        self.for_each_equation_mut(|eq| {
            eq.rhs = algebra.substitute(&eq.rhs, subs);
            if let Some(lhs) = &eq.lhs {
                if let Expr::Sym(renamed) = algebra.substitute(&lhs.to_expr(), subs) {
                    eq.lhs = Some(renamed);
                }
            }
        });
    }

    /// Renames parameters in the declaration list; values and transforms stay.
    pub fn rename_parameters(&mut self, renames: &[(String, String)]) {
        for (old, new) in renames {
            if let Some(param) = self.parameters.iter_mut().find(|p| &p.name == old) {
                param.name = new.clone();
            }
        }
    }

    /// Renames a variable along with its derivative and initial value.
    pub fn rename_variable(&mut self, old: &str, new: &str) {
        if let Some(var) = self.variables.iter_mut().find(|v| v.name == old) {
            var.name = new.to_string();
        }
        let rename = |symbol: &Symbol| {
            (symbol.base() == old).then(|| Expr::Sym(symbol.with_base(new)))
        };
        self.for_each_equation_mut(|eq| {
            eq.rhs = eq.rhs.map_symbols(&rename);
            if let Some(lhs) = &eq.lhs {
                if lhs.base() == old {
                    eq.lhs = Some(lhs.with_base(new));
                }
            }
        });
    }

    /// Replaces every epsilon-bearing right-hand side by its limit as
    /// epsilon goes to zero and drops the epsilon parameter.
    pub fn eval_epsilon(&mut self, algebra: &dyn Algebra) {
        let epsilon = Symbol::epsilon();
        let name = self.name.clone();
        self.for_each_equation_mut(|eq| {
            if !eq.rhs.has_symbol(&epsilon) {
                return;
            }
            match algebra.limit(&eq.rhs, &epsilon) {
                Ok(limit) => eq.rhs = limit,
                Err(err) => warn!(model = %name, equation = %eq, error = %err, "epsilon limit failed"),
            }
        });
        self.parameters.retain(|p| p.name != EPSILON);
    }

    pub fn validity(&self) -> Validity {
        let atoms = self.atoms();
        let missing_parameters = self
            .free_parameters()
            .into_iter()
            .filter(|p| !atoms.contains(&Symbol::named(&p.name)))
            .map(|p| p.name.clone())
            .collect();
        let infinite = self
            .groups
            .values()
            .flat_map(|group| group.all())
            .any(|eq| eq.rhs.has_infinity());
        let epsilon =
            atoms.contains(&Symbol::epsilon()) || self.parameters.iter().any(|p| p.name == EPSILON);
        Validity {
            missing_parameters,
            infinite,
            epsilon,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validity().is_valid()
    }

    /// Variables whose derivative no longer appears become algebraic.
    pub fn reclassify_variables(&mut self) {
        let atoms = self.atoms();
        for var in &mut self.variables {
            if !atoms.contains(&Symbol::Derivative(var.name.clone())) {
                if var.kind != VariableKind::Algebraic {
                    debug!(variable = %var.name, "variable became algebraic");
                }
                var.kind = VariableKind::Algebraic;
            }
        }
    }

    /// Zeroes the initial derivative of every algebraic variable.
    pub fn zero_algebraic_derivatives(&mut self) {
        let algebraic: Vec<usize> = self
            .variables
            .iter()
            .enumerate()
            .filter(|(_, v)| v.kind == VariableKind::Algebraic)
            .map(|(i, _)| i)
            .collect();
        if let Some(group) = self.groups.get_mut(&GroupKind::InitialDerivatives) {
            for i in algebraic {
                if let Some(eq) = group.equations.get_mut(i) {
                    eq.rhs = Expr::num(0.0);
                }
            }
        }
    }

    /// Drops substitutions whose symbol is not used by their group's equations.
    pub fn prune_substitutions(&mut self) {
        for group in self.groups.values_mut() {
            let atoms = group.equation_atoms();
            group
                .substitutions
                .retain(|sb| sb.lhs.as_ref().is_some_and(|lhs| atoms.contains(lhs)));
        }
    }

    /// `<base>_P<n_params>H<children>`
    pub fn set_hasse_name(&mut self, children: usize) {
        self.name = format!("{}_P{}H{}", self.base_name, self.parameters.len(), children);
    }

    /// DAE form: `res_i = rhs_i - var_i'`, initial derivatives are the
    /// right-hand sides evaluated at the initial conditions.
    pub fn to_dae(&self, algebra: &dyn Algebra) -> Model {
        if self.kind == ModelKind::Dae {
            return self.clone();
        }
        let rhs = self.groups.get(&GroupKind::Rhs).cloned().unwrap_or_default();
        let ic = self.equations(GroupKind::InitialConditions);
        let to_initial: Vec<Substitution> = self
            .variables
            .iter()
            .zip(ic)
            .map(|(var, eq)| (var.symbol().to_expr(), eq.rhs.clone()))
            .collect();

        let residuals = EquationGroup {
            substitutions: rhs.substitutions.clone(),
            equations: rhs
                .equations
                .iter()
                .zip(&self.variables)
                .map(|(eq, var)| {
                    Equation::expr(eq.rhs.clone() - Expr::Sym(var.symbol().derivative()))
                })
                .collect(),
        };
        let initial_derivatives = EquationGroup {
            substitutions: rhs
                .substitutions
                .iter()
                .map(|sb| Equation {
                    lhs: sb.lhs.clone(),
                    rhs: algebra.substitute(&sb.rhs, &to_initial),
                })
                .collect(),
            equations: rhs
                .equations
                .iter()
                .map(|eq| Equation::expr(algebra.substitute(&eq.rhs, &to_initial)))
                .collect(),
        };

        let mut groups = self.groups.clone();
        groups.remove(&GroupKind::Rhs);
        groups.insert(GroupKind::Residuals, residuals);
        groups.insert(GroupKind::InitialDerivatives, initial_derivatives);
        for &kind in GroupKind::for_model(ModelKind::Dae) {
            groups.entry(kind).or_default();
        }

        Model {
            kind: ModelKind::Dae,
            groups,
            ..self.clone()
        }
    }
}
