//! Limit types, template keys and the reparameterization template library.
//!
//! A template is an expression over limit slots such as `inf_1/inf_2`. Its
//! key counts the slots of each limit type, ordered by the store's legend
//! (`{"zero": 0, "inf": 1}`), so `inf_1/inf_2` has key `(0, 2)`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::algebra::{Algebra, Substitution};
use crate::error::ReductionError;
use crate::ftilde::FtildeSet;
use crate::symbolic::{Expr, Symbol, EPSILON};

/// Label carried by templates that vanish at the limit.
pub const EPSILON_LABEL: &str = EPSILON;

const LABEL_SUBSTITUTIONS: [(&str, &str); 6] = [
    ("+", "_plus_"),
    ("-", "_minus_"),
    ("*", "_"),
    ("/", "_over_"),
    ("^", "_pow_"),
    (".", "_point_"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LimitType {
    #[serde(rename = "zero")]
    Zero,
    #[serde(rename = "inf", alias = "infinity")]
    Infinity,
}

impl LimitType {
    pub fn as_str(self) -> &'static str {
        match self {
            LimitType::Zero => "zero",
            LimitType::Infinity => "inf",
        }
    }

    /// Direction of a parameter velocity component: growing parameters head
    /// to infinity, shrinking ones to zero.
    pub fn from_velocity(velocity: f64) -> Self {
        if velocity > 0.0 {
            LimitType::Infinity
        } else {
            LimitType::Zero
        }
    }

    /// The `index`-th template slot of this type, counted from one.
    pub fn slot(self, index: usize) -> Symbol {
        Symbol::named(format!("{}_{}", self.as_str(), index))
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitType {
    type Err = ReductionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zero" => Ok(LimitType::Zero),
            "inf" | "infinity" => Ok(LimitType::Infinity),
            other => Err(ReductionError::MissingLegendEntry(other.to_string())),
        }
    }
}

/// Parameter name to the limit it approaches.
pub type LimitMap = BTreeMap<String, LimitType>;

/// Limit type name to its position in a template key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyLegend(BTreeMap<String, usize>);

impl Default for KeyLegend {
    fn default() -> Self {
        Self(BTreeMap::from([
            (LimitType::Zero.as_str().to_string(), 0),
            (LimitType::Infinity.as_str().to_string(), 1),
        ]))
    }
}

impl KeyLegend {
    pub fn new(positions: BTreeMap<String, usize>) -> Self {
        Self(positions)
    }

    /// Length of keys built from this legend.
    pub fn len(&self) -> usize {
        self.0.values().max().map_or(0, |max| max + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn position(&self, limit: LimitType) -> Option<usize> {
        self.0.get(limit.as_str()).copied()
    }

    /// Counts of each limit type in `limits`.
    pub fn key_for(&self, limits: &LimitMap) -> Result<LimitKey, ReductionError> {
        let mut counts = vec![0; self.len()];
        for limit in limits.values() {
            let position = self
                .position(*limit)
                .ok_or_else(|| ReductionError::MissingLegendEntry(limit.to_string()))?;
            counts[position] += 1;
        }
        Ok(LimitKey(counts))
    }

    /// Counts of slot symbols of each limit type in a template expression.
    pub fn key_of_template(&self, expr: &Expr) -> Vec<usize> {
        let mut counts = vec![0; self.len()];
        for symbol in expr.free_symbols() {
            for (name, position) in &self.0 {
                if symbol.base().starts_with(&format!("{name}_")) {
                    counts[*position] += 1;
                }
            }
        }
        counts
    }
}

/// Counts of each limit type in a limit map, ordered by the legend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LimitKey(Vec<usize>);

impl LimitKey {
    pub fn new(counts: Vec<usize>) -> Self {
        Self(counts)
    }

    pub fn counts(&self) -> &[usize] {
        &self.0
    }

    /// A template fits when it needs no more of any limit type than the
    /// limit map supplies.
    pub fn admits(&self, template_key: &[usize]) -> bool {
        if self.0.len() < template_key.len() {
            warn!(
                key = ?self.0,
                template_key = ?template_key,
                "limit key shorter than template key, not filtering"
            );
            return true;
        }
        template_key
            .iter()
            .zip(&self.0)
            .all(|(needed, available)| needed <= available)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub key: Vec<usize>,
    pub template: String,
    pub label: String,
    pub class: String,
}

impl Template {
    pub fn new(key: Vec<usize>, template: &str, label: &str, class: &str) -> Self {
        Self {
            key,
            template: template.to_string(),
            label: label.to_string(),
            class: class.to_string(),
        }
    }

    pub fn is_epsilon(&self) -> bool {
        self.label == EPSILON_LABEL
    }

    /// Generalises a successful ftilde set back into templates: each theta
    /// becomes a limit slot, counted per limit type in set order.
    pub fn learn(
        ftildes: &FtildeSet,
        legend: &KeyLegend,
        class: &str,
        algebra: &dyn Algebra,
    ) -> Vec<Template> {
        let mut counts: BTreeMap<LimitType, usize> = BTreeMap::new();
        let slots: Vec<Substitution> = ftildes
            .iter()
            .map(|ftilde| {
                let count = counts.entry(ftilde.limit).or_insert(0);
                *count += 1;
                (
                    Expr::Sym(Symbol::named(&ftilde.theta)),
                    Expr::Sym(ftilde.limit.slot(*count)),
                )
            })
            .collect();

        ftildes
            .iter()
            .map(|ftilde| {
                let generalised = algebra.substitute(&ftilde.f, &slots);
                let label = if ftilde.tilde == EPSILON {
                    EPSILON_LABEL.to_string()
                } else {
                    tilde_label(&generalised)
                };
                Template {
                    key: legend.key_of_template(&generalised),
                    template: generalised.to_string(),
                    label,
                    class: class.to_string(),
                }
            })
            .collect()
    }
}

/// A usable parameter name for a filled finite template:
/// `p1/p2` becomes `p1_over_p2`.
pub fn tilde_label(expr: &Expr) -> String {
    let mut label: String = expr
        .to_string()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '(' && *c != ')')
        .collect();
    for (from, to) in LABEL_SUBSTITUTIONS {
        label = label.replace(from, to);
    }
    if label.starts_with(|c: char| c.is_ascii_digit()) {
        label.insert_str(0, "k_");
    }
    label
}

/// Templates split by whether they vanish at the limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateSet {
    pub epsilon: Vec<Template>,
    pub finite: Vec<Template>,
}

impl TemplateSet {
    pub fn partition(templates: impl IntoIterator<Item = Template>) -> Self {
        let (epsilon, finite) = templates.into_iter().partition(Template::is_epsilon);
        Self { epsilon, finite }
    }

    /// Keeps the templates `key` admits. Filtering twice changes nothing.
    pub fn filter_by_key(&self, key: &LimitKey) -> Self {
        let keep = |templates: &[Template]| -> Vec<Template> {
            templates
                .iter()
                .filter(|t| key.admits(&t.key))
                .cloned()
                .collect()
        };
        Self {
            epsilon: keep(&self.epsilon),
            finite: keep(&self.finite),
        }
    }

    pub fn len(&self) -> usize {
        self.epsilon.len() + self.finite.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The seed library for the mass-action (`ma`) and Michaelis-Menten (`mm`)
/// model classes.
pub fn stock_templates() -> Vec<Template> {
    ["ma", "mm"]
        .into_iter()
        .flat_map(|class| {
            [
                Template::new(vec![0, 1], "1/inf_1", EPSILON_LABEL, class),
                Template::new(vec![1, 0], "zero_1", EPSILON_LABEL, class),
                Template::new(vec![0, 2], "inf_1/inf_2", "inf_1_over_inf_2", class),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::Symbolic;
    use crate::ftilde::Ftilde;
    use crate::symbolic::parse;

    #[test]
    fn limit_types_serialise_as_legend_names() {
        assert_eq!(serde_json::to_string(&LimitType::Infinity).unwrap(), "\"inf\"");
        let parsed: LimitType = serde_json::from_str("\"infinity\"").unwrap();
        assert_eq!(parsed, LimitType::Infinity);
        assert_eq!("zero".parse::<LimitType>().unwrap(), LimitType::Zero);
        assert!("sideways".parse::<LimitType>().is_err());
    }

    #[test]
    fn key_counts_limits_by_legend_position() {
        let legend = KeyLegend::default();
        let limits = LimitMap::from([
            ("a".to_string(), LimitType::Infinity),
            ("b".to_string(), LimitType::Infinity),
            ("c".to_string(), LimitType::Zero),
        ]);
        assert_eq!(legend.key_for(&limits).unwrap().counts(), &[1, 2]);
    }

    #[test]
    fn missing_legend_entry_is_an_error() {
        let legend = KeyLegend::new(BTreeMap::from([("zero".to_string(), 0)]));
        let limits = LimitMap::from([("a".to_string(), LimitType::Infinity)]);
        assert!(matches!(
            legend.key_for(&limits),
            Err(ReductionError::MissingLegendEntry(_))
        ));
    }

    #[test]
    fn filter_is_componentwise_and_idempotent() {
        let set = TemplateSet::partition(stock_templates());
        assert_eq!(set.epsilon.len(), 4);
        assert_eq!(set.finite.len(), 2);

        let key = LimitKey::new(vec![0, 1]);
        let once = set.filter_by_key(&key);
        assert_eq!(once.epsilon.len(), 2);
        assert!(once.epsilon.iter().all(|t| t.template == "1/inf_1"));
        assert!(once.finite.is_empty());
        assert_eq!(once.filter_by_key(&key), once);
    }

    #[test]
    fn short_key_skips_filtering() {
        let set = TemplateSet::partition(stock_templates());
        let key = LimitKey::new(vec![0]);
        assert_eq!(set.filter_by_key(&key).len(), set.len());
    }

    #[test]
    fn labels_spell_out_operators() {
        assert_eq!(tilde_label(&parse("p1/p2").unwrap()), "p1_over_p2");
        assert_eq!(tilde_label(&parse("a*b").unwrap()), "a_b");
        assert_eq!(tilde_label(&parse("a - b").unwrap()), "a_minus_b");
        assert_eq!(tilde_label(&parse("2*a").unwrap()), "k_2_a");
    }

    #[test]
    fn learned_templates_replace_thetas_with_slots() {
        let ftildes = FtildeSet::new(vec![
            Ftilde {
                theta: "k1".into(),
                limit: LimitType::Infinity,
                tilde: EPSILON.into(),
                f: parse("1/k1").unwrap(),
                f_inv: parse("1/epsilon").unwrap(),
            },
            Ftilde {
                theta: "k2".into(),
                limit: LimitType::Infinity,
                tilde: "k2_over_k1".into(),
                f: parse("k2/k1").unwrap(),
                f_inv: parse("k2_over_k1/epsilon").unwrap(),
            },
        ]);
        let learned = Template::learn(&ftildes, &KeyLegend::default(), "ma", &Symbolic);
        assert_eq!(learned.len(), 2);
        assert_eq!(learned[0].template, "1/inf_1");
        assert_eq!(learned[0].key, vec![0, 1]);
        assert!(learned[0].is_epsilon());
        assert_eq!(learned[1].template, parse("inf_2/inf_1").unwrap().to_string());
        assert_eq!(learned[1].key, vec![0, 2]);
        assert_eq!(learned[1].label, tilde_label(&parse("inf_2/inf_1").unwrap()));
        assert_eq!(learned[1].class, "ma");
    }
}
