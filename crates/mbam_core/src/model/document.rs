//! JSON document form of a model, as stored and exchanged with the integrator.

use serde::{Deserialize, Serialize};

use super::{GroupKind, ModelKind, Parameter, Variable};

/// One equation group: substitutions and equations as text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupDocument {
    #[serde(default)]
    pub sbs: Vec<String>,
    #[serde(default)]
    pub eqs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDocument {
    #[serde(rename = "type")]
    pub kind: ModelKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_name: Option<String>,
    #[serde(rename = "class", default)]
    pub class: String,
    #[serde(default)]
    pub ps: Vec<Parameter>,
    #[serde(default)]
    pub vs: Vec<Variable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inp: Option<GroupDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rhs: Option<GroupDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub res: Option<GroupDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obs: Option<GroupDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ic: Option<GroupDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icd: Option<GroupDocument>,
    /// Names minted for transformed variables, kept so later steps stay unique.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub used: Vec<String>,
}

impl ModelDocument {
    pub fn group(&self, kind: GroupKind) -> Option<&GroupDocument> {
        match kind {
            GroupKind::Inputs => self.inp.as_ref(),
            GroupKind::Rhs => self.rhs.as_ref(),
            GroupKind::Residuals => self.res.as_ref(),
            GroupKind::Observations => self.obs.as_ref(),
            GroupKind::InitialConditions => self.ic.as_ref(),
            GroupKind::InitialDerivatives => self.icd.as_ref(),
        }
    }

    pub fn set_group(&mut self, kind: GroupKind, group: GroupDocument) {
        let slot = match kind {
            GroupKind::Inputs => &mut self.inp,
            GroupKind::Rhs => &mut self.rhs,
            GroupKind::Residuals => &mut self.res,
            GroupKind::Observations => &mut self.obs,
            GroupKind::InitialConditions => &mut self.ic,
            GroupKind::InitialDerivatives => &mut self.icd,
        };
        *slot = Some(group);
    }
}
