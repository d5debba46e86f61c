//! One reduction step: N parameters to N-1.
//!
//! ```text
//! START -> DETECTING_LIMIT -> REPARAMETERIZING -> SOLVING_FTILDE -> APPLYING
//!       -> VALIDATING -> SUCCESS
//!                     -> RETRY_WITH_SINGULAR -> VALIDATING -> SUCCESS | next candidate
//! ```
//!
//! Candidates are tried in order and the first one that yields a valid model
//! wins. Running out of candidates fails the step and leaves the source model
//! untouched.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::algebra::Algebra;
use crate::error::ReductionError;
use crate::ftilde::{FtildeError, FtildeRecord, FtildeSet, FtildeSolver};
use crate::geodesic::{CancelToken, GeodesicSession, IndexLimitMap};
use crate::model::Model;
use crate::reparameterize::{Ftheta, Reparameterizer};
use crate::settings::ReductionSettings;
use crate::singular::SingularLimitResolver;
use crate::store::Store;
use crate::template::{KeyLegend, LimitMap, Template};

/// Stored record of a successful step. Created once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub from_model: String,
    pub to_model: String,
    pub geo: Option<String>,
    pub ftildes: Vec<FtildeRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    Start,
    DetectingLimit,
    Reparameterizing,
    SolvingFtilde,
    Applying,
    Validating,
    RetryWithSingular,
    Success,
    Fail,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepState::Start => "START",
            StepState::DetectingLimit => "DETECTING_LIMIT",
            StepState::Reparameterizing => "REPARAMETERIZING",
            StepState::SolvingFtilde => "SOLVING_FTILDE",
            StepState::Applying => "APPLYING",
            StepState::Validating => "VALIDATING",
            StepState::RetryWithSingular => "RETRY_WITH_SINGULAR",
            StepState::Success => "SUCCESS",
            StepState::Fail => "FAIL",
        };
        f.write_str(name)
    }
}

pub struct Iteration {
    algebra: Arc<dyn Algebra>,
    store: Arc<dyn Store>,
    settings: ReductionSettings,
    model: Model,
    model_id: String,
    reduced: Option<Model>,
    reduced_id: Option<String>,
    ftildes: Option<FtildeSet>,
    limits: Option<LimitMap>,
    geodesic_id: Option<String>,
    record_id: Option<String>,
    session: Option<GeodesicSession>,
    cancel: CancelToken,
    history: Vec<StepState>,
}

impl Iteration {
    pub fn new(
        model: Model,
        model_id: impl Into<String>,
        store: Arc<dyn Store>,
        algebra: Arc<dyn Algebra>,
        settings: ReductionSettings,
    ) -> Self {
        Self {
            algebra,
            store,
            settings,
            model,
            model_id: model_id.into(),
            reduced: None,
            reduced_id: None,
            ftildes: None,
            limits: None,
            geodesic_id: None,
            record_id: None,
            session: None,
            cancel: CancelToken::new(),
            history: vec![StepState::Start],
        }
    }

    /// Shares an abort flag with the caller, e.g. one token for a whole run.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn reduced(&self) -> Option<&Model> {
        self.reduced.as_ref()
    }

    pub fn reduced_id(&self) -> Option<&str> {
        self.reduced_id.as_deref()
    }

    pub fn ftildes(&self) -> Option<&FtildeSet> {
        self.ftildes.as_ref()
    }

    pub fn limits(&self) -> Option<&LimitMap> {
        self.limits.as_ref()
    }

    pub fn geodesic_id(&self) -> Option<&str> {
        self.geodesic_id.as_deref()
    }

    pub fn record_id(&self) -> Option<&str> {
        self.record_id.as_deref()
    }

    pub fn history(&self) -> &[StepState] {
        &self.history
    }

    pub fn state(&self) -> StepState {
        self.history.last().copied().unwrap_or(StepState::Start)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn transition(&mut self, next: StepState) {
        let from = self.state();
        if from != next {
            info!(model = %self.model.name, %from, to = %next, "step state");
        }
        self.history.push(next);
    }

    fn fail<T>(&mut self, err: ReductionError) -> Result<T, ReductionError> {
        self.transition(StepState::Fail);
        Err(err)
    }

    /// Runs the integrator until the detector confirms a limit and names
    /// the limiting parameters.
    pub fn find_limits(&mut self) -> Result<LimitMap, ReductionError> {
        self.transition(StepState::DetectingLimit);
        let Some(command) = self.settings.integrator.clone() else {
            return self.fail(ReductionError::Configuration(
                "no integrator command configured".to_string(),
            ));
        };
        let session = GeodesicSession::start(
            &command,
            &self.model.to_document(),
            Arc::clone(&self.store),
            self.settings.geodesic,
            self.cancel.clone(),
        );
        let mut session = match session {
            Ok(session) => session,
            Err(err) => {
                return self.fail(ReductionError::NoLimitReached {
                    geodesic: "-".to_string(),
                    reason: format!("{err:#}"),
                })
            }
        };
        self.geodesic_id = Some(session.geodesic_id().to_string());
        let detected = session.run_until_limit();
        self.session = Some(session);

        let limits = detected.and_then(|indices| self.name_limits(&indices));
        match limits {
            Ok(limits) => {
                info!(model = %self.model.name, limits = ?limits, "limits found");
                self.limits = Some(limits.clone());
                Ok(limits)
            }
            Err(err) => self.fail(err),
        }
    }

    /// Index-keyed detector output to parameter names, in the order of the
    /// model's non-constant parameters.
    pub fn name_limits(&self, indices: &IndexLimitMap) -> Result<LimitMap, ReductionError> {
        let free = self.model.free_parameters();
        indices
            .iter()
            .map(|(index, limit)| {
                free.get(*index)
                    .map(|param| (param.name.clone(), *limit))
                    .ok_or_else(|| ReductionError::UnknownParameter(format!("#{index}")))
            })
            .collect()
    }

    fn check_parameters<'n>(
        &self,
        names: impl IntoIterator<Item = &'n String>,
    ) -> Result<(), ReductionError> {
        let free = self.model.free_parameters();
        for name in names {
            if !free.iter().any(|p| &p.name == name) {
                return Err(ReductionError::UnknownParameter(name.clone()));
            }
        }
        Ok(())
    }

    /// Tries every candidate reparameterization for `limits` until one
    /// yields a valid reduced model.
    pub fn apply_limits(&mut self, limits: &LimitMap) -> Result<(), ReductionError> {
        self.transition(StepState::Reparameterizing);
        if let Err(err) = self.check_parameters(limits.keys()) {
            return self.fail(err);
        }
        self.limits = Some(limits.clone());
        self.ftildes = None;
        self.reduced = None;

        let legend = match self.store.legend() {
            Ok(legend) => legend,
            Err(err) => return self.fail(err.into()),
        };
        let templates = legend.key_for(limits).and_then(|key| {
            Ok(self
                .store
                .load_templates(Some(&key), Some(&self.model.class))?)
        });
        let templates = match templates {
            Ok(templates) => templates,
            Err(err) => return self.fail(err),
        };

        let algebra = Arc::clone(&self.algebra);
        let candidates = Reparameterizer::new(algebra.as_ref(), limits).candidates(&templates);
        info!(
            model = %self.model.name,
            templates = templates.len(),
            candidates = candidates.len(),
            "reparameterization candidates"
        );

        for (index, candidate) in candidates.iter().enumerate() {
            self.transition(StepState::SolvingFtilde);
            let described: Vec<String> = candidate.iter().map(ToString::to_string).collect();
            debug!(candidate = index, fthetas = ?described, "trying candidate");
            let solver = FtildeSolver::new(algebra.as_ref(), self.settings.solver.max_theta_passes);
            let set = match solver.solve(candidate) {
                Ok(set) if !set.is_empty() => set,
                Ok(_) => continue,
                Err(err @ FtildeError::InvalidSubstitution { .. }) => {
                    debug!(candidate = index, error = %err, "skipping candidate");
                    continue;
                }
                Err(err @ FtildeError::UnresolvedTheta { .. }) => {
                    error!(candidate = index, error = %err, "theta elimination did not converge");
                    continue;
                }
            };
            match self.apply_ftilde(&set) {
                Ok(reduced) => {
                    self.learn_templates(&set, &legend);
                    self.reduced = Some(reduced);
                    self.ftildes = Some(set);
                    self.transition(StepState::Success);
                    return Ok(());
                }
                Err(err) => debug!(candidate = index, error = %err, "candidate rejected"),
            }
        }

        self.fail(ReductionError::NoCandidatesRemain {
            model: self.model.name.clone(),
            tried: candidates.len(),
        })
    }

    /// Substitutes the ftildes into a copy of the model and takes the
    /// epsilon limit, falling back once to the singular limit procedure.
    pub fn apply_ftilde(&mut self, ftildes: &FtildeSet) -> Result<Model, ReductionError> {
        self.transition(StepState::Applying);
        let algebra = Arc::clone(&self.algebra);
        let mut substituted = self.model.clone();
        substituted.substitute(algebra.as_ref(), &ftildes.substitutions());
        substituted.rename_parameters(&ftildes.renames());

        let mut direct = substituted.clone();
        direct.eval_epsilon(algebra.as_ref());
        self.transition(StepState::Validating);
        let validity = direct.validity();
        if validity.is_valid() {
            direct.prune_substitutions();
            return Ok(direct);
        }
        debug!(model = %self.model.name, reason = %validity.reason(), "direct limit invalid");

        self.transition(StepState::RetryWithSingular);
        let mut singular = substituted;
        SingularLimitResolver::new(algebra.as_ref()).resolve(&mut singular);
        self.transition(StepState::Validating);
        let validity = singular.validity();
        if validity.is_valid() {
            singular.prune_substitutions();
            return Ok(singular);
        }
        Err(ReductionError::InvalidModel {
            model: self.model.name.clone(),
            reason: validity.reason(),
        })
    }

    /// Manual entry point: uses the given fthetas instead of detecting a
    /// limit and generating candidates.
    pub fn load_ftheta(&mut self, fthetas: &[Ftheta]) -> Result<(), ReductionError> {
        self.transition(StepState::SolvingFtilde);
        if let Err(err) = self.check_parameters(fthetas.iter().map(|f| &f.theta)) {
            return self.fail(err);
        }
        self.limits = Some(fthetas.iter().map(|f| (f.theta.clone(), f.limit)).collect());
        let solver = FtildeSolver::new(self.algebra.as_ref(), self.settings.solver.max_theta_passes);
        let set = match solver.solve(fthetas) {
            Ok(set) => set,
            Err(err) => {
                if matches!(err, FtildeError::UnresolvedTheta { .. }) {
                    error!(error = %err, "theta elimination did not converge");
                }
                return self.fail(err.into());
            }
        };
        match self.apply_ftilde(&set) {
            Ok(reduced) => {
                if let Ok(legend) = self.store.legend() {
                    self.learn_templates(&set, &legend);
                }
                self.reduced = Some(reduced);
                self.ftildes = Some(set);
                self.transition(StepState::Success);
                Ok(())
            }
            Err(err) => self.fail(err),
        }
    }

    fn learn_templates(&self, ftildes: &FtildeSet, legend: &KeyLegend) {
        let learned = Template::learn(ftildes, legend, &self.model.class, self.algebra.as_ref());
        match self.store.save_templates(learned) {
            Ok(0) => {}
            Ok(saved) => info!(saved, class = %self.model.class, "learned templates"),
            Err(err) => warn!(error = %err, "could not save learned templates"),
        }
    }

    /// Names and persists the reduced model, then the iteration record and
    /// the links between them.
    pub fn save_iteration(&mut self) -> Result<String, ReductionError> {
        let (Some(reduced), Some(ftildes)) = (self.reduced.as_mut(), self.ftildes.as_ref()) else {
            return Err(ReductionError::NothingToSave);
        };
        let children = self.store.hasse_children(&self.model_id)?;
        reduced.set_hasse_name(children);
        let reduced_id = self.store.save_model(&reduced.to_document())?;
        let record = IterationRecord {
            from_model: self.model_id.clone(),
            to_model: reduced_id.clone(),
            geo: self.geodesic_id.clone(),
            ftildes: ftildes.records(),
        };
        let id = self.store.save_iteration(&record)?;
        self.store.link_child(&self.model_id, &id)?;
        self.store.link_parent(&reduced_id, &id)?;
        info!(
            from = %self.model_id,
            to = %reduced_id,
            name = %reduced.name,
            iteration = %id,
            "iteration saved"
        );
        self.reduced_id = Some(reduced_id);
        self.record_id = Some(id.clone());
        Ok(id)
    }

    /// Detect, reduce and save.
    pub fn auto_run(&mut self) -> Result<String, ReductionError> {
        let limits = self.find_limits()?;
        self.apply_limits(&limits)?;
        self.save_iteration()
    }

    /// [`Iteration::auto_run`] reduced to success or failure.
    pub fn auto_run_step(&mut self) -> bool {
        match self.auto_run() {
            Ok(_) => true,
            Err(err) => {
                warn!(model = %self.model_id, error = %err, "reduction step failed");
                false
            }
        }
    }

    pub fn kill_geodesic(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.kill();
        }
    }
}
