//! Repeated reduction steps from a root model.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::algebra::Algebra;
use crate::error::ReductionError;
use crate::geodesic::CancelToken;
use crate::iteration::Iteration;
use crate::model::{Model, ModelDocument};
use crate::settings::ReductionSettings;
use crate::store::Store;
use crate::template::LimitMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSummary {
    pub iteration: String,
    pub from_model: String,
    pub to_model: String,
    pub name: String,
    pub limits: LimitMap,
    pub parameters: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub root: String,
    pub steps: Vec<StepSummary>,
    /// Why the run stopped early, if it did.
    pub stopped: Option<String>,
}

impl RunSummary {
    pub fn final_model(&self) -> &str {
        self.steps.last().map_or(&self.root, |step| &step.to_model)
    }
}

pub struct Engine {
    algebra: Arc<dyn Algebra>,
    store: Arc<dyn Store>,
    settings: ReductionSettings,
    cancel: CancelToken,
    root_id: String,
    current: Model,
    current_id: String,
}

impl Engine {
    /// Converts the root model to DAE form and stores it.
    pub fn new(
        document: &ModelDocument,
        store: Arc<dyn Store>,
        algebra: Arc<dyn Algebra>,
        settings: ReductionSettings,
    ) -> Result<Self, ReductionError> {
        let model = Model::from_document(document, algebra.as_ref())?.to_dae(algebra.as_ref());
        let root_id = store.save_model(&model.to_document())?;
        info!(model = %model.name, id = %root_id, "root model saved");
        Ok(Self {
            algebra,
            store,
            settings,
            cancel: CancelToken::new(),
            current_id: root_id.clone(),
            root_id,
            current: model,
        })
    }

    /// Continues from a model already in the store.
    pub fn resume(
        model_id: &str,
        store: Arc<dyn Store>,
        algebra: Arc<dyn Algebra>,
        settings: ReductionSettings,
    ) -> Result<Self, ReductionError> {
        let document = store.load_model(model_id)?;
        let model = Model::from_document(&document, algebra.as_ref())?;
        Ok(Self {
            algebra,
            store,
            settings,
            cancel: CancelToken::new(),
            root_id: model_id.to_string(),
            current_id: model_id.to_string(),
            current: model,
        })
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn current_id(&self) -> &str {
        &self.current_id
    }

    pub fn current_model(&self) -> &Model {
        &self.current
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn iteration(&self) -> Iteration {
        Iteration::new(
            self.current.clone(),
            self.current_id.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.algebra),
            self.settings.clone(),
        )
        .with_cancel_token(self.cancel.clone())
    }

    fn advance(&mut self, iteration: &Iteration, limits: LimitMap) -> Option<StepSummary> {
        let (Some(reduced), Some(to_model), Some(record)) = (
            iteration.reduced(),
            iteration.reduced_id(),
            iteration.record_id(),
        ) else {
            return None;
        };
        let step = StepSummary {
            iteration: record.to_string(),
            from_model: self.current_id.clone(),
            to_model: to_model.to_string(),
            name: reduced.name.clone(),
            limits,
            parameters: reduced.free_parameters().len(),
        };
        self.current = reduced.clone();
        self.current_id = to_model.to_string();
        Some(step)
    }

    fn stop(summary: &mut RunSummary, model: &str, err: &ReductionError) {
        warn!(model = %model, error = %err, "reduction stopped");
        summary.stopped = Some(err.to_string());
    }

    /// Detect-and-reduce until a step fails, no free parameter is left or
    /// `max_steps` steps have run. Defaults to one step per free parameter.
    pub fn run(&mut self, max_steps: Option<usize>) -> RunSummary {
        let max_steps = max_steps.unwrap_or_else(|| self.current.free_parameters().len());
        let mut summary = RunSummary {
            root: self.current_id.clone(),
            ..RunSummary::default()
        };
        for _ in 0..max_steps {
            if self.current.free_parameters().is_empty() || self.cancel.is_cancelled() {
                break;
            }
            let mut iteration = self.iteration();
            let outcome = iteration.auto_run();
            match outcome {
                Ok(_) => {
                    let limits = iteration.limits().cloned().unwrap_or_default();
                    summary.steps.extend(self.advance(&iteration, limits));
                }
                Err(err) => {
                    Self::stop(&mut summary, &self.current.name, &err);
                    break;
                }
            }
        }
        info!(steps = summary.steps.len(), model = %self.current.name, "run finished");
        summary
    }

    /// Applies each limit map in turn without running the integrator.
    /// Stops at the first failure.
    pub fn apply_limit_sequence(&mut self, sequence: &[LimitMap]) -> RunSummary {
        let mut summary = RunSummary {
            root: self.current_id.clone(),
            ..RunSummary::default()
        };
        for limits in sequence {
            let mut iteration = self.iteration();
            let outcome = iteration
                .apply_limits(limits)
                .and_then(|()| iteration.save_iteration());
            match outcome {
                Ok(_) => summary.steps.extend(self.advance(&iteration, limits.clone())),
                Err(err) => {
                    Self::stop(&mut summary, &self.current.name, &err);
                    break;
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::Symbolic;
    use crate::model::ModelKind;
    use crate::store::MemoryStore;
    use crate::template::LimitType;

    fn two_rate_document() -> ModelDocument {
        serde_json::from_value(serde_json::json!({
            "type": "ode",
            "name": "tworate",
            "class": "ma",
            "ps": [{"name": "k1"}, {"name": "k2"}, {"name": "x0", "transform": "constant"}],
            "vs": [{"name": "x"}],
            "rhs": {"eqs": ["-k1*x - k2*x"]},
            "obs": {"eqs": ["x"]},
            "ic": {"eqs": ["x0"]}
        }))
        .expect("document should deserialize")
    }

    fn engine(store: &Arc<MemoryStore>) -> Engine {
        let store: Arc<dyn Store> = store.clone();
        Engine::new(
            &two_rate_document(),
            store,
            Arc::new(Symbolic),
            ReductionSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn root_is_stored_as_dae() {
        let store = Arc::new(MemoryStore::with_stock_templates());
        let engine = engine(&store);
        assert_eq!(engine.current_model().kind, ModelKind::Dae);
        assert_eq!(store.load_model(engine.root_id()).unwrap().kind, ModelKind::Dae);
    }

    #[test]
    fn limit_sequence_walks_down_the_hierarchy() {
        let store = Arc::new(MemoryStore::with_stock_templates());
        let mut engine = engine(&store);
        let summary = engine.apply_limit_sequence(&[
            LimitMap::from([("k1".to_string(), LimitType::Zero)]),
            LimitMap::from([("k2".to_string(), LimitType::Zero)]),
        ]);
        assert_eq!(summary.stopped, None);
        assert_eq!(summary.steps.len(), 2);
        assert_eq!(summary.steps[0].name, "tworate_P2H0");
        assert_eq!(summary.steps[1].parameters, 0);
        assert_eq!(summary.final_model(), engine.current_id());
        assert_eq!(store.model_ids().len(), 3);
    }

    #[test]
    fn failed_step_stops_the_sequence() {
        let store = Arc::new(MemoryStore::with_stock_templates());
        let mut engine = engine(&store);
        let summary = engine.apply_limit_sequence(&[
            LimitMap::from([("k9".to_string(), LimitType::Zero)]),
            LimitMap::from([("k1".to_string(), LimitType::Zero)]),
        ]);
        assert!(summary.steps.is_empty());
        assert!(summary.stopped.unwrap().contains("k9"));
        assert_eq!(engine.current_id(), engine.root_id());
    }

    #[test]
    fn run_without_integrator_reports_configuration() {
        let store = Arc::new(MemoryStore::with_stock_templates());
        let mut engine = engine(&store);
        let summary = engine.run(None);
        assert!(summary.stopped.unwrap().contains("no integrator command"));
    }
}
