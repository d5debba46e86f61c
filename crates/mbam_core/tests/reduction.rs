use std::sync::Arc;

use mbam_core::iteration::StepState;
use mbam_core::model::GroupKind;
use mbam_core::singular::{find_like_terms, SingularLimitResolver};
use mbam_core::symbolic::{Symbol, EPSILON};
use mbam_core::{
    Algebra, Engine, Iteration, LimitMap, LimitType, MemoryStore, Model, ModelDocument,
    ReductionSettings, Store, Symbolic,
};

fn document(value: serde_json::Value) -> ModelDocument {
    serde_json::from_value(value).expect("document should deserialize")
}

fn decay() -> ModelDocument {
    document(serde_json::json!({
        "type": "ode",
        "name": "decay",
        "class": "ma",
        "ps": [{"name": "p1"}, {"name": "p2"}, {"name": "x0", "transform": "constant"}],
        "vs": [{"name": "x"}],
        "rhs": {"eqs": ["-p1*x - p2*x"]},
        "obs": {"eqs": ["x"]},
        "ic": {"eqs": ["x0"]}
    }))
}

fn shared_store() -> (Arc<MemoryStore>, Arc<dyn Store>) {
    let store = Arc::new(MemoryStore::with_stock_templates());
    let dynamic: Arc<dyn Store> = store.clone();
    (store, dynamic)
}

#[test]
fn zero_limit_reduces_decay_model() {
    let (store, dynamic) = shared_store();
    let mut engine = Engine::new(
        &decay(),
        dynamic,
        Arc::new(Symbolic),
        ReductionSettings::default(),
    )
    .unwrap();
    let summary = engine.apply_limit_sequence(&[LimitMap::from([(
        "p1".to_string(),
        LimitType::Zero,
    )])]);
    assert_eq!(summary.stopped, None);

    let step = &summary.steps[0];
    assert_eq!(step.name, "decay_P2H0");
    let reduced = store.load_model(&step.to_model).unwrap();
    let names: Vec<&str> = reduced.ps.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["p2", "x0"]);
    let residual = &reduced.res.as_ref().unwrap().eqs[0];
    assert!(residual.contains("p2") && !residual.contains("p1") && !residual.contains(EPSILON));

    let record = store.load_iteration(&step.iteration).unwrap();
    assert_eq!(record.ftildes.len(), 1);
    assert_eq!(record.ftildes[0].theta, "p1");
    assert_eq!(record.ftildes[0].tilde, EPSILON);
    assert_eq!(record.ftildes[0].limit, "zero");
}

#[test]
fn snapshot_survives_a_reduction() {
    let (store, dynamic) = shared_store();
    let mut engine = Engine::new(&decay(), dynamic, Arc::new(Symbolic), ReductionSettings::default())
        .unwrap();
    let summary = engine.apply_limit_sequence(&[LimitMap::from([(
        "p2".to_string(),
        LimitType::Zero,
    )])]);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    store.save(&path).unwrap();
    let reopened = MemoryStore::open(&path).unwrap();
    assert_eq!(reopened.model_ids(), store.model_ids());
    assert_eq!(reopened.hasse_children(engine.root_id()).unwrap(), 1);
    assert_eq!(
        reopened.load_model(summary.final_model()).unwrap().name,
        "decay_P2H0"
    );
}

#[test]
fn divergent_limit_falls_back_to_singular_resolution() {
    let doc = document(serde_json::json!({
        "type": "dae",
        "name": "exchange",
        "class": "ma",
        "ps": [
            {"name": "a"},
            {"name": "k"},
            {"name": "x0", "transform": "constant"},
            {"name": "y0", "transform": "constant"}
        ],
        "vs": [{"name": "x"}, {"name": "y"}],
        "res": {"eqs": ["k*y - a*x - xdot", "a*x - k*y - ydot"]},
        "obs": {"eqs": ["x + y"]},
        "ic": {"eqs": ["x0", "y0"]},
        "icd": {"eqs": ["k*y0 - a*x0", "a*x0 - k*y0"]}
    }));
    let algebra: Arc<dyn Algebra> = Arc::new(Symbolic);
    let model = Model::from_document(&doc, algebra.as_ref()).unwrap();
    let (_, dynamic) = shared_store();
    let id = dynamic.save_model(&model.to_document()).unwrap();

    let mut iteration = Iteration::new(model, id, dynamic, algebra, ReductionSettings::default());
    iteration
        .apply_limits(&LimitMap::from([("k".to_string(), LimitType::Infinity)]))
        .expect("singular resolution should rescue the step");

    assert!(iteration.history().contains(&StepState::RetryWithSingular));
    let reduced = iteration.reduced().unwrap();
    assert!(reduced.is_valid());
    assert!(!reduced.atoms().contains(&Symbol::epsilon()));
    assert!(reduced.parameters.iter().all(|p| p.name != "k"));
}

#[test]
fn negated_epsilon_pair_loses_an_epsilon_residual() {
    let doc = document(serde_json::json!({
        "type": "dae",
        "name": "pair",
        "class": "ma",
        "ps": [{"name": "a"}, {"name": "b"}, {"name": "epsilon"}],
        "vs": [{"name": "x"}, {"name": "y"}],
        "res": {"eqs": ["epsilon*a*y + b - xdot", "x - epsilon*a*y - ydot"]},
        "obs": {"eqs": ["x"]},
        "ic": {"eqs": ["1", "1"]},
        "icd": {"eqs": ["0", "0"]}
    }));
    let mut model = Model::from_document(&doc, &Symbolic).unwrap();
    let resolver = SingularLimitResolver::new(&Symbolic);

    let before = resolver.epsilon_terms(&model, GroupKind::Residuals);
    assert_eq!(before.len(), 2);
    let combinations = find_like_terms(&before);
    assert_eq!(combinations.len(), 1);
    resolver.combine_equations(&mut model, &combinations);
    assert_eq!(resolver.epsilon_terms(&model, GroupKind::Residuals).len(), 1);
    // The pair is merged in place: residual count stays at one per variable.
    assert_eq!(model.equations(GroupKind::Residuals).len(), 2);
}
