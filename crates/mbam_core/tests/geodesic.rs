use std::sync::Arc;

use mbam_core::geodesic::{DetectorStatus, GeodesicSample, IndexLimitMap, LimitDetector};
use mbam_core::settings::{GeodesicSettings, IntegratorCommand};
use mbam_core::{
    Iteration, LimitType, MemoryStore, Model, ModelDocument, ReductionError, ReductionSettings,
    Store, Symbolic,
};

fn assert_err_contains<T: std::fmt::Debug>(result: Result<T, ReductionError>, needle: &str) {
    let err = result.expect_err("expected error");
    let message = err.to_string();
    assert!(
        message.contains(needle),
        "expected error containing '{needle}', got '{message}'"
    );
}

fn decay() -> ModelDocument {
    serde_json::from_value(serde_json::json!({
        "type": "dae",
        "name": "decay",
        "class": "ma",
        "ps": [{"name": "p1"}, {"name": "p2"}, {"name": "x0", "transform": "constant"}],
        "vs": [{"name": "x"}],
        "res": {"eqs": ["-p1*x - p2*x - xdot"]},
        "obs": {"eqs": ["x"]},
        "ic": {"eqs": ["x0"]},
        "icd": {"eqs": ["-p1*x0 - p2*x0"]}
    }))
    .expect("document should deserialize")
}

fn fast_settings(program: &str, script: &str) -> ReductionSettings {
    ReductionSettings {
        geodesic: GeodesicSettings {
            poll_interval_ms: 5,
            max_polls: Some(2000),
            ..GeodesicSettings::default()
        },
        integrator: Some(IntegratorCommand {
            program: program.to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }),
        ..ReductionSettings::default()
    }
}

fn iteration(settings: ReductionSettings) -> (Arc<MemoryStore>, Iteration) {
    let store = Arc::new(MemoryStore::with_stock_templates());
    let model = Model::from_document(&decay(), &Symbolic).unwrap();
    let id = store.save_model(&model.to_document()).unwrap();
    let dynamic: Arc<dyn Store> = store.clone();
    let iteration = Iteration::new(model, id, dynamic, Arc::new(Symbolic), settings);
    (store, iteration)
}

#[test]
fn seven_identical_reads_confirm_infinity() {
    let store = MemoryStore::new();
    let id = store.init_geodesic().unwrap();
    let mut detector = LimitDetector::new(GeodesicSettings::default());
    let sample = GeodesicSample {
        t: vec![0.0],
        tau: vec![0.0],
        v: vec![0.95, 0.02],
        x: vec![1.0, 1.0],
    };
    for read in 1..=7 {
        store.push_geodesic(&id, &sample).unwrap();
        let status = detector.poll(&store.query_geodesic(&id).unwrap());
        if read < 7 {
            assert_eq!(status, DetectorStatus::Pending, "read {read}");
        } else {
            assert_eq!(
                status,
                DetectorStatus::Confirmed(IndexLimitMap::from([(0, LimitType::Infinity)]))
            );
        }
    }
}

#[test]
fn missing_integrator_degrades_to_no_limit() {
    let (_, mut it) = iteration(fast_settings("/nonexistent/mbam-integrator", ""));
    assert_err_contains(it.find_limits(), "failed to spawn integrator");
}

#[cfg(unix)]
#[test]
fn streamed_velocities_name_the_limiting_parameter() {
    let script = r#"while true; do echo '{"t": [0.0], "tau": [0.0], "v": [0.01, -0.97], "x": [1.0, 1.0]}'; sleep 0.002; done"#;
    let (store, mut it) = iteration(fast_settings("sh", script));
    let limits = it.find_limits().expect("limit should be confirmed");
    assert_eq!(limits.get("p2"), Some(&LimitType::Zero));
    assert_eq!(limits.len(), 1);

    let geodesic = store.query_geodesic(it.geodesic_id().unwrap()).unwrap();
    assert!(!geodesic.is_empty());
    it.kill_geodesic();
}

#[cfg(unix)]
#[test]
fn integrator_ending_early_reports_no_limit() {
    let script = r#"echo '{"done": "exception"}'"#;
    let (store, mut it) = iteration(fast_settings("sh", script));
    assert_err_contains(it.find_limits(), "no limit reached");
    let geodesic = store.query_geodesic(it.geodesic_id().unwrap()).unwrap();
    assert!(geodesic.is_empty());
}

#[cfg(unix)]
#[test]
fn auto_run_reduces_after_detection() {
    let script = r#"while true; do echo '{"v": [-0.99, 0.03]}'; sleep 0.002; done"#;
    let (store, mut it) = iteration(fast_settings("sh", script));
    assert!(it.auto_run_step());
    let record = store.load_iteration(it.record_id().unwrap()).unwrap();
    assert_eq!(record.geo.as_deref(), it.geodesic_id());
    assert_eq!(record.ftildes[0].theta, "p1");
}
