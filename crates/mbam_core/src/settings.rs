//! Tunable knobs for a reduction run, loadable from JSON.

use serde::{Deserialize, Serialize};

/// Geodesic polling and limit confirmation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeodesicSettings {
    /// Delay between detector polls of the stored geodesic.
    pub poll_interval_ms: u64,
    /// A candidate limit is confirmed once the history holds more than this
    /// many consecutive identical observations.
    pub confirmations: usize,
    /// A single dominant component above this magnitude is a limit on its own.
    pub single_threshold: f64,
    /// Give up after this many polls. `None` polls until the integrator ends.
    pub max_polls: Option<usize>,
}

impl Default for GeodesicSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 400,
            confirmations: 6,
            single_threshold: 0.9,
            max_polls: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolverSettings {
    /// Upper bound on theta elimination passes when chaining inverses.
    pub max_theta_passes: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_theta_passes: 16,
        }
    }
}

/// External geodesic integrator process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegratorCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReductionSettings {
    pub geodesic: GeodesicSettings,
    pub solver: SolverSettings,
    pub integrator: Option<IntegratorCommand>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let settings: ReductionSettings =
            serde_json::from_str(r#"{"geodesic": {"poll_interval_ms": 10}}"#).expect("valid json");
        assert_eq!(settings.geodesic.poll_interval_ms, 10);
        assert_eq!(settings.geodesic.confirmations, 6);
        assert_eq!(settings.solver.max_theta_passes, 16);
        assert!(settings.integrator.is_none());
    }

    #[test]
    fn integrator_args_default_empty() {
        let settings: ReductionSettings =
            serde_json::from_str(r#"{"integrator": {"program": "geo"}}"#).expect("valid json");
        let integrator = settings.integrator.expect("integrator configured");
        assert_eq!(integrator.program, "geo");
        assert!(integrator.args.is_empty());
    }
}
