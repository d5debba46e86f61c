use std::collections::BTreeMap;

use tracing::{debug, info};

use super::GeodesicRecord;
use crate::settings::GeodesicSettings;
use crate::template::LimitType;

/// Limit map keyed by position among the model's non-constant parameters.
pub type IndexLimitMap = BTreeMap<usize, LimitType>;

/// Minimum drop in |v| between ranks `k` and `k + 1` that separates the
/// limiting parameters from the rest. Strictly decreasing in `k`.
pub fn threshold(k: usize) -> f64 {
    let k = k as f64;
    0.5 * (1.0 / k.sqrt() + 1.0 / (k + 1.0).sqrt())
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectorStatus {
    /// Not yet confident; keep polling.
    Pending,
    Confirmed(IndexLimitMap),
    /// The geodesic ended before any candidate appeared.
    NoLimit,
}

#[derive(Debug, Clone)]
pub struct LimitDetector {
    settings: GeodesicSettings,
    history: Vec<IndexLimitMap>,
}

impl LimitDetector {
    pub fn new(settings: GeodesicSettings) -> Self {
        Self {
            settings,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[IndexLimitMap] {
        &self.history
    }

    /// The limit map suggested by one velocity vector, empty if none.
    pub fn candidate(&self, velocity: &[f64]) -> IndexLimitMap {
        let mut ranking: Vec<usize> = (0..velocity.len()).collect();
        // Stable sort keeps ties in index order.
        ranking.sort_by(|&a, &b| velocity[b].abs().total_cmp(&velocity[a].abs()));

        let limiting = match ranking.as_slice() {
            [] => 0,
            [only] => usize::from(velocity[*only].abs() > self.settings.single_threshold),
            _ => ranking
                .windows(2)
                .enumerate()
                .find(|(i, pair)| {
                    velocity[pair[0]].abs() - velocity[pair[1]].abs() >= threshold(i + 1)
                })
                .map_or(0, |(i, _)| i + 1),
        };

        ranking[..limiting]
            .iter()
            .map(|&index| (index, LimitType::from_velocity(velocity[index])))
            .collect()
    }

    /// Feeds one velocity vector. Returns the limit map once it has been
    /// seen more than `confirmations` times in a row.
    pub fn observe(&mut self, velocity: &[f64]) -> Option<IndexLimitMap> {
        let candidate = self.candidate(velocity);
        if candidate.is_empty() {
            return None;
        }
        if self.history.last() == Some(&candidate) {
            self.history.push(candidate);
        } else {
            debug!(candidate = ?candidate, "new limit candidate");
            self.history = vec![candidate];
        }
        (self.history.len() > self.settings.confirmations).then(|| self.history[0].clone())
    }

    /// One poll of the stored geodesic: a finished geodesic settles on the
    /// last candidate, otherwise the newest sample is observed.
    pub fn poll(&mut self, record: &GeodesicRecord) -> DetectorStatus {
        if record.is_done() {
            return match self.history.last() {
                Some(last) => {
                    info!(limits = ?last, "geodesic finished, taking last candidate");
                    DetectorStatus::Confirmed(last.clone())
                }
                None => DetectorStatus::NoLimit,
            };
        }
        match record.latest_velocity().and_then(|v| self.observe(v)) {
            Some(limits) => {
                info!(limits = ?limits, polls = self.history.len(), "limit confirmed");
                DetectorStatus::Confirmed(limits)
            }
            None => DetectorStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesic::{GeodesicSample, GeodesicStatus};

    fn detector() -> LimitDetector {
        LimitDetector::new(GeodesicSettings::default())
    }

    #[test]
    fn threshold_is_strictly_decreasing() {
        for k in 1..50 {
            assert!(threshold(k + 1) < threshold(k));
        }
        approx::assert_relative_eq!(threshold(1), 0.5 * (1.0 + 1.0 / 2f64.sqrt()));
    }

    #[test]
    fn single_parameter_needs_dominant_speed() {
        let det = detector();
        assert_eq!(det.candidate(&[0.95]), IndexLimitMap::from([(0, LimitType::Infinity)]));
        assert_eq!(det.candidate(&[-0.91]), IndexLimitMap::from([(0, LimitType::Zero)]));
        assert!(det.candidate(&[0.5]).is_empty());
    }

    #[test]
    fn break_claims_leading_ranks() {
        let det = detector();
        // Gap between ranks 2 and 3 is 0.7 >= threshold(2) ~ 0.642.
        let limits = det.candidate(&[0.05, -0.8, 0.85, 0.1]);
        assert_eq!(
            limits,
            IndexLimitMap::from([(1, LimitType::Zero), (2, LimitType::Infinity)])
        );
        assert!(det.candidate(&[0.5, 0.4, 0.3]).is_empty());
    }

    #[test]
    fn confirms_on_seventh_identical_read() {
        let mut det = detector();
        for _ in 0..6 {
            assert_eq!(det.observe(&[0.95, 0.02]), None);
        }
        assert_eq!(
            det.observe(&[0.95, 0.02]),
            Some(IndexLimitMap::from([(0, LimitType::Infinity)]))
        );
    }

    #[test]
    fn differing_candidate_resets_history() {
        let mut det = detector();
        for _ in 0..5 {
            det.observe(&[0.95, 0.02]);
        }
        det.observe(&[0.02, -0.95]);
        assert_eq!(det.history().len(), 1);
        assert_eq!(det.history()[0], IndexLimitMap::from([(1, LimitType::Zero)]));
        // Samples without a candidate leave the history alone.
        det.observe(&[0.3, 0.3]);
        assert_eq!(det.history().len(), 1);
    }

    #[test]
    fn finished_geodesic_settles() {
        let mut det = detector();
        let mut record = GeodesicRecord::default();
        record.done = Some(GeodesicStatus::Exception);
        assert_eq!(det.poll(&record), DetectorStatus::NoLimit);

        let mut record = GeodesicRecord::default();
        record.push(&GeodesicSample {
            t: vec![0.0],
            tau: vec![0.0],
            v: vec![-0.99, 0.01],
            x: vec![1.0, 1.0],
        });
        assert_eq!(det.poll(&record), DetectorStatus::Pending);
        record.done = Some(GeodesicStatus::Done);
        assert_eq!(
            det.poll(&record),
            DetectorStatus::Confirmed(IndexLimitMap::from([(0, LimitType::Zero)]))
        );
    }
}
