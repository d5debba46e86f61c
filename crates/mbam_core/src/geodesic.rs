//! Geodesic records, online limit detection and the integrator session.

mod detector;
mod session;

use serde::{Deserialize, Serialize};

pub use detector::{threshold, DetectorStatus, IndexLimitMap, LimitDetector};
pub use session::{CancelToken, GeodesicSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeodesicStatus {
    Done,
    Exception,
}

/// One integrator step as streamed by the integrator. `t` and `tau` arrive
/// as one-element lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeodesicSample {
    #[serde(default)]
    pub t: Vec<f64>,
    #[serde(default)]
    pub tau: Vec<f64>,
    pub v: Vec<f64>,
    #[serde(default)]
    pub x: Vec<f64>,
}

/// Append-only trajectory of a geodesic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeodesicRecord {
    pub t: Vec<f64>,
    pub tau: Vec<f64>,
    pub v: Vec<Vec<f64>>,
    pub x: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<GeodesicStatus>,
}

impl GeodesicRecord {
    pub fn push(&mut self, sample: &GeodesicSample) {
        self.t.extend(sample.t.first());
        self.tau.extend(sample.tau.first());
        self.v.push(sample.v.clone());
        self.x.push(sample.x.clone());
    }

    pub fn len(&self) -> usize {
        self.v.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v.is_empty()
    }

    pub fn latest_velocity(&self) -> Option<&[f64]> {
        self.v.last().map(Vec::as_slice)
    }

    pub fn is_done(&self) -> bool {
        self.done.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_append_first_time_entries() {
        let sample: GeodesicSample =
            serde_json::from_str(r#"{"t": [0.5], "tau": [0.1], "v": [1.0, -2.0], "x": [0.0, 0.0]}"#)
                .unwrap();
        let mut record = GeodesicRecord::default();
        record.push(&sample);
        record.push(&sample);
        assert_eq!(record.t, vec![0.5, 0.5]);
        assert_eq!(record.len(), 2);
        assert_eq!(record.latest_velocity(), Some(&[1.0, -2.0][..]));
        assert!(!record.is_done());
    }

    #[test]
    fn status_serialises_lowercase() {
        let record = GeodesicRecord {
            done: Some(GeodesicStatus::Exception),
            ..GeodesicRecord::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["done"], "exception");
    }
}
