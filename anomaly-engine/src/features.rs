// Feature Vector for the traffic anomaly model
//
// Feature extraction happens upstream; this module only validates the
// vectors handed to the engine and fixes their ordering.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Per-entity traffic signature
///
/// Order matters! Must be consistent across training and inference.
/// Layout: [requests_per_minute, error_ratio, avg_time_between_requests, total_requests]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct FeatureVector([f64; FeatureVector::FEATURE_COUNT]);

impl FeatureVector {
    /// Number of features in the vector
    pub const FEATURE_COUNT: usize = 4;

    /// Build a vector from its named components
    pub fn new(
        requests_per_minute: f64,
        error_ratio: f64,
        avg_time_between_requests: f64,
        total_requests: f64,
    ) -> Result<Self> {
        Self::try_from_slice(&[
            requests_per_minute,
            error_ratio,
            avg_time_between_requests,
            total_requests,
        ])
    }

    /// Validate arity and finiteness of a raw slice
    pub fn try_from_slice(values: &[f64]) -> Result<Self> {
        if values.len() != Self::FEATURE_COUNT {
            return Err(EngineError::ArityMismatch {
                expected: Self::FEATURE_COUNT,
                actual: values.len(),
            });
        }

        let mut out = [0.0; Self::FEATURE_COUNT];
        for (i, (slot, &value)) in out.iter_mut().zip(values).enumerate() {
            if !value.is_finite() {
                return Err(EngineError::NonFinite {
                    feature: i,
                    name: Self::feature_names()[i],
                });
            }
            *slot = value;
        }

        Ok(Self(out))
    }

    /// Requests observed per minute
    pub fn requests_per_minute(&self) -> f64 {
        self.0[0]
    }

    /// Share of responses that were errors, in [0, 1] upstream
    pub fn error_ratio(&self) -> f64 {
        self.0[1]
    }

    /// Mean gap between consecutive requests
    pub fn avg_time_between_requests(&self) -> f64 {
        self.0[2]
    }

    /// Total requests in the observation window
    pub fn total_requests(&self) -> f64 {
        self.0[3]
    }

    pub fn as_array(&self) -> &[f64; Self::FEATURE_COUNT] {
        &self.0
    }

    /// Get feature names (for debugging/logging)
    pub fn feature_names() -> [&'static str; Self::FEATURE_COUNT] {
        [
            "requests_per_minute",
            "error_ratio",
            "avg_time_between_requests",
            "total_requests",
        ]
    }
}

impl AsRef<[f64]> for FeatureVector {
    fn as_ref(&self) -> &[f64] {
        &self.0
    }
}

impl TryFrom<Vec<f64>> for FeatureVector {
    type Error = EngineError;

    fn try_from(values: Vec<f64>) -> Result<Self> {
        Self::try_from_slice(&values)
    }
}

impl From<FeatureVector> for Vec<f64> {
    fn from(vector: FeatureVector) -> Self {
        vector.0.to_vec()
    }
}

/// Validate a batch of raw rows, reporting the first bad row by index
pub fn parse_batch(rows: &[Vec<f64>]) -> Result<Vec<FeatureVector>> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            FeatureVector::try_from_slice(row).map_err(|e| EngineError::InvalidRow {
                index,
                source: Box::new(e),
            })
        })
        .collect()
}
