//! JSON objects exchanged over stdin/stdout
//!
//! Every invocation reads at most one request object and writes exactly one
//! response object on a single line.

use anomaly_engine::{ForestSummary, Label};
use serde::{Deserialize, Serialize};

/// Payload for `train`
#[derive(Debug, Clone, Deserialize)]
pub struct TrainRequest {
    pub training_data: Vec<Vec<f64>>,
}

/// Payload for `predict`
#[derive(Debug, Clone, Deserialize)]
pub struct PredictRequest {
    pub test_data: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainResponse {
    pub success: bool,
    pub message: String,
    pub samples_trained: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictResponse {
    pub success: bool,
    /// -1 = anomaly, 1 = normal
    pub predictions: Vec<Label>,
    /// Batch-relative, 0 = least anomalous, 1 = most anomalous
    pub scores: Vec<f64>,
}

impl PredictResponse {
    pub fn empty() -> Self {
        Self {
            success: true,
            predictions: Vec::new(),
            scores: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub model_trained: bool,
    pub model_path: String,
    pub model: Option<ForestSummary>,
}

/// Successful outcome of any command
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    Train(TrainResponse),
    Predict(PredictResponse),
    Status(StatusResponse),
}

/// Failure object; `received` is only set for undersized training sets
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<usize>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            received: None,
        }
    }
}
