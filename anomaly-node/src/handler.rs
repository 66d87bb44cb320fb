// Command Handler
//
// Turns one `train` / `predict` / `status` invocation into exactly one
// response object. Training either completes and persists a full model or
// fails without touching the stored artifact.

use anomaly_engine::{normalize, parse_batch, IsolationForest, ModelStore};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::config::{DetectorConfig, MIN_TRAINING_SAMPLES};
use crate::error::{CommandError, Result};
use crate::protocol::{
    ErrorResponse, PredictRequest, PredictResponse, Response, StatusResponse, TrainRequest,
    TrainResponse,
};

/// Subcommand selected by the first CLI argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Train,
    Predict,
    Status,
}

impl Command {
    /// Parse the subcommand from the arguments following the program name
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        match args.first() {
            Some(arg) => arg.as_ref().parse(),
            None => Err(CommandError::NoCommand),
        }
    }

    /// Whether the command consumes a JSON payload on stdin
    pub fn reads_input(&self) -> bool {
        matches!(self, Command::Train | Command::Predict)
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Command::Train),
            "predict" => Ok(Command::Predict),
            "status" => Ok(Command::Status),
            "" => Err(CommandError::NoCommand),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }
}

/// Executes commands against a model store
pub struct CommandHandler {
    config: DetectorConfig,
    store: ModelStore,
}

impl CommandHandler {
    pub fn new(config: DetectorConfig, store: ModelStore) -> Self {
        Self { config, store }
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    pub async fn execute(&self, command: Command, input: &str) -> Result<Response> {
        debug!("Executing {:?} ({} bytes of input)", command, input.len());
        match command {
            Command::Train => self.train(input).await.map(Response::Train),
            Command::Predict => self.predict(input).map(Response::Predict),
            Command::Status => self.status().map(Response::Status),
        }
    }

    /// Fit a new forest and replace the stored model
    pub async fn train(&self, input: &str) -> Result<TrainResponse> {
        let request: TrainRequest = serde_json::from_str(input)?;

        let required = self.config.training.min_samples.max(MIN_TRAINING_SAMPLES);
        let received = request.training_data.len();
        if received < required {
            warn!("Not enough samples for training: {} < {}", received, required);
            return Err(CommandError::InsufficientData { required, received });
        }

        let vectors = parse_batch(&request.training_data)?;

        info!("🎓 Training Isolation Forest with {} samples", received);

        // CPU-bound: keep it off the async worker
        let params = self.config.forest.clone();
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || {
            let forest = IsolationForest::fit(&vectors, params)?;
            store.save(&forest)?;
            Ok::<_, CommandError>(())
        })
        .await
        .map_err(|e| CommandError::Task(e.to_string()))??;

        info!("✓ Model trained successfully and persisted");

        Ok(TrainResponse {
            success: true,
            message: "Model trained successfully".to_string(),
            samples_trained: received,
        })
    }

    /// Score a batch against the stored forest
    pub fn predict(&self, input: &str) -> Result<PredictResponse> {
        let request: PredictRequest = serde_json::from_str(input)?;

        if request.test_data.is_empty() {
            debug!("Empty prediction batch");
            return Ok(PredictResponse::empty());
        }

        let forest = self.store.load()?.ok_or(CommandError::ModelNotFound)?;
        let vectors = parse_batch(&request.test_data)?;

        let scores = forest.score_batch(&vectors)?;
        let predictions: Vec<_> = scores.iter().map(|&s| forest.label_for(s)).collect();

        // Decision-function orientation (lower = more anomalous) before normalizing
        let raw: Vec<f64> = scores.iter().map(|s| -s).collect();
        let normalized = normalize(&raw);

        let anomalies = predictions.iter().filter(|l| l.is_anomaly()).count();
        info!(
            "🔍 Scored {} samples ({} flagged as anomalous)",
            vectors.len(),
            anomalies
        );

        Ok(PredictResponse {
            success: true,
            predictions,
            scores: normalized,
        })
    }

    /// Report whether a model is stored and describe it
    pub fn status(&self) -> Result<StatusResponse> {
        let model = self.store.load()?.map(|forest| forest.summary());
        Ok(StatusResponse {
            success: true,
            model_trained: model.is_some(),
            model_path: self.store.path().display().to_string(),
            model,
        })
    }
}

/// Serialize an outcome as a single output line plus the process exit code
pub fn render_outcome(outcome: &std::result::Result<Response, ErrorResponse>) -> (String, i32) {
    let (json, code) = match outcome {
        Ok(response) => (serde_json::to_string(response), 0),
        Err(error) => (serde_json::to_string(error), 1),
    };

    match json {
        Ok(line) => (line, code),
        Err(e) => (
            format!("{{\"error\":{:?}}}", format!("Failed to serialize response: {e}")),
            1,
        ),
    }
}
