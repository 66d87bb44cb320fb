use anomaly_engine::EngineError;
use serde_json::error::Category;
use thiserror::Error;

use crate::protocol::ErrorResponse;

/// Errors that can occur while handling a command
#[derive(Error, Debug)]
pub enum CommandError {
    /// No subcommand given
    #[error("No command provided. Use 'train', 'predict' or 'status'")]
    NoCommand,

    /// Subcommand is not recognised
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Training set below the configured floor
    #[error("Insufficient training data. Need at least {required} samples.")]
    InsufficientData { required: usize, received: usize },

    /// Predict requested before any model was trained
    #[error("Model not found. Please train the model first.")]
    ModelNotFound,

    /// Standard input is not valid JSON
    #[error("Malformed JSON input: {0}")]
    MalformedInput(String),

    /// JSON is valid but does not have the expected shape
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Validation, training, scoring or persistence failure
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Background training task did not complete
    #[error("Training task failed: {0}")]
    Task(String),
}

/// Result type alias using CommandError
pub type Result<T> = std::result::Result<T, CommandError>;

impl From<serde_json::Error> for CommandError {
    fn from(err: serde_json::Error) -> Self {
        match err.classify() {
            Category::Syntax | Category::Eof => CommandError::MalformedInput(err.to_string()),
            Category::Data | Category::Io => CommandError::InvalidPayload(err.to_string()),
        }
    }
}

impl CommandError {
    /// JSON object written to stdout for this failure
    pub fn to_response(&self) -> ErrorResponse {
        let received = match self {
            CommandError::InsufficientData { received, .. } => Some(*received),
            _ => None,
        };
        ErrorResponse {
            error: self.to_string(),
            received,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            CommandError::UnknownCommand("retrain".to_string()).to_string(),
            "Unknown command: retrain"
        );
        assert_eq!(
            CommandError::ModelNotFound.to_string(),
            "Model not found. Please train the model first."
        );
    }

    #[test]
    fn test_json_error_classification() {
        let syntax = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(CommandError::from(syntax), CommandError::MalformedInput(_)));

        let eof = serde_json::from_str::<serde_json::Value>("").unwrap_err();
        assert!(matches!(CommandError::from(eof), CommandError::MalformedInput(_)));

        let shape = serde_json::from_str::<Vec<f64>>("{\"a\": 1}").unwrap_err();
        assert!(matches!(CommandError::from(shape), CommandError::InvalidPayload(_)));
    }

    #[test]
    fn test_insufficient_data_response_carries_count() {
        let response = CommandError::InsufficientData {
            required: 10,
            received: 3,
        }
        .to_response();
        assert_eq!(
            response.error,
            "Insufficient training data. Need at least 10 samples."
        );
        assert_eq!(response.received, Some(3));

        assert_eq!(CommandError::ModelNotFound.to_response().received, None);
    }
}
