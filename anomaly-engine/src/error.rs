use thiserror::Error;

/// Errors that can occur while building, scoring or persisting a forest
#[derive(Error, Debug)]
pub enum EngineError {
    /// Feature vector has the wrong number of components
    #[error("Feature vector has {actual} values, expected {expected}")]
    ArityMismatch { expected: usize, actual: usize },

    /// Feature vector component is NaN or infinite
    #[error("Feature {feature} ({name}) is not a finite number")]
    NonFinite { feature: usize, name: &'static str },

    /// A row in a batch failed validation
    #[error("Invalid feature vector at index {index}: {source}")]
    InvalidRow {
        index: usize,
        #[source]
        source: Box<EngineError>,
    },

    /// Training set is too small to grow meaningful trees
    #[error("Need at least {required} training samples, got {actual}")]
    TooFewSamples { required: usize, actual: usize },

    /// Forest parameters are out of range
    #[error("Invalid forest parameters: {0}")]
    InvalidParams(String),

    /// Persisted model could not be used
    #[error("Corrupt model artifact: {0}")]
    CorruptModel(String),

    /// Persisted model was written with a different schema
    #[error("Model schema version {found} is not supported (expected {expected}); retrain the model")]
    SchemaMismatch { expected: u32, found: u32 },

    /// Filesystem error while reading or writing the model
    #[error("Model store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}
