//! Anomaly Engine Library
//!
//! Isolation Forest scoring for per-entity request traffic: randomized tree
//! construction, path-length scoring, batch score normalization and
//! persistence of the trained model.

pub mod error;
pub mod features;
pub mod forest;
pub mod normalizer;
pub mod store;
pub mod tree;

// Re-export commonly used types
pub use error::{EngineError, Result};
pub use features::{parse_batch, FeatureVector};
pub use forest::{ForestParams, ForestSummary, IsolationForest, Label, MaxSamples};
pub use normalizer::normalize;
pub use store::ModelStore;
pub use tree::IsolationTree;
