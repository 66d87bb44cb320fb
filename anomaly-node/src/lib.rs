//! Anomaly Node Library
//!
//! Command surface for the traffic anomaly model: configuration, the JSON
//! protocol spoken over stdin/stdout, and the `train` / `predict` / `status`
//! handlers.

pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;

// Re-export commonly used types
pub use config::{DetectorConfig, LogFormat, LoggingConfig};
pub use error::CommandError;
pub use handler::{render_outcome, Command, CommandHandler};
pub use protocol::{ErrorResponse, Response};
