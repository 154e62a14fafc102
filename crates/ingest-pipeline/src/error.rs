//! Pipeline Error Types

use telemetry_protocol::ParseError;
use thiserror::Error;

/// Errors raised by the ingestion pipeline.
///
/// Cloneable so the same error can be returned to a caller and broadcast to
/// observers.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Socket could not be bound
    #[error("Failed to bind UDP socket to port {port}: {reason}")]
    Bind { port: u16, reason: String },

    /// `start` called while already running
    #[error("Pipeline is already running")]
    AlreadyRunning,

    /// Operation needs a running pipeline
    #[error("Pipeline is not running")]
    NotRunning,

    /// OS refused to create a thread
    #[error("Failed to spawn {name} thread: {reason}")]
    Spawn { name: String, reason: String },

    /// Malformed frame
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Broker connection or subscription problem
    #[error("MQTT error: {0}")]
    Mqtt(String),

    /// Configuration could not be loaded or is invalid
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}
