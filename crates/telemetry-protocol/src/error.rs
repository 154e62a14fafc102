//! Frame Decoding Error Types

use crate::field::Field;
use thiserror::Error;

/// Errors that can occur while decoding a telemetry frame
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// Payload bytes are not valid UTF-8
    #[error("Datagram is not valid UTF-8")]
    InvalidUtf8,

    /// Not enough comma-separated fields
    #[error("Datagram has incorrect format (expected {expected}+ parts, got {actual})")]
    FieldCount { expected: usize, actual: usize },

    /// A required field failed numeric conversion
    #[error("Failed to parse {field} from {raw:?}")]
    InvalidField { field: Field, raw: String },

    /// The decoder panicked on this payload
    #[error("Exception during parsing: {0}")]
    Fault(String),
}

impl ParseError {
    /// Short category label used for counters and log fields
    pub fn category(&self) -> &'static str {
        match self {
            ParseError::InvalidUtf8 => "invalid_utf8",
            ParseError::FieldCount { .. } => "field_count",
            ParseError::InvalidField { .. } => "invalid_field",
            ParseError::Fault(_) => "fault",
        }
    }
}
