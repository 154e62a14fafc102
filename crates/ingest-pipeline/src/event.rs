//! Observer-facing events

use crate::error::PipelineError;
use state_store::FieldChange;

/// Everything the pipeline tells its observers
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// A field settled on a new value during the last emit tick
    FieldChanged(FieldChange),
    /// Something went wrong; ingestion continues unless it was a bind failure
    Error(PipelineError),
}

impl TelemetryEvent {
    /// The change carried by this event, if any
    pub fn as_change(&self) -> Option<&FieldChange> {
        match self {
            TelemetryEvent::FieldChanged(change) => Some(change),
            TelemetryEvent::Error(_) => None,
        }
    }
}
