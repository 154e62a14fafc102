//! Telemetry State Store
//!
//! Holds the last known good value of every telemetry field and records
//! which fields changed so a periodic emitter can publish one coalesced
//! notification per field.

mod batch;
mod snapshot;
mod store;

pub use batch::{coalesce, ChangeBatch, FieldChange};
pub use snapshot::TelemetrySnapshot;
pub use store::{ApplyOutcome, PendingChange, StateStore, DEFAULT_MAX_PENDING};
